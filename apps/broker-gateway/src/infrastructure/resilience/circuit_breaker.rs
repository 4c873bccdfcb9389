//! Circuit breaker guarding calls to the brokerage gateway.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (consecutive failures >= failure_threshold)
//! OPEN → HALF_OPEN (cooldown elapsed since last failure; one trial admitted)
//! HALF_OPEN → CLOSED (trial succeeds)
//! HALF_OPEN → OPEN (trial fails; cooldown clock restarts)
//! ```
//!
//! Exactly one trial call is admitted per `HALF_OPEN` period. A trial that
//! never reports back is abandoned after another full cooldown and a new
//! trial is admitted.
//!
//! Every admitted call carries a [`CallPermit`] stamped with the breaker's
//! epoch. The epoch advances on every state change and on every new trial,
//! so outcomes reported against an older epoch are counted in the totals but
//! never move the state. Only the current trial decides `HALF_OPEN`.
//!
//! # Example
//!
//! ```rust
//! use broker_gateway::infrastructure::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new("gateway", CircuitBreakerConfig::default());
//! if let Some(permit) = breaker.try_acquire() {
//!     breaker.record_success(permit);
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed, calls flow normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// A single trial call is in flight.
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time to stay `OPEN` after the last failure.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Admission to make one call. Hand it back with the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the outcome must be reported with this permit"]
pub struct CallPermit {
    epoch: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitBreakerState,
    epoch: u64,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

impl BreakerState {
    fn enter(&mut self, state: CircuitBreakerState) {
        self.state = state;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// Circuit breaker for gateway calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Name for logging.
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    trips: AtomicU64,
    rejections: AtomicU64,
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitBreakerState::Closed,
                epoch: 0,
                failure_count: 0,
                last_failure_at: None,
                trial_started_at: None,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            trips: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Get the breaker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state.
    ///
    /// Reading the state never admits a trial; only [`Self::try_acquire`]
    /// moves `OPEN` to `HALF_OPEN`.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    /// Current consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Ask to make a call.
    ///
    /// Callers that receive `None` must fail fast.
    pub fn try_acquire(&self) -> Option<CallPermit> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let state = inner.state;

        let permit = match state {
            CircuitBreakerState::Closed => {
                return Some(CallPermit { epoch: inner.epoch });
            }
            CircuitBreakerState::Open => {
                let cooled = inner
                    .last_failure_at
                    .is_none_or(|at| now.duration_since(at) >= self.config.cooldown);
                if cooled {
                    inner.enter(CircuitBreakerState::HalfOpen);
                    inner.trial_started_at = Some(now);
                    let epoch = inner.epoch;
                    drop(inner);
                    self.state_transitions.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        name = %self.name,
                        from = "OPEN",
                        to = "HALF_OPEN",
                        "Circuit breaker testing"
                    );
                    Some(CallPermit { epoch })
                } else {
                    None
                }
            }
            CircuitBreakerState::HalfOpen => {
                let abandoned = inner
                    .trial_started_at
                    .is_none_or(|at| now.duration_since(at) >= self.config.cooldown);
                if abandoned {
                    // The abandoned trial's permit goes stale.
                    inner.epoch = inner.epoch.wrapping_add(1);
                    inner.trial_started_at = Some(now);
                    let epoch = inner.epoch;
                    drop(inner);
                    tracing::warn!(
                        name = %self.name,
                        "Half-open trial never reported, admitting a new trial"
                    );
                    Some(CallPermit { epoch })
                } else {
                    None
                }
            }
        };

        if permit.is_none() {
            self.rejections.fetch_add(1, Ordering::Relaxed);
        }
        permit
    }

    /// Record a successful call.
    pub fn record_success(&self, permit: CallPermit) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        if permit.epoch != inner.epoch {
            let state = inner.state;
            drop(inner);
            tracing::debug!(name = %self.name, state = %state, "Ignoring success from an earlier epoch");
            return;
        }
        let state = inner.state;
        match state {
            CircuitBreakerState::Closed => inner.failure_count = 0,
            CircuitBreakerState::HalfOpen => {
                inner.enter(CircuitBreakerState::Closed);
                inner.failure_count = 0;
                inner.trial_started_at = None;
                drop(inner);
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    name = %self.name,
                    from = "HALF_OPEN",
                    to = "CLOSED",
                    "Circuit breaker closed"
                );
            }
            // Entering OPEN always advances the epoch.
            CircuitBreakerState::Open => {}
        }
    }

    /// Record a failed call.
    ///
    /// Returns true if this failure opened the circuit.
    pub fn record_failure(&self, permit: CallPermit) -> bool {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        let mut inner = self.inner.lock();
        if permit.epoch != inner.epoch {
            let state = inner.state;
            drop(inner);
            tracing::debug!(name = %self.name, state = %state, "Ignoring failure from an earlier epoch");
            return false;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);

        let previous = inner.state;
        let trips = match previous {
            CircuitBreakerState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => false,
        };
        if !trips {
            return false;
        }

        inner.enter(CircuitBreakerState::Open);
        inner.trial_started_at = None;
        let failure_count = inner.failure_count;
        drop(inner);

        self.trips.fetch_add(1, Ordering::Relaxed);
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            name = %self.name,
            from = %previous,
            to = "OPEN",
            failure_count,
            cooldown_ms = u64::try_from(self.config.cooldown.as_millis()).unwrap_or(u64::MAX),
            "Circuit breaker opened"
        );
        true
    }

    /// Force the circuit breaker open (operator action or tests).
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.enter(CircuitBreakerState::Open);
        inner.failure_count = inner.failure_count.max(self.config.failure_threshold);
        inner.last_failure_at = Some(Instant::now());
        inner.trial_started_at = None;
        drop(inner);

        if previous != CircuitBreakerState::Open {
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(name = %self.name, from = %previous, to = "OPEN", "Circuit breaker forced open");
        }
    }

    /// Force the circuit breaker closed (operator recovery or tests).
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.enter(CircuitBreakerState::Closed);
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.trial_started_at = None;
        drop(inner);

        if previous != CircuitBreakerState::Closed {
            self.state_transitions.fetch_add(1, Ordering::Relaxed);
            tracing::info!(name = %self.name, from = %previous, to = "CLOSED", "Circuit breaker forced closed");
        }
    }

    /// Get metrics for this circuit breaker.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let (state, failure_count) = (inner.state, inner.failure_count);
        drop(inner);

        CircuitBreakerMetrics {
            name: self.name.clone(),
            state,
            failure_count,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            trips: self.trips.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
        }
    }
}

/// Metrics for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Consecutive failures.
    pub failure_count: u32,
    /// Calls whose outcome was recorded.
    pub total_calls: u64,
    /// Failed calls.
    pub total_failures: u64,
    /// Times the breaker opened.
    pub trips: u64,
    /// Calls denied.
    pub rejections: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown,
            },
        )
    }

    fn fail(breaker: &CircuitBreaker) -> bool {
        let permit = breaker.try_acquire().unwrap();
        breaker.record_failure(permit)
    }

    fn succeed(breaker: &CircuitBreaker) {
        let permit = breaker.try_acquire().unwrap();
        breaker.record_success(permit);
    }

    #[test]
    fn test_initial_state_is_closed() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(breaker.try_acquire().is_some());
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = breaker(5, Duration::from_secs(30));
        for _ in 0..4 {
            assert!(!fail(&breaker));
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);

        assert!(fail(&breaker));
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(breaker.try_acquire().is_none());
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let breaker = breaker(3, Duration::from_secs(30));
        fail(&breaker);
        fail(&breaker);
        succeed(&breaker);
        assert_eq!(breaker.failure_count(), 0);
        fail(&breaker);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_to_half_open_after_cooldown() {
        let breaker = breaker(2, Duration::from_secs(10));
        fail(&breaker);
        fail(&breaker);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(breaker.try_acquire().is_none());
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.try_acquire().is_some());
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert!(breaker.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes() {
        let breaker = breaker(2, Duration::from_secs(10));
        breaker.force_open();
        tokio::time::advance(Duration::from_secs(10)).await;

        let trial = breaker.try_acquire().unwrap();
        breaker.record_success(trial);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_failure_restarts_cooldown() {
        let breaker = breaker(2, Duration::from_secs(10));
        breaker.force_open();
        tokio::time::advance(Duration::from_secs(10)).await;
        let trial = breaker.try_acquire().unwrap();

        assert!(breaker.record_failure(trial));
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire().is_none());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_under_concurrency() {
        let breaker = Arc::new(breaker(1, Duration::from_secs(1)));
        fail(&breaker);
        tokio::time::advance(Duration::from_secs(1)).await;

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                tokio::spawn(async move { breaker.try_acquire().is_some() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(breaker.metrics().rejections, 31);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_is_replaced() {
        let breaker = breaker(1, Duration::from_secs(5));
        fail(&breaker);
        tokio::time::advance(Duration::from_secs(5)).await;
        let abandoned = breaker.try_acquire().unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(breaker.try_acquire().is_none());
        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        // The first trial reporting late decides nothing.
        assert!(!breaker.record_failure(abandoned));
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        breaker.record_success(trial);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stragglers_do_not_decide_half_open() {
        let breaker = breaker(1, Duration::from_secs(5));
        let straggler = breaker.try_acquire().unwrap();
        assert!(fail(&breaker));

        tokio::time::advance(Duration::from_secs(5)).await;
        let trial = breaker.try_acquire().unwrap();

        breaker.record_success(straggler);
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert!(!breaker.record_failure(straggler));
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        assert_eq!(breaker.metrics().trips, 1);

        assert!(breaker.record_failure(trial));
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert_eq!(breaker.metrics().trips, 2);
    }

    #[test]
    fn test_closed_era_failures_do_not_count_after_recovery() {
        let breaker = breaker(2, Duration::ZERO);
        let straggler = breaker.try_acquire().unwrap();
        fail(&breaker);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        succeed(&breaker);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);

        assert!(!breaker.record_failure(straggler));
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_metrics() {
        let breaker = breaker(2, Duration::from_secs(30));
        succeed(&breaker);
        fail(&breaker);
        fail(&breaker);
        assert!(breaker.try_acquire().is_none());

        let metrics = breaker.metrics();
        assert_eq!(metrics.name, "test");
        assert_eq!(metrics.state, CircuitBreakerState::Open);
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.total_failures, 2);
        assert_eq!(metrics.trips, 1);
        assert_eq!(metrics.rejections, 1);
    }

    #[test]
    fn test_force_open_and_close() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        let before = breaker.try_acquire().unwrap();
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(breaker.failure_count() >= breaker.config().failure_threshold);

        breaker.force_close();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(!breaker.record_failure(before));
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.try_acquire().is_some());
    }

    proptest::proptest! {
        #[test]
        fn opens_exactly_at_threshold(
            threshold in 1u32..10,
            outcomes in proptest::collection::vec(proptest::bool::ANY, 0..60)
        ) {
            let breaker = breaker(threshold, Duration::from_secs(3600));
            let mut consecutive = 0u32;
            let mut opened = false;

            for ok in outcomes {
                if opened {
                    break;
                }
                if ok {
                    succeed(&breaker);
                    consecutive = 0;
                } else {
                    consecutive += 1;
                    let tripped = fail(&breaker);
                    proptest::prop_assert_eq!(tripped, consecutive == threshold);
                    opened = tripped;
                }
                let expected = if consecutive >= threshold {
                    CircuitBreakerState::Open
                } else {
                    CircuitBreakerState::Closed
                };
                proptest::prop_assert_eq!(breaker.state(), expected);
            }
        }
    }
}
