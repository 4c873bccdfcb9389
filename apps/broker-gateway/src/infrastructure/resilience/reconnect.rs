//! Reconnection Policy
//!
//! Exponential backoff for gateway reconnection. `delay_for` is a pure
//! function of the attempt index so the schedule is deterministic for a
//! fixed configuration; jitter is opt-in through `jittered_delay_for`.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Whether dropped sessions are re-established automatically.
    pub enabled: bool,
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each attempt).
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of connection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

/// Reconnection policy implementing capped exponential backoff.
///
/// # Example
///
/// ```rust
/// use broker_gateway::infrastructure::resilience::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert_eq!(policy.delay_for(0), Duration::from_secs(1));
/// assert_eq!(policy.delay_for(2), Duration::from_secs(4));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Returns true if dropped sessions should be re-established.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Backoff before retry number `attempt` (0-based):
    /// `base_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let base_millis = self.config.base_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = (base_millis * self.config.multiplier.powi(exponent)).round();

        let max_millis = self.config.max_delay.as_millis();
        let millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else if scaled.is_infinite() {
            max_millis
        } else {
            0
        };
        let capped = u64::try_from(millis.min(max_millis)).unwrap_or(u64::MAX);
        Duration::from_millis(capped)
    }

    /// `delay_for(attempt)` randomized by `±jitter_factor`.
    #[must_use]
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        self.apply_jitter(self.delay_for(attempt))
    }

    /// Total connection attempts allowed by one connect loop.
    ///
    /// `None` means unlimited. With reconnection disabled a loop makes one
    /// attempt.
    #[must_use]
    pub const fn attempt_budget(&self) -> Option<u32> {
        if !self.config.enabled {
            return Some(1);
        }
        match self.config.max_attempts {
            0 => None,
            n => Some(n),
        }
    }

    /// Check if another attempt is allowed after `attempts_made`.
    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        match self.attempt_budget() {
            None => true,
            Some(budget) => attempts_made < budget,
        }
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn policy(base_ms: u64, max_ms: u64, multiplier: f64, max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig {
            enabled: true,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
            max_attempts,
        })
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert!(config.enabled);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(60));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test_case(0, 1000 ; "first retry uses base")]
    #[test_case(1, 2000 ; "doubles")]
    #[test_case(2, 4000 ; "doubles again")]
    #[test_case(6, 60_000 ; "capped")]
    #[test_case(200, 60_000 ; "huge attempt stays capped")]
    fn exponential_schedule(attempt: u32, expected_ms: u64) {
        let policy = policy(1000, 60_000, 2.0, 0);
        assert_eq!(policy.delay_for(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn attempt_budget() {
        let limited = policy(100, 1000, 2.0, 3);
        assert_eq!(limited.attempt_budget(), Some(3));
        assert!(limited.should_retry(2));
        assert!(!limited.should_retry(3));

        let unlimited = policy(100, 1000, 2.0, 0);
        assert_eq!(unlimited.attempt_budget(), None);
        assert!(unlimited.should_retry(10_000));

        let disabled = ReconnectPolicy::new(ReconnectConfig {
            enabled: false,
            ..ReconnectConfig::default()
        });
        assert_eq!(disabled.attempt_budget(), Some(1));
        assert!(!disabled.should_retry(1));
    }

    #[test]
    fn jitter_bounds() {
        let policy = ReconnectPolicy::new(ReconnectConfig {
            jitter_factor: 0.1,
            ..ReconnectConfig::default()
        });
        for _ in 0..100 {
            let millis = policy.jittered_delay_for(0).as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    }

    proptest::proptest! {
        #[test]
        fn delay_is_monotonic_and_capped(
            base_ms in 1u64..5_000,
            max_ms in 1u64..120_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..64
        ) {
            let policy = policy(base_ms, max_ms, multiplier, 0);
            let current = policy.delay_for(attempt);
            let next = policy.delay_for(attempt + 1);
            proptest::prop_assert!(next >= current);
            proptest::prop_assert!(current <= Duration::from_millis(max_ms));
            proptest::prop_assert_eq!(current, policy.delay_for(attempt));
        }
    }
}
