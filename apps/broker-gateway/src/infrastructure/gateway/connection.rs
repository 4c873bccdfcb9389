//! Gateway session lifecycle.
//!
//! `GatewayConnection` exclusively owns the vendor session. It guards every
//! handshake with the circuit breaker, re-establishes dropped sessions under
//! the reconnect policy, and serializes outbound writes through a single
//! writer lock. Each session gets one listener task running the
//! [`EventDispatcher`].
//!
//! # Lifecycle
//!
//! ```text
//! DISCONNECTED → CONNECTING → CONNECTED
//! CONNECTED → RECONNECTING (unsolicited drop) → CONNECTING → ...
//! any → DISCONNECTED (disconnect, shutdown, reconnect exhausted)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{EventDispatcher, SessionEnd};
use super::pending::PendingRequests;
use crate::application::ports::{
    GatewayEndpoint, VendorClient, VendorError, VendorEvent, VendorRequest,
};
use crate::domain::{ConnectionEvent, ConnectionSnapshot, ConnectionStatus, CorrelationId};
use crate::error::GatewayError;
use crate::infrastructure::metrics::{self, MetricsRecorder};
use crate::infrastructure::resilience::{CallPermit, CircuitBreaker, ReconnectPolicy};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
struct Session {
    id: u64,
    cancel: CancellationToken,
    listener: JoinHandle<()>,
}

#[derive(Debug)]
struct ConnectionState {
    status: ConnectionStatus,
    attempt: u32,
    session: Option<Session>,
    last_connected_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    /// Bumped by every `disconnect`; background reconnects stop when it moves.
    disconnects: u64,
}

/// Owner of the gateway session.
pub struct GatewayConnection {
    vendor: Arc<dyn VendorClient>,
    endpoint: GatewayEndpoint,
    policy: ReconnectPolicy,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsRecorder>,
    pending: Arc<PendingRequests>,
    dispatcher: EventDispatcher,
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    /// Held for the whole of a connect loop: one loop at a time.
    connect_lock: tokio::sync::Mutex<()>,
    /// Single writer path to the vendor session.
    writer: tokio::sync::Mutex<()>,
    next_session_id: AtomicU64,
    shutdown: CancellationToken,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    this: Weak<Self>,
}

impl std::fmt::Debug for GatewayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConnection")
            .field("endpoint", &self.endpoint)
            .field("status", &self.state.lock().status)
            .finish_non_exhaustive()
    }
}

impl GatewayConnection {
    /// Create a connection in `DISCONNECTED`. Nothing is dialled until the
    /// first `connect` or `ensure_connected`.
    #[must_use]
    pub fn new(
        vendor: Arc<dyn VendorClient>,
        endpoint: GatewayEndpoint,
        policy: ReconnectPolicy,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsRecorder>,
        pending: Arc<PendingRequests>,
        dispatcher: EventDispatcher,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new_cyclic(|this| Self {
            vendor,
            endpoint,
            policy,
            breaker,
            metrics,
            pending,
            dispatcher,
            state: Mutex::new(ConnectionState {
                status: ConnectionStatus::Disconnected,
                attempt: 0,
                session: None,
                last_connected_at: None,
                last_error: None,
                disconnects: 0,
            }),
            events,
            connect_lock: tokio::sync::Mutex::new(()),
            writer: tokio::sync::Mutex::new(()),
            next_session_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            reconnect_task: Mutex::new(None),
            this: this.clone(),
        })
    }

    /// Endpoint this connection dials.
    #[must_use]
    pub const fn endpoint(&self) -> &GatewayEndpoint {
        &self.endpoint
    }

    /// Returns true if a session is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let state = self.state.lock();
        state.status == ConnectionStatus::Connected && state.session.is_some()
    }

    /// Point-in-time status.
    #[must_use]
    pub fn status(&self) -> ConnectionSnapshot {
        let state = self.state.lock();
        ConnectionSnapshot {
            status: state.status,
            attempt: state.attempt,
            session_id: state.session.as_ref().map(|s| s.id),
            last_connected_at: state.last_connected_at,
            last_error: state.last_error.clone(),
        }
    }

    /// Subscribe to connection events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Make a single breaker-guarded connection attempt.
    ///
    /// No-op if already connected.
    ///
    /// # Errors
    ///
    /// `CircuitOpen` if the breaker denies the attempt, `Connection` if the
    /// handshake fails or times out.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        let result = self.connect_once(1).await;
        if result.is_err() {
            self.set_status(ConnectionStatus::Disconnected);
        }
        result
    }

    /// Return once a session is established, connecting (and backing off
    /// between attempts) if needed.
    ///
    /// # Errors
    ///
    /// `ReconnectExhausted` when the attempt budget is spent, `CircuitOpen`
    /// as soon as the breaker denies an attempt, or the raw `Connection`
    /// error when reconnection is disabled.
    pub async fn ensure_connected(&self) -> Result<(), GatewayError> {
        if self.is_connected() {
            return Ok(());
        }
        self.run_connect_loop(None).await
    }

    /// Release the session. Idempotent; always ends in `DISCONNECTED`.
    ///
    /// A background reconnect started before this call never connects
    /// afterwards.
    pub async fn disconnect(&self) {
        // Detached together with the bump so a listener reporting the loss
        // of this session cannot schedule a reconnect.
        let detached = {
            let mut state = self.state.lock();
            state.disconnects = state.disconnects.wrapping_add(1);
            state.session.take()
        };
        let task = self.reconnect_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        let _guard = self.connect_lock.lock().await;
        let (session, previous) = {
            let mut state = self.state.lock();
            let previous = state.status;
            state.status = ConnectionStatus::Disconnected;
            state.attempt = 0;
            (state.session.take(), previous)
        };
        metrics::set_connection_status(ConnectionStatus::Disconnected);

        let mut had_session = false;
        for session in detached.into_iter().chain(session) {
            had_session = true;
            session.cancel.cancel();
            if let Err(e) = session.listener.await {
                tracing::warn!(error = %e, "Session listener ended abnormally");
            }
        }
        self.vendor.disconnect().await;

        let failed = self.pending.fail_all(&GatewayError::ConnectionLost {
            reason: "connection closed by client".to_string(),
        });

        if had_session || previous != ConnectionStatus::Disconnected {
            tracing::info!(endpoint = %self.endpoint, failed_requests = failed, "Gateway disconnected");
            self.emit(ConnectionEvent::Disconnected);
        }
    }

    /// Stop background work and release the session.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.disconnect().await;
    }

    /// Write one request through the single writer path.
    ///
    /// # Errors
    ///
    /// `Connection` if no session is established or the vendor refuses the
    /// write, `ConnectionLost` on transport failure, `Unknown` on protocol
    /// errors.
    pub async fn send(
        &self,
        correlation_id: CorrelationId,
        request: VendorRequest,
    ) -> Result<(), GatewayError> {
        let _writer = self.writer.lock().await;
        if !self.is_connected() {
            return Err(GatewayError::connection("not connected to gateway"));
        }
        self.vendor
            .send(correlation_id, request)
            .await
            .map_err(|e| match e {
                VendorError::NotConnected | VendorError::ConnectionRefused { .. } => {
                    GatewayError::connection(e.to_string())
                }
                VendorError::Transport { message } => GatewayError::ConnectionLost { reason: message },
                VendorError::Protocol { message } => GatewayError::unknown(message),
            })
    }

    // =========================================================================
    // Connect loop
    // =========================================================================

    /// Attempt to connect until success, budget exhaustion or breaker denial.
    ///
    /// `background` carries the disconnect generation seen when a dropped
    /// session was detected. Such a loop sleeps `delay_for(0)` before its
    /// first attempt and gives up as soon as `disconnect` runs.
    async fn run_connect_loop(&self, background: Option<u64>) -> Result<(), GatewayError> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        let backoff_first = background.is_some();
        let superseded = || {
            background.is_some_and(|generation| self.state.lock().disconnects != generation)
        };
        if superseded() {
            return Err(GatewayError::connection("reconnect cancelled by disconnect"));
        }

        let budget = self.policy.attempt_budget();
        let mut attempts: u32 = 0;
        let mut last_error = GatewayError::connection("no connection attempt made");

        while budget.is_none_or(|b| attempts < b) {
            if backoff_first || attempts > 0 {
                let retry = if backoff_first { attempts } else { attempts - 1 };
                let delay = self.policy.jittered_delay_for(retry);
                {
                    let mut state = self.state.lock();
                    state.status = ConnectionStatus::Reconnecting;
                    state.attempt = attempts + 1;
                }
                metrics::set_connection_status(ConnectionStatus::Reconnecting);
                tracing::info!(
                    attempt = attempts + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Reconnecting to gateway"
                );
                self.emit(ConnectionEvent::Reconnecting {
                    attempt: attempts + 1,
                    delay,
                });

                tokio::select! {
                    () = self.shutdown.cancelled() => {
                        self.set_status(ConnectionStatus::Disconnected);
                        return Err(GatewayError::connection("gateway connection shut down"));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
                self.metrics.record_reconnect_attempt();
            }

            if superseded() {
                tracing::info!(endpoint = %self.endpoint, "Background reconnect cancelled by disconnect");
                self.set_status(ConnectionStatus::Disconnected);
                return Err(GatewayError::connection("reconnect cancelled by disconnect"));
            }

            attempts += 1;
            match self.connect_once(attempts).await {
                Ok(()) => return Ok(()),
                Err(GatewayError::CircuitOpen) => {
                    self.set_status(ConnectionStatus::Disconnected);
                    return Err(GatewayError::CircuitOpen);
                }
                Err(e) => last_error = e,
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        if !self.policy.is_enabled() {
            return Err(last_error);
        }

        tracing::error!(
            endpoint = %self.endpoint,
            attempts,
            last_error = %last_error,
            "Gateway reconnect exhausted"
        );
        self.emit(ConnectionEvent::ReconnectFailed { attempts });
        Err(GatewayError::ReconnectExhausted { attempts })
    }

    /// One breaker-guarded handshake. Caller holds `connect_lock`.
    async fn connect_once(&self, attempt: u32) -> Result<(), GatewayError> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::connection("gateway connection shut down"));
        }
        let Some(permit) = self.breaker.try_acquire() else {
            self.metrics.record_circuit_rejection("connect");
            tracing::warn!(endpoint = %self.endpoint, "Connect denied, circuit open");
            return Err(GatewayError::CircuitOpen);
        };

        {
            let mut state = self.state.lock();
            state.status = ConnectionStatus::Connecting;
            state.attempt = attempt;
        }
        metrics::set_connection_status(ConnectionStatus::Connecting);
        self.emit(ConnectionEvent::Connecting { attempt });

        // No session is installed here, so any vendor-side session is stale.
        if self.vendor.is_connected() {
            self.vendor.disconnect().await;
        }

        let timeout = self.endpoint.connect_timeout;
        match tokio::time::timeout(timeout, self.vendor.connect(&self.endpoint)).await {
            Ok(Ok(events)) => {
                self.breaker.record_success(permit);
                self.install_session(events);
                Ok(())
            }
            Ok(Err(e)) => Err(self.connect_failed(permit, attempt, e.to_string())),
            Err(_) => {
                self.vendor.disconnect().await;
                Err(self.connect_failed(
                    permit,
                    attempt,
                    format!("handshake timed out after {timeout:?}"),
                ))
            }
        }
    }

    fn connect_failed(&self, permit: CallPermit, attempt: u32, message: String) -> GatewayError {
        if self.breaker.record_failure(permit) {
            self.metrics.record_circuit_trip();
        }
        self.state.lock().last_error = Some(message.clone());
        tracing::warn!(
            endpoint = %self.endpoint,
            attempt,
            error = %message,
            "Gateway connect failed"
        );
        GatewayError::Connection { message }
    }

    fn install_session(&self, events: mpsc::Receiver<VendorEvent>) {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();

        let mut state = self.state.lock();
        if let Some(stale) = state.session.take() {
            stale.cancel.cancel();
        }

        let dispatcher = self.dispatcher.clone();
        let this = self.this.clone();
        let token = cancel.clone();
        let listener = tokio::spawn(async move {
            if let SessionEnd::Lost { reason } = dispatcher.run(events, token).await
                && let Some(connection) = this.upgrade()
            {
                connection.on_session_lost(id, reason);
            }
        });

        state.session = Some(Session {
            id,
            cancel,
            listener,
        });
        state.status = ConnectionStatus::Connected;
        state.attempt = 0;
        state.last_connected_at = Some(Utc::now());
        state.last_error = None;
        drop(state);

        metrics::set_connection_status(ConnectionStatus::Connected);
        tracing::info!(endpoint = %self.endpoint, session_id = id, "Gateway connected");
        self.emit(ConnectionEvent::Connected { session_id: id });
    }

    /// Called by a session listener when its session ends unexpectedly.
    fn on_session_lost(&self, session_id: u64, reason: String) {
        let reconnect = self.policy.is_enabled() && !self.shutdown.is_cancelled();
        let generation = {
            let mut state = self.state.lock();
            if state.session.as_ref().map(|s| s.id) != Some(session_id) {
                return;
            }
            // Detach: this runs on the listener task itself.
            state.session = None;
            state.status = if reconnect {
                ConnectionStatus::Reconnecting
            } else {
                ConnectionStatus::Disconnected
            };
            state.last_error = Some(reason.clone());
            state.disconnects
        };
        metrics::set_connection_status(if reconnect {
            ConnectionStatus::Reconnecting
        } else {
            ConnectionStatus::Disconnected
        });

        let failed = self.pending.fail_all(&GatewayError::ConnectionLost {
            reason: reason.clone(),
        });
        tracing::warn!(
            endpoint = %self.endpoint,
            session_id,
            failed_requests = failed,
            reason = %reason,
            "Gateway session lost"
        );
        self.emit(ConnectionEvent::ConnectionLost { reason });

        if !reconnect {
            return;
        }
        let Some(connection) = self.this.upgrade() else {
            return;
        };
        let task = tokio::spawn(async move {
            if let Err(e) = connection.run_connect_loop(Some(generation)).await {
                tracing::warn!(error = %e, "Background reconnect stopped");
            }
        });
        if let Some(previous) = self.reconnect_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.state.lock().status = status;
        metrics::set_connection_status(status);
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
