//! Connection lifecycle states and events.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of the gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    /// No session.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Session established.
    Connected,
    /// Session dropped unexpectedly, reconnect loop running.
    Reconnecting,
}

impl ConnectionStatus {
    /// Numeric gauge value (0 disconnected, 1 connecting, 2 connected, 3 reconnecting).
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
        }
    }
}

/// Event broadcast to connection subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connect attempt started (1-based).
    Connecting {
        /// Attempt number.
        attempt: u32,
    },
    /// Session established.
    Connected {
        /// Session identifier, increments on every successful connect.
        session_id: u64,
    },
    /// Session released on request.
    Disconnected,
    /// Session dropped unexpectedly.
    ConnectionLost {
        /// Vendor-supplied reason.
        reason: String,
    },
    /// Waiting before the next reconnect attempt.
    Reconnecting {
        /// Attempt number about to be made (1-based).
        attempt: u32,
        /// Backoff delay before it.
        delay: Duration,
    },
    /// Reconnect budget spent.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
    },
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    /// Current status.
    pub status: ConnectionStatus,
    /// Current reconnect attempt count (0 when connected).
    pub attempt: u32,
    /// Active session identifier.
    pub session_id: Option<u64>,
    /// When the last session was established.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last connection error message.
    pub last_error: Option<String>,
}

impl ConnectionSnapshot {
    /// Returns true if a session is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}
