//! Classified errors returned by the gateway layer.
//!
//! Callers never see raw vendor or transport errors. Every failure maps to a
//! [`GatewayError`] variant with a stable [`ErrorCode`].
//!
//! | Code | Retry policy |
//! |------|--------------|
//! | `CONNECTION_FAILED` | Request was never sent; safe to retry later |
//! | `CIRCUIT_OPEN` | Never retried automatically; back off |
//! | `RECONNECT_EXHAUSTED` | Fatal for this attempt; alert an operator |
//! | `TIMEOUT` | Read-only kinds may retry; mutating kinds must query status first |
//! | `REJECTED` | Vendor refused the operation; do not retry unchanged |
//! | `CONNECTION_LOST` | Same as `TIMEOUT` |
//! | `UNKNOWN` | Same as `TIMEOUT` |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CorrelationId, RequestKind};

/// Stable error codes exposed to upstream layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Handshake or transport failure.
    ConnectionFailed,
    /// Breaker denied the call.
    CircuitOpen,
    /// Reconnect budget spent.
    ReconnectExhausted,
    /// No response within the caller's deadline.
    Timeout,
    /// Vendor explicitly refused the operation.
    Rejected,
    /// Session dropped while the request was in flight.
    ConnectionLost,
    /// Unclassified.
    Unknown,
}

impl ErrorCode {
    /// Get the error reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::ReconnectExhausted => "RECONNECT_EXHAUSTED",
            Self::Timeout => "TIMEOUT",
            Self::Rejected => "REJECTED",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// Error returned by every gateway operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Handshake or transport failure.
    #[error("gateway connection failed: {message}")]
    Connection {
        /// Failure description.
        message: String,
    },

    /// Circuit breaker is open; the call was not attempted.
    #[error("circuit breaker open, gateway calls suspended")]
    CircuitOpen,

    /// Reconnect attempts exhausted.
    #[error("gateway reconnect exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// No response within the caller's deadline.
    #[error("{kind} request {correlation_id} timed out after {timeout:?}")]
    Timeout {
        /// Operation kind.
        kind: RequestKind,
        /// Correlation id of the evicted request.
        correlation_id: CorrelationId,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// Vendor refused the operation.
    #[error("{kind} rejected: {reason}")]
    Rejected {
        /// Operation kind.
        kind: RequestKind,
        /// Vendor error code, when one was supplied.
        code: Option<i32>,
        /// Vendor or local reason.
        reason: String,
    },

    /// Session dropped while the request was in flight.
    #[error("gateway connection lost: {reason}")]
    ConnectionLost {
        /// Reason reported for the drop.
        reason: String,
    },

    /// Unclassified failure.
    #[error("unknown gateway error: {message}")]
    Unknown {
        /// Failure description.
        message: String,
    },
}

impl GatewayError {
    /// Create a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a rejection.
    #[must_use]
    pub fn rejected(kind: RequestKind, reason: impl Into<String>) -> Self {
        Self::Rejected {
            kind,
            code: None,
            reason: reason.into(),
        }
    }

    /// Create an unclassified error.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Get the stable error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Connection { .. } => ErrorCode::ConnectionFailed,
            Self::CircuitOpen => ErrorCode::CircuitOpen,
            Self::ReconnectExhausted { .. } => ErrorCode::ReconnectExhausted,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Rejected { .. } => ErrorCode::Rejected,
            Self::ConnectionLost { .. } => ErrorCode::ConnectionLost,
            Self::Unknown { .. } => ErrorCode::Unknown,
        }
    }

    /// Message suitable for end users.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection { .. } | Self::CircuitOpen => {
                "broker unavailable, retry shortly".to_string()
            }
            Self::ReconnectExhausted { .. } => {
                "broker connection could not be re-established".to_string()
            }
            Self::Timeout { .. } | Self::ConnectionLost { .. } | Self::Unknown { .. } => {
                "broker did not confirm the request, check status before retrying".to_string()
            }
            Self::Rejected { reason, kind, .. } => match kind {
                RequestKind::PlaceOrder => format!("order rejected: {reason}"),
                RequestKind::CancelOrder => format!("cancel rejected: {reason}"),
                _ => format!("request rejected: {reason}"),
            },
        }
    }

    /// Returns true if the request provably never reached the vendor.
    #[must_use]
    pub const fn is_definitely_unsent(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::CircuitOpen | Self::ReconnectExhausted { .. }
        )
    }

    /// Returns true if this error says the vendor link is unhealthy.
    ///
    /// A rejection is a complete round trip and says nothing about the link.
    /// Breaker denials and exhaustion are outcomes of the breaker itself.
    #[must_use]
    pub const fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Timeout { .. }
                | Self::ConnectionLost { .. }
                | Self::Unknown { .. }
        )
    }

    /// Returns true if a caller may resubmit `kind` after this error without
    /// first checking vendor state.
    ///
    /// Breaker and exhaustion errors are never retryable. Mutating operations
    /// are retryable only when the request provably never left the process.
    #[must_use]
    pub const fn is_retryable_for(&self, kind: RequestKind) -> bool {
        match self {
            Self::CircuitOpen | Self::ReconnectExhausted { .. } | Self::Rejected { .. } => false,
            Self::Connection { .. } => true,
            Self::Timeout { .. } | Self::ConnectionLost { .. } | Self::Unknown { .. } => {
                !kind.is_mutating()
            }
        }
    }

    /// Convert to a serializable response body.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code(),
            message: self.to_string(),
            user_message: self.user_message(),
        }
    }
}

/// Serializable error body for upstream HTTP layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error code.
    pub code: ErrorCode,
    /// Technical message.
    pub message: String,
    /// End-user message.
    pub user_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn timeout(kind: RequestKind) -> GatewayError {
        GatewayError::Timeout {
            kind,
            correlation_id: CorrelationId::new(7),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn user_messages() {
        assert_eq!(
            GatewayError::CircuitOpen.user_message(),
            "broker unavailable, retry shortly"
        );
        assert_eq!(
            GatewayError::rejected(RequestKind::PlaceOrder, "insufficient margin").user_message(),
            "order rejected: insufficient margin"
        );
    }

    #[test_case(RequestKind::AccountQuery, true ; "read only")]
    #[test_case(RequestKind::MarketQuote, true ; "quote")]
    #[test_case(RequestKind::PlaceOrder, false ; "place order")]
    #[test_case(RequestKind::CancelOrder, false ; "cancel order")]
    fn timeout_retry_policy(kind: RequestKind, expected: bool) {
        assert_eq!(timeout(kind).is_retryable_for(kind), expected);
    }

    #[test]
    fn breaker_errors_are_never_retryable() {
        for kind in [RequestKind::AccountQuery, RequestKind::PlaceOrder] {
            assert!(!GatewayError::CircuitOpen.is_retryable_for(kind));
            assert!(!GatewayError::ReconnectExhausted { attempts: 3 }.is_retryable_for(kind));
        }
    }

    #[test]
    fn unsent_classification() {
        assert!(GatewayError::CircuitOpen.is_definitely_unsent());
        assert!(GatewayError::connection("refused").is_definitely_unsent());
        assert!(!timeout(RequestKind::PlaceOrder).is_definitely_unsent());
    }

    #[test]
    fn rejections_are_not_link_failures() {
        assert!(timeout(RequestKind::AccountQuery).is_link_failure());
        assert!(GatewayError::connection("refused").is_link_failure());
        assert!(
            GatewayError::ConnectionLost {
                reason: "reset".to_string()
            }
            .is_link_failure()
        );
        assert!(GatewayError::unknown("garbled").is_link_failure());

        assert!(!GatewayError::rejected(RequestKind::OrderStatus, "order not found").is_link_failure());
        assert!(!GatewayError::CircuitOpen.is_link_failure());
        assert!(!GatewayError::ReconnectExhausted { attempts: 3 }.is_link_failure());
    }

    #[test]
    fn display_and_response() {
        let err = timeout(RequestKind::OrderStatus);
        assert_eq!(err.to_string(), "order_status request 7 timed out after 1s");
        let body = err.to_response();
        assert_eq!(body.code, ErrorCode::Timeout);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "TIMEOUT");
    }
}
