//! Session Controller error types.
//!
//! Error types map to wire `error` frame codes for client responses.
//! Internal details are logged server-side but not exposed to clients.

use common::MinorUnits;
use thiserror::Error;

/// Session Controller error type.
///
/// Maps to wire error codes:
/// - `Validation`: `INVALID_REQUEST` (1)
/// - `Authorization`: `UNAUTHORIZED` (2)
/// - `InsufficientFunds`: `INSUFFICIENT_FUNDS` (3)
/// - `Signaling`: `SIGNALING_ERROR` (4)
/// - `NotFound`: `NOT_FOUND` (5)
/// - `Conflict`: `CONFLICT` (6)
/// - `Connection`: `CONNECTION_FAILED` (7)
/// - `PaymentGateway`, `Store`, `Internal`: `INTERNAL_ERROR` (8)
/// - `Draining`: `UNAVAILABLE` (9)
#[derive(Debug, Error)]
pub enum ScError {
    /// Malformed or missing identifiers. Fails fast, no state mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A non-member attempted a relay or control action.
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Payer balance cannot cover the next interval.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: MinorUnits,
        available: MinorUnits,
    },

    /// Malformed negotiation payload or unresolvable target.
    /// Surfaced to the sender only; never touches session status.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Reconnection attempts exhausted; terminal for the session.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Charge or transfer failure. Pauses billing, never ends the session;
    /// retried only at the next natural tick boundary.
    #[error("Payment gateway error: {0}")]
    PaymentGateway(String),

    /// Persistent store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Session not found.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Conflict (e.g. a second initiator joining).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// SC is draining (graceful shutdown).
    #[error("SC is draining")]
    Draining,

    /// SC is at capacity (load shedding).
    #[error("SC at capacity")]
    CapacityExceeded,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScError {
    /// Returns the wire error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            ScError::Validation(_) => 1,
            ScError::Authorization(_) => 2,
            ScError::InsufficientFunds { .. } => 3,
            ScError::Signaling(_) => 4,
            ScError::SessionNotFound(_) => 5,
            ScError::Conflict(_) => 6,
            ScError::Connection(_) => 7,
            ScError::PaymentGateway(_) | ScError::Store(_) | ScError::Internal(_) => 8,
            ScError::Draining | ScError::CapacityExceeded => 9,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ScError::PaymentGateway(_) | ScError::Store(_) | ScError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            ScError::Validation(msg) | ScError::Signaling(msg) | ScError::Conflict(msg) => {
                msg.clone()
            }
            ScError::Authorization(_) => "Not a member of this session".to_string(),
            ScError::InsufficientFunds { .. } => {
                "Balance cannot cover the session rate".to_string()
            }
            ScError::Connection(_) => "Connection could not be re-established".to_string(),
            ScError::SessionNotFound(_) => "Session not found".to_string(),
            ScError::Draining => "Server is shutting down, please reconnect".to_string(),
            ScError::CapacityExceeded => "Server is at capacity, please try again".to_string(),
        }
    }

    /// Whether this error ends the session (always with a recorded reason).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScError::InsufficientFunds { .. } | ScError::Connection(_)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ScError::Validation("bad id".to_string()).error_code(), 1);
        assert_eq!(
            ScError::Authorization("not a member".to_string()).error_code(),
            2
        );
        assert_eq!(
            ScError::InsufficientFunds {
                required: 500,
                available: 200
            }
            .error_code(),
            3
        );
        assert_eq!(
            ScError::Signaling("unknown target".to_string()).error_code(),
            4
        );
        assert_eq!(
            ScError::SessionNotFound("abc".to_string()).error_code(),
            5
        );
        assert_eq!(
            ScError::Conflict("already joined".to_string()).error_code(),
            6
        );
        assert_eq!(
            ScError::Connection("exhausted".to_string()).error_code(),
            7
        );
        assert_eq!(
            ScError::PaymentGateway("card declined".to_string()).error_code(),
            8
        );
        assert_eq!(ScError::Store("timeout".to_string()).error_code(), 8);
        assert_eq!(ScError::Draining.error_code(), 9);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let gateway_err = ScError::PaymentGateway("stripe key sk_live_123 rejected".to_string());
        assert!(!gateway_err.client_message().contains("sk_live"));
        assert_eq!(gateway_err.client_message(), "An internal error occurred");

        let store_err = ScError::Store("postgres at 10.0.0.5 unreachable".to_string());
        assert!(!store_err.client_message().contains("10.0.0.5"));
    }

    #[test]
    fn test_terminal_errors() {
        assert!(ScError::InsufficientFunds {
            required: 500,
            available: 0
        }
        .is_terminal());
        assert!(ScError::Connection("exhausted".to_string()).is_terminal());
        // Gateway failures pause billing, they never end the session.
        assert!(!ScError::PaymentGateway("declined".to_string()).is_terminal());
        assert!(!ScError::Signaling("bad payload".to_string()).is_terminal());
    }
}
