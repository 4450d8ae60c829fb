//! Common data types for Tollgate components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Amounts of money in minor currency units (e.g. cents).
///
/// The ledger is integer math end to end; floats never touch billing.
pub type MinorUnits = i64;

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier for a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Create a new random participant ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role of a participant within a session.
///
/// Exactly one member per session is the [`Role::Initiator`] (the service
/// provider); the initiator creates offers and issues renegotiation restarts.
/// The paying client is always the [`Role::Responder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The rate-setting provider; creates offers.
    Initiator,
    /// The paying client; answers offers.
    Responder,
}

impl Role {
    /// Whether this role is responsible for creating offers.
    #[must_use]
    pub fn is_initiator(self) -> bool {
        matches!(self, Role::Initiator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// Lifecycle status of a session.
///
/// Transitions are monotonic: once a session reaches a terminal status
/// (`Ended`, `EndedInsufficientFunds`, `Cancelled`) it never moves back to a
/// non-terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Booking requested, not yet accepted by the provider.
    Requested,
    /// Accepted; signaling may begin.
    Accepted,
    /// Negotiation in progress, connection not yet live.
    Connecting,
    /// Connection live, billing accruing.
    Active,
    /// Connection degraded or billing explicitly paused.
    Paused,
    /// Settled normally.
    Ended,
    /// Settled because the payer could not afford the next interval.
    EndedInsufficientFunds,
    /// Ended before any billable service was delivered.
    Cancelled,
}

impl SessionStatus {
    /// Whether this status is terminal (no further transitions allowed).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Ended | SessionStatus::EndedInsufficientFunds | SessionStatus::Cancelled
        )
    }
}

/// Why a session ended.
///
/// Every session end records exactly one of these; a session never
/// disappears without a reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Ended by the system (normal completion).
    Ended,
    /// Ended explicitly by a participant.
    UserEnded,
    /// The payer could not afford the next interval.
    InsufficientFunds,
    /// Reconnection attempts exhausted, or the connection never became live.
    ConnectionFailed,
    /// Torn down before completion (e.g. service shutdown).
    Cancelled,
}

impl EndReason {
    /// The terminal [`SessionStatus`] this reason settles to.
    ///
    /// `billing_started` distinguishes a session that delivered billable
    /// service from one that never connected: a connection failure before
    /// the first live interval is a cancellation, not a normal end.
    #[must_use]
    pub fn terminal_status(self, billing_started: bool) -> SessionStatus {
        match self {
            EndReason::Ended | EndReason::UserEnded => {
                if billing_started {
                    SessionStatus::Ended
                } else {
                    SessionStatus::Cancelled
                }
            }
            EndReason::InsufficientFunds => SessionStatus::EndedInsufficientFunds,
            EndReason::ConnectionFailed => {
                if billing_started {
                    SessionStatus::Ended
                } else {
                    SessionStatus::Cancelled
                }
            }
            EndReason::Cancelled => SessionStatus::Cancelled,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::Ended => "ended",
            EndReason::UserEnded => "user_ended",
            EndReason::InsufficientFunds => "insufficient_funds",
            EndReason::ConnectionFailed => "connection_failed",
            EndReason::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
        assert_ne!(ParticipantId::new(), ParticipantId::new());
    }

    #[test]
    fn test_role_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&Role::Initiator).unwrap(),
            "\"initiator\""
        );
        let role: Role = serde_json::from_str("\"responder\"").unwrap();
        assert_eq!(role, Role::Responder);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::Ended.is_terminal());
        assert!(SessionStatus::EndedInsufficientFunds.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
        assert!(!SessionStatus::Connecting.is_terminal());
    }

    #[test]
    fn test_end_reason_status_mapping() {
        assert_eq!(
            EndReason::UserEnded.terminal_status(true),
            SessionStatus::Ended
        );
        assert_eq!(
            EndReason::UserEnded.terminal_status(false),
            SessionStatus::Cancelled
        );
        assert_eq!(
            EndReason::InsufficientFunds.terminal_status(true),
            SessionStatus::EndedInsufficientFunds
        );
        // A session that never went live settles as cancelled, never ended.
        assert_eq!(
            EndReason::ConnectionFailed.terminal_status(false),
            SessionStatus::Cancelled
        );
        assert_eq!(
            EndReason::ConnectionFailed.terminal_status(true),
            SessionStatus::Ended
        );
    }

    #[test]
    fn test_end_reason_wire_format() {
        assert_eq!(
            serde_json::to_string(&EndReason::InsufficientFunds).unwrap(),
            "\"insufficient_funds\""
        );
        assert_eq!(EndReason::ConnectionFailed.to_string(), "connection_failed");
    }
}
