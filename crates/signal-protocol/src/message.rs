//! Wire message types for the duplex signaling channel.
//!
//! Every frame carries a `type` discriminator plus the session it belongs
//! to. Negotiation payloads are opaque JSON values.

use chrono::{DateTime, Utc};
use common::{EndReason, MinorUnits, ParticipantId, Role, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw per-endpoint connectivity signal, as reported by an endpoint's
/// transport layer. The Connection Monitor collapses these into logical
/// states; nothing else in the system interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawConnectionSignal {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Kind of negotiation message the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
            SignalKind::Candidate => write!(f, "candidate"),
        }
    }
}

/// A negotiation message in flight through the relay.
///
/// Transient: relayed, never retained. `sent_at` is stamped at receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingMessage {
    pub kind: SignalKind,
    pub session_id: SessionId,
    pub sender_id: ParticipantId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ParticipantId>,
    pub payload: serde_json::Value,
    pub sent_at: DateTime<Utc>,
}

/// One frame on the duplex channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage {
    /// Membership change: a participant enters the session's relay room.
    JoinRoom {
        session_id: SessionId,
        sender_id: ParticipantId,
        role: Role,
    },

    /// Membership change: a participant leaves the relay room.
    LeaveRoom {
        session_id: SessionId,
        sender_id: ParticipantId,
    },

    /// Negotiation offer (opaque SDP payload).
    Offer {
        session_id: SessionId,
        sender_id: ParticipantId,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_id: Option<ParticipantId>,
        payload: serde_json::Value,
    },

    /// Negotiation answer (opaque SDP payload).
    Answer {
        session_id: SessionId,
        sender_id: ParticipantId,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_id: Option<ParticipantId>,
        payload: serde_json::Value,
    },

    /// Negotiation candidate (opaque ICE payload).
    Candidate {
        session_id: SessionId,
        sender_id: ParticipantId,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_id: Option<ParticipantId>,
        payload: serde_json::Value,
    },

    /// An endpoint reports its raw connection state to the monitor.
    ConnectionState {
        session_id: SessionId,
        sender_id: ParticipantId,
        state: RawConnectionSignal,
    },

    /// Lifecycle broadcast: the connection is live and billing has started.
    SessionStarted {
        session_id: SessionId,
        started_at: DateTime<Utc>,
    },

    /// Lifecycle broadcast: the session is settled.
    SessionEnded {
        session_id: SessionId,
        reason: EndReason,
        elapsed_minutes: i64,
        total_charged_minor: MinorUnits,
    },

    /// Balance/interval snapshot broadcast after every charge.
    BillingUpdate {
        session_id: SessionId,
        interval_index: u32,
        charged_minor: MinorUnits,
        balance_minor: MinorUnits,
        total_charged_minor: MinorUnits,
        ticked_at: DateTime<Utc>,
    },

    /// Explicit billing control: stop accruing without ending the session.
    PauseBilling {
        session_id: SessionId,
        sender_id: ParticipantId,
    },

    /// Explicit billing control: continue accruing (connection must be live).
    ResumeBilling {
        session_id: SessionId,
        sender_id: ParticipantId,
    },

    /// Server -> initiator: issue a restart offer (reconnection/rejoin).
    Renegotiate {
        session_id: SessionId,
        attempt: u32,
        restart: bool,
    },

    /// Error surfaced to the sender of a rejected frame.
    Error {
        session_id: SessionId,
        code: i32,
        message: String,
    },
}

impl WireMessage {
    /// The session this frame belongs to.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        match self {
            WireMessage::JoinRoom { session_id, .. }
            | WireMessage::LeaveRoom { session_id, .. }
            | WireMessage::Offer { session_id, .. }
            | WireMessage::Answer { session_id, .. }
            | WireMessage::Candidate { session_id, .. }
            | WireMessage::ConnectionState { session_id, .. }
            | WireMessage::SessionStarted { session_id, .. }
            | WireMessage::SessionEnded { session_id, .. }
            | WireMessage::BillingUpdate { session_id, .. }
            | WireMessage::PauseBilling { session_id, .. }
            | WireMessage::ResumeBilling { session_id, .. }
            | WireMessage::Renegotiate { session_id, .. }
            | WireMessage::Error { session_id, .. } => *session_id,
        }
    }

    /// Convert a negotiation frame into a [`SignalingMessage`] for the relay,
    /// stamping `sent_at` with the receipt time. Returns `None` for frames
    /// that are not offer/answer/candidate.
    #[must_use]
    pub fn into_signaling(self, received_at: DateTime<Utc>) -> Option<SignalingMessage> {
        let (kind, session_id, sender_id, target_id, payload) = match self {
            WireMessage::Offer {
                session_id,
                sender_id,
                target_id,
                payload,
            } => (SignalKind::Offer, session_id, sender_id, target_id, payload),
            WireMessage::Answer {
                session_id,
                sender_id,
                target_id,
                payload,
            } => (
                SignalKind::Answer,
                session_id,
                sender_id,
                target_id,
                payload,
            ),
            WireMessage::Candidate {
                session_id,
                sender_id,
                target_id,
                payload,
            } => (
                SignalKind::Candidate,
                session_id,
                sender_id,
                target_id,
                payload,
            ),
            _ => return None,
        };

        Some(SignalingMessage {
            kind,
            session_id,
            sender_id,
            target_id,
            payload,
            sent_at: received_at,
        })
    }
}

impl From<SignalingMessage> for WireMessage {
    fn from(msg: SignalingMessage) -> Self {
        match msg.kind {
            SignalKind::Offer => WireMessage::Offer {
                session_id: msg.session_id,
                sender_id: msg.sender_id,
                target_id: msg.target_id,
                payload: msg.payload,
            },
            SignalKind::Answer => WireMessage::Answer {
                session_id: msg.session_id,
                sender_id: msg.sender_id,
                target_id: msg.target_id,
                payload: msg.payload,
            },
            SignalKind::Candidate => WireMessage::Candidate {
                session_id: msg.session_id,
                sender_id: msg.sender_id,
                target_id: msg.target_id,
                payload: msg.payload,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tag_is_kebab_case() {
        let msg = WireMessage::JoinRoom {
            session_id: SessionId::new(),
            sender_id: ParticipantId::new(),
            role: Role::Initiator,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "join-room");
        assert_eq!(json["role"], "initiator");
    }

    #[test]
    fn test_into_signaling_preserves_sender() {
        let session_id = SessionId::new();
        let sender_id = ParticipantId::new();
        let target_id = ParticipantId::new();
        let now = Utc::now();

        let wire = WireMessage::Offer {
            session_id,
            sender_id,
            target_id: Some(target_id),
            payload: serde_json::json!({"sdp": "v=0"}),
        };

        let signaling = wire.into_signaling(now).unwrap();
        assert_eq!(signaling.kind, SignalKind::Offer);
        assert_eq!(signaling.sender_id, sender_id);
        assert_eq!(signaling.target_id, Some(target_id));
        assert_eq!(signaling.sent_at, now);
    }

    #[test]
    fn test_non_negotiation_frames_do_not_relay() {
        let wire = WireMessage::PauseBilling {
            session_id: SessionId::new(),
            sender_id: ParticipantId::new(),
        };
        assert!(wire.into_signaling(Utc::now()).is_none());
    }

    #[test]
    fn test_raw_signal_wire_names() {
        assert_eq!(
            serde_json::to_string(&RawConnectionSignal::Disconnected).unwrap(),
            "\"disconnected\""
        );
        let signal: RawConnectionSignal = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(signal, RawConnectionSignal::Completed);
    }
}
