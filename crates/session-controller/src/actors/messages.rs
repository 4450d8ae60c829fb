//! Message types for actor communication.

use crate::billing::Settlement;
use crate::errors::ScError;
use crate::monitor::LogicalConnectionState;
use common::{EndReason, MinorUnits, ParticipantId, Role, SessionId};
use signal_protocol::{RawConnectionSignal, SignalingMessage, WireMessage};
use tokio::sync::{mpsc, oneshot};

/// Messages sent to a `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// A participant joins the session's relay room.
    Join {
        participant_id: ParticipantId,
        role: Role,
        /// Outbound link for frames addressed to this participant.
        outbound: mpsc::Sender<WireMessage>,
        respond_to: oneshot::Sender<Result<JoinResult, ScError>>,
    },

    /// A participant leaves the relay room (explicit leave-room frame).
    Leave {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    /// A participant's transport dropped without an explicit leave.
    /// Relay bookkeeping only; liveness is the monitor's concern.
    PeerClosed { participant_id: ParticipantId },

    /// Relay a negotiation message. Errors surface to the sender only.
    Signal {
        message: SignalingMessage,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    /// An endpoint reports a raw connectivity signal.
    RawSignal {
        sender_id: ParticipantId,
        signal: RawConnectionSignal,
    },

    /// Explicit billing control: pause.
    PauseBilling {
        sender_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    /// Explicit billing control: resume (connection must be live).
    ResumeBilling {
        sender_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    /// End the session and settle it.
    EndSession {
        reason: EndReason,
        respond_to: oneshot::Sender<Result<Settlement, ScError>>,
    },

    /// Get current session state (for debugging/health).
    GetState {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },

    /// The billing interval elapsed (from the tick timer).
    BillingTickDue,

    /// The reconnection backoff delay elapsed (from the retry timer).
    ReconnectDue,

    /// The startup window elapsed without the connection going live.
    StartupDeadlineElapsed,
}

/// Result of joining a session.
#[derive(Debug, Clone)]
pub struct JoinResult {
    /// Current membership, the joiner included.
    pub members: Vec<MemberInfo>,
}

/// One member of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub participant_id: ParticipantId,
    pub role: Role,
}

/// Point-in-time session state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub connection_state: LogicalConnectionState,
    pub members: Vec<MemberInfo>,
    pub billing_active: bool,
    pub is_finalized: bool,
    pub total_charged_minor: MinorUnits,
    pub total_intervals: u32,
    pub balance_minor: MinorUnits,
    pub reconnect_attempts: u32,
}

/// Messages sent to the `SessionSupervisor`.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Get or create the session actor for a session id. Creation reads
    /// the session record and initializes billing; it fails before any
    /// signaling when the payer cannot afford one interval.
    OpenSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<super::SessionActorHandle, ScError>>,
    },

    /// Remove a session actor (after settlement, or to evict).
    RemoveSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    /// Get current supervisor status (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<SupervisorStatus>,
    },

    /// Initiate graceful shutdown.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },
}

/// Current status of the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub session_count: usize,
    pub is_draining: bool,
}
