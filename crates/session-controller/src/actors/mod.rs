//! Actor model implementation.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`; request-reply uses `tokio::sync::oneshot`. One
//! session actor per billed session gives each session its serialized
//! transition sequence.

pub mod messages;
pub mod session;
pub mod supervisor;

pub use messages::{
    JoinResult, MemberInfo, SessionMessage, SessionSnapshot, SupervisorMessage, SupervisorStatus,
};
pub use session::{SessionActor, SessionActorHandle};
pub use supervisor::SessionSupervisorHandle;
