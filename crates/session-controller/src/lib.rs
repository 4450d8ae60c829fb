//! Session Controller (SC) Service Library
//!
//! The Session Controller is the session-orchestration and metered-billing
//! service for Tollgate: it relays connection-negotiation messages between
//! the two members of a paid session, tracks the true liveness of the
//! resulting peer connection, and drives a per-interval charge that accrues
//! only while the connection is verified live.
//!
//! # Architecture
//!
//! The SC uses an actor model hierarchy:
//!
//! ```text
//! SessionSupervisor (singleton per SC instance)
//! └── supervises N SessionActors
//!     └── SessionActor (one per billed session)
//!         ├── owns the connection monitor, billing engine,
//!         │   and reconnection controller for its session
//!         └── owns one outbound link per connected peer
//! ```
//!
//! All within-session state transitions flow through the session actor's
//! mailbox, so a racing `connected` and `disconnected` can never be applied
//! out of order. Sessions never share mutable state except the
//! [`registry::SessionRegistry`], which serializes per session key.
//!
//! # Key Design Decisions
//!
//! - **Server-side authoritative billing**: the tick timer lives here, never
//!   in a client. Client frames can pause or resume billing but can never
//!   trigger a charge.
//! - **One cancellable task per timer concern**: billing tick, reconnection
//!   retry, and startup deadline are each a single scheduled task parented
//!   to the session's `CancellationToken`.
//! - **Collaborators behind traits**: persistence and payments are consumed
//!   through [`store::SessionStore`] and [`payment::PaymentGateway`].

#![warn(clippy::pedantic)]

pub mod actors;
pub mod billing;
pub mod config;
pub mod errors;
pub mod monitor;
pub mod observability;
pub mod payment;
pub mod reconnect;
pub mod registry;
pub mod server;
pub mod store;
pub mod tasks;
