//! Signaling wire protocol for Tollgate.
//!
//! Wire messages travel over a duplex channel as newline-delimited JSON,
//! one message per line. Negotiation payloads (SDP offers/answers, ICE
//! candidates) are opaque to this crate: they are relayed, never interpreted.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;

pub use codec::{decode, encode, WireError, MAX_FRAME_BYTES};
pub use message::{RawConnectionSignal, SignalKind, SignalingMessage, WireMessage};
