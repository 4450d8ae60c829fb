//! Frame encoding for the newline-delimited JSON wire format.
//!
//! Each frame is one JSON document on one line. `serde_json` never emits
//! raw newlines inside a document, so encoded frames are always line-safe.

use crate::message::WireMessage;
use thiserror::Error;

/// Maximum accepted frame size. SDP payloads run a few KB; anything near
/// this limit is malformed or hostile.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Wire protocol errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame is not valid JSON or does not match the message set.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Frame exceeds [`MAX_FRAME_BYTES`].
    #[error("frame too large: {0} bytes")]
    Oversized(usize),
}

/// Encode a message as a single line (no trailing newline).
pub fn encode(message: &WireMessage) -> Result<String, WireError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode one line into a message.
pub fn decode(line: &str) -> Result<WireMessage, WireError> {
    if line.len() > MAX_FRAME_BYTES {
        return Err(WireError::Oversized(line.len()));
    }
    Ok(serde_json::from_str(line)?)
}
