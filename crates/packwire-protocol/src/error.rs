//! Error types for the protocol layer.
//!
//! Each crate in packwire defines its own error enum. A `ProtocolError`
//! always means the bytes or the value tree were wrong, never that a socket
//! misbehaved.

use rmpv::Value;

use crate::MessageKind;

/// Errors that can occur while encoding, decoding, or validating frames.
///
/// Every variant is fatal to the read loop that hit it: once a stream has
/// produced a frame we cannot interpret, we no longer know where the next
/// frame starts.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a value tree into bytes).
    #[error("encode failed: {0}")]
    Encode(String),

    /// Deserialization failed (turning bytes into a value tree).
    ///
    /// Common causes: a truncated datagram, garbage on the socket, or
    /// trailing bytes after a complete frame in per-chunk mode.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The value decoded fine but is not a valid RPC message.
    ///
    /// The string names the offending payload so it shows up in logs.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The first array element is not a known discriminator.
    #[error("unknown message type: {0}")]
    UnknownMessageType(Value),

    /// A well-formed message arrived at the wrong role, e.g. a Request
    /// reaching a client.
    #[error("unexpected {kind} message on {role} side")]
    UnexpectedMessage {
        kind: MessageKind,
        role: &'static str,
    },

    /// More than `max` bytes were buffered without completing a frame.
    #[error("frame too large: {len} bytes buffered, limit is {max}")]
    FrameTooLarge { len: usize, max: usize },
}
