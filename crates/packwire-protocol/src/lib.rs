//! Wire protocol for packwire.
//!
//! This crate defines what travels between peers and nothing about how:
//!
//! - **Messages** ([`Message`], [`MessageKind`], [`MsgId`]): the Request,
//!   Response, and Notify frames and their array encoding.
//! - **Codecs** ([`Codec`], [`MsgpackCodec`], [`JsonCodec`], [`CodecKind`])
//!   turn value trees into bytes.
//! - **Framing** ([`FrameDecoder`]): finding frame boundaries in a byte
//!   stream.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Session / Dispatcher
//! ```

mod codec;
mod error;
mod frame;
mod message;

#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use codec::{Codec, CodecKind, FrameScan, MsgpackCodec};
pub use error::ProtocolError;
pub use frame::FrameDecoder;
pub use message::{
    Message, MessageKind, MsgId, NO_METHOD_ERROR, as_no_method_error,
    no_method_error,
};

/// The value tree every codec works on.
pub use rmpv::Value;
