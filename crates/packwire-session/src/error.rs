//! Error types for the session layer.

use std::time::Duration;

use packwire_protocol::{ProtocolError, Value, as_no_method_error};
use packwire_transport::TransportError;

/// Why a call did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The handler on the server failed. Carries the error value from the
    /// Response unchanged.
    #[error("remote error: {0}")]
    Remote(Value),

    /// The server has no handler for the method.
    #[error("{0}")]
    NoMethod(String),

    /// The frame could not be handed to the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The call could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No Response arrived within the deadline given to
    /// [`Session::call_with_timeout`](crate::Session::call_with_timeout).
    #[error("no response within {0:?}")]
    TimedOut(Duration),

    /// The pending entry was discarded before a Response arrived.
    #[error("call was dropped before a response arrived")]
    Dropped,

    /// Parameters or result did not match the requested Rust type.
    #[error("value conversion failed: {0}")]
    Conversion(String),
}

impl CallError {
    /// Classifies the error value of a Response.
    ///
    /// The server's "method not found" map becomes [`CallError::NoMethod`];
    /// everything else is passed through as [`CallError::Remote`].
    pub fn from_remote(error: Value) -> Self {
        match as_no_method_error(&error) {
            Some(message) => Self::NoMethod(message.to_string()),
            None => Self::Remote(error),
        }
    }

    /// The server's error value, for [`CallError::Remote`].
    pub fn remote_value(&self) -> Option<&Value> {
        match self {
            Self::Remote(value) => Some(value),
            _ => None,
        }
    }
}
