//! Unified error type for packwire.

use packwire_protocol::ProtocolError;
use packwire_session::CallError;
use packwire_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum PackwireError {
    /// Binding, connecting, sending, or receiving failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A call failed.
    #[error(transparent)]
    Call(#[from] CallError),
}
