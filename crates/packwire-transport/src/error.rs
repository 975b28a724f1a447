use std::path::PathBuf;

use packwire_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No peer is reachable: never connected, still connecting, the
    /// connection died, or (datagram server) no client has spoken yet.
    #[error("no connection: {0}")]
    NoConnection(String),

    /// A Unix socket path already exists. Stale sockets are never unlinked
    /// on the caller's behalf.
    #[error("address in use: {}", .0.display())]
    AddressInUse(PathBuf),

    /// Binding a listener or datagram socket failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Opening a stream to the server failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Writing data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The peer sent something that is not a valid frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
