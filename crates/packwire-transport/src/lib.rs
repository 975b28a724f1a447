//! Transport layer for packwire.
//!
//! Provides the [`ClientTransport`] and [`ServerTransport`] traits plus three
//! implementations of each:
//!
//! | | stream | datagram |
//! |---|---|---|
//! | client | [`TcpClient`], [`UnixClient`] | [`UdpClient`] |
//! | server | [`TcpServer`], [`UnixServer`] | [`UdpServer`] |
//!
//! Transports move bytes and decode frames. They do not correlate calls or
//! look up methods: inbound messages are pushed into a [`RequestHandler`]
//! (server role) or a [`ResponseHandler`] (client role) through the shared
//! routing helpers in [`route_to_server`] and [`route_to_client`].
//!
//! Every socket is driven by a reader task and a writer task. `send_data`
//! only queues bytes for the writer, so it never blocks.

#![allow(async_fn_in_trait)]

mod config;
mod error;
mod route;
mod stream;
mod tcp;
mod udp;
#[cfg(unix)]
mod unix;

pub use config::{AddressFamily, FrameMode, TransportConfig};
pub use error::TransportError;
pub use route::{Responder, route_to_client, route_to_server};
pub use tcp::{TcpClient, TcpServer};
pub use udp::{UdpClient, UdpServer};
#[cfg(unix)]
pub use unix::{UnixClient, UnixServer};

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use packwire_protocol::{CodecKind, MsgId, Value};

/// Opaque identifier for a stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Inbound handlers
// ---------------------------------------------------------------------------

/// Receives Requests and Notifies decoded by a server-role transport.
///
/// Called from the transport's reader task. Implementations must return
/// quickly: long work belongs on a spawned task.
pub trait RequestHandler: Send + Sync + 'static {
    /// A Request arrived. The answer goes through `responder`.
    fn on_request(
        &self,
        id: MsgId,
        method: String,
        params: Vec<Value>,
        responder: Responder,
    );

    /// A Notify arrived. There is nobody to answer.
    fn on_notify(&self, method: String, params: Vec<Value>);
}

/// Receives Responses decoded by a client-role transport.
pub trait ResponseHandler: Send + Sync + 'static {
    /// A Response arrived. `error` is [`Value::Nil`] on success.
    fn on_response(&self, id: MsgId, error: Value, result: Value);
}

/// Shared handle to the server-side inbound handler.
pub type RequestSink = Arc<dyn RequestHandler>;

/// Shared handle to the client-side inbound handler.
pub type ResponseSink = Arc<dyn ResponseHandler>;

// ---------------------------------------------------------------------------
// Role contracts
// ---------------------------------------------------------------------------

/// The client role: connect, send frames, receive Responses.
pub trait ClientTransport: Send + Sync + 'static {
    /// Establishes whatever the transport needs before sending.
    ///
    /// Stream transports complete once the connection is open and fail if
    /// nobody is listening; calling again after a failure retries. Datagram
    /// transports only bind a local socket.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Queues an encoded frame for the server.
    ///
    /// # Errors
    /// [`TransportError::NoConnection`] if there is no live connection.
    fn send_data(&self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Releases the socket. Calling it twice is harmless.
    fn close(&self);

    /// The codec frames must be encoded with.
    fn codec(&self) -> CodecKind;
}

/// The server role: receive Requests and Notifies, send frames back.
///
/// Object safe, so a server can hold any transport as
/// `Box<dyn ServerTransport>`.
pub trait ServerTransport: Send + Sync + 'static {
    /// Queues an encoded frame for the current peer.
    ///
    /// # Errors
    /// [`TransportError::NoConnection`] if no peer is reachable.
    fn send_data(&self, data: Vec<u8>) -> Result<(), TransportError>;

    /// Stops accepting and releases the socket. Calling it twice is
    /// harmless.
    fn close(&self);

    /// The bound socket address, if the transport has one (Unix sockets
    /// don't).
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves the data consistent, so a
/// poisoned lock carries no broken invariant.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
