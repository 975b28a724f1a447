//! # packwire
//!
//! Transport-agnostic MessagePack-RPC for Tokio.
//!
//! A [`Server`] registers named methods and answers Requests over TCP, Unix
//! sockets, or UDP. A [`Client`] calls them, with any number of calls in
//! flight at once, and sends fire-and-forget Notifies.
//!
//! ```text
//! Client ── Session (ids, pending calls) ── ClientTransport
//!                                                │  [0, id, method, params]
//!                                                │  [1, id, error, result]
//!                                                │  [2, method, params]
//! Server ── Dispatcher (method registry) ── ServerTransport
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use packwire::prelude::*;
//!
//! # async fn demo() -> Result<(), PackwireError> {
//! let server = Server::new(
//!     Handlers::new()
//!         .sync_method("hello", |_| Ok(Value::from("world")))
//!         .typed("sum", |(a, b): (i64, i64)| async move { Ok::<_, String>(a + b) }),
//! );
//! let addr = server.listen_tcp("127.0.0.1:0").await?;
//!
//! let client = Client::tcp(addr.to_string());
//! client.connect().await?;
//! let sum: i64 = client.call_typed("sum", (3, 5)).await?;
//! assert_eq!(sum, 8);
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod server;

pub use client::Client;
pub use error::PackwireError;
pub use server::Server;

pub use packwire_dispatch as dispatch;
pub use packwire_protocol as protocol;
pub use packwire_session as session;
pub use packwire_transport as transport;

/// Everything needed to run a client or a server.
pub mod prelude {
    pub use crate::{Client, PackwireError, Server};
    pub use packwire_dispatch::{HandlerResult, Handlers};
    pub use packwire_protocol::{CodecKind, Value};
    pub use packwire_session::CallError;
    pub use packwire_transport::{
        AddressFamily, ClientTransport, FrameMode, ServerTransport, TcpClient,
        TransportConfig, TransportError, UdpClient,
    };
    #[cfg(unix)]
    pub use packwire_transport::UnixClient;
}
