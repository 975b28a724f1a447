//! The RPC client.

#[cfg(unix)]
use std::path::PathBuf;
use std::time::Duration;

use packwire_protocol::Value;
use packwire_session::{CallError, Session};
use packwire_transport::{
    ClientTransport, ResponseSink, TcpClient, TransportConfig, UdpClient,
};
#[cfg(unix)]
use packwire_transport::UnixClient;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::PackwireError;

/// A connection to one packwire server over transport `T`.
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), packwire::PackwireError> {
/// use packwire::prelude::*;
///
/// let client = Client::tcp("127.0.0.1:4000");
/// client.connect().await?;
/// let greeting = client.call("hello", vec![]).await?;
/// client.notify("say", vec![Value::from("hi")])?;
/// client.close();
/// # Ok(())
/// # }
/// ```
pub struct Client<T> {
    session: Session<T>,
}

impl Client<TcpClient> {
    /// A TCP client for `addr` (`"host:port"`) with the default config.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::tcp_with_config(addr, TransportConfig::default())
    }

    /// A TCP client for `addr` with a custom config.
    pub fn tcp_with_config(addr: impl Into<String>, config: TransportConfig) -> Self {
        Self::new(|sink| TcpClient::new(addr, sink, config))
    }
}

#[cfg(unix)]
impl Client<UnixClient> {
    /// A Unix socket client for `path` with the default config.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::unix_with_config(path, TransportConfig::default())
    }

    /// A Unix socket client for `path` with a custom config.
    pub fn unix_with_config(path: impl Into<PathBuf>, config: TransportConfig) -> Self {
        Self::new(|sink| UnixClient::new(path, sink, config))
    }
}

impl Client<UdpClient> {
    /// A UDP client for `addr` with the default config (IPv4).
    pub fn udp(addr: impl Into<String>) -> Self {
        Self::udp_with_config(addr, TransportConfig::default())
    }

    /// A UDP client for `addr` with a custom config. Use
    /// [`AddressFamily::V6`](packwire_transport::AddressFamily::V6) for an
    /// IPv6 server.
    pub fn udp_with_config(addr: impl Into<String>, config: TransportConfig) -> Self {
        Self::new(|sink| UdpClient::new(addr, sink, config))
    }
}

impl<T: ClientTransport> Client<T> {
    /// A client over any transport. `build` receives the sink the
    /// transport must feed Responses into.
    pub fn new(build: impl FnOnce(ResponseSink) -> T) -> Self {
        Self {
            session: Session::new(build),
        }
    }

    /// The session behind this client.
    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Opens the connection (stream) or binds the local socket (datagram).
    pub async fn connect(&self) -> Result<(), PackwireError> {
        self.session.connect().await?;
        Ok(())
    }

    /// Calls `method` and waits for the result. See [`Session::call`].
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, CallError> {
        self.session.call(method, params).await
    }

    /// [`call`](Self::call) with a deadline.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        self.session.call_with_timeout(method, params, timeout).await
    }

    /// [`call`](Self::call) with serde conversion of params and result.
    pub async fn call_typed<P, R>(&self, method: &str, params: P) -> Result<R, CallError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.session.call_typed(method, params).await
    }

    /// Sends a Notify. Returns as soon as the frame is queued.
    pub fn notify(&self, method: &str, params: Vec<Value>) -> Result<(), CallError> {
        self.session.notify(method, params)
    }

    /// [`notify`](Self::notify) with serde conversion of params.
    pub fn notify_typed<P: Serialize>(&self, method: &str, params: P) -> Result<(), CallError> {
        self.session.notify_typed(method, params)
    }

    /// Closes the transport. Calling it twice is harmless.
    pub fn close(&self) {
        self.session.close();
    }
}
