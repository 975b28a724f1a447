//! TCP transport.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use packwire_protocol::CodecKind;
use tokio::net::{TcpListener, TcpStream};

use crate::stream::{StreamClientCore, StreamServerCore};
use crate::{
    ClientTransport, RequestSink, ResponseSink, ServerTransport,
    TransportConfig, TransportError,
};

// ---------------------------------------------------------------------------
// TcpServer
// ---------------------------------------------------------------------------

/// A TCP listener feeding a [`RequestHandler`](crate::RequestHandler).
pub struct TcpServer {
    core: Arc<StreamServerCore>,
    local_addr: SocketAddr,
}

impl TcpServer {
    /// Binds to `addr` (e.g. `"127.0.0.1:0"`) and starts accepting.
    pub async fn bind(
        addr: &str,
        sink: RequestSink,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        let local_addr = listener
            .local_addr()
            .map_err(TransportError::BindFailed)?;
        tracing::info!(%local_addr, "TCP transport listening");

        let core = StreamServerCore::new(sink, config);
        let task = tokio::spawn(accept_loop(listener, Arc::downgrade(&core)));
        core.set_accept_task(task);

        Ok(Self { core, local_addr })
    }
}

async fn accept_loop(listener: TcpListener, core: Weak<StreamServerCore>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let Some(core) = core.upgrade() else { break };
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(%addr, error = %e, "set_nodelay failed");
                }
                let (reader, writer) = stream.into_split();
                core.attach(reader, writer, &addr.to_string());
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
            }
        }
    }
}

impl ServerTransport for TcpServer {
    fn send_data(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.core.send_data(data)
    }

    fn close(&self) {
        self.core.close();
        tracing::info!(local_addr = %self.local_addr, "TCP transport closed");
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.core.close();
    }
}

// ---------------------------------------------------------------------------
// TcpClient
// ---------------------------------------------------------------------------

/// A TCP connection to a packwire server.
pub struct TcpClient {
    addr: String,
    core: StreamClientCore,
}

impl TcpClient {
    /// Creates an unconnected client for `addr` (e.g. `"127.0.0.1:3000"`).
    /// Nothing touches the network until [`connect`](ClientTransport::connect).
    pub fn new(
        addr: impl Into<String>,
        sink: ResponseSink,
        config: TransportConfig,
    ) -> Self {
        Self {
            addr: addr.into(),
            core: StreamClientCore::new(sink, config),
        }
    }
}

impl ClientTransport for TcpClient {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.core.is_connected() {
            return Ok(());
        }
        let stream = TcpStream::connect(self.addr.as_str())
            .await
            .map_err(TransportError::ConnectFailed)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(addr = %self.addr, error = %e, "set_nodelay failed");
        }
        let (reader, writer) = stream.into_split();
        self.core.attach(reader, writer, &self.addr);
        Ok(())
    }

    fn send_data(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.core.send_data(data)
    }

    fn close(&self) {
        self.core.close();
    }

    fn codec(&self) -> CodecKind {
        self.core.config().codec
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.core.close();
    }
}
