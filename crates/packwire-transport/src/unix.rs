//! Unix domain socket transport.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use packwire_protocol::CodecKind;
use tokio::net::{UnixListener, UnixStream};

use crate::stream::{StreamClientCore, StreamServerCore};
use crate::{
    ClientTransport, RequestSink, ResponseSink, ServerTransport,
    TransportConfig, TransportError,
};

// ---------------------------------------------------------------------------
// UnixServer
// ---------------------------------------------------------------------------

/// A Unix socket listener feeding a
/// [`RequestHandler`](crate::RequestHandler).
///
/// The socket file is created on bind and removed on close.
pub struct UnixServer {
    core: Arc<StreamServerCore>,
    path: PathBuf,
}

impl UnixServer {
    /// Binds a socket at `path` and starts accepting.
    ///
    /// # Errors
    /// [`TransportError::AddressInUse`] if anything already exists at
    /// `path`. A stale socket left by a crashed process is indistinguishable
    /// from a live one here, so removing it is left to the caller.
    pub async fn bind(
        path: impl AsRef<Path>,
        sink: RequestSink,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(TransportError::AddressInUse(path));
        }
        let listener =
            UnixListener::bind(&path).map_err(TransportError::BindFailed)?;
        tracing::info!(path = %path.display(), "Unix transport listening");

        let core = StreamServerCore::new(sink, config);
        let task = tokio::spawn(accept_loop(listener, Arc::downgrade(&core)));
        core.set_accept_task(task);

        Ok(Self { core, path })
    }

    /// The filesystem path of the socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn shutdown(&self) -> bool {
        self.core.close();
        match std::fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove socket file"
                );
                false
            }
        }
    }
}

async fn accept_loop(listener: UnixListener, core: Weak<StreamServerCore>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let Some(core) = core.upgrade() else { break };
                let (reader, writer) = stream.into_split();
                core.attach(reader, writer, "unix peer");
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
            }
        }
    }
}

impl ServerTransport for UnixServer {
    fn send_data(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.core.send_data(data)
    }

    fn close(&self) {
        if self.shutdown() {
            tracing::info!(path = %self.path.display(), "Unix transport closed");
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Drop for UnixServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// UnixClient
// ---------------------------------------------------------------------------

/// A Unix socket connection to a packwire server.
pub struct UnixClient {
    path: PathBuf,
    core: StreamClientCore,
}

impl UnixClient {
    /// Creates an unconnected client for the socket at `path`.
    pub fn new(
        path: impl Into<PathBuf>,
        sink: ResponseSink,
        config: TransportConfig,
    ) -> Self {
        Self {
            path: path.into(),
            core: StreamClientCore::new(sink, config),
        }
    }
}

impl ClientTransport for UnixClient {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.core.is_connected() {
            return Ok(());
        }
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(TransportError::ConnectFailed)?;
        let (reader, writer) = stream.into_split();
        self.core
            .attach(reader, writer, &self.path.display().to_string());
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

impl Drop for UnixClient {
    fn drop(&mut self) {
        self.core.close();
    }
}
