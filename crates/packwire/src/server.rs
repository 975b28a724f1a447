//! The RPC server: one dispatcher behind any number of transports.

use std::future::Future;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use packwire_dispatch::{Dispatcher, Handlers};
use packwire_transport::{
    RequestSink, ServerTransport, TcpServer, TransportConfig, TransportError,
    UdpServer,
};
#[cfg(unix)]
use packwire_transport::UnixServer;

use crate::PackwireError;

/// Serves a set of methods over one or more listening transports.
///
/// Every transport shares the same [`Dispatcher`], so methods added with
/// [`serve`](Self::serve) become reachable everywhere at once.
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), packwire::PackwireError> {
/// use packwire::prelude::*;
///
/// let server = Server::new(
///     Handlers::new().sync_method("hello", |_| Ok(Value::from("world"))),
/// );
/// let addr = server.listen_tcp("127.0.0.1:0").await?;
/// println!("listening on {addr}");
/// # Ok(())
/// # }
/// ```
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    transports: Mutex<Vec<Box<dyn ServerTransport>>>,
}

impl Server {
    /// Creates a server with `handlers` registered and nothing listening.
    pub fn new(handlers: Handlers) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::with_handlers(handlers)),
            transports: Mutex::new(Vec::new()),
        }
    }

    /// Merges more methods into the registry. Later registrations replace
    /// earlier ones with the same name.
    pub fn serve(&self, handlers: Handlers) -> &Self {
        self.dispatcher.serve(handlers);
        self
    }

    /// The shared method registry.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn transports(&self) -> MutexGuard<'_, Vec<Box<dyn ServerTransport>>> {
        self.transports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sink(&self) -> RequestSink {
        Arc::clone(&self.dispatcher) as RequestSink
    }

    /// Starts a transport built by `bind` and keeps it until
    /// [`close`](Self::close).
    ///
    /// This is the hook for transports packwire doesn't ship: `bind` gets
    /// the sink that inbound Requests must be handed to.
    pub async fn listen<S, F, Fut>(&self, bind: F) -> Result<Option<SocketAddr>, PackwireError>
    where
        S: ServerTransport,
        F: FnOnce(RequestSink) -> Fut,
        Fut: Future<Output = Result<S, TransportError>>,
    {
        let transport = bind(self.sink()).await?;
        let local_addr = transport.local_addr();
        self.transports().push(Box::new(transport));
        Ok(local_addr)
    }

    /// Listens for TCP connections on `addr` with the default config and
    /// returns the bound address.
    pub async fn listen_tcp(&self, addr: &str) -> Result<SocketAddr, PackwireError> {
        self.listen_tcp_with_config(addr, TransportConfig::default()).await
    }

    /// [`listen_tcp`](Self::listen_tcp) with a custom config.
    pub async fn listen_tcp_with_config(
        &self,
        addr: &str,
        config: TransportConfig,
    ) -> Result<SocketAddr, PackwireError> {
        let bound = self
            .listen(|sink| TcpServer::bind(addr, sink, config))
            .await?;
        bound_addr(bound)
    }

    /// Listens on a Unix socket at `path` with the default config.
    ///
    /// Fails with [`TransportError::AddressInUse`] if `path` exists. The
    /// socket file is removed again on [`close`](Self::close).
    #[cfg(unix)]
    pub async fn listen_unix(&self, path: impl AsRef<Path>) -> Result<(), PackwireError> {
        self.listen_unix_with_config(path, TransportConfig::default()).await
    }

    /// [`listen_unix`](Self::listen_unix) with a custom config.
    #[cfg(unix)]
    pub async fn listen_unix_with_config(
        &self,
        path: impl AsRef<Path>,
        config: TransportConfig,
    ) -> Result<(), PackwireError> {
        self.listen(|sink| UnixServer::bind(path, sink, config)).await?;
        Ok(())
    }

    /// Listens for datagrams on `addr` with the default config and returns
    /// the bound address.
    ///
    /// Responses go to the first client heard from; see
    /// [`UdpServer`](packwire_transport::UdpServer).
    pub async fn listen_udp(&self, addr: &str) -> Result<SocketAddr, PackwireError> {
        self.listen_udp_with_config(addr, TransportConfig::default()).await
    }

    /// [`listen_udp`](Self::listen_udp) with a custom config.
    pub async fn listen_udp_with_config(
        &self,
        addr: &str,
        config: TransportConfig,
    ) -> Result<SocketAddr, PackwireError> {
        let bound = self
            .listen(|sink| UdpServer::bind(addr, sink, config))
            .await?;
        bound_addr(bound)
    }

    /// The address of the first listening transport that has one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transports()
            .iter()
            .find_map(|transport| transport.local_addr())
    }

    /// Closes every transport. Requests already being handled still finish,
    /// but their Responses have nowhere to go.
    pub fn close(&self) {
        let transports: Vec<_> = self.transports().drain(..).collect();
        if !transports.is_empty() {
            tracing::info!(count = transports.len(), "closing server transports");
        }
        for transport in transports {
            transport.close();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

fn bound_addr(bound: Option<SocketAddr>) -> Result<SocketAddr, PackwireError> {
    bound.ok_or_else(|| {
        TransportError::NoConnection("listener reported no local address".into()).into()
    })
}
