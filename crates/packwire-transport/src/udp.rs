//! UDP transport.
//!
//! There is no connection to establish and no byte stream to reassemble:
//! every datagram carries exactly one frame and is decoded on its own.
//! Datagrams can be lost or reordered; a lost Request or Response simply
//! means the call never completes.
//!
//! # Single-peer server
//!
//! [`UdpServer`] remembers the source address of the first datagram it
//! receives and sends every Response there. A second client talking to the
//! same server socket gets its requests served but never sees the replies.
//! Run one server socket per client if that matters.
//!
//! # Failing fast
//!
//! A datagram that does not decode to a valid message, from any sender,
//! ends the server's receive loop. From then on the server counts as closed:
//! [`send_data`](ServerTransport::send_data) returns
//! [`TransportError::NoConnection`] and no further datagrams are read.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use packwire_protocol::{CodecKind, Message};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::route::Route;
use crate::{
    AddressFamily, ClientTransport, RequestSink, Responder, ResponseSink,
    ServerTransport, TransportConfig, TransportError, lock,
};

/// Resolves `addr` and picks the first address of the wanted family.
async fn resolve(
    addr: &str,
    family: AddressFamily,
) -> Result<SocketAddr, io::Error> {
    tokio::net::lookup_host(addr)
        .await?
        .find(|candidate| family.matches(candidate))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{addr} has no {family:?} address"),
            )
        })
}

/// Reads datagrams until the socket fails hard or a frame is invalid.
///
/// `on_datagram` sees the source of every datagram before it is decoded.
async fn recv_loop(
    socket: &UdpSocket,
    config: &TransportConfig,
    route: &Route,
    responder: &Responder,
    mut on_datagram: impl FnMut(SocketAddr),
) -> Result<(), TransportError> {
    let mut buf = vec![0u8; config.max_datagram_len.max(1)];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            // ICMP errors from earlier sends surface here on some platforms;
            // they say nothing about the next datagram.
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                tracing::debug!(error = %e, "ignoring datagram error");
                continue;
            }
            Err(e) => return Err(TransportError::ReceiveFailed(e)),
        };
        on_datagram(from);
        let message = Message::decode(&config.codec, &buf[..n])?;
        route.deliver(message, responder)?;
    }
}

// ---------------------------------------------------------------------------
// UdpServer
// ---------------------------------------------------------------------------

/// A UDP socket feeding a [`RequestHandler`](crate::RequestHandler).
pub struct UdpServer {
    local_addr: SocketAddr,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    /// Set by the reader when its loop ends on an error.
    stopped: Arc<AtomicBool>,
}

impl UdpServer {
    /// Binds to `addr` (e.g. `"127.0.0.1:4000"`, or `"[::1]:4000"` with
    /// [`AddressFamily::V6`]) and starts receiving.
    pub async fn bind(
        addr: &str,
        sink: RequestSink,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let bind_addr = resolve(addr, config.family)
            .await
            .map_err(TransportError::BindFailed)?;
        let socket = Arc::new(
            UdpSocket::bind(bind_addr)
                .await
                .map_err(TransportError::BindFailed)?,
        );
        let local_addr =
            socket.local_addr().map_err(TransportError::BindFailed)?;
        tracing::info!(%local_addr, "UDP transport listening");

        let peer = Arc::new(Mutex::new(None));
        let (outbound, queue) = mpsc::unbounded_channel();

        let writer = tokio::spawn(server_write_loop(
            Arc::clone(&socket),
            queue,
            Arc::clone(&peer),
        ));

        let responder = Responder::new(outbound.clone(), config.codec);
        let learned = Arc::clone(&peer);
        let stopped = Arc::new(AtomicBool::new(false));
        let failed = Arc::clone(&stopped);
        let reader = tokio::spawn(async move {
            let route = Route::Server(sink);
            let result =
                recv_loop(&socket, &config, &route, &responder, |from| {
                    learn_peer(&learned, from);
                })
                .await;
            if let Err(e) = result {
                failed.store(true, Ordering::SeqCst);
                tracing::error!(%local_addr, error = %e, "UDP read loop stopped");
            }
        });

        Ok(Self {
            local_addr,
            peer,
            outbound,
            tasks: Mutex::new(vec![reader, writer]),
            closed: AtomicBool::new(false),
            stopped,
        })
    }

    /// The peer every Response goes to, once one has been seen.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *lock(&self.peer)
    }

    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        true
    }
}

/// The first source address wins and is never replaced.
fn learn_peer(peer: &Mutex<Option<SocketAddr>>, from: SocketAddr) {
    let mut peer = lock(peer);
    match *peer {
        None => {
            tracing::debug!(%from, "learned datagram peer");
            *peer = Some(from);
        }
        Some(known) if known != from => {
            tracing::debug!(
                %from,
                %known,
                "datagram from a second peer, replies still go to the first"
            );
        }
        Some(_) => {}
    }
}

async fn server_write_loop(
    socket: Arc<UdpSocket>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    peer: Arc<Mutex<Option<SocketAddr>>>,
) {
    while let Some(bytes) = queue.recv().await {
        let Some(target) = *lock(&peer) else {
            tracing::debug!("dropping frame, no datagram peer yet");
            continue;
        };
        if let Err(e) = socket.send_to(&bytes, target).await {
            tracing::warn!(%target, error = %e, "datagram send failed");
        }
    }
}

impl ServerTransport for UdpServer {
    fn send_data(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NoConnection("server is closed".into()));
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(TransportError::NoConnection(
                "receive loop has stopped".into(),
            ));
        }
        if lock(&self.peer).is_none() {
            return Err(TransportError::NoConnection(
                "no datagram peer has been seen yet".into(),
            ));
        }
        self.outbound.send(data).map_err(|_| {
            TransportError::NoConnection("server is closed".into())
        })
    }

    fn close(&self) {
        if self.shutdown() {
            tracing::info!(local_addr = %self.local_addr, "UDP transport closed");
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// UdpClient
// ---------------------------------------------------------------------------

struct DatagramLink {
    local_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// A UDP client that sends every frame to one fixed server address.
pub struct UdpClient {
    addr: String,
    sink: ResponseSink,
    config: TransportConfig,
    link: Mutex<Option<DatagramLink>>,
}

impl UdpClient {
    /// Creates a client targeting `addr`. The local socket is bound by
    /// [`connect`](ClientTransport::connect), using
    /// [`TransportConfig::family`].
    pub fn new(
        addr: impl Into<String>,
        sink: ResponseSink,
        config: TransportConfig,
    ) -> Self {
        Self {
            addr: addr.into(),
            sink,
            config,
            link: Mutex::new(None),
        }
    }

    /// The local socket address, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.link).as_ref().map(|link| link.local_addr)
    }
}

impl ClientTransport for UdpClient {
    async fn connect(&self) -> Result<(), TransportError> {
        if lock(&self.link).is_some() {
            return Ok(());
        }
        let target = resolve(&self.addr, self.config.family)
            .await
            .map_err(TransportError::ConnectFailed)?;
        let socket = Arc::new(
            UdpSocket::bind(self.config.family.unspecified())
                .await
                .map_err(TransportError::BindFailed)?,
        );
        let local_addr =
            socket.local_addr().map_err(TransportError::BindFailed)?;
        tracing::debug!(%target, %local_addr, "UDP client ready");

        let (outbound, mut queue) = mpsc::unbounded_channel::<Vec<u8>>();
        let send_socket = Arc::clone(&socket);
        let writer = tokio::spawn(async move {
            while let Some(bytes) = queue.recv().await {
                if let Err(e) = send_socket.send_to(&bytes, target).await {
                    tracing::warn!(%target, error = %e, "datagram send failed");
                }
            }
        });

        let responder = Responder::new(outbound.clone(), self.config.codec);
        let route = Route::Client(Arc::clone(&self.sink));
        let config = self.config.clone();
        let reader = tokio::spawn(async move {
            let result =
                recv_loop(&socket, &config, &route, &responder, |_| {}).await;
            if let Err(e) = result {
                tracing::error!(%target, error = %e, "UDP read loop stopped");
            }
        });

        let link = DatagramLink {
            local_addr,
            outbound,
            reader,
            writer,
        };
        // Lost a race with a concurrent connect: keep the first socket.
        let mut slot = lock(&self.link);
        if slot.is_some() {
            link.reader.abort();
            link.writer.abort();
        } else {
            *slot = Some(link);
        }
        Ok(())
    }

    fn send_data(&self, data: Vec<u8>) -> Result<(), TransportError> {
        match lock(&self.link).as_ref() {
            Some(link) => link.outbound.send(data).map_err(|_| {
                TransportError::NoConnection("datagram socket is closed".into())
            }),
            None => Err(TransportError::NoConnection(
                "client is not connected".into(),
            )),
        }
    }

    fn close(&self) {
        if let Some(link) = lock(&self.link).take() {
            tracing::debug!(addr = %self.addr, "closing UDP client");
            // The writer exits on its own once the queue is drained and
            // every sender, including the reader's responder, is gone.
            link.reader.abort();
            drop(link.outbound);
            drop(link.writer);
        }
    }

    fn codec(&self) -> CodecKind {
        self.config.codec
    }
}

impl Drop for UdpClient {
    fn drop(&mut self) {
        self.close();
    }
}
