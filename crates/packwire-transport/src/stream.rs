//! Plumbing shared by the TCP and Unix socket transports.
//!
//! Both are ordered byte streams, so everything past `accept`/`connect` is
//! identical: a [`PeerLink`] splits the socket into a reader task that
//! decodes and routes frames and a writer task that drains an outbound
//! queue. The server and client cores add the bookkeeping of which link is
//! currently usable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use packwire_protocol::{FrameDecoder, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use crate::route::Route;
use crate::{
    ConnectionId, FrameMode, RequestSink, Responder, ResponseSink,
    TransportConfig, TransportError, lock,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// PeerLink
// ---------------------------------------------------------------------------

/// One live stream connection: its outbound queue and its tasks.
pub(crate) struct PeerLink {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: Arc<Notify>,
    reader: JoinHandle<()>,
}

impl PeerLink {
    /// Spawns the reader and writer tasks for a freshly opened stream.
    ///
    /// `on_exit` runs on the reader task once the peer hangs up or the read
    /// loop fails. It does not run if the link is aborted.
    pub(crate) fn spawn<R, W>(
        reader: R,
        writer: W,
        route: Route,
        config: &TransportConfig,
        on_exit: impl FnOnce(ConnectionId) + Send + 'static,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        let (outbound, queue) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(write_loop(writer, queue, Arc::clone(&shutdown), id));

        let responder = Responder::new(outbound.clone(), config.codec);
        let config = config.clone();
        let stop_writer = Arc::clone(&shutdown);
        let reader = tokio::spawn(async move {
            match read_loop(reader, &config, &route, &responder).await {
                Ok(()) => tracing::debug!(%id, "peer closed the connection"),
                Err(e) => {
                    tracing::warn!(%id, error = %e, "read loop stopped");
                }
            }
            stop_writer.notify_one();
            on_exit(id);
        });

        Self {
            id,
            outbound,
            shutdown,
            reader,
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    /// A link is usable while both its reader and writer are running.
    pub(crate) fn is_alive(&self) -> bool {
        !self.outbound.is_closed() && !self.reader.is_finished()
    }

    pub(crate) fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::NoConnection(format!(
                "{} is closed",
                self.id
            )));
        }
        self.outbound.send(data).map_err(|_| {
            TransportError::NoConnection(format!("{} is closed", self.id))
        })
    }

    /// Flushes queued frames, then half-closes the write side. The reader
    /// keeps running until the peer hangs up, so late Responses still
    /// arrive.
    pub(crate) fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Like [`shutdown`](Self::shutdown), and stops reading immediately.
    pub(crate) fn abort(&self) {
        self.shutdown.notify_one();
        self.reader.abort();
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: Arc<Notify>,
    id: ConnectionId,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        // `biased` drains every queued frame before honouring a shutdown.
        tokio::select! {
            biased;
            frame = queue.recv() => match frame {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        tracing::warn!(%id, error = %e, "write failed");
                        return;
                    }
                }
                None => break,
            },
            () = shutdown.notified() => break,
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(%id, error = %e, "shutdown of write half failed");
    }
}

async fn read_loop<R>(
    mut reader: R,
    config: &TransportConfig,
    route: &Route,
    responder: &Responder,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; config.read_buffer_len.max(1)];
    let mut decoder = FrameDecoder::new(config.codec, config.max_frame_len);

    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            if decoder.buffered() > 0 {
                tracing::debug!(
                    bytes = decoder.buffered(),
                    "connection closed mid-frame"
                );
            }
            return Ok(());
        }

        match config.frame_mode {
            FrameMode::PerChunk => {
                let message = Message::decode(&config.codec, &chunk[..n])?;
                route.deliver(message, responder)?;
            }
            FrameMode::Incremental => {
                decoder.extend(&chunk[..n]);
                while let Some(message) = decoder.next_message()? {
                    route.deliver(message, responder)?;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Peers {
    links: HashMap<ConnectionId, PeerLink>,
    /// The most recently accepted connection. `send_data` targets it.
    active: Option<ConnectionId>,
}

/// Connection bookkeeping for a listening stream transport.
///
/// Every accepted connection is read and answered on its own. Only the
/// newest one counts as the active peer for server-initiated sends.
pub(crate) struct StreamServerCore {
    route: Route,
    config: TransportConfig,
    peers: Mutex<Peers>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamServerCore {
    pub(crate) fn new(sink: RequestSink, config: TransportConfig) -> Arc<Self> {
        Arc::new(Self {
            route: Route::Server(sink),
            config,
            peers: Mutex::new(Peers::default()),
            accept_task: Mutex::new(None),
        })
    }

    pub(crate) fn set_accept_task(&self, task: JoinHandle<()>) {
        *lock(&self.accept_task) = Some(task);
    }

    /// Starts serving an accepted stream and makes it the active peer.
    pub(crate) fn attach<R, W>(self: &Arc<Self>, reader: R, writer: W, peer: &str)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let core = Arc::downgrade(self);
        let link = PeerLink::spawn(
            reader,
            writer,
            self.route.clone(),
            &self.config,
            move |id| {
                if let Some(core) = core.upgrade() {
                    core.detach(id);
                }
            },
        );
        let id = link.id();
        tracing::debug!(%id, peer, "accepted connection");

        let mut peers = lock(&self.peers);
        peers.links.insert(id, link);
        peers.active = Some(id);
    }

    fn detach(&self, id: ConnectionId) {
        let mut peers = lock(&self.peers);
        peers.links.remove(&id);
        if peers.active == Some(id) {
            peers.active = None;
        }
    }

    pub(crate) fn send_data(&self, data: Vec<u8>) -> Result<(), TransportError> {
        let peers = lock(&self.peers);
        match peers.active.and_then(|id| peers.links.get(&id)) {
            Some(link) => link.send(data),
            None => Err(TransportError::NoConnection(
                "no client is connected".into(),
            )),
        }
    }

    /// Stops accepting and drops every connection.
    pub(crate) fn close(&self) {
        if let Some(task) = lock(&self.accept_task).take() {
            task.abort();
        }
        let mut peers = lock(&self.peers);
        for (_, link) in peers.links.drain() {
            link.abort();
        }
        peers.active = None;
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Connection state for a connecting stream transport.
pub(crate) struct StreamClientCore {
    route: Route,
    config: TransportConfig,
    link: Mutex<Option<PeerLink>>,
}

impl StreamClientCore {
    pub(crate) fn new(sink: ResponseSink, config: TransportConfig) -> Self {
        Self {
            route: Route::Client(sink),
            config,
            link: Mutex::new(None),
        }
    }

    pub(crate) fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub(crate) fn is_connected(&self) -> bool {
        lock(&self.link).as_ref().is_some_and(PeerLink::is_alive)
    }

    /// Starts driving a freshly connected stream. A previous connection,
    /// if any, is shut down.
    pub(crate) fn attach<R, W>(&self, reader: R, writer: W, peer: &str)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let link =
            PeerLink::spawn(reader, writer, self.route.clone(), &self.config, |_| {});
        tracing::debug!(id = %link.id(), peer, "connected");
        if let Some(old) = lock(&self.link).replace(link) {
            old.shutdown();
        }
    }

    pub(crate) fn send_data(&self, data: Vec<u8>) -> Result<(), TransportError> {
        match lock(&self.link).as_ref() {
            Some(link) => link.send(data),
            None => Err(TransportError::NoConnection(
                "client is not connected to a server".into(),
            )),
        }
    }

    pub(crate) fn close(&self) {
        if let Some(link) = lock(&self.link).take() {
            tracing::debug!(id = %link.id(), "closing connection");
            link.shutdown();
        }
    }
}
