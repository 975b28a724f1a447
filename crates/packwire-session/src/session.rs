//! The client-side session: ids, pending calls, and the transport they
//! travel over.

use std::sync::Arc;
use std::time::Duration;

use packwire_protocol::{Message, MsgId, Value};
use packwire_transport::{ClientTransport, ResponseSink, TransportError};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::CallError;
use crate::pending::PendingCalls;

/// One client's view of a conversation with a server.
///
/// Build it with [`Session::new`], passing a closure that constructs the
/// transport around the session's response sink:
///
/// ```rust,ignore
/// let session = Session::new(|sink| TcpClient::new("127.0.0.1:4000", sink, config));
/// session.connect().await?;
/// let sum = session.call("add", vec![3.into(), 5.into()]).await?;
/// ```
pub struct Session<T> {
    pending: Arc<PendingCalls>,
    transport: T,
}

impl<T: ClientTransport> Session<T> {
    /// Creates a session whose transport feeds Responses back into it.
    pub fn new(build: impl FnOnce(ResponseSink) -> T) -> Self {
        let pending = Arc::new(PendingCalls::new());
        let sink: ResponseSink = Arc::clone(&pending) as ResponseSink;
        Self {
            transport: build(sink),
            pending,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connects the transport. See [`ClientTransport::connect`].
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect().await
    }

    /// Calls `method` on the server and waits for its Response.
    ///
    /// Any number of calls may be in flight at once; each resolves when the
    /// Response carrying its id arrives, whatever the order.
    ///
    /// There is no deadline: if the Response never comes (lost datagram,
    /// dropped connection) the future never completes. Use
    /// [`call_with_timeout`](Self::call_with_timeout) to bound the wait.
    /// Dropping the future forgets the call.
    ///
    /// # Errors
    /// - [`CallError::Transport`] if the Request could not be queued; the
    ///   id is released and no Request was sent.
    /// - [`CallError::Remote`] or [`CallError::NoMethod`] if the server
    ///   answered with an error.
    pub async fn call(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, CallError> {
        let (id, rx) = self.pending.register();
        let mut in_flight = InFlight {
            pending: &self.pending,
            id,
            settled: false,
        };

        let frame = Message::request(id, method, params)
            .encode(&self.transport.codec())?;
        self.transport.send_data(frame)?;
        tracing::trace!(id, method, "request sent");

        let outcome = rx.await;
        in_flight.settled = true;
        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(CallError::from_remote(error)),
            Err(_) => Err(CallError::Dropped),
        }
    }

    /// Like [`call`](Self::call), but gives up after `timeout`.
    ///
    /// A Response arriving after the deadline is discarded.
    ///
    /// # Errors
    /// [`CallError::TimedOut`] when the deadline passes, otherwise as
    /// [`call`](Self::call).
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        tokio::time::timeout(timeout, self.call(method, params))
            .await
            .map_err(|_| CallError::TimedOut(timeout))?
    }

    /// Calls `method` with parameters and result converted through serde.
    ///
    /// A tuple or sequence becomes the parameter list element by element,
    /// `()` becomes an empty list, and any other value is sent as the
    /// single parameter.
    ///
    /// # Errors
    /// [`CallError::Conversion`] if either side does not fit its type,
    /// otherwise as [`call`](Self::call).
    pub async fn call_typed<P, R>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, CallError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = to_params(&params)?;
        let result = self.call(method, params).await?;
        rmpv::ext::from_value(result)
            .map_err(|e| CallError::Conversion(e.to_string()))
    }

    /// Sends a Notify. Nothing is registered and nothing comes back.
    ///
    /// # Errors
    /// Only local failures: encoding, or no connection to send on.
    pub fn notify(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<(), CallError> {
        let frame = Message::notify(method, params)
            .encode(&self.transport.codec())?;
        self.transport.send_data(frame)?;
        tracing::trace!(method, "notify sent");
        Ok(())
    }

    /// [`notify`](Self::notify) with parameters converted through serde,
    /// following the same rules as [`call_typed`](Self::call_typed).
    pub fn notify_typed<P: Serialize>(
        &self,
        method: &str,
        params: P,
    ) -> Result<(), CallError> {
        self.notify(method, to_params(&params)?)
    }

    /// Number of calls still waiting for a Response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Closes the transport.
    ///
    /// Calls in flight are left pending: they complete if their Response
    /// was already read, and otherwise wait until their futures are dropped
    /// or their timeout passes.
    pub fn close(&self) {
        self.transport.close();
    }
}

/// Releases the id of a call whose future is dropped, or which fails to
/// send, before its Response arrives.
struct InFlight<'a> {
    pending: &'a PendingCalls,
    id: MsgId,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled && self.pending.abandon(self.id) {
            tracing::trace!(id = self.id, "call abandoned");
        }
    }
}

fn to_params<P: Serialize>(params: &P) -> Result<Vec<Value>, CallError> {
    let value = rmpv::ext::to_value(params)
        .map_err(|e| CallError::Conversion(e.to_string()))?;
    Ok(match value {
        Value::Array(items) => items,
        Value::Nil => Vec::new(),
        single => vec![single],
    })
}
