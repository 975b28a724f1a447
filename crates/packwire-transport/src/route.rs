//! Shared decode-and-route logic.
//!
//! Every transport ends up with the same question after a read: "I have a
//! message, who gets it?" Servers hand Requests and Notifies to a
//! [`RequestHandler`]; clients hand Responses to a [`ResponseHandler`].
//! Anything else is a protocol violation and is returned to the read loop,
//! which stops reading.

use packwire_protocol::{
    CodecKind, Message, MessageKind, ProtocolError,
};
use tokio::sync::mpsc;

use crate::{RequestHandler, RequestSink, ResponseHandler, ResponseSink, TransportError};

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Sends one Response back to the peer that issued a Request.
///
/// The transport creates a `Responder` for every inbound Request and binds
/// it to the right destination: the connection the Request arrived on for
/// stream transports, the learned peer for the datagram server. The
/// dispatcher never needs to know which.
#[derive(Debug, Clone)]
pub struct Responder {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    codec: CodecKind,
}

impl Responder {
    /// Creates a responder that encodes with `codec` and queues the bytes on
    /// `outbound`.
    pub fn new(outbound: mpsc::UnboundedSender<Vec<u8>>, codec: CodecKind) -> Self {
        Self { outbound, codec }
    }

    /// Encodes `message` and queues it for the peer.
    ///
    /// # Errors
    /// [`TransportError::Protocol`] if the message cannot be encoded,
    /// [`TransportError::NoConnection`] if the connection is gone.
    pub fn send(self, message: Message) -> Result<(), TransportError> {
        let bytes = message.encode(&self.codec)?;
        self.outbound.send(bytes).map_err(|_| {
            TransportError::NoConnection("peer went away before the response".into())
        })
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Hands a decoded message to the server-side handler.
///
/// # Errors
/// [`ProtocolError::UnexpectedMessage`] for a Response: servers never issue
/// Requests, so a Response cannot be valid here.
pub fn route_to_server(
    message: Message,
    handler: &dyn RequestHandler,
    responder: &Responder,
) -> Result<(), ProtocolError> {
    match message {
        Message::Request { id, method, params } => {
            tracing::trace!(id, %method, "routing request");
            handler.on_request(id, method, params, responder.clone());
            Ok(())
        }
        Message::Notify { method, params } => {
            tracing::trace!(%method, "routing notify");
            handler.on_notify(method, params);
            Ok(())
        }
        Message::Response { .. } => Err(ProtocolError::UnexpectedMessage {
            kind: MessageKind::Response,
            role: "server",
        }),
    }
}

/// Hands a decoded message to the client-side handler.
///
/// # Errors
/// [`ProtocolError::UnexpectedMessage`] for anything but a Response.
pub fn route_to_client(
    message: Message,
    handler: &dyn ResponseHandler,
) -> Result<(), ProtocolError> {
    match message {
        Message::Response { id, error, result } => {
            tracing::trace!(id, "routing response");
            handler.on_response(id, error, result);
            Ok(())
        }
        other => Err(ProtocolError::UnexpectedMessage {
            kind: other.kind(),
            role: "client",
        }),
    }
}

/// Which side of the conversation a read loop feeds.
#[derive(Clone)]
pub(crate) enum Route {
    Server(RequestSink),
    Client(ResponseSink),
}

impl Route {
    pub(crate) fn deliver(
        &self,
        message: Message,
        responder: &Responder,
    ) -> Result<(), ProtocolError> {
        match self {
            Self::Server(sink) => route_to_server(message, sink.as_ref(), responder),
            Self::Client(sink) => route_to_client(message, sink.as_ref()),
        }
    }
}
