//! The method registry and the dispatch path for inbound Requests.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::FutureExt;
use packwire_protocol::{Message, MsgId, Value, no_method_error};
use packwire_transport::{RequestHandler, Responder};

use crate::{Handler, HandlerFuture, HandlerResult, Handlers};

/// Maps method names to handlers and runs them for a server transport.
///
/// Registered with a server transport as its
/// [`RequestSink`](packwire_transport::RequestSink). Handlers are called
/// in arrival order on the connection's reader, and the futures they return
/// are awaited on their own tasks. A slow async handler therefore never
/// holds up other calls, and Responses leave in completion order.
#[derive(Default)]
pub struct Dispatcher {
    registry: RwLock<HashMap<String, Handler>>,
}

impl Dispatcher {
    /// Creates a dispatcher with no methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dispatcher serving `handlers`.
    pub fn with_handlers(handlers: Handlers) -> Self {
        let dispatcher = Self::new();
        dispatcher.serve(handlers);
        dispatcher
    }

    fn registry(&self) -> RwLockReadGuard<'_, HashMap<String, Handler>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Handler>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merges `handlers` into the registry. A name that is already
    /// registered is replaced.
    ///
    /// Safe to call while serving; Requests already running keep the
    /// handler they started with.
    pub fn serve(&self, handlers: Handlers) {
        let mut registry = self.registry_mut();
        for (name, handler) in handlers {
            tracing::debug!(method = %name, "registering method");
            registry.insert(name, handler);
        }
    }

    /// Whether `method` has a handler.
    pub fn has_method(&self, method: &str) -> bool {
        self.registry().contains_key(method)
    }

    /// The registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry().keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs `method` with `params` and returns its outcome.
    ///
    /// An unknown method yields the "method not found" error value. A
    /// handler that panics yields an error string describing the panic.
    pub async fn invoke(&self, method: &str, params: Vec<Value>) -> HandlerResult {
        let handler = self.registry().get(method).cloned();
        match handler {
            Some(handler) => run_handler(handler, params).await,
            None => Err(no_method_error(method)),
        }
    }

    /// Dispatches one inbound message.
    ///
    /// `id` and `responder` are set for a Request and `None` for a Notify.
    /// An unknown method is answered right away. Otherwise the handler is
    /// called before this returns, so messages from one peer start in the
    /// order they arrived, and the returned future is awaited on a spawned
    /// task whose outcome becomes the Response. A Notify never produces
    /// one, even when the method is unknown or the handler fails.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch_method(
        &self,
        id: Option<MsgId>,
        method: String,
        params: Vec<Value>,
        responder: Option<Responder>,
    ) {
        let reply = id.zip(responder);
        let handler = self.registry().get(&method).cloned();

        let Some(handler) = handler else {
            tracing::debug!(%method, ?id, "no such method");
            if let Some((id, responder)) = reply {
                respond(id, &method, responder, Err(no_method_error(&method)));
            }
            return;
        };

        let future = match start_handler(&handler, params) {
            Ok(future) => future,
            Err(error) => {
                finish(reply, &method, Err(error));
                return;
            }
        };
        tokio::spawn(async move {
            let outcome = finish_handler(future).await;
            finish(reply, &method, outcome);
        });
    }
}

fn finish(reply: Option<(MsgId, Responder)>, method: &str, outcome: HandlerResult) {
    match reply {
        Some((id, responder)) => respond(id, method, responder, outcome),
        None => {
            if let Err(error) = outcome {
                tracing::debug!(%method, %error, "notify handler failed");
            }
        }
    }
}

impl RequestHandler for Dispatcher {
    fn on_request(
        &self,
        id: MsgId,
        method: String,
        params: Vec<Value>,
        responder: Responder,
    ) {
        self.dispatch_method(Some(id), method, params, Some(responder));
    }

    fn on_notify(&self, method: String, params: Vec<Value>) {
        self.dispatch_method(None, method, params, None);
    }
}

fn respond(id: MsgId, method: &str, responder: Responder, outcome: HandlerResult) {
    if let Err(e) = responder.send(Message::response(id, outcome)) {
        tracing::debug!(id, %method, error = %e, "response not sent");
    }
}

/// Runs a handler, turning a panic at any point into an error value.
async fn run_handler(handler: Handler, params: Vec<Value>) -> HandlerResult {
    finish_handler(start_handler(&handler, params)?).await
}

/// Calls the handler, which does all the work of a sync handler.
fn start_handler(handler: &Handler, params: Vec<Value>) -> Result<HandlerFuture, Value> {
    panic::catch_unwind(AssertUnwindSafe(|| handler(params))).map_err(panic_value)
}

async fn finish_handler(future: HandlerFuture) -> HandlerResult {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(panic_value(payload)),
    }
}

fn panic_value(payload: Box<dyn Any + Send>) -> Value {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    };
    tracing::warn!(%message, "captured handler panic");
    Value::from(message)
}
