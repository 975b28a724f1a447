//! Method handlers and the builder that collects them.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use packwire_protocol::Value;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// What a handler produces: the `result` slot on success, the `error` slot
/// on failure.
pub type HandlerResult = Result<Value, Value>;

/// The boxed future every handler returns.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A type-erased method handler taking positional params.
///
/// Wrapped in `Arc` so the dispatcher can clone it into the task that runs
/// a Request.
pub type Handler = Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>;

/// A name → handler mapping, merged into a
/// [`Dispatcher`](crate::Dispatcher) with `serve`.
///
/// ```rust,ignore
/// let handlers = Handlers::new()
///     .sync_method("hello", |_| Ok("world".into()))
///     .typed("sum", |(a, b): (i64, i64)| async move { Ok::<_, String>(a + b) });
/// ```
#[derive(Default, Clone)]
pub struct Handlers {
    entries: HashMap<String, Handler>,
}

impl Handlers {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async handler. Registering a name twice keeps the last.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let erased: Handler =
            Arc::new(move |params| -> HandlerFuture { Box::pin(handler(params)) });
        self.entries.insert(name.into(), erased);
        self
    }

    /// Registers a plain closure. It runs on the connection's reader as the
    /// message arrives, so it should not block for long.
    pub fn sync_method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> HandlerResult + Send + Sync + 'static,
    {
        let erased: Handler = Arc::new(move |params| -> HandlerFuture {
            let outcome = handler(params);
            Box::pin(async move { outcome })
        });
        self.entries.insert(name.into(), erased);
        self
    }

    /// Registers a handler whose params and outcome go through serde.
    ///
    /// `P` is usually a tuple matching the positional params. A single
    /// param may also be taken as a bare value, and no params as `()`.
    /// Params that don't fit `P` fail the call with an error string.
    pub fn typed<P, R, E, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        E: Serialize + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let erased: Handler = Arc::new(move |params| -> HandlerFuture {
            match from_params::<P>(params) {
                Ok(params) => Box::pin(finish_typed(handler(params))),
                Err(error) => Box::pin(async move { Err(error) }),
            }
        });
        self.entries.insert(name.into(), erased);
        self
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no method is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for Handlers {
    type Item = (String, Handler);
    type IntoIter = std::collections::hash_map::IntoIter<String, Handler>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

async fn finish_typed<R, E, Fut>(future: Fut) -> HandlerResult
where
    R: Serialize,
    E: Serialize,
    Fut: Future<Output = Result<R, E>>,
{
    match future.await {
        Ok(result) => to_value(&result),
        Err(error) => Err(to_value(&error)?),
    }
}

/// Converts positional params into `P`: as the whole list first, then as
/// `()` for an empty list or as the lone element of a one-item list.
fn from_params<P: DeserializeOwned>(params: Vec<Value>) -> Result<P, Value> {
    let fallback = match params.as_slice() {
        [] => Some(Value::Nil),
        [single] => Some(single.clone()),
        _ => None,
    };
    match rmpv::ext::from_value(Value::Array(params)) {
        Ok(params) => Ok(params),
        Err(e) => fallback
            .and_then(|value| rmpv::ext::from_value(value).ok())
            .ok_or_else(|| Value::from(format!("invalid params: {e}"))),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, Value> {
    rmpv::ext::to_value(value)
        .map_err(|e| Value::from(format!("unserialisable value: {e}")))
}
