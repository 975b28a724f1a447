//! Server-side method dispatch for packwire.
//!
//! A [`Dispatcher`] holds the method registry and answers every Request a
//! server transport decodes:
//!
//! ```text
//! Request [0, id, method, params]
//!    │
//!    ▼
//! registry lookup ──(missing)──→ [1, id, NoMethodError, nil]
//!    │
//!    ▼
//! handler(params), inline, in arrival order
//!    │
//!    ▼
//! spawned task: future.await ──→ [1, id, nil, result]
//!                          └──→ [1, id, error, nil]
//! ```
//!
//! Notifies take the same path but never produce a Response. Handlers are
//! registered through the [`Handlers`] builder.

mod dispatcher;
mod handler;

pub use dispatcher::Dispatcher;
pub use handler::{Handler, HandlerFuture, HandlerResult, Handlers};
