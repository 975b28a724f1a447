//! Client-side call correlation for packwire.
//!
//! A [`Session`] owns one [`ClientTransport`](packwire_transport::ClientTransport)
//! and turns it into something you can `call`:
//!
//! ```text
//! call() ──→ allocate id ──→ register pending ──→ send Request
//!                                                     │
//!   Response [1, id, error, result] ←── transport ────┘
//!        │
//!        ▼
//! pending[id] resolved (or rejected) and removed
//! ```
//!
//! Responses may arrive in any order; each is matched to its call by id
//! alone. A Response whose id has no pending call is discarded.

mod error;
mod pending;
mod session;

pub use error::CallError;
pub use session::Session;
