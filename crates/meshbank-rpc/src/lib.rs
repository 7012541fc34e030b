//! MeshBank RPC - request/reply over the shared broadcast channel
//!
//! - [`ServiceHost`] runs a backend service: it hears frames on the service's
//!   port, opens them with its key ring, answers discovery pings and runs
//!   one task per request.
//! - [`Discovery`] keeps a per-service upstream cache fed by signed pings.
//! - [`RpcClient`] calls another service with a correlation id and a bounded
//!   wait.
//!
//! Replies are always matched by [`CorrelationId`](meshbank_types::CorrelationId),
//! never by "whoever asked last".

pub mod client;
pub mod discovery;
pub mod handler;
pub mod host;
pub mod keyring;

pub use client::*;
pub use discovery::*;
pub use handler::*;
pub use host::*;
pub use keyring::*;
