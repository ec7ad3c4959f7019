//! casemux - Request/response correlation over a single duplex connection
//!
//! The wire protocol carries no request ids, only a case tag per message. A
//! request of case `K` is answered by the next inbound message of case `K`.
//! casemux keeps one connection open, pumps inbound messages through a
//! case-keyed dispatcher and lets callers wait for the answer to a request.

pub mod config;
pub mod dispatch;
pub mod network;
pub mod protocol;

pub use config::Config;
pub use dispatch::{Callback, Dispatcher};
pub use network::{Client, Connection, ConnectionError, Endpoint, ReadyState, RetryPolicy};
pub use protocol::{Case, Envelope, EnvelopeProtocol, Protocol, Status};
