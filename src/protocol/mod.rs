//! Protocol module - The message boundary of a casemux connection
//!
//! The connection core never looks inside a message. It only needs to:
//! - serialize an outbound request to bytes
//! - parse inbound bytes into a response
//! - read the case (variant tag) of either side
//! - read the status side channel of a response
//!
//! Byte-stream transports carry messages as fragments:
//! - 4 bytes magic
//! - 1 byte flags (bit 0 = end of message)
//! - 4 bytes payload length (big-endian)
//! - Variable length payload

mod codec;
mod message;

pub use codec::*;
pub use message::*;

use std::fmt::Debug;
use std::hash::Hash;

/// Default host the remote peer listens on
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port the remote peer listens on
pub const DEFAULT_PORT: u16 = 8268;

/// Default WebSocket path of the remote API
pub const DEFAULT_PATH: &str = "/sc2api";

/// Magic bytes for fragment identification
pub const MAGIC_BYTES: [u8; 4] = [0x43, 0x4D, 0x55, 0x58]; // "CMUX"

/// Describes a wire protocol whose requests and responses share a case tag.
///
/// A request of case `K` is answered by the next response of case `K`; there
/// is no request id. Implementations own the schema; the connection only
/// goes through these hooks.
pub trait Protocol: Send + Sync + 'static {
    /// Outbound message type
    type Request: Send + Sync;
    /// Inbound message type
    type Response: Clone + Send + Sync + 'static;
    /// Variant tag shared by a request and its response
    type Case: Copy + Eq + Hash + Debug + Send + Sync + 'static;
    /// Protocol-level status carried by every response
    type Status: Copy + Default + Debug + Send + Sync + 'static;

    /// Serialize a request to its wire bytes
    fn encode_request(request: &Self::Request) -> Result<Vec<u8>, CodecError>;

    /// Parse a complete frame into a response
    fn decode_response(bytes: &[u8]) -> Result<Self::Response, CodecError>;

    /// Case the response to `request` will carry
    fn request_case(request: &Self::Request) -> Self::Case;

    /// Case of an inbound response
    fn response_case(response: &Self::Response) -> Self::Case;

    /// Status field of an inbound response
    fn status(response: &Self::Response) -> Self::Status;
}
