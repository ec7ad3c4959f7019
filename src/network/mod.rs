//! Network module - Owns the single duplex connection to the remote peer
//!
//! Provides:
//! - Transport abstraction (fragment source, frame sink, connector)
//! - Framed TCP and WebSocket transports
//! - Connection with retrying establishment, receive pump and
//!   request/response correlation by case
//! - Client with timeout-classed request helpers

mod client;
mod connection;
mod tcp;
mod transport;
mod websocket;

pub use client::*;
pub use connection::*;
pub use tcp::*;
pub use transport::*;
pub use websocket::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::{DEFAULT_HOST, DEFAULT_PATH, DEFAULT_PORT};

/// Address of the remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Resource path (WebSocket transports only)
    pub path: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: DEFAULT_PATH.to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Reject endpoints no transport can reach
    pub fn validate(&self) -> TransportResult<()> {
        if self.host.trim().is_empty() {
            return Err(TransportError::InvalidEndpoint(format!(
                "empty host (port {})",
                self.port
            )));
        }
        Ok(())
    }

    /// `host:port`, suitable for `TcpStream::connect`
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `ws://host:port/path`
    pub fn ws_url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("ws://{}:{}{}", self.host, self.port, path)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.socket_addr_string(), "127.0.0.1:8268");
        assert_eq!(endpoint.ws_url(), "ws://127.0.0.1:8268/sc2api");

        let endpoint = Endpoint::new("localhost", 5000).with_path("api");
        assert_eq!(endpoint.ws_url(), "ws://localhost:5000/api");
        assert_eq!(endpoint.to_string(), "localhost:5000");
    }

    #[test]
    fn test_empty_host_is_invalid() {
        assert!(Endpoint::default().validate().is_ok());

        let err = Endpoint::new(" ", 5000).validate().unwrap_err();
        assert!(matches!(err, TransportError::InvalidEndpoint(_)));
        assert!(!err.is_retryable());
    }
}
