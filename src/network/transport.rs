//! Transport abstraction
//!
//! A transport is a duplex, message-framed, binary channel. The write half
//! takes whole frames; the read half yields fragments, each marked with
//! whether it ends the current message.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use super::Endpoint;
use crate::protocol::{CodecError, Fragment};

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Framing error: {0}")]
    Codec(#[from] CodecError),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("Transport closed")]
    Closed,

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(err))
    }
}

impl TransportError {
    /// Whether the failure means the peer is not listening yet.
    ///
    /// Only these errors are worth another connect attempt; everything
    /// else aborts establishment immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Io(err) => is_retryable_io(err),
            TransportError::WebSocket(err) => match err.as_ref() {
                tungstenite::Error::Io(err) => is_retryable_io(err),
                _ => false,
            },
            _ => false,
        }
    }
}

fn is_retryable_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
    )
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Write half of a transport
#[async_trait]
pub trait FrameSink: Send {
    /// Write one complete frame
    async fn send_frame(&mut self, frame: Bytes) -> TransportResult<()>;

    /// Close the write direction
    async fn close(&mut self) -> TransportResult<()>;
}

/// Read half of a transport
#[async_trait]
pub trait FragmentSource: Send {
    /// Read the next fragment. `Ok(None)` means the peer closed cleanly.
    async fn recv_fragment(&mut self) -> TransportResult<Option<Fragment>>;
}

/// Both halves of an open transport
pub struct TransportHalves {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FragmentSource>,
}

impl TransportHalves {
    pub fn new(sink: impl FrameSink + 'static, source: impl FragmentSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

/// Opens transports. A returned value is an open transport.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> TransportResult<TransportHalves>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_is_retryable() {
        let err = TransportError::from(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(err.is_retryable());

        let err = TransportError::from(tungstenite::Error::Io(io::Error::from(
            io::ErrorKind::ConnectionRefused,
        )));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_failures_are_fatal() {
        let err = TransportError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_retryable());
        assert!(!TransportError::Closed.is_retryable());
        assert!(!TransportError::InvalidEndpoint("nowhere".into()).is_retryable());
        assert!(!TransportError::from(tungstenite::Error::ConnectionClosed).is_retryable());
    }
}
