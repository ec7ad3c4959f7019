//! WebSocket transport over `tokio-tungstenite`.
//!
//! tungstenite reassembles continuation frames itself, so every data
//! message surfaces as a single end-of-message fragment.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::transport::{
    Connector, FragmentSource, FrameSink, TransportHalves, TransportResult,
};
use super::Endpoint;
use crate::protocol::Fragment;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a WebSocket
pub struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, frame: Bytes) -> TransportResult<()> {
        self.inner.send(Message::Binary(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.inner.close().await?;
        Ok(())
    }
}

/// Read half of a WebSocket
pub struct WebSocketSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FragmentSource for WebSocketSource {
    async fn recv_fragment(&mut self) -> TransportResult<Option<Fragment>> {
        while let Some(message) = self.inner.next().await {
            match message {
                Ok(Message::Binary(data)) => return Ok(Some(Fragment::whole(data))),
                Ok(Message::Text(text)) => {
                    return Ok(Some(Fragment::whole(Bytes::copy_from_slice(
                        text.as_str().as_bytes(),
                    ))))
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!("WebSocket close received: {:?}", frame);
                    return Ok(None);
                }
                Ok(_) => continue, // ping, pong, raw frames
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }
}

/// Opens WebSocket transports at `ws://host:port/path`
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> TransportResult<TransportHalves> {
        endpoint.validate()?;

        let url = endpoint.ws_url();
        let (ws, _response) = connect_async(url.as_str()).await?;

        tracing::debug!("WebSocket open to {}", url);

        let (sink, stream) = ws.split();
        Ok(TransportHalves::new(
            WebSocketSink { inner: sink },
            WebSocketSource { inner: stream },
        ))
    }
}
