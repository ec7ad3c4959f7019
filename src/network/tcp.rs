//! Framed transport over a byte stream
//!
//! Carries frames as fragments using the protocol fragment codec. The halves
//! are generic over the stream so anything `AsyncRead`/`AsyncWrite` works.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::transport::{
    Connector, FragmentSource, FrameSink, TransportError, TransportHalves, TransportResult,
};
use super::Endpoint;
use crate::protocol::{Fragment, FragmentDecoder, FragmentEncoder, DEFAULT_MAX_FRAGMENT_SIZE};

/// Write half of a framed stream
pub struct FramedSink<W> {
    writer: W,
    encoder: FragmentEncoder,
    write_buf: BytesMut,
}

impl<W: AsyncWrite + Unpin + Send> FramedSink<W> {
    pub fn new(writer: W, max_fragment_size: usize) -> Self {
        Self {
            writer,
            encoder: FragmentEncoder::with_max_fragment_size(max_fragment_size),
            write_buf: BytesMut::with_capacity(4096),
        }
    }

    /// Write a single fragment without framing a whole message
    pub async fn send_fragment(&mut self, fragment: &Fragment) -> TransportResult<()> {
        self.write_buf.clear();
        self.encoder
            .encode_fragment(&fragment.data, fragment.end_of_message, &mut self.write_buf);
        self.writer.write_all(&self.write_buf).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for FramedSink<W> {
    async fn send_frame(&mut self, frame: Bytes) -> TransportResult<()> {
        self.write_buf.clear();
        self.encoder.encode_frame(&frame, &mut self.write_buf)?;

        self.writer.write_all(&self.write_buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Read half of a framed stream
pub struct FramedSource<R> {
    reader: R,
    decoder: FragmentDecoder,
    read_buf: BytesMut,
}

impl<R: AsyncRead + Unpin + Send> FramedSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FragmentDecoder::new(),
            read_buf: BytesMut::with_capacity(4096),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FragmentSource for FramedSource<R> {
    async fn recv_fragment(&mut self) -> TransportResult<Option<Fragment>> {
        loop {
            if let Some(fragment) = self.decoder.decode(&mut self.read_buf)? {
                return Ok(Some(fragment));
            }

            let n = self.reader.read_buf(&mut self.read_buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() && !self.decoder.is_mid_fragment() {
                    return Ok(None); // Clean close
                } else {
                    return Err(TransportError::Closed);
                }
            }
        }
    }
}

/// Split a stream into framed transport halves
pub fn framed<S>(stream: S, max_fragment_size: usize) -> TransportHalves
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    TransportHalves::new(
        FramedSink::new(writer, max_fragment_size),
        FramedSource::new(reader),
    )
}

/// Opens framed transports over TCP
#[derive(Debug, Clone)]
pub struct FramedConnector {
    max_fragment_size: usize,
}

impl FramedConnector {
    pub fn new() -> Self {
        Self::with_max_fragment_size(DEFAULT_MAX_FRAGMENT_SIZE)
    }

    pub fn with_max_fragment_size(max_fragment_size: usize) -> Self {
        Self { max_fragment_size }
    }
}

impl Default for FramedConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for FramedConnector {
    async fn connect(&self, endpoint: &Endpoint) -> TransportResult<TransportHalves> {
        endpoint.validate()?;

        let stream = TcpStream::connect(endpoint.socket_addr_string()).await?;
        stream.set_nodelay(true)?;

        tracing::debug!("TCP connection open to {}", endpoint);

        let (reader, writer) = stream.into_split();
        Ok(TransportHalves::new(
            FramedSink::new(writer, self.max_fragment_size),
            FramedSource::new(reader),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frames_survive_fragmentation() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = framed(client, 3);
        let mut server = framed(server, 1024);

        client.sink.send_frame(Bytes::from_static(b"fragmented")).await.unwrap();

        let mut joined = Vec::new();
        let mut fragments = 0;
        loop {
            let fragment = server.source.recv_fragment().await.unwrap().unwrap();
            joined.extend_from_slice(&fragment.data);
            fragments += 1;
            if fragment.end_of_message {
                break;
            }
        }

        assert_eq!(joined, b"fragmented");
        assert_eq!(fragments, 4);
    }

    #[tokio::test]
    async fn test_clean_close_yields_none() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = framed(client, 1024);
        let mut server = framed(server, 1024);

        tokio_test::assert_ok!(client.sink.send_frame(Bytes::from_static(b"last")).await);
        tokio_test::assert_ok!(client.sink.close().await);

        let fragment = server.source.recv_fragment().await.unwrap().unwrap();
        assert_eq!(&fragment.data[..], b"last");
        assert!(server.source.recv_fragment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut writer) = tokio::io::split(client);
        let mut server = framed(server, 1024);

        // Header promises 8 bytes, only 2 arrive
        let mut buf = BytesMut::new();
        FragmentEncoder::new().encode_fragment(b"12345678", true, &mut buf);
        writer.write_all(&buf[..11]).await.unwrap();
        writer.shutdown().await.unwrap();

        let err = server.source.recv_fragment().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_tcp_connector_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut halves = framed(stream, 1024);
            let fragment = halves.source.recv_fragment().await.unwrap().unwrap();
            halves.sink.send_frame(fragment.data).await.unwrap();
        });

        let mut client = FramedConnector::new()
            .connect(&Endpoint::new("127.0.0.1", port))
            .await
            .unwrap();
        client.sink.send_frame(Bytes::from_static(b"echo")).await.unwrap();

        let fragment = client.source.recv_fragment().await.unwrap().unwrap();
        assert_eq!(&fragment.data[..], b"echo");
        assert!(fragment.end_of_message);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_connector_rejects_empty_host() {
        let result = FramedConnector::new().connect(&Endpoint::new("", 8268)).await;
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));

        let result = crate::network::Connection::<crate::protocol::EnvelopeProtocol>::establish(
            &FramedConnector::new(),
            Endpoint::new("", 8268),
            crate::network::RetryPolicy::default(),
        )
        .await;
        assert!(matches!(
            result,
            Err(crate::network::ConnectionError::ConnectFailed {
                source: TransportError::InvalidEndpoint(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_tcp_connector_refused_is_retryable() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = FramedConnector::new()
            .connect(&Endpoint::new("127.0.0.1", port))
            .await;
        let err = match result {
            Ok(_) => panic!("nothing should be listening"),
            Err(err) => err,
        };
        assert!(err.is_retryable());
    }
}
