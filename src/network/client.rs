//! casemux Client
//!
//! Thin request helpers over an envelope connection. Every call waits for
//! the response of its own case, with a timeout picked by how long the
//! remote side usually takes to answer.

use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

use super::connection::{Connection, ConnectionError, RetryPolicy};
use super::transport::Connector;
use super::{Endpoint, FramedConnector, WebSocketConnector};
use crate::config::{Config, TransportKind};
use crate::protocol::{Case, Envelope, EnvelopeProtocol, Status};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("No {case:?} response within {timeout:?}")]
    NoResponse { case: Case, timeout: Duration },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// How long a request may take to be answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Steady-state calls such as ping, observation or actions
    Steady,
    /// Game lifecycle calls the remote side processes slowly
    Lifecycle,
}

impl RequestClass {
    pub fn of(case: Case) -> Self {
        if case.is_lifecycle() {
            RequestClass::Lifecycle
        } else {
            RequestClass::Steady
        }
    }
}

/// Response timeouts per request class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub steady: Duration,
    pub lifecycle: Duration,
}

impl Timeouts {
    pub fn for_class(&self, class: RequestClass) -> Duration {
        match class {
            RequestClass::Steady => self.steady,
            RequestClass::Lifecycle => self.lifecycle,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            steady: Duration::from_millis(1000),
            lifecycle: Duration::from_millis(25_000),
        }
    }
}

/// casemux Client
pub struct Client {
    connection: Connection<EnvelopeProtocol>,
    timeouts: Timeouts,
}

impl Client {
    /// Connect using the transport, endpoint and retry settings in `config`
    pub async fn connect(config: &Config) -> ClientResult<Self> {
        let endpoint = config.endpoint();
        let retry = config.retry_policy();

        let connection = match config.connection.transport {
            TransportKind::WebSocket => {
                Self::establish(&WebSocketConnector::new(), endpoint, retry).await?
            }
            TransportKind::Tcp => {
                let connector =
                    FramedConnector::with_max_fragment_size(config.connection.max_fragment_size);
                Self::establish(&connector, endpoint, retry).await?
            }
        };

        Ok(Self::from_connection(connection, config.timeouts()))
    }

    async fn establish(
        connector: &dyn Connector,
        endpoint: Endpoint,
        retry: RetryPolicy,
    ) -> Result<Connection<EnvelopeProtocol>, ConnectionError> {
        Connection::establish(connector, endpoint, retry).await
    }

    /// Wrap an already established connection
    pub fn from_connection(connection: Connection<EnvelopeProtocol>, timeouts: Timeouts) -> Self {
        Self {
            connection,
            timeouts,
        }
    }

    /// Check the remote side is answering
    pub async fn ping(&self) -> ClientResult<Envelope> {
        self.call(Envelope::request(Case::Ping)).await
    }

    /// Send a request with the given payload and wait for its response
    pub async fn request(&self, case: Case, payload: impl Into<Bytes>) -> ClientResult<Envelope> {
        self.call(Envelope::new(case, payload)).await
    }

    /// Send a request, waiting as long as its case usually needs
    pub async fn call(&self, request: Envelope) -> ClientResult<Envelope> {
        let timeout = self.timeouts.for_class(RequestClass::of(request.case));
        self.call_with_timeout(request, timeout).await
    }

    /// Send a request and wait up to `timeout` for its response
    pub async fn call_with_timeout(
        &self,
        request: Envelope,
        timeout: Duration,
    ) -> ClientResult<Envelope> {
        let case = request.case;
        match self.connection.request_and_wait(&request, timeout).await? {
            Some(response) => {
                tracing::debug!("{:?} answered (status {:?})", case, response.status);
                Ok(response)
            }
            None => Err(ClientError::NoResponse { case, timeout }),
        }
    }

    /// Send a request without waiting for an answer
    pub async fn send(&self, request: Envelope) -> ClientResult<()> {
        self.connection.send(&request).await?;
        Ok(())
    }

    /// Last status reported by the remote side
    pub fn status(&self) -> Status {
        self.connection.last_status()
    }

    /// Response timeouts in use
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// The underlying connection
    pub fn connection(&self) -> &Connection<EnvelopeProtocol> {
        &self.connection
    }

    /// Close the connection
    pub async fn close(&self) -> ClientResult<()> {
        self.connection.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::framed;
    use tokio::net::TcpListener;

    /// Answers every request of `answered` with the same case, ignores the rest
    async fn spawn_peer(answered: Vec<Case>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut halves = framed(stream, 1024);
            while let Ok(Some(fragment)) = halves.source.recv_fragment().await {
                let request = Envelope::from_bytes(&fragment.data).unwrap();
                if answered.contains(&request.case) {
                    let response = Envelope::response(request.case, Status::InGame, request.payload);
                    let bytes = response.to_bytes().unwrap();
                    halves.sink.send_frame(Bytes::from(bytes)).await.unwrap();
                }
            }
        });

        port
    }

    fn tcp_config(port: u16) -> Config {
        let mut config = Config::default();
        config.connection.transport = TransportKind::Tcp;
        config.connection.port = port;
        config.retry.max_attempts = 3;
        config.retry.retry_delay_ms = 10;
        config.timeouts.steady_ms = 100;
        config.timeouts.lifecycle_ms = 200;
        config
    }

    #[test]
    fn test_request_classes() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.for_class(RequestClass::of(Case::Ping)), Duration::from_secs(1));
        assert_eq!(
            timeouts.for_class(RequestClass::of(Case::JoinGame)),
            Duration::from_secs(25)
        );
    }

    #[tokio::test]
    async fn test_ping_over_tcp() {
        let port = spawn_peer(vec![Case::Ping, Case::Action]).await;
        let client = Client::connect(&tcp_config(port)).await.unwrap();

        let response = client.ping().await.unwrap();
        assert_eq!(response.case, Case::Ping);
        assert_eq!(client.status(), Status::InGame);

        let response = client.request(Case::Action, vec![4u8, 2]).await.unwrap();
        assert_eq!(&response.payload[..], &[4, 2]);
    }

    #[tokio::test]
    async fn test_unanswered_call_is_no_response() {
        let port = spawn_peer(vec![]).await;
        let client = Client::connect(&tcp_config(port)).await.unwrap();

        let err = client.call(Envelope::request(Case::Observation)).await.unwrap_err();
        match err {
            ClientError::NoResponse { case, timeout } => {
                assert_eq!(case, Case::Observation);
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = client.call(Envelope::request(Case::CreateGame)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::NoResponse { timeout, .. } if timeout == Duration::from_millis(200)
        ));
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = Client::connect(&tcp_config(port)).await;
        assert!(matches!(
            result,
            Err(ClientError::Connection(ConnectionError::RetriesExhausted { attempts: 3, .. }))
        ));
    }
}
