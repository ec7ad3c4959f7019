//! Connection handling for casemux
//!
//! Owns the one transport to the remote peer:
//! - Establishment with a bounded, fixed-delay retry
//! - The receive pump (reassemble, decode, record status, dispatch)
//! - Request/response correlation by case
//!
//! The protocol carries no request ids. A request of case `K` is answered by
//! the next inbound message of case `K`, whoever asked for it. Callers must
//! not have two requests of the same case in flight at once; if they do,
//! every one of them receives the first response of that case and the later
//! responses reach only long-lived handlers.

use bytes::Bytes;
use parking_lot::{Mutex as SyncMutex, RwLock};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::transport::{Connector, FragmentSource, FrameSink, TransportError};
use super::Endpoint;
use crate::dispatch::{Callback, Dispatcher};
use crate::protocol::{CodecError, FrameAssembler, Protocol};

/// Default number of connect attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;

/// Default pause between connect attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Could not connect to {endpoint} after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        endpoint: Endpoint,
        attempts: u32,
        source: TransportError,
    },

    #[error("Connect to {endpoint} failed: {source}")]
    ConnectFailed {
        endpoint: Endpoint,
        source: TransportError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection is not open")]
    NotOpen,

    #[error("Receive loop failed to start")]
    PumpNotStarted,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Ready state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// Transport is being opened
    Connecting = 0,
    /// Transport is open and the pump is running
    Open = 1,
    /// Transport has closed; the connection cannot be reopened
    Closed = 2,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            _ => ReadyState::Closed,
        }
    }
}

/// How hard `Connection::establish` tries before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connect attempts, at least one
    pub max_attempts: u32,
    /// Pause after each refused attempt
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// A single attempt, no retry
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Upper bound on the time spent sleeping between attempts
    pub fn max_wait(&self) -> Duration {
        self.retry_delay * self.max_attempts.saturating_sub(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// State shared between the connection and its pump
struct Shared<P: Protocol> {
    dispatcher: Dispatcher<P::Case, P::Response>,
    ready_state: AtomicU8,
    last_status: RwLock<P::Status>,
}

impl<P: Protocol> Shared<P> {
    fn new() -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            ready_state: AtomicU8::new(ReadyState::Connecting as u8),
            last_status: RwLock::new(P::Status::default()),
        }
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }

    fn set_ready_state(&self, state: ReadyState) {
        self.ready_state.store(state as u8, Ordering::SeqCst);
    }
}

/// A live connection to the remote peer
pub struct Connection<P: Protocol> {
    endpoint: Endpoint,
    sink: Mutex<Box<dyn FrameSink>>,
    shared: Arc<Shared<P>>,
    pump: JoinHandle<()>,
}

impl<P: Protocol> Connection<P> {
    /// Open the transport and start the receive pump.
    ///
    /// Refused attempts are retried after `retry.retry_delay`, up to
    /// `retry.max_attempts` attempts in total. Any other failure aborts
    /// immediately. The connection is returned only once the pump is running.
    pub async fn establish<C>(
        connector: &C,
        endpoint: Endpoint,
        retry: RetryPolicy,
    ) -> ConnectionResult<Self>
    where
        C: Connector + ?Sized,
    {
        let shared = Arc::new(Shared::<P>::new());
        let max_attempts = retry.max_attempts.max(1);
        let mut attempts = 0;

        tracing::info!("Connecting to {}", endpoint);

        let halves = loop {
            attempts += 1;

            match connector.connect(&endpoint).await {
                Ok(halves) => break halves,
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    tracing::debug!(
                        "Connect attempt {}/{} to {} failed: {}",
                        attempts,
                        max_attempts,
                        endpoint,
                        e
                    );
                    tokio::time::sleep(retry.retry_delay).await;
                }
                Err(e) if e.is_retryable() => {
                    shared.set_ready_state(ReadyState::Closed);
                    return Err(ConnectionError::RetriesExhausted {
                        endpoint,
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    shared.set_ready_state(ReadyState::Closed);
                    return Err(ConnectionError::ConnectFailed {
                        endpoint,
                        source: e,
                    });
                }
            }
        };

        shared.set_ready_state(ReadyState::Open);

        let (started_tx, started_rx) = oneshot::channel();
        let pump = tokio::spawn(run_pump(halves.source, shared.clone(), started_tx));

        if started_rx.await.is_err() {
            shared.set_ready_state(ReadyState::Closed);
            return Err(ConnectionError::PumpNotStarted);
        }

        tracing::info!("Connected to {} after {} attempt(s)", endpoint, attempts);

        Ok(Self {
            endpoint,
            sink: Mutex::new(halves.sink),
            shared,
            pump,
        })
    }

    /// Serialize and write one request without waiting for an answer
    pub async fn send(&self, request: &P::Request) -> ConnectionResult<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(ConnectionError::NotOpen);
        }

        let bytes = P::encode_request(request)?;

        let mut sink = self.sink.lock().await;
        sink.send_frame(Bytes::from(bytes)).await?;

        Ok(())
    }

    /// Send `request` and wait for the next response of the same case.
    ///
    /// Same-case requests in flight together all resolve with that one
    /// response.
    ///
    /// Returns `Ok(None)` if nothing arrived within `timeout`; errors are
    /// reserved for failing to send. The one-shot subscriber is removed on
    /// every path, including cancellation of this future.
    pub async fn request_and_wait(
        &self,
        request: &P::Request,
        timeout: Duration,
    ) -> ConnectionResult<Option<P::Response>> {
        let case = P::request_case(request);
        let (tx, rx) = oneshot::channel();

        let subscription = Subscription::<P>::new(&self.shared.dispatcher, case, tx);

        self.send(request).await?;

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::debug!("No {:?} response within {:?}", case, timeout);
                None
            }
        };

        drop(subscription);
        Ok(response)
    }

    /// Subscribe a long-lived callback to every inbound message of `case`
    pub fn register_handler(&self, case: P::Case, callback: Callback<P::Response>) {
        self.shared.dispatcher.register(case, callback);
    }

    /// Remove a callback added with `register_handler`
    pub fn deregister_handler(&self, callback: &Callback<P::Response>) -> bool {
        self.shared.dispatcher.deregister(callback)
    }

    /// Close the write side and stop the pump
    pub async fn close(&self) -> ConnectionResult<()> {
        if self.ready_state() == ReadyState::Closed {
            return Ok(());
        }

        self.shared.set_ready_state(ReadyState::Closed);
        self.pump.abort();

        let mut sink = self.sink.lock().await;
        sink.close().await?;

        tracing::info!("Connection to {} closed", self.endpoint);
        Ok(())
    }

    /// Current ready state
    pub fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }

    /// Whether the transport is open
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Status carried by the most recent inbound message
    pub fn last_status(&self) -> P::Status {
        *self.shared.last_status.read()
    }

    /// The subscriber registry fed by the pump
    pub fn dispatcher(&self) -> &Dispatcher<P::Case, P::Response> {
        &self.shared.dispatcher
    }

    /// The peer this connection talks to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the pump task has exited
    pub fn is_pump_finished(&self) -> bool {
        self.pump.is_finished()
    }
}

impl<P: Protocol> Drop for Connection<P> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// One-shot subscriber for a single `request_and_wait` call.
///
/// The first matching response fills the slot; later ones find it empty.
/// Dropping the subscription deregisters it.
struct Subscription<'a, P: Protocol> {
    dispatcher: &'a Dispatcher<P::Case, P::Response>,
    callback: Callback<P::Response>,
}

impl<'a, P: Protocol> Subscription<'a, P> {
    fn new(
        dispatcher: &'a Dispatcher<P::Case, P::Response>,
        case: P::Case,
        tx: oneshot::Sender<P::Response>,
    ) -> Self {
        let slot = SyncMutex::new(Some(tx));
        let callback: Callback<P::Response> = Arc::new(move |response: &P::Response| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(response.clone());
            }
        });

        dispatcher.register(case, callback.clone());

        Self {
            dispatcher,
            callback,
        }
    }
}

impl<P: Protocol> Drop for Subscription<'_, P> {
    fn drop(&mut self) {
        self.dispatcher.deregister(&self.callback);
    }
}

/// Receive pump: runs until the transport closes, never restarts
async fn run_pump<P: Protocol>(
    mut source: Box<dyn FragmentSource>,
    shared: Arc<Shared<P>>,
    started: oneshot::Sender<()>,
) {
    let _ = started.send(());

    let mut assembler = FrameAssembler::new();
    let mut received: u64 = 0;

    while shared.ready_state() == ReadyState::Open {
        let fragment = match source.recv_fragment().await {
            Ok(Some(fragment)) => fragment,
            Ok(None) => {
                tracing::info!("Transport closed by peer");
                break;
            }
            Err(e) => {
                tracing::warn!("Transport read failed: {}", e);
                break;
            }
        };

        let frame = match assembler.push(fragment) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Dropping inbound message: {}", e);
                continue;
            }
        };

        let response = match P::decode_response(&frame) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Failed to decode {} byte message: {}", frame.len(), e);
                continue;
            }
        };

        received += 1;

        let status = P::status(&response);
        *shared.last_status.write() = status;

        let case = P::response_case(&response);
        tracing::debug!("Received {:?} (status {:?})", case, status);

        shared.dispatcher.dispatch(case, &response);
    }

    shared.set_ready_state(ReadyState::Closed);
    tracing::debug!("Receive pump stopped after {} message(s)", received);
}
