//! Public handle to a pump connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use super::config::PumpConfig;
use super::handles::{Handles, Request};
use super::queue::CommandRequest;
use crate::app::AppCommand;
use crate::core::{CommandError, ConnectionState, PumpError, SessionError};
use crate::storage::{NoopPairingStore, PairingStore};
use crate::transport::{Link, PairingData};

/// Capacity of the request channel between handles and the connection task.
const REQUEST_CHANNEL_SIZE: usize = 64;

/// Opaque token for [`InsightPump::request_connection`].
///
/// The connection stays up while at least one lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionLock(u64);

impl ConnectionLock {
    /// Create a lock distinct from every other lock in the process.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the connection task.
#[derive(Debug, Clone)]
pub struct PumpStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Pairing completed at some point.
    pub is_paired: bool,
    /// Cause of the most recent teardown.
    pub last_failure: Option<Arc<SessionError>>,
}

/// Receiver for connection state changes.
///
/// The first value is the state at subscription time.
#[derive(Debug)]
pub struct StateReceiver {
    rx: mpsc::UnboundedReceiver<ConnectionState>,
}

impl StateReceiver {
    /// Wait for the next state. `None` once the connection task stopped.
    pub async fn recv(&mut self) -> Option<ConnectionState> {
        self.rx.recv().await
    }

    /// Wait until `state` is reached.
    ///
    /// Returns false if the connection task stopped first.
    pub async fn wait_for(&mut self, state: ConnectionState) -> bool {
        while let Some(next) = self.rx.recv().await {
            if next == state {
                return true;
            }
        }
        false
    }
}

/// Builder for [`InsightPump`].
pub struct PumpBuilder<L: Link> {
    link: L,
    config: PumpConfig,
    store: Box<dyn PairingStore>,
    pairing: Option<PairingData>,
}

impl<L: Link> PumpBuilder<L> {
    /// Start a builder for `link`.
    pub fn new(link: L) -> Self {
        Self {
            link,
            config: PumpConfig::default(),
            store: Box::new(NoopPairingStore),
            pairing: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: PumpConfig) -> Self {
        self.config = config;
        self
    }

    /// Set where pairing data is persisted.
    pub fn store(mut self, store: impl PairingStore) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Resume a previous pairing instead of pairing from scratch.
    pub fn pairing_data(mut self, pairing: Option<PairingData>) -> Self {
        self.pairing = pairing;
        self
    }

    /// Spawn the connection task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(self) -> InsightPump {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handles = Handles::new(
            Arc::new(self.link),
            self.config,
            self.store,
            self.pairing,
            event_tx,
        );
        tokio::spawn(handles.run(request_rx, event_rx));
        InsightPump { requests: request_tx }
    }
}

impl<L: Link> std::fmt::Debug for PumpBuilder<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpBuilder")
            .field("config", &self.config)
            .field("paired", &self.pairing.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle to one pump connection.
///
/// Clones talk to the same connection task. The task stops after
/// [`shutdown`](Self::shutdown) or once every handle is dropped.
///
/// # Example
///
/// ```ignore
/// let pump = InsightPump::builder(link)
///     .store(JsonPairingStore::new(&data_dir)?)
///     .spawn();
///
/// let lock = ConnectionLock::new();
/// pump.request_connection(lock).await?;
/// let level = pump.enqueue_command(ReadBatteryLevel).await?;
/// pump.withdraw_connection_request(lock).await?;
/// ```
#[derive(Debug, Clone)]
pub struct InsightPump {
    requests: mpsc::Sender<Request>,
}

impl InsightPump {
    /// Start building a connection over `link`.
    pub fn builder<L: Link>(link: L) -> PumpBuilder<L> {
        PumpBuilder::new(link)
    }

    /// Spawn a connection with default configuration.
    pub fn spawn<L: Link>(link: L, store: impl PairingStore, pairing: Option<PairingData>) -> Self {
        PumpBuilder::new(link).store(store).pairing_data(pairing).spawn()
    }

    async fn send(&self, request: Request) -> Result<(), PumpError> {
        self.requests.send(request).await.map_err(|_| PumpError::Stopped)
    }

    async fn call<T>(&self, request: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T, PumpError> {
        let (tx, rx) = oneshot::channel();
        self.send(request(tx)).await?;
        rx.await.map_err(|_| PumpError::Stopped)
    }

    /// Hold the connection open. Connects if currently disconnected.
    pub async fn request_connection(&self, lock: ConnectionLock) -> Result<(), PumpError> {
        self.send(Request::RequestConnection(lock)).await
    }

    /// Release `lock`. The last release disconnects.
    pub async fn withdraw_connection_request(&self, lock: ConnectionLock) -> Result<(), PumpError> {
        self.send(Request::WithdrawConnection(lock)).await
    }

    /// Run a command and wait for its decoded response.
    ///
    /// Fails with [`CommandError::NotConnected`] unless the connection is
    /// established, or if it is torn down before the pump answers.
    pub async fn enqueue_command<C: AppCommand>(&self, command: C) -> Result<C::Response, CommandError> {
        let (request, response) = CommandRequest::new(command);
        self.requests
            .send(Request::Enqueue(request))
            .await
            .map_err(|_| CommandError::NotConnected)?;
        response.await.map_err(|_| CommandError::NotConnected)?
    }

    /// Subscribe to state changes.
    pub async fn subscribe(&self) -> Result<StateReceiver, PumpError> {
        let rx = self.call(Request::Subscribe).await?;
        Ok(StateReceiver { rx })
    }

    /// The verification code while waiting for the operator.
    pub async fn verification_code(&self) -> Result<Option<String>, PumpError> {
        self.call(Request::VerificationCode).await
    }

    /// The operator saw the same code on the pump.
    pub async fn confirm_code(&self) -> Result<(), PumpError> {
        self.call(Request::ConfirmCode).await?
    }

    /// The operator saw a different code; abandon pairing.
    pub async fn reject_code(&self) -> Result<(), PumpError> {
        self.call(Request::RejectCode).await?
    }

    /// Current state, pairing flag and last failure.
    pub async fn status(&self) -> Result<PumpStatus, PumpError> {
        self.call(Request::Status).await
    }

    /// Current connection state.
    pub async fn state(&self) -> Result<ConnectionState, PumpError> {
        Ok(self.status().await?.state)
    }

    /// Cause of the most recent teardown.
    pub async fn last_failure(&self) -> Result<Option<Arc<SessionError>>, PumpError> {
        Ok(self.status().await?.last_failure)
    }

    /// Snapshot of the current pairing data.
    pub async fn pairing_data(&self) -> Result<Option<PairingData>, PumpError> {
        self.call(Request::PairingData).await
    }

    /// Tear down the connection and stop the connection task.
    pub async fn shutdown(&self) -> Result<(), PumpError> {
        self.call(Request::Shutdown).await
    }
}
