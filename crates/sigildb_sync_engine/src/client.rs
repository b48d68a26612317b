//! Reconnecting client sessions.

use crate::config::{RetryConfig, SessionConfig};
use crate::error::{SyncError, SyncResult};
use crate::session::{Role, Session};
use crate::transport::{framed, run_session};
use parking_lot::Mutex;
use sigildb_core::{Store, StoreError};
use sigildb_sync_protocol::{InsertDocument, SyncMessage};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Keeps one store connected to one server, reconnecting with backoff.
#[derive(Debug, Clone)]
pub struct SyncClient {
    store: Store,
    address: String,
    session: SessionConfig,
    retry: RetryConfig,
}

impl SyncClient {
    /// Creates a client for `store` talking to `address` (`host:port`).
    pub fn new(store: Store, address: impl Into<String>) -> Self {
        Self {
            store,
            address: address.into(),
            session: SessionConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the session configuration.
    #[must_use]
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the server address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connects once and runs a session until it ends.
    ///
    /// Returns the number of packets from the server that were handled.
    pub async fn connect_once(
        &self,
        outbox: &mut mpsc::UnboundedReceiver<SyncMessage>,
    ) -> SyncResult<u64> {
        let (handled, result) = self.attempt(outbox).await;
        result.map(|()| handled)
    }

    async fn attempt(&self, outbox: &mut mpsc::UnboundedReceiver<SyncMessage>) -> (u64, SyncResult<()>) {
        let stream = match TcpStream::connect(&self.address).await {
            Ok(stream) => stream,
            Err(err) => {
                self.store.mark_server(&self.address, -1);
                return (0, Err(err.into()));
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "could not disable nagle");
        }
        info!(server = %self.address, "connected");

        let session = Session::new(self.store.clone(), Role::Client, self.session.batch_size)
            .with_server_address(self.address.clone());
        let session = Arc::new(Mutex::new(session));
        let result = run_session(framed(stream), Arc::clone(&session), &self.session, None, outbox).await;
        self.store.mark_server(&self.address, -1);
        info!(server = %self.address, "disconnected");
        let handled = session.lock().packets_handled();
        (handled, result)
    }

    /// Runs sessions until the store closes or retries are exhausted.
    ///
    /// The backoff returns to its initial delay after any session in which
    /// the server answered.
    pub async fn run(self, mut outbox: mpsc::UnboundedReceiver<SyncMessage>) -> SyncResult<()> {
        let mut failures = 0u32;
        loop {
            if self.store.is_closed() {
                return Ok(());
            }

            let (handled, result) = self.attempt(&mut outbox).await;
            if handled > 0 {
                failures = 0;
            }
            match result {
                Ok(()) => {}
                Err(SyncError::Closed) | Err(SyncError::Store(StoreError::Closed)) => return Ok(()),
                Err(err) if err.is_retryable() => {
                    warn!(server = %self.address, error = %err, "session failed");
                }
                Err(err) => return Err(err),
            }
            if self.store.is_closed() {
                return Ok(());
            }

            failures += 1;
            if self.retry.exhausted(failures) {
                return Err(SyncError::transport_fatal(format!(
                    "gave up on {} after {failures} attempts",
                    self.address
                )));
            }
            let delay = self.retry.delay_for_attempt(failures);
            info!(server = %self.address, delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    /// Spawns [`SyncClient::run`] on the current runtime.
    pub fn spawn(self) -> ClientHandle {
        let (outbox, receiver) = mpsc::unbounded_channel();
        let store = self.store.clone();
        let task = tokio::spawn(self.run(receiver));
        ClientHandle {
            store,
            outbox,
            task,
        }
    }
}

/// Handle to a spawned [`SyncClient`].
#[derive(Debug)]
pub struct ClientHandle {
    store: Store,
    outbox: mpsc::UnboundedSender<SyncMessage>,
    task: JoinHandle<SyncResult<()>>,
}

impl ClientHandle {
    /// Queues a message for the server.
    pub fn send(&self, message: SyncMessage) -> SyncResult<()> {
        self.outbox.send(message).map_err(|_| SyncError::Closed)
    }

    /// Asks the server to write documents with its copy of the write key.
    pub fn insert_documents(&self, documents: Vec<InsertDocument>) -> SyncResult<()> {
        let proof = self.store.write_proof()?.ok_or(StoreError::Unauthorized)?;
        self.send(SyncMessage::new().with_insert(&proof, documents))
    }

    /// Returns true once the client gave up or the store closed.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the client.
    pub fn stop(&self) {
        self.task.abort();
    }

    /// Waits for the client to end on its own.
    pub async fn join(self) -> SyncResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
