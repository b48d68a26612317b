//! Accept loop and per-connection routing.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::registry::StoreRegistry;
use futures_util::StreamExt;
use parking_lot::Mutex;
use sigildb_core::Store;
use sigildb_crypto::KeyHint;
use sigildb_sync_engine::{framed, run_session, Role, Session};
use sigildb_sync_protocol::key_hint;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The sync server.
///
/// Accepts TCP connections and routes each to a hosted store by the key
/// hint in its first frame, then runs a server-side session on it.
///
/// # Example
///
/// ```no_run
/// use sigildb_core::Store;
/// use sigildb_sync_server::{ServerConfig, SyncServer};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Store::open("notes.db")?;
/// let server = SyncServer::new(ServerConfig::default());
/// server.register(store)?;
/// let handle = server.spawn().await?;
/// println!("listening on {}", handle.local_addr());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<StoreRegistry>,
    permits: Arc<Semaphore>,
    stop: watch::Sender<bool>,
}

impl SyncServer {
    /// Creates a new sync server hosting no stores.
    pub fn new(config: ServerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections));
        let (stop, _) = watch::channel(false);
        Self {
            config,
            registry: Arc::new(StoreRegistry::new()),
            permits,
            stop,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the hosted stores.
    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// Hosts a store.
    pub fn register(&self, store: Store) -> ServerResult<KeyHint> {
        self.registry.register(store)
    }

    /// Binds the listening socket.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(addr = %listener.local_addr()?, "sync server listening");
        Ok(listener)
    }

    /// Drops every connection and stops accepting new ones.
    pub fn shutdown(&self) {
        if !self.stop.send_replace(true) {
            info!("sync server shutting down");
        }
    }

    /// Accepts connections until shutdown or until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> ServerResult<()> {
        let mut stop = self.stop.subscribe();
        loop {
            let permit = match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            };
            let accepted = tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => return Ok(()),
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(error = %err, "accept failed");
                    return Err(err.into());
                }
            };
            if let Err(err) = stream.set_nodelay(true) {
                debug!(error = %err, "could not disable nagle");
            }

            let server = Arc::clone(&self);
            let mut stop = self.stop.subscribe();
            tokio::spawn(async move {
                let _permit = permit;
                debug!(peer = %peer, "accepted connection");
                let result = tokio::select! {
                    result = server.handle_connection(stream) => result,
                    _ = stop.wait_for(|stopped| *stopped) => {
                        debug!(peer = %peer, "dropped connection on shutdown");
                        return;
                    }
                };
                match result {
                    Ok(()) => info!(peer = %peer, "connection closed"),
                    Err(err) if err.is_client_error() => {
                        warn!(peer = %peer, error = %err, "rejected connection")
                    }
                    Err(err) => warn!(peer = %peer, error = %err, "connection failed"),
                }
            });
        }
    }

    /// Binds and serves on a background task.
    pub async fn spawn(self) -> ServerResult<ServerHandle> {
        let listener = self.bind().await?;
        let local_addr = listener.local_addr()?;
        let server = Arc::new(self);
        let task = tokio::spawn(Arc::clone(&server).serve(listener));
        Ok(ServerHandle {
            local_addr,
            server,
            task,
        })
    }

    /// Routes one connection by its first frame and runs its session.
    pub async fn handle_connection<S>(&self, io: S) -> ServerResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = framed(io);
        let first = tokio::time::timeout(self.config.first_frame_timeout, stream.next())
            .await
            .map_err(|_| ServerError::FirstFrameTimeout)?;
        let frame = match first {
            None => return Err(ServerError::EmptyConnection),
            Some(frame) => frame?.freeze(),
        };

        let hint = key_hint(&frame)?;
        let store = self
            .registry
            .get(&hint)
            .ok_or(ServerError::UnknownStore(hint))?;

        let session = Session::new(store, Role::Server, self.config.session.batch_size);
        let (_keep, mut outbox) = mpsc::unbounded_channel();
        run_session(
            stream,
            Arc::new(Mutex::new(session)),
            &self.config.session,
            Some(frame),
            &mut outbox,
        )
        .await?;
        Ok(())
    }
}

/// A server running on a background task.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    server: Arc<SyncServer>,
    task: JoinHandle<ServerResult<()>>,
}

impl ServerHandle {
    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the hosted stores.
    pub fn registry(&self) -> &Arc<StoreRegistry> {
        self.server.registry()
    }

    /// Drops every connection and stops accepting new ones.
    pub fn shutdown(&self) {
        self.server.shutdown();
    }

    /// Waits for the accept loop to end.
    pub async fn join(self) -> ServerResult<()> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => Ok(()),
            Err(err) => Err(std::io::Error::other(err).into()),
        }
    }
}
