//! Error types for the sync server.

use sigildb_crypto::KeyHint;
use sigildb_sync_engine::SyncError;
use sigildb_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
///
/// Connection-level errors are logged and end only that connection.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The first frame names a store this server does not host.
    #[error("unknown store {0}")]
    UnknownStore(KeyHint),

    /// The store refuses to be served.
    #[error("store is not servable")]
    NotServable,

    /// The peer sent nothing in time.
    #[error("no frame within the first-frame timeout")]
    FirstFrameTimeout,

    /// The peer hung up before sending anything.
    #[error("connection closed before the first frame")]
    EmptyConnection,

    /// The first frame has no readable header.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The session failed.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the peer caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::UnknownStore(_)
                | ServerError::FirstFrameTimeout
                | ServerError::EmptyConnection
                | ServerError::Protocol(_)
        )
    }
}
