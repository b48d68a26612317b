//! Errors reported by the command-line tool.

use sigildb_core::StoreError;
use sigildb_sync_engine::SyncError;
use sigildb_sync_server::ServerError;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Anything that can stop a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// The command needs a store path.
    #[error("store path required for {0} (use --path)")]
    MissingPath(&'static str),

    /// The command line was well formed but makes no sense.
    #[error("{0}")]
    Usage(String),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Sync session failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Sync server failure.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Bad JSON on the command line or in a file.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// File or terminal I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}
