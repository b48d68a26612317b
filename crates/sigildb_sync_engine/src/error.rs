//! Error types for the sync engine.

use sigildb_core::StoreError;
use sigildb_crypto::NodeId;
use sigildb_sync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// None of these are ever sent to the peer.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A packet could not be opened or decoded. The packet is dropped and
    /// the session continues.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The store failed while handling a message.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A second signer appeared on an established session.
    #[error("remote node changed from {expected} to {actual}")]
    RemoteChanged {
        /// Node bound by the first message.
        expected: NodeId,
        /// Node that signed the offending message.
        actual: NodeId,
    },

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The session or its store was closed.
    #[error("session closed")]
    Closed,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if reconnecting may help.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::RemoteChanged { .. } => true,
            SyncError::Store(err) => !matches!(err, StoreError::Closed),
            SyncError::Protocol(_) | SyncError::Closed => false,
        }
    }

    /// Returns true if the session must end. Anything else only costs the
    /// packet that caused it.
    pub fn ends_session(&self) -> bool {
        !matches!(self, SyncError::Protocol(_))
            && !matches!(self, SyncError::Store(err) if err.is_record_rejection())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::transport_retryable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::transport_fatal(format!("session task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("task panicked").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::Closed.is_retryable());
        assert!(!SyncError::Store(StoreError::Closed).is_retryable());
    }

    #[test]
    fn protocol_errors_only_drop_the_packet() {
        let err = SyncError::from(ProtocolError::WrongStore);
        assert!(!err.ends_session());

        let id = NodeId::from_bytes([1; 32]);
        let err = SyncError::RemoteChanged {
            expected: id,
            actual: NodeId::from_bytes([2; 32]),
        };
        assert!(err.ends_session());
        assert!(err.to_string().contains(&id.to_string()));
    }
}
