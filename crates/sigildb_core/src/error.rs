//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(#[from] sigildb_storage::StorageError),

    /// Document encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] sigildb_codec::CodecError),

    /// Signature or key error. The offending record is rejected.
    #[error("crypto error: {0}")]
    Crypto(#[from] sigildb_crypto::CryptoError),

    /// I/O error outside the storage engine (config files, imports).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A local mutation was attempted without the write key.
    #[error("cannot modify records without the write key")]
    Unauthorized,

    /// The document violates a rule on its reserved fields.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// What is wrong with it.
        message: String,
    },

    /// The parent chain is deeper than the resolution limit.
    #[error("reference cycle likely at document {id}")]
    ReferenceCycle {
        /// Where resolution gave up.
        id: String,
    },

    /// Configuration could not be read or is inconsistent.
    #[error("configuration error: {message}")]
    Config {
        /// What is wrong with it.
        message: String,
    },

    /// Export or import text could not be processed.
    #[error("format error: {message}")]
    Format {
        /// What is wrong with it.
        message: String,
    },

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// A change callback called back into a store operation that was
    /// still running.
    #[error("store is busy in an enclosing call")]
    Busy,
}

impl StoreError {
    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a format error.
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Returns true if the error concerns a single record and leaves the
    /// store untouched, so a batch may continue past it.
    #[must_use]
    pub fn is_record_rejection(&self) -> bool {
        matches!(
            self,
            Self::Crypto(_)
                | Self::Codec(_)
                | Self::InvalidDocument { .. }
                | Self::ReferenceCycle { .. }
        )
    }
}

impl From<std::convert::Infallible> for StoreError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(sigildb_codec::CodecError::from(err))
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::format(err.to_string())
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(err: toml::ser::Error) -> Self {
        Self::format(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_rejections_are_classified() {
        assert!(StoreError::invalid_document("x").is_record_rejection());
        assert!(
            StoreError::Crypto(sigildb_crypto::CryptoError::BadSignature).is_record_rejection()
        );
        assert!(!StoreError::Unauthorized.is_record_rejection());
        assert!(!StoreError::Closed.is_record_rejection());
    }

    #[test]
    fn messages_are_readable() {
        let err = StoreError::ReferenceCycle { id: "abc".into() };
        assert_eq!(err.to_string(), "reference cycle likely at document abc");
    }
}
