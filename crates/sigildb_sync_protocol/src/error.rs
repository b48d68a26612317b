//! Error types for the sync protocol.

use sigildb_crypto::CryptoError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Reasons an inbound packet is dropped.
///
/// None of these are ever reported back to the sender.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The packet is shorter than its fixed header.
    #[error("truncated packet: {actual} bytes, need at least {needed}")]
    Truncated {
        /// Minimum size in bytes.
        needed: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Unknown envelope version byte.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    /// The key hint names a different store.
    #[error("packet is addressed to another store")]
    WrongStore,

    /// The sealed and signed timestamps disagree.
    #[error("inner timestamp does not match the header")]
    TimestampMismatch,

    /// The message is older than the replay window.
    #[error("stale message: {age_secs}s old")]
    Stale {
        /// Age in whole seconds.
        age_secs: i64,
    },

    /// Opening the box or checking the sender's signature failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The payload is not a valid message.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A field inside the message is malformed.
    #[error("malformed field {field}: {message}")]
    Field {
        /// Field name on the wire.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl ProtocolError {
    /// Creates a malformed field error.
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        Self::Field {
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::Truncated {
            needed: 25,
            actual: 3,
        };
        assert!(err.to_string().contains("25"));

        let err = ProtocolError::field("writePassword", "not base64");
        assert_eq!(err.to_string(), "malformed field writePassword: not base64");
    }
}
