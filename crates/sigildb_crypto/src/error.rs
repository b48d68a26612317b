//! Error types for cryptographic operations.

use thiserror::Error;

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised while decoding keys or checking signatures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Text was not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decoded bytes have the wrong length.
    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// What was being decoded.
        what: &'static str,
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Bytes do not form a valid Ed25519 public key.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// The digest embedded in a record signature does not match the record.
    #[error("record digest does not match its content")]
    DigestMismatch,

    /// The record was signed under a different sync key.
    #[error("record was signed with an unknown key")]
    UnknownFingerprint,

    /// The Ed25519 signature did not verify.
    #[error("signature verification failed")]
    BadSignature,

    /// A secret box could not be opened.
    #[error("secret box authentication failed")]
    Decryption,
}

impl CryptoError {
    /// Creates an invalid length error.
    pub fn invalid_length(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::InvalidLength {
            what,
            expected,
            actual,
        }
    }
}
