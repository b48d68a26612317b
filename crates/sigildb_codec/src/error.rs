//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while reading or writing documents.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The text was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The JSON value was valid but not an object.
    #[error("document must be a JSON object, got {found}")]
    NotAnObject {
        /// Kind of JSON value that was found instead.
        found: &'static str,
    },

    /// A reserved field holds a value of the wrong shape.
    #[error("invalid field `{field}`: {message}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Description of the problem.
        message: String,
    },

    /// The identifier is not a canonical UUID.
    #[error("invalid document id: {0:?}")]
    InvalidId(String),
}

impl CodecError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }
}
