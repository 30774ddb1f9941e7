//! Protolane error types

use crate::transport::StatusCode;

/// Protolane error types
#[derive(Debug, thiserror::Error)]
pub enum ProtolaneError {
    // Resolution errors
    #[error("unresolved type '{reference}' referenced from scope '{scope}' in {file}")]
    UnresolvedType {
        reference: String,
        scope: String,
        file: String,
    },

    #[error("ambiguous type '{reference}' referenced from scope '{scope}': candidates {candidates:?}")]
    AmbiguousType {
        reference: String,
        scope: String,
        candidates: Vec<String>,
    },

    #[error("type '{name}' declared in both {first} and {second}")]
    DuplicateType {
        name: String,
        first: String,
        second: String,
    },

    // Classification errors
    #[error("unsupported field type '{kind}' for field '{field}' of message '{message}'")]
    UnsupportedFieldType {
        message: String,
        field: String,
        kind: String,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Runtime errors
    /// A call terminated with a non-OK status. Code and message are the
    /// transport's, unmodified.
    #[error("call failed ({code}): {message}")]
    Transport { code: StatusCode, message: String },

    /// The consumer cancelled the call before it terminated.
    #[error("call cancelled")]
    Cancelled,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("keyed value error: {0}")]
    Keyed(String),

    // Wrapped errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtolaneError {
    /// Whether this error is reported by the generator against a single
    /// file or message rather than aborting the whole run.
    pub fn is_generation_error(&self) -> bool {
        matches!(
            self,
            ProtolaneError::UnresolvedType { .. }
                | ProtolaneError::AmbiguousType { .. }
                | ProtolaneError::UnsupportedFieldType { .. }
                | ProtolaneError::InvalidSchema(_)
        )
    }

    /// Status code carried by a runtime failure, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ProtolaneError::Transport { code, .. } => Some(*code),
            ProtolaneError::Cancelled => Some(StatusCode::Cancelled),
            ProtolaneError::Decode(_) => Some(StatusCode::Internal),
            _ => None,
        }
    }
}

/// Result type alias for Protolane operations
pub type Result<T> = std::result::Result<T, ProtolaneError>;
