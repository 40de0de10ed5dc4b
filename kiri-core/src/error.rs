//! # Error Handling
//!
//! Error types for KiriDB operations.
//!
//! ## Design Principles
//!
//! 1. **Actionable**: Every error should guide the caller toward resolution
//! 2. **Contextual**: Errors include relevant context (keys, file paths)
//! 3. **Categorised**: Each error maps to one of the engine's error kinds
//! 4. **Recoverable**: Distinguish between fatal and recoverable errors
//!
//! Key absence is not an error: `get` returns `Option` and `delete` returns
//! `bool`. An unsupported index operator is not an error either; the query
//! engine logs it and falls back to a scan.

use thiserror::Error;

/// Result type alias for KiriDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for KiriDB
#[derive(Error, Debug)]
pub enum Error {
    /// Operation attempted before `init` completed.
    #[error("store is not initialised")]
    NotReady,

    /// WAL append failed; the in-memory state was not updated.
    #[error("durability error: {message}")]
    Durability {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Snapshot or WAL could not be recovered.
    #[error("corruption detected: {message}")]
    Corruption { message: String },

    /// Schema or collection rule failed; no state change happened.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// A write was rejected by a structural rule (replica role, reserved key).
    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// Replication channel failure (follower unreachable, bad wire op).
    #[error("replication error: {message}")]
    Replication { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Check if the error leaves the engine in a usable state
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::NotReady => true,
            Error::Validation { .. } => true,
            Error::ConstraintViolation { .. } => true,
            Error::Replication { .. } => true,
            Error::Durability { .. } => false,
            Error::Corruption { .. } => false,
            Error::Io { .. } => false,
            _ => true,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NotReady => "NOT_READY",
            Error::Durability { .. } => "DURABILITY_ERROR",
            Error::Corruption { .. } => "CORRUPTION",
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            Error::Replication { .. } => "REPLICATION_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Shorthand for a durability failure wrapping an IO error.
    pub fn durability(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Durability {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}
