//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// How an error should be treated by the retry controller and circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network timeouts, rate limiting, flaky subprocess exits. Retried locally.
    Transient,
    /// Credentials rejected. Terminal immediately, still counts toward the breaker.
    Unauthorized,
    /// Disk full, database unreachable. Terminal, never retried.
    Storage,
    /// Shutdown requested. Neither a success nor a failure.
    Cancelled,
    /// Anything else (bad input, missing rows). Terminal.
    Permanent,
}

impl FailureClass {
    /// Whether the retry controller may try again after this failure.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {path}: {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Chat error: {0}")]
    Chat(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Classify this error for retry and breaker decisions.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Transient(_) | Self::Chat(_) => FailureClass::Transient,
            Self::Unauthorized(_) => FailureClass::Unauthorized,
            Self::Storage(_)
            | Self::DatabaseSqlx(_)
            | Self::Migration(_)
            | Self::Io(_)
            | Self::IoPath { .. } => FailureClass::Storage,
            Self::Cancelled => FailureClass::Cancelled,
            Self::Http(e) => classify_http(e),
            Self::Serialization(_)
            | Self::NotFound { .. }
            | Self::Validation(_)
            | Self::Configuration(_)
            | Self::Other(_) => FailureClass::Permanent,
        }
    }

    /// Shorthand for `failure_class() == Cancelled`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

fn classify_http(err: &reqwest::Error) -> FailureClass {
    match err.status() {
        Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
            FailureClass::Unauthorized
        }
        Some(status) if status.as_u16() == 429 || status.is_server_error() => {
            FailureClass::Transient
        }
        Some(_) => FailureClass::Permanent,
        // Connect/timeout/body errors carry no status.
        None => FailureClass::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        assert_eq!(
            Error::transient("timeout").failure_class(),
            FailureClass::Transient
        );
        assert_eq!(
            Error::unauthorized("401").failure_class(),
            FailureClass::Unauthorized
        );
        assert_eq!(
            Error::storage("disk full").failure_class(),
            FailureClass::Storage
        );
        assert_eq!(
            Error::Io(std::io::Error::other("boom")).failure_class(),
            FailureClass::Storage
        );
        assert_eq!(Error::Cancelled.failure_class(), FailureClass::Cancelled);
        assert_eq!(
            Error::validation("bad").failure_class(),
            FailureClass::Permanent
        );
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(FailureClass::Transient.is_retryable());
        assert!(!FailureClass::Unauthorized.is_retryable());
        assert!(!FailureClass::Storage.is_retryable());
        assert!(!FailureClass::Cancelled.is_retryable());
        assert!(!FailureClass::Permanent.is_retryable());
    }
}
