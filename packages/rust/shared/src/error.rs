//! Error types for LeadScout.
//!
//! Library crates use [`LeadScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all LeadScout operations.
#[derive(Debug, thiserror::Error)]
pub enum LeadScoutError {
    /// Missing credentials/identifiers or an unparseable config file. Never retried.
    #[error("config error: {message}")]
    Config { message: String },

    /// Navigation or interaction failure on the map surface.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Failure extracting one listing. Always absorbed by the caller.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Reasoning service failure during batch validation.
    #[error("validation error: {message}")]
    Validation { message: String, transient: bool },

    /// Tabular sink backend failure.
    #[error("sink error: {message}")]
    Sink { message: String, transient: bool },

    /// Network/HTTP error talking to an external service.
    #[error("network error: {0}")]
    Network(String),

    /// Local database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Response body or document could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LeadScoutError>;

impl LeadScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Validation failure that is worth retrying.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            transient: true,
        }
    }

    /// Validation failure that retrying will not fix (bad request, auth).
    pub fn validation_fatal(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            transient: false,
        }
    }

    /// Sink backend failure that is worth retrying.
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink {
            message: msg.into(),
            transient: true,
        }
    }

    /// Sink backend failure that retrying will not fix.
    pub fn sink_fatal(msg: impl Into<String>) -> Self {
        Self::Sink {
            message: msg.into(),
            transient: false,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a bounded-backoff retry may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Parse { .. } => true,
            Self::Validation { transient, .. } | Self::Sink { transient, .. } => *transient,
            Self::Config { .. }
            | Self::Discovery(_)
            | Self::Extraction(_)
            | Self::Storage(_)
            | Self::Io { .. } => false,
        }
    }

    /// Map an HTTP status from an external service to an error of the right
    /// retry class. `429`, `529` and `5xx` are transient.
    pub fn from_status(status: u16, body: &str, make: fn(String, bool) -> Self) -> Self {
        let transient = status == 429 || status == 529 || (500..600).contains(&status);
        make(format!("HTTP {status}: {body}"), transient)
    }
}
