//! Error types for relnotes.
//!
//! Library crates use [`RelnotesError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all relnotes operations.
#[derive(Debug, thiserror::Error)]
pub enum RelnotesError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to an upstream service.
    #[error("network error: {0}")]
    Network(String),

    /// Source-level extraction fault. Always fatal for the run.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid caller input (bad watermark, missing parameter).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RelnotesError>;

impl RelnotesError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error was caused by the caller rather than a source fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = RelnotesError::config("missing SLACK_BOT_TOKEN");
        assert_eq!(err.to_string(), "config error: missing SLACK_BOT_TOKEN");

        let err = RelnotesError::validation("unrecognized date 'yesterday'");
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn only_validation_is_client_error() {
        assert!(RelnotesError::validation("x").is_client_error());
        assert!(!RelnotesError::Extraction("x".into()).is_client_error());
        assert!(!RelnotesError::Network("x".into()).is_client_error());
    }
}
