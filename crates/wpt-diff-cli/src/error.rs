//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// Writing the failed-test list or reports failed
    #[error("Failed to write {what}: {message}")]
    Artifact {
        /// Which artifact
        what: String,
        /// Error message
        message: String,
    },

    /// The binary was built without browser support
    #[error("Browser support not enabled. Rebuild with --features browser")]
    BrowserUnavailable,

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// wpt-diff library error
    #[error("{0}")]
    WptDiff(#[from] wpt_diff::WptDiffError),
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an artifact write error
    #[must_use]
    pub fn artifact(what: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Artifact {
            what: what.into(),
            message: message.to_string(),
        }
    }
}
