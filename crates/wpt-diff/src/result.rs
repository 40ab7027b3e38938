//! Result and error types for wpt-diff.

use thiserror::Error;

/// Result type for wpt-diff operations
pub type WptDiffResult<T> = Result<T, WptDiffError>;

/// Errors that can occur while resolving, running or reporting a WPT run
#[derive(Debug, Error)]
pub enum WptDiffError {
    /// Network request to an upstream data source failed
    #[error("Failed to fetch {url}: {message}")]
    Fetch {
        /// URL that was requested
        url: String,
        /// Error message
        message: String,
    },

    /// Upstream body was not valid JSON
    #[error("Failed to parse {what}: {message}")]
    Parse {
        /// Which document failed to parse
        what: String,
        /// Error message
        message: String,
    },

    /// Upstream JSON was valid but lacked an expected field
    #[error("Unexpected response shape: {message}")]
    Schema {
        /// Error message
        message: String,
    },

    /// Proxy session never came up
    #[error("Proxy setup failed: {message}")]
    ProxySetup {
        /// Error message
        message: String,
    },

    /// The first executed test never signalled completion
    #[error(
        "Quitting because the first test timed out (there must be something seriously wrong): {test_path}"
    )]
    FirstTestTimedOut {
        /// Path of the test that timed out
        test_path: String,
    },

    /// A test URL could not be resolved against its base
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl {
        /// Offending URL text
        url: String,
        /// Error message
        message: String,
    },

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Page error
    #[error("Page error: {message}")]
    Page {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Result bridge could not be installed or delivered a bad payload
    #[error("Result bridge error: {message}")]
    Binding {
        /// Error message
        message: String,
    },

    /// Checkpoint could not be loaded or saved
    #[error("Checkpoint error: {message}")]
    Checkpoint {
        /// Error message
        message: String,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message fragments CDP and the browser emit once the target is gone
const TARGET_CLOSED_MARKERS: &[&str] = &[
    "Target closed",
    "Target page, context or browser has been closed",
    "has been closed",
    "channel closed",
    "oneshot canceled",
    "Browser closed",
];

impl WptDiffError {
    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::Page {
            message: message.into(),
        }
    }

    /// Create a proxy setup error
    #[must_use]
    pub fn proxy_setup(message: impl Into<String>) -> Self {
        Self::ProxySetup {
            message: message.into(),
        }
    }

    /// Create a checkpoint error
    #[must_use]
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: message.into(),
        }
    }

    /// Whether this error means the browser or page target was torn down.
    ///
    /// The run loop stops iterating on these instead of reporting and
    /// moving on, since every later test would fail the same way.
    #[must_use]
    pub fn is_target_closed(&self) -> bool {
        let text = self.to_string();
        TARGET_CLOSED_MARKERS
            .iter()
            .any(|marker| text.contains(marker))
    }

    /// Whether this error should abort the run rather than a single test
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FirstTestTimedOut { .. } | Self::ProxySetup { .. }
        )
    }
}
