//! Harness error types for typed error handling.
//!
//! Every failure the harness can surface to test code is one of the variants
//! below. None of them are retried: a test harness has to be deterministic.

use std::path::PathBuf;

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Harness errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The hosted application failed to boot or its root path is invalid.
    ///
    /// Fatal to the host: recreate it to recover.
    #[error("failed to initialize application at {root:?}: {reason}")]
    Initialization { root: PathBuf, reason: String },

    /// Empty path or unusable form value passed to a request method.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A test script run inside the boundary failed or panicked.
    ///
    /// The script's own error is kept as the source so callers can
    /// `downcast_ref` to recover its identity.
    #[error("script failed: {source}")]
    ScriptExecution {
        #[source]
        source: anyhow::Error,
    },

    /// The application runtime signalled an unhandled fault for one request.
    ///
    /// The host stays usable for subsequent requests.
    #[error("request to '{path}' faulted: {reason}")]
    PipelineExhausted { path: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The boundary thread is gone (already shut down or died).
    #[error("isolation boundary unavailable: {0}")]
    Boundary(String),
}

impl Error {
    /// Create an initialization error.
    pub fn initialization(root: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Initialization {
            root: root.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Wrap an error escaping a script.
    pub fn script(source: impl Into<anyhow::Error>) -> Self {
        Self::ScriptExecution {
            source: source.into(),
        }
    }

    /// Create a pipeline exhausted error.
    pub fn pipeline_exhausted(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PipelineExhausted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a boundary error.
    pub fn boundary(reason: impl Into<String>) -> Self {
        Self::Boundary(reason.into())
    }

    /// Returns the script's original error, if this is a script failure.
    pub fn script_source(&self) -> Option<&anyhow::Error> {
        match self {
            Self::ScriptExecution { source } => Some(source),
            _ => None,
        }
    }

    /// Whether the host can keep serving after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Initialization { .. } | Self::Boundary(_))
    }
}
