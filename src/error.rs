//! Error types for fitlog-reader
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// fitlog-reader error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or empty log root (fatal, not retried)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File unreadable mid-scan; aborts the read of one record
    #[error("IO error on `{}`: {source}", path.display())]
    Io {
        /// File or directory that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A single corrupt line (logged and skipped by callers)
    #[error("Malformed line {line} in `{}`: {reason}", path.display())]
    MalformedLine {
        /// File containing the line
        path: PathBuf,
        /// Zero-based line index within the file
        line: usize,
        /// Parser message
        reason: String,
    },

    /// Watcher lifecycle bug: background thread did not settle on stop
    #[error("Concurrency invariant violated: {0}\nThe step watcher did not settle. Please report this issue.")]
    ConcurrencyViolation(String),
}

impl Error {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether this error is fatal and must not be retried automatically.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::ConcurrencyViolation(_))
    }
}
