//! Error types for the extension directory.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Directory error types.
#[derive(Debug, Error)]
pub enum Error {
    /// The primary site configuration could not be read or parsed.
    #[error("cannot load configuration {}: {source}", path.display())]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing a configuration layer back to disk failed.
    #[error("cannot save {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Extension number outside the provisioned range.
    #[error("invalid extension number {0}")]
    OutOfRange(u32),

    /// Line is pinned by the custom layer.
    #[error("extension {0} is custom provisioned and cannot be changed")]
    NotEditable(u32),

    /// Explicit provisioning of an extension that already exists.
    #[error("extension {0} already exists")]
    AlreadyExists(u32),

    /// Settings writes target only the site setting sections.
    #[error("section [{0}] does not hold site settings")]
    ReservedSection(String),

    /// Registry descriptor disagrees with the compiled record layout.
    #[error("registry size mismatch: {field} declared {declared}, expected {expected}")]
    SizeMismatch {
        field: &'static str,
        declared: usize,
        expected: usize,
    },

    /// Registry descriptor missing or not valid JSON.
    #[error("registry descriptor {}: {reason}", path.display())]
    Descriptor { path: PathBuf, reason: String },

    /// Shared registry segment is not available.
    #[error("registry unavailable: {0}")]
    BridgeUnavailable(String),

    /// Reload message to the exchange daemon failed.
    #[error("daemon notify failed: {0}")]
    DaemonNotify(String),

    /// The reload listener has stopped.
    #[error("reload channel closed")]
    ReloadChannelClosed,
}

impl Error {
    /// Errors a request handler should report back to its client.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::OutOfRange(_)
                | Error::NotEditable(_)
                | Error::AlreadyExists(_)
                | Error::ReservedSection(_)
                | Error::Persist { .. }
        )
    }

    /// Errors that must stop the process at startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigLoad { .. } | Error::SizeMismatch { .. } | Error::Descriptor { .. }
        )
    }
}
