use std::path::PathBuf;

/// Errors produced by a [`Copier`](crate::copier::Copier).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CopyError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("copy cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),
}

impl CopyError {
    pub fn io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Io(format!("{context}: {err}"))
    }
}

/// Errors that can occur while importing an asset.
///
/// Payloads are plain strings so an outcome can be handed to every caller
/// waiting on the same in-flight import.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("source not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("import cancelled")]
    Cancelled,

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ImportError>,
    },
}

impl ImportError {
    /// Returns true if the caller (or the user) cancelled the import.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if another copy attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::VerificationFailed(_))
    }
}

impl From<CopyError> for ImportError {
    fn from(err: CopyError) -> Self {
        match err {
            CopyError::InvalidInput(msg) => Self::InvalidInput(msg),
            CopyError::Cancelled => Self::Cancelled,
            CopyError::Io(msg) => Self::Io(msg),
        }
    }
}

/// Errors raised while persisting the cache registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
