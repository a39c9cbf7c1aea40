//! Error types for object store operations.

/// Errors returned by [`crate::ObjectStore`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("object not found: {container}/{key}")]
    NotFound { container: String, key: String },

    /// The container does not exist.
    #[error("container not found: {container}")]
    ContainerNotFound { container: String },

    /// The key or container name cannot be mapped onto the backend.
    #[error("invalid object name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Written data does not hash to the fingerprint supplied by the caller.
    #[error("fingerprint mismatch for {key}: expected {expected}, got {actual}")]
    FingerprintMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Local I/O error.
    #[error("I/O error for {path:?}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backend refused or failed the request.
    #[error("{operation} failed: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
