//! Error types for store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred at a specific path.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being operated on.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The name cannot be stored in the target directory.
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    /// Another process holds the directory lock.
    #[error("directory {0} is locked by another process")]
    Locked(PathBuf),

    /// A failure injected by a test store.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Wraps an I/O error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the underlying cause is a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_detection() {
        let err = StoreError::io("/x", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert!(!StoreError::InvalidName("a/b".into()).is_not_found());
    }

    #[test]
    fn error_display_includes_path() {
        let err = StoreError::io("/srv/files", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(err.to_string().contains("/srv/files"));
    }
}
