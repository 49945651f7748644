//! Error types for the reconciliation engine.

use filesync_store::StoreError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Result type for desired-state reads.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for a reconciliation pass.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Result type for engine lifecycle operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while opening a source location.
#[derive(Error, Debug)]
pub enum FetchError {
    /// No fetcher handles this scheme.
    #[error("unsupported scheme in source location {0:?}")]
    UnsupportedScheme(String),

    /// The location could not be parsed.
    #[error("invalid source location {location:?}: {reason}")]
    InvalidLocation {
        /// The offending location.
        location: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The source does not exist.
    #[error("source not found: {0}")]
    NotFound(String),

    /// The server answered with a non-success status.
    #[error("HTTP status {status} from {location}")]
    Http {
        /// The requested location.
        location: String,
        /// The response status code.
        status: u16,
    },

    /// Network or protocol failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Local I/O failure while opening the source.
    #[error("I/O error opening {location}: {source}")]
    Io {
        /// The requested location.
        location: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later attempt may succeed without any change
    /// to the desired state.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { retryable, .. } => *retryable,
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
            FetchError::Io { .. } => true,
            _ => false,
        }
    }
}

/// Errors raised by a desired-state source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The desired state could not be read right now.
    #[error("desired state for {key} unavailable: {message}")]
    Unavailable {
        /// The reconciliation key.
        key: String,
        /// Error message.
        message: String,
    },

    /// The desired state exists but cannot be interpreted.
    #[error("desired state for {key} is malformed: {message}")]
    Malformed {
        /// The reconciliation key.
        key: String,
        /// Error message.
        message: String,
    },

    /// The backend behind the source cannot be reached.
    #[error("cannot reach desired-state backend at {0}")]
    NotConnected(PathBuf),

    /// The key does not name an object inside the source's namespace.
    #[error("invalid desired-state key {0:?}")]
    InvalidKey(String),
}

/// Why a single file could not be downloaded.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// The desired name cannot live in the target directory.
    #[error("invalid file name {0:?}")]
    InvalidName(String),

    /// The temporary file could not be created.
    #[error("cannot create temporary file: {0}")]
    Create(#[source] StoreError),

    /// The source could not be opened.
    #[error("cannot open source: {0}")]
    Fetch(#[source] FetchError),

    /// Streaming the body into the temporary file failed.
    #[error("copy failed: {0}")]
    Copy(#[source] io::Error),

    /// The temporary file could not be renamed to its final name.
    #[error("cannot commit file: {0}")]
    Commit(#[source] StoreError),
}

impl DownloadError {
    /// Returns true if the same download may succeed on a later pass.
    ///
    /// Local write failures count as transient; a bad name or a missing
    /// source needs a change to the desired state.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::InvalidName(_) => false,
            DownloadError::Fetch(err) => err.is_retryable(),
            DownloadError::Create(_) | DownloadError::Copy(_) | DownloadError::Commit(_) => true,
        }
    }
}

/// The coarse outcome of a failed reconciliation pass.
///
/// This is all the work queue sees; per-file causes are logged where
/// they happen.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The desired state could not be read; the pass was not attempted.
    #[error("desired state unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),

    /// The target directory could not be listed; no diff was computed.
    #[error("cannot list {}: {source}", .dir.display())]
    ListFailure {
        /// The target directory.
        dir: PathBuf,
        /// The underlying error.
        #[source]
        source: StoreError,
    },

    /// At least one deletion failed.
    #[error("failed to delete {} file(s): {}", .failed.len(), .failed.join(", "))]
    DeleteFailure {
        /// Names that could not be deleted.
        failed: Vec<String>,
    },

    /// At least one download failed.
    #[error("failed to download {} file(s): {}", .failed.len(), .failed.join(", "))]
    DownloadFailure {
        /// Names that could not be downloaded.
        failed: Vec<String>,
    },

    /// The pass panicked.
    #[error("reconcile panicked: {0}")]
    Panicked(String),
}

impl ReconcileError {
    /// Returns a stable label for logs and statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::SourceUnavailable(_) => "source_unavailable",
            ReconcileError::ListFailure { .. } => "list_failure",
            ReconcileError::DeleteFailure { .. } => "delete_failure",
            ReconcileError::DownloadFailure { .. } => "download_failure",
            ReconcileError::Panicked(_) => "panicked",
        }
    }
}

/// Errors in the engine lifecycle.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid lifecycle transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A worker or watcher thread could not be spawned.
    #[error("cannot spawn thread: {0}")]
    Spawn(#[source] io::Error),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
