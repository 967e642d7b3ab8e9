use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by reactive store backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be reached; watchers stall until the connection comes back.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What was being attempted.
        message: String,
        /// Backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The store refused a write because another client changed the same location.
    #[error("write conflict at `{path}`")]
    WriteConflict {
        /// Location of the rejected write.
        path: String,
    },
    /// A record did not have the shape the orchestrator expects.
    #[error("malformed record at `{path}`: {reason}")]
    Malformed {
        /// Location of the record.
        path: String,
        /// What did not match.
        reason: String,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a malformed-record error for `path`.
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}
