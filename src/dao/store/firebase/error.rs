//! Error types shared by the Firebase storage implementation.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Convenient result alias returning [`FirebaseDaoError`] failures.
pub type FirebaseResult<T> = Result<T, FirebaseDaoError>;

/// Failures that can occur while interacting with the Realtime Database REST API.
#[derive(Debug, Error)]
pub enum FirebaseDaoError {
    /// Required environment variable is missing.
    #[error("missing Firebase environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the variable.
        var: &'static str,
    },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build Firebase client")]
    ClientBuilder {
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[error("failed to send Firebase request to `{path}`")]
    RequestSend {
        /// Location requested.
        path: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },
    /// The database answered with an unexpected status code.
    #[error("unexpected Firebase response status {status} for `{path}`")]
    RequestStatus {
        /// Location requested.
        path: String,
        /// Status returned by the database.
        status: StatusCode,
    },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode Firebase response for `{path}`")]
    DecodeResponse {
        /// Location requested.
        path: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },
    /// Reading the event stream failed mid-way.
    #[error("failed to read Firebase event stream")]
    StreamRead {
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },
    /// An event of the stream carried a payload that is not the documented shape.
    #[error("invalid Firebase stream payload for `{path}`")]
    StreamPayload {
        /// Location requested.
        path: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// The server closed the stream on purpose (`cancel` or `auth_revoked`).
    #[error("Firebase closed the stream for `{path}`: {reason}")]
    StreamClosed {
        /// Location the stream was opened on.
        path: String,
        /// Event name sent by the server.
        reason: String,
    },
}

impl From<FirebaseDaoError> for StorageError {
    fn from(err: FirebaseDaoError) -> Self {
        match err {
            FirebaseDaoError::RequestStatus { path, status }
                if status == StatusCode::PRECONDITION_FAILED || status == StatusCode::CONFLICT =>
            {
                StorageError::WriteConflict { path }
            }
            FirebaseDaoError::StreamPayload { path, source } => {
                StorageError::malformed(path, source.to_string())
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
