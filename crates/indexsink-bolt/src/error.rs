//! Error types for the indexsink bolt.
//!
//! One error type covers configuration, record submission, bulk flushes and
//! the controller lifecycle. The variants map onto the failure classes the
//! controller treats differently: a `SubmitError` or `SerializationError` is
//! fatal for a single record, while `ConnectionError` and `BulkError` are
//! fatal for the whole pending batch.

use thiserror::Error;

/// Errors that can occur while batching and indexing records.
#[derive(Debug, Error)]
pub enum BoltError {
    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Record payload could not be encoded for the backend.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The backend refused to accept a single record.
    #[error("Submit error: {0}")]
    SubmitError(String),

    /// The backend could not be reached.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The backend rejected a bulk request as a whole.
    #[error("Bulk error: {0}")]
    BulkError(String),

    /// Operation not allowed in the controller's current state.
    #[error("State error: {0}")]
    StateError(String),

    /// Error in the task runtime.
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

impl BoltError {
    /// True for errors that leave the fate of every pending record unknown.
    pub fn is_batch_level(&self) -> bool {
        matches!(self, BoltError::ConnectionError(_) | BoltError::BulkError(_))
    }
}

/// Result type alias for bolt operations.
pub type Result<T> = std::result::Result<T, BoltError>;

impl From<serde_json::Error> for BoltError {
    fn from(e: serde_json::Error) -> Self {
        BoltError::SerializationError(e.to_string())
    }
}
