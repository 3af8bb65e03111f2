//! Common error types for FieldSync.

use thiserror::Error;

/// Top-level error type for FieldSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local store operation failed (constraint violation, database I/O).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Filesystem access outside the database.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON column, snapshot or wire payload could not be (de)coded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record failed validation; nothing was written.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No record with the given local id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote endpoint could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote endpoint rejected or failed the request.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Sync coordination failed (scheduler stopped, task lost).
    #[error("Sync error: {0}")]
    Sync(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            Error::Network("timeout".into()).to_string(),
            "Network error: timeout"
        );
        assert_eq!(
            Error::NotFound("Inspection 4 not found".into()).to_string(),
            "Not found: Inspection 4 not found"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
