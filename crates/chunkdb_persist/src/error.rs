//! Error types for the persistence engine.

use chunkdb_core::CoreError;
use chunkdb_storage::StorageError;
use thiserror::Error;

/// Result type for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Errors that can occur while saving, loading or deleting a database.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Key/value backend error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Document model error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid adapter configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Another save, load or delete is still running on this adapter.
    #[error("cannot {operation}: another operation is in progress")]
    OperationInProgress {
        /// The operation that was refused.
        operation: &'static str,
    },

    /// The persisted chunks do not form a valid database.
    #[error("database corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A chunk codec hook failed.
    #[error("chunk codec failed: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },
}

impl PersistError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns true if the persisted data is inconsistent.
    pub fn is_corruption(&self) -> bool {
        match self {
            PersistError::Corrupted { .. } | PersistError::Serialization(_) => true,
            PersistError::Core(err) => err.is_corruption(),
            _ => false,
        }
    }

    /// Returns true if the operation may succeed when retried by the caller.
    ///
    /// The adapter itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistError::OperationInProgress { .. }
                | PersistError::Storage(
                    StorageError::TransactionAborted { .. }
                        | StorageError::Blocked { .. }
                        | StorageError::Closed
                )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PersistError::OperationInProgress { operation: "save" };
        assert_eq!(
            err.to_string(),
            "cannot save: another operation is in progress"
        );
        assert_eq!(
            PersistError::corrupted("missing loki chunk").to_string(),
            "database corrupted: missing loki chunk"
        );
    }

    #[test]
    fn classification() {
        assert!(PersistError::corrupted("x").is_corruption());
        assert!(!PersistError::config("x").is_corruption());
        assert!(PersistError::from(StorageError::aborted("x")).is_retryable());
        assert!(!PersistError::corrupted("x").is_retryable());

        let core = CoreError::UnorderedDocuments {
            collection: "c".into(),
            previous: 2,
            next: 1,
        };
        assert!(PersistError::from(core).is_corruption());
    }
}
