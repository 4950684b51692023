//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Opening or deleting was blocked by another open connection.
    #[error("database {name} is blocked by an open connection")]
    Blocked {
        /// Name of the blocked database.
        name: String,
    },

    /// The requested schema version is lower than the persisted one.
    #[error("requested version {requested} is lower than existing version {existing}")]
    VersionError {
        /// The version requested by the caller.
        requested: u32,
        /// The version currently persisted.
        existing: u32,
    },

    /// The object store does not exist after opening.
    #[error("missing object store: {0}")]
    MissingStore(String),

    /// The connection was closed.
    #[error("connection is closed")]
    Closed,

    /// A write was attempted inside a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The transaction is no longer active (committed or aborted).
    #[error("transaction is no longer active")]
    Inactive,

    /// The transaction was aborted and its writes were discarded.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// A generic backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Creates a transaction aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Returns true if the connection must be reopened before further use.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, StorageError::Closed)
    }
}
