//! Error types for chunkdb core.

use crate::document::SurrogateId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in chunkdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Collection name is not usable.
    #[error("invalid collection name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Document body is not a JSON object.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },

    /// A collection with this name already exists.
    #[error("collection already exists: {name}")]
    CollectionExists {
        /// Name of the collection.
        name: String,
    },

    /// Collection not found.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// Document not found.
    #[error("document {id} not found in collection {collection}")]
    DocumentNotFound {
        /// The collection searched.
        collection: String,
        /// The surrogate id that was not found.
        id: SurrogateId,
    },

    /// Documents are not in ascending surrogate id order.
    #[error("documents of {collection} out of order: {previous} followed by {next}")]
    UnorderedDocuments {
        /// The collection being assembled.
        collection: String,
        /// The earlier surrogate id.
        previous: SurrogateId,
        /// The surrogate id that did not increase.
        next: SurrogateId,
    },

    /// Deferred collection data could not be materialized.
    #[error("failed to materialize collection {collection}: {message}")]
    Materialize {
        /// The collection being materialized.
        collection: String,
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates a materialization error.
    pub fn materialize(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Materialize {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error means persisted data is inconsistent.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CoreError::UnorderedDocuments { .. }
                | CoreError::Materialize { .. }
                | CoreError::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::DocumentNotFound {
            collection: "users".into(),
            id: 7,
        };
        assert_eq!(err.to_string(), "document 7 not found in collection users");
    }

    #[test]
    fn corruption_classification() {
        let err = CoreError::UnorderedDocuments {
            collection: "users".into(),
            previous: 4,
            next: 2,
        };
        assert!(err.is_corruption());
        assert!(!CoreError::invalid_document("not an object").is_corruption());
    }
}
