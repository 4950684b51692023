//! Chunk key grammar.
//!
//! Every chunk lives under one string key in the backend's object store:
//!
//! | key | chunk |
//! |-----|-------|
//! | `loki` | the database record |
//! | `<collection>.metadata` | a collection record |
//! | `<collection>.chunk.<ordinal>` | a collection's data chunk |

use crate::error::{PersistError, PersistResult};
use std::fmt;
use std::str::FromStr;

/// Key of the database chunk.
pub const DATABASE_KEY: &str = "loki";

const METADATA_SUFFIX: &str = "metadata";
const CHUNK_INFIX: &str = "chunk";

/// A parsed chunk key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChunkKey {
    /// The database chunk.
    Database,
    /// A collection's metadata chunk.
    Metadata {
        /// Collection name.
        collection: String,
    },
    /// A collection's data chunk.
    Data {
        /// Collection name.
        collection: String,
        /// Chunk ordinal.
        ordinal: u64,
    },
}

impl ChunkKey {
    /// Key of a collection's metadata chunk.
    pub fn metadata(collection: impl Into<String>) -> Self {
        Self::Metadata {
            collection: collection.into(),
        }
    }

    /// Key of a collection's data chunk.
    pub fn data(collection: impl Into<String>, ordinal: u64) -> Self {
        Self::Data {
            collection: collection.into(),
            ordinal,
        }
    }

    /// Parses a backend key.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Corrupted`] for any key outside the grammar.
    pub fn parse(key: &str) -> PersistResult<Self> {
        if key == DATABASE_KEY {
            return Ok(Self::Database);
        }
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            [collection, METADATA_SUFFIX] if !collection.is_empty() => {
                Ok(Self::metadata(*collection))
            }
            [collection, CHUNK_INFIX, ordinal] if !collection.is_empty() => {
                parse_ordinal(ordinal)
                    .map(|ordinal| Self::data(*collection, ordinal))
                    .ok_or_else(|| unrecognized(key))
            }
            _ => Err(unrecognized(key)),
        }
    }

    /// Returns the owning collection, or `None` for the database chunk.
    #[must_use]
    pub fn collection(&self) -> Option<&str> {
        match self {
            ChunkKey::Database => None,
            ChunkKey::Metadata { collection } | ChunkKey::Data { collection, .. } => {
                Some(collection)
            }
        }
    }
}

fn parse_ordinal(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn unrecognized(key: &str) -> PersistError {
    PersistError::corrupted(format!("unrecognized chunk key {key:?}"))
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkKey::Database => f.write_str(DATABASE_KEY),
            ChunkKey::Metadata { collection } => write!(f, "{collection}.{METADATA_SUFFIX}"),
            ChunkKey::Data {
                collection,
                ordinal,
            } => write!(f, "{collection}.{CHUNK_INFIX}.{ordinal}"),
        }
    }
}

impl FromStr for ChunkKey {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grammar() {
        assert_eq!(ChunkKey::parse("loki").unwrap(), ChunkKey::Database);
        assert_eq!(
            ChunkKey::parse("users.metadata").unwrap(),
            ChunkKey::metadata("users")
        );
        assert_eq!(
            ChunkKey::parse("users.chunk.12").unwrap(),
            ChunkKey::data("users", 12)
        );
    }

    #[test]
    fn display_matches_grammar() {
        assert_eq!(ChunkKey::Database.to_string(), "loki");
        assert_eq!(ChunkKey::metadata("a").to_string(), "a.metadata");
        assert_eq!(ChunkKey::data("a", 0).to_string(), "a.chunk.0");
    }

    #[test]
    fn rejects_other_shapes() {
        for key in [
            "",
            "users",
            ".metadata",
            "users.meta",
            "users.chunk",
            "users.chunk.",
            "users.chunk.-1",
            "users.chunk.+1",
            "users.chunk.x",
            "users.chunk.1.2",
            "a.b.metadata",
            "LOKI",
        ] {
            let err = ChunkKey::parse(key).unwrap_err();
            assert!(err.is_corruption(), "{key:?} accepted");
        }
    }

    #[test]
    fn collection_accessor() {
        assert_eq!(ChunkKey::Database.collection(), None);
        assert_eq!(ChunkKey::data("x", 3).collection(), Some("x"));
    }
}
