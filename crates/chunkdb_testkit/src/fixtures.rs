//! Test fixtures and database helpers.
//!
//! Provides convenience functions for building populated databases and
//! for comparing databases by content.

use chunkdb_core::{Database, Document};
use chunkdb_storage::InMemoryKvBackend;
use serde_json::json;

/// Creates a database with the given collections, each holding `count`
/// documents with ids `0..count`.
///
/// Every document has an `index` field equal to its surrogate id and a
/// `collection` field naming its collection.
pub fn populated_database(name: &str, collections: &[(&str, usize)]) -> Database {
    let mut db = Database::new(name);
    for &(collection, count) in collections {
        let target = db
            .add_collection(collection)
            .expect("Failed to create collection");
        for i in 0..count {
            target
                .insert(json!({ "index": i, "collection": collection }))
                .expect("Failed to insert document");
        }
    }
    db
}

/// Creates a database with one collection of `count` ids, keeping only
/// every `keep_every`-th document.
///
/// Useful for chunks that are partially or completely empty.
pub fn sparse_database(name: &str, collection: &str, count: usize, keep_every: usize) -> Database {
    let mut db = populated_database(name, &[(collection, count)]);
    let target = db
        .collection_mut(collection)
        .expect("Collection was just created");
    for id in 0..count as u64 {
        if id % keep_every as u64 != 0 {
            target.remove(id).expect("Failed to remove document");
        }
    }
    db
}

/// Returns handles onto one shared in-memory backend, one per simulated
/// tab or process.
pub fn shared_backends(count: usize) -> Vec<InMemoryKvBackend> {
    let backend = InMemoryKvBackend::new();
    (0..count).map(|_| backend.clone()).collect()
}

/// Returns the documents of every collection, in collection order.
///
/// Deferred collections are materialized.
pub fn contents(db: &Database) -> Vec<(String, Vec<Document>)> {
    db.collections()
        .map(|collection| {
            let documents = collection
                .documents()
                .expect("Failed to materialize collection")
                .to_vec();
            (collection.name().to_string(), documents)
        })
        .collect()
}

/// Asserts that two databases hold the same collections, documents and
/// document order.
pub fn assert_same_contents(expected: &Database, actual: &Database) {
    assert_eq!(expected.name(), actual.name(), "database names differ");
    assert_eq!(
        expected.collection_names(),
        actual.collection_names(),
        "collection names differ"
    );
    for ((name, want), (_, got)) in contents(expected).into_iter().zip(contents(actual)) {
        assert_eq!(want, got, "documents of collection {name:?} differ");
    }
    for collection in expected.collections() {
        let other = actual
            .collection(collection.name())
            .expect("Collection names were compared");
        assert_eq!(
            collection.next_id(),
            other.next_id(),
            "next id of collection {:?} differs",
            collection.name()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populated_database() {
        let db = populated_database("app", &[("users", 3), ("logs", 0)]);
        assert_eq!(db.collection_names(), vec!["users", "logs"]);
        let users = db.collection("users").unwrap();
        assert_eq!(users.len().unwrap(), 3);
        assert_eq!(users.get(2).unwrap().unwrap().get("index"), Some(&json!(2)));
    }

    #[test]
    fn test_sparse_database() {
        let db = sparse_database("app", "items", 10, 4);
        let ids: Vec<u64> = db
            .collection("items")
            .unwrap()
            .documents()
            .unwrap()
            .iter()
            .map(Document::id)
            .collect();
        assert_eq!(ids, vec![0, 4, 8]);
        assert_eq!(db.collection("items").unwrap().next_id(), 10);
    }

    #[test]
    fn test_same_contents() {
        let a = populated_database("app", &[("users", 5)]);
        let b = populated_database("app", &[("users", 5)]);
        assert_same_contents(&a, &b);
    }

    #[test]
    #[should_panic(expected = "documents of collection")]
    fn test_different_contents() {
        let a = populated_database("app", &[("users", 5)]);
        let mut b = populated_database("app", &[("users", 5)]);
        b.collection_mut("users").unwrap().remove(3).unwrap();
        assert_same_contents(&a, &b);
    }
}
