//! Property-based test generators using proptest.
//!
//! Provides strategies for generating mutation sequences against a
//! database, and a function applying them.

use chunkdb_core::{Database, SurrogateId};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Number of collection names mutations draw from.
pub const COLLECTION_POOL: usize = 3;

/// Strategy for generating valid collection names.
pub fn collection_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for generating document bodies.
pub fn document_body_strategy() -> impl Strategy<Value = Value> {
    (any::<i64>(), "[a-z ]{0,24}", any::<bool>())
        .prop_map(|(n, text, flag)| json!({ "n": n, "text": text, "flag": flag }))
}

/// A mutation of a database.
///
/// Collections are addressed by slot (`c0`, `c1`, ...) and documents by
/// position among the live documents, so every generated sequence applies
/// to any database state.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Insert a document, creating the collection if needed.
    Insert {
        /// Collection slot
        collection: usize,
        /// Document body
        body: Value,
    },
    /// Insert several documents at once.
    Bulk {
        /// Collection slot
        collection: usize,
        /// Number of documents
        count: usize,
    },
    /// Replace the body of a live document.
    Update {
        /// Collection slot
        collection: usize,
        /// Position among live documents
        pick: usize,
        /// New body
        body: Value,
    },
    /// Remove a live document.
    Remove {
        /// Collection slot
        collection: usize,
        /// Position among live documents
        pick: usize,
    },
    /// Remove a whole collection.
    DropCollection {
        /// Collection slot
        collection: usize,
    },
}

/// Returns the name of a collection slot.
#[must_use]
pub fn slot_name(slot: usize) -> String {
    format!("c{slot}")
}

/// Strategy for generating mutations.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    let slot = 0..COLLECTION_POOL;
    prop_oneof![
        4 => (slot.clone(), document_body_strategy())
            .prop_map(|(collection, body)| Mutation::Insert { collection, body }),
        1 => (slot.clone(), 1usize..250)
            .prop_map(|(collection, count)| Mutation::Bulk { collection, count }),
        3 => (slot.clone(), any::<usize>(), document_body_strategy())
            .prop_map(|(collection, pick, body)| Mutation::Update { collection, pick, body }),
        3 => (slot.clone(), any::<usize>())
            .prop_map(|(collection, pick)| Mutation::Remove { collection, pick }),
        1 => slot.prop_map(|collection| Mutation::DropCollection { collection }),
    ]
}

/// Strategy for generating a sequence of mutations.
pub fn mutation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(), min_ops..max_ops)
}

/// Applies a mutation. Returns the surrogate id it touched, if any.
///
/// Updates and removals on empty or missing collections are no-ops.
pub fn apply_mutation(db: &mut Database, mutation: &Mutation) -> Option<SurrogateId> {
    match mutation {
        Mutation::Insert { collection, body } => {
            let name = slot_name(*collection);
            if db.collection(&name).is_none() {
                db.add_collection(name.as_str())
                    .expect("Failed to create collection");
            }
            let target = db.collection_mut(&name).expect("Collection exists");
            Some(target.insert(body.clone()).expect("Failed to insert"))
        }
        Mutation::Bulk { collection, count } => {
            let mut last = None;
            for i in 0..*count {
                let insert = Mutation::Insert {
                    collection: *collection,
                    body: json!({ "bulk": i }),
                };
                last = apply_mutation(db, &insert);
            }
            last
        }
        Mutation::Update {
            collection,
            pick,
            body,
        } => {
            let target = db.collection_mut(&slot_name(*collection))?;
            let id = pick_live(target.documents().expect("Failed to read"), *pick)?;
            target.update(id, body.clone()).expect("Failed to update");
            Some(id)
        }
        Mutation::Remove { collection, pick } => {
            let target = db.collection_mut(&slot_name(*collection))?;
            let id = pick_live(target.documents().expect("Failed to read"), *pick)?;
            target.remove(id).expect("Failed to remove");
            Some(id)
        }
        Mutation::DropCollection { collection } => {
            let name = slot_name(*collection);
            if db.collection(&name).is_some() {
                db.remove_collection(&name).expect("Failed to remove collection");
            }
            None
        }
    }
}

/// Applies a sequence of mutations.
pub fn apply_all(db: &mut Database, mutations: &[Mutation]) {
    for mutation in mutations {
        apply_mutation(db, mutation);
    }
}

fn pick_live(documents: &[chunkdb_core::Document], pick: usize) -> Option<SurrogateId> {
    if documents.is_empty() {
        return None;
    }
    Some(documents[pick % documents.len()].id())
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 64,
            max_shrink_iters: 500,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
