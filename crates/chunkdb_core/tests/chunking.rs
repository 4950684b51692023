//! Integration tests for chunk addressing over live collections.

use chunkdb_core::{
    chunk_bounds, Collection, CollectionMeta, Database, Document, DocumentMeta, SurrogateId,
};
use serde_json::{json, Map};

fn collection_with(count: u64) -> Collection {
    let mut coll = Collection::new("items").unwrap();
    for n in 0..count {
        coll.insert(json!({ "n": n })).unwrap();
    }
    coll
}

fn ids(docs: &[Document]) -> Vec<SurrogateId> {
    docs.iter().map(Document::id).collect()
}

#[test]
fn dirty_ordinals_follow_mutations() {
    let mut db = Database::new("app");
    let items = db.add_collection("items").unwrap();
    for n in 0..300 {
        items.insert(json!({ "n": n })).unwrap();
    }
    db.prepare_save();

    let items = db.try_collection_mut("items").unwrap();
    items.update(5, json!({ "n": -5 })).unwrap();
    items.remove(250).unwrap();
    let ordinals: Vec<_> = items.dirty_ids().chunk_ordinals(100).into_iter().collect();
    assert_eq!(ordinals, vec![0, 2]);
}

#[test]
fn removal_shrinks_chunk_without_moving_neighbours() {
    let mut coll = collection_with(300);
    for id in 100..150 {
        coll.remove(id).unwrap();
    }
    let set = coll.materialize().unwrap();
    assert_eq!(ids(set.chunk(1, 100)), (150..200).collect::<Vec<_>>());
    assert_eq!(set.chunk(0, 100).len(), 100);
    assert_eq!(set.chunk(2, 100).len(), 100);
}

#[test]
fn emptied_chunk_stays_in_the_sequence() {
    let mut coll = collection_with(300);
    for id in 100..200 {
        coll.remove(id).unwrap();
    }
    let set = coll.materialize().unwrap();
    let sizes: Vec<_> = set.chunks(100).map(|(o, d)| (o, d.len())).collect();
    assert_eq!(sizes, vec![(0, 100), (1, 0), (2, 100)]);
}

#[test]
fn chunks_of_reassembled_collection_match_bounds() {
    let docs: Vec<Document> = [3u64, 40, 41, 99, 100, 512]
        .iter()
        .map(|&id| Document::new(id, DocumentMeta::default(), Map::new()))
        .collect();
    let coll = Collection::from_parts(CollectionMeta::new("sparse"), docs).unwrap();
    let set = coll.materialize().unwrap();

    for (ordinal, chunk) in set.chunks(50) {
        let (lower, upper) = chunk_bounds(ordinal, 50);
        assert!(chunk.iter().all(|d| d.id() >= lower && d.id() <= upper));
    }
    assert_eq!(set.chunks(50).last_ordinal(), 10);
    assert_eq!(ids(set.chunk(1, 50)), vec![99]);
}
