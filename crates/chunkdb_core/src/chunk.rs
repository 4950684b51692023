//! Chunk addressing.
//!
//! A chunk is a fixed-capacity partition of a collection's documents. Chunk
//! `c` with chunk size `S` owns the surrogate ids `[c*S, c*S + S - 1]`, so
//! it physically holds at most `S` documents (fewer after removals).

use crate::collection::DocumentSet;
use crate::document::{Document, SurrogateId};
use std::ops::Range;

/// Default number of surrogate ids per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Returns the ordinal of the chunk owning `id`.
///
/// # Panics
///
/// Panics if `chunk_size` is zero.
#[inline]
#[must_use]
pub fn chunk_ordinal(id: SurrogateId, chunk_size: usize) -> u64 {
    assert!(chunk_size > 0, "chunk size must be positive");
    id / chunk_size as u64
}

/// Returns the inclusive surrogate id bounds owned by a chunk.
#[must_use]
pub fn chunk_bounds(ordinal: u64, chunk_size: usize) -> (SurrogateId, SurrogateId) {
    let size = chunk_size as u64;
    let lower = ordinal.saturating_mul(size);
    (lower, lower.saturating_add(size.saturating_sub(1)))
}

/// Locates the documents of chunk `ordinal` within `set`.
///
/// Returns a range of positions into [`DocumentSet::documents`]. An empty
/// range means the chunk holds no documents.
///
/// # Panics
///
/// Panics if `chunk_size` is zero, or if the document array and its
/// surrogate index disagree about the chunk boundaries. Both are bugs, not
/// runtime conditions.
#[must_use]
pub fn locate_chunk(set: &DocumentSet, ordinal: u64, chunk_size: usize) -> Range<usize> {
    assert!(chunk_size > 0, "chunk size must be positive");
    let (lower, upper) = chunk_bounds(ordinal, chunk_size);
    let index = set.index();

    let first = index.lower_bound(lower);
    match index.get(first) {
        Some(id) if id <= upper => {}
        _ => return first..first,
    }

    let scan_from = first
        .saturating_add(chunk_size - 1)
        .min(index.len() - 1);
    let last = (first..=scan_from)
        .rev()
        .find(|&position| index.get(position).is_some_and(|id| id <= upper))
        .unwrap_or(first);

    let documents = set.documents();
    check_bound(documents.get(first), lower, upper, "first");
    check_bound(documents.get(last), lower, upper, "last");

    let range = first..last + 1;
    assert!(
        range.len() <= chunk_size,
        "chunk {ordinal} holds {} documents, more than chunk size {chunk_size}",
        range.len()
    );
    range
}

fn check_bound(document: Option<&Document>, lower: SurrogateId, upper: SurrogateId, which: &str) {
    let id = document.map(Document::id);
    assert!(
        id.is_some_and(|id| (lower..=upper).contains(&id)),
        "broken chunk invariant: {which} document {id:?} outside [{lower}, {upper}]"
    );
}

/// Iterator over the chunks of a document set, from ordinal 0 up to the
/// chunk holding the highest surrogate id.
///
/// Ordinal 0 is always produced, even for an empty set. Chunks without
/// documents are produced as empty slices. The iterator is cheap to clone,
/// and [`DocumentSet::chunks`] returns a fresh one on every call.
#[derive(Debug, Clone)]
pub struct ChunkRanges<'a> {
    set: &'a DocumentSet,
    chunk_size: usize,
    next: u64,
    last: u64,
}

impl<'a> ChunkRanges<'a> {
    pub(crate) fn new(set: &'a DocumentSet, chunk_size: usize) -> Self {
        let last = set
            .max_id()
            .map_or(0, |id| chunk_ordinal(id, chunk_size));
        Self {
            set,
            chunk_size,
            next: 0,
            last,
        }
    }

    /// Returns the highest ordinal the iterator produces.
    #[must_use]
    pub fn last_ordinal(&self) -> u64 {
        self.last
    }
}

impl<'a> Iterator for ChunkRanges<'a> {
    type Item = (u64, &'a [Document]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.last {
            return None;
        }
        let ordinal = self.next;
        self.next += 1;
        let range = locate_chunk(self.set, ordinal, self.chunk_size);
        Some((ordinal, &self.set.documents()[range]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.last.saturating_add(1).saturating_sub(self.next))
            .unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentMeta;
    use serde_json::Map;

    fn set_with_ids(ids: impl IntoIterator<Item = SurrogateId>) -> DocumentSet {
        let docs = ids
            .into_iter()
            .map(|id| Document::new(id, DocumentMeta::default(), Map::new()))
            .collect();
        DocumentSet::from_documents("test", docs).unwrap()
    }

    fn ids(set: &DocumentSet, range: Range<usize>) -> Vec<SurrogateId> {
        set.documents()[range].iter().map(Document::id).collect()
    }

    #[test]
    fn ordinal_and_bounds() {
        assert_eq!(chunk_ordinal(0, 100), 0);
        assert_eq!(chunk_ordinal(99, 100), 0);
        assert_eq!(chunk_ordinal(100, 100), 1);
        assert_eq!(chunk_bounds(2, 100), (200, 299));
    }

    #[test]
    fn final_partial_chunk_grows() {
        let mut set = set_with_ids(0..250);
        let range = locate_chunk(&set, 2, 100);
        assert_eq!(ids(&set, range.clone()), (200..250).collect::<Vec<_>>());

        set.push(Document::new(250, DocumentMeta::default(), Map::new()));
        let range = locate_chunk(&set, 2, 100);
        assert_eq!(range.len(), 51);
        assert_eq!(ids(&set, range), (200..=250).collect::<Vec<_>>());
    }

    #[test]
    fn full_chunk_in_the_middle() {
        let set = set_with_ids(0..250);
        let range = locate_chunk(&set, 1, 100);
        assert_eq!(range, 100..200);
    }

    #[test]
    fn gaps_shrink_chunks() {
        let set = set_with_ids((0..300).filter(|id| id % 3 == 0));
        let range = locate_chunk(&set, 1, 100);
        let found = ids(&set, range);
        assert_eq!(found.first(), Some(&102));
        assert_eq!(found.last(), Some(&198));
        assert_eq!(found.len(), 33);
    }

    #[test]
    fn empty_chunks() {
        let set = set_with_ids([0, 1, 350]);
        assert!(locate_chunk(&set, 1, 100).is_empty());
        assert!(locate_chunk(&set, 2, 100).is_empty());
        assert!(locate_chunk(&set, 9, 100).is_empty());
        assert_eq!(locate_chunk(&set, 3, 100).len(), 1);

        let empty = DocumentSet::default();
        assert!(locate_chunk(&empty, 0, 100).is_empty());
    }

    #[test]
    fn chunk_ranges_cover_every_ordinal() {
        let set = set_with_ids([0, 1, 350]);
        let chunks: Vec<_> = set.chunks(100).map(|(o, docs)| (o, docs.len())).collect();
        assert_eq!(chunks, vec![(0, 2), (1, 0), (2, 0), (3, 1)]);
    }

    #[test]
    fn chunk_ranges_of_empty_set_yield_ordinal_zero() {
        let set = DocumentSet::default();
        let chunks: Vec<_> = set.chunks(100).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, 0);
        assert!(chunks[0].1.is_empty());
    }

    #[test]
    fn chunk_ranges_restart() {
        let set = set_with_ids(0..30);
        let chunks = set.chunks(10);
        assert_eq!(chunks.clone().count(), 3);
        assert_eq!(chunks.count(), 3);
        assert_eq!(set.chunks(10).size_hint(), (3, Some(3)));
    }

    #[test]
    #[should_panic(expected = "chunk size must be positive")]
    fn zero_chunk_size_panics() {
        let set = set_with_ids(0..3);
        let _ = locate_chunk(&set, 0, 0);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn chunks_partition_documents(
                ids in prop::collection::btree_set(0u64..2_000, 0..300),
                chunk_size in 1usize..150,
            ) {
                let set = set_with_ids(ids.iter().copied());
                let mut seen = Vec::new();
                for (ordinal, docs) in set.chunks(chunk_size) {
                    prop_assert!(docs.len() <= chunk_size);
                    let (lower, upper) = chunk_bounds(ordinal, chunk_size);
                    for doc in docs {
                        prop_assert!(doc.id() >= lower && doc.id() <= upper);
                        seen.push(doc.id());
                    }
                }
                prop_assert_eq!(seen, ids.into_iter().collect::<Vec<_>>());
            }
        }
    }
}
