//! Sorted surrogate id index.

use crate::document::SurrogateId;

/// Ordered array of surrogate ids, parallel to a collection's documents.
///
/// Position `i` of the index holds the surrogate id of the document at
/// position `i` of the document array.
///
/// # Invariants
///
/// - Ids are strictly increasing: `ids[i] < ids[i + 1]`
/// - Ids may have gaps left by removed documents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurrogateIndex {
    ids: Vec<SurrogateId>,
}

/// Two neighbouring ids that break the ordering invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderViolation {
    /// The earlier id.
    pub previous: SurrogateId,
    /// The id that did not increase.
    pub next: SurrogateId,
}

impl SurrogateIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from ids, checking that they are strictly increasing.
    pub fn build<I>(ids: I) -> Result<Self, OrderViolation>
    where
        I: IntoIterator<Item = SurrogateId>,
    {
        let ids: Vec<SurrogateId> = ids.into_iter().collect();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] >= pair[1]) {
            return Err(OrderViolation {
                previous: pair[0],
                next: pair[1],
            });
        }
        Ok(Self { ids })
    }

    /// Returns the number of indexed ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the id stored at `position`.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<SurrogateId> {
        self.ids.get(position).copied()
    }

    /// Returns the highest indexed id.
    #[must_use]
    pub fn last(&self) -> Option<SurrogateId> {
        self.ids.last().copied()
    }

    /// Returns the ids as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[SurrogateId] {
        &self.ids
    }

    /// Returns the position of `id`, if indexed.
    #[must_use]
    pub fn position(&self, id: SurrogateId) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    /// Returns the first position whose id is `>= target`, or `len()` if
    /// every id is smaller.
    #[must_use]
    pub fn lower_bound(&self, target: SurrogateId) -> usize {
        self.ids.partition_point(|&id| id < target)
    }

    /// Appends an id.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not greater than the current last id.
    pub fn push(&mut self, id: SurrogateId) {
        if let Some(last) = self.last() {
            assert!(
                id > last,
                "surrogate index out of order: {id} appended after {last}"
            );
        }
        self.ids.push(id);
    }

    /// Removes the id at `position` and returns it.
    ///
    /// # Panics
    ///
    /// Panics if `position` is out of bounds.
    pub fn remove(&mut self, position: usize) -> SurrogateId {
        self.ids.remove(position)
    }
}
