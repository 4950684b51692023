//! Dirty ledger of mutated documents.

use crate::chunk::chunk_ordinal;
use crate::document::SurrogateId;
use std::collections::BTreeSet;

/// Surrogate ids mutated since the last successful save.
///
/// Every insert, update and remove records the affected id. The save
/// pipeline consumes the ledger to find the chunks it must rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyLedger {
    ids: Vec<SurrogateId>,
}

impl DirtyLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a mutated id.
    pub fn mark(&mut self, id: SurrogateId) {
        self.ids.push(id);
    }

    /// Returns true if nothing was mutated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the number of recorded mutations (ids may repeat).
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns the recorded ids in mutation order.
    #[must_use]
    pub fn ids(&self) -> &[SurrogateId] {
        &self.ids
    }

    /// Empties the ledger, returning its contents.
    pub fn take(&mut self) -> DirtyLedger {
        std::mem::take(self)
    }

    /// Puts back ids taken by a save that did not commit.
    ///
    /// The restored ids are ordered before anything recorded since.
    pub fn restore(&mut self, earlier: DirtyLedger) {
        let later = std::mem::replace(&mut self.ids, earlier.ids);
        self.ids.extend(later);
    }

    /// Returns the distinct chunk ordinals touched by the recorded ids.
    #[must_use]
    pub fn chunk_ordinals(&self, chunk_size: usize) -> BTreeSet<u64> {
        self.ids
            .iter()
            .map(|&id| chunk_ordinal(id, chunk_size))
            .collect()
    }
}

impl FromIterator<SurrogateId> for DirtyLedger {
    fn from_iter<I: IntoIterator<Item = SurrogateId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ordinals_are_distinct() {
        let ledger: DirtyLedger = [0, 5, 99, 100, 250, 5].into_iter().collect();
        let ordinals: Vec<_> = ledger.chunk_ordinals(100).into_iter().collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn take_clears() {
        let mut ledger: DirtyLedger = [1, 2].into_iter().collect();
        let taken = ledger.take();
        assert!(ledger.is_empty());
        assert_eq!(taken.ids(), &[1, 2]);
    }

    #[test]
    fn restore_keeps_later_marks() {
        let mut ledger: DirtyLedger = [1, 2].into_iter().collect();
        let taken = ledger.take();
        ledger.mark(7);
        ledger.restore(taken);
        assert_eq!(ledger.ids(), &[1, 2, 7]);
        assert_eq!(ledger.len(), 3);
    }
}
