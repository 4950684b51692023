//! Key ranges for partitioned reads.

use std::ops::Bound;

/// A range of string keys, with inclusive or exclusive ends.
///
/// Mirrors the shape of IndexedDB key ranges: a range may be unbounded on
/// either side, and each bound is independently open or closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<String>,
    upper: Bound<String>,
}

impl KeyRange {
    /// A range matching every key.
    #[must_use]
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// A range with both ends bounded.
    #[must_use]
    pub fn bound(
        lower: impl Into<String>,
        upper: impl Into<String>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        Self {
            lower: make_bound(lower.into(), lower_open),
            upper: make_bound(upper.into(), upper_open),
        }
    }

    /// Keys greater than (or equal to, unless `open`) `lower`.
    #[must_use]
    pub fn lower_bound(lower: impl Into<String>, open: bool) -> Self {
        Self {
            lower: make_bound(lower.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// Keys less than (or equal to, unless `open`) `upper`.
    #[must_use]
    pub fn upper_bound(upper: impl Into<String>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: make_bound(upper.into(), open),
        }
    }

    /// Returns the lower bound.
    pub fn lower(&self) -> Bound<&str> {
        as_str_bound(&self.lower)
    }

    /// Returns the upper bound.
    pub fn upper(&self) -> Bound<&str> {
        as_str_bound(&self.upper)
    }

    /// Returns true if `key` falls inside the range.
    pub fn contains(&self, key: &str) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(l) => key >= l.as_str(),
            Bound::Excluded(l) => key > l.as_str(),
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(u) => key <= u.as_str(),
            Bound::Excluded(u) => key < u.as_str(),
        };
        above && below
    }

    /// Returns true if no key can satisfy the range.
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(l), Bound::Included(u)) => l > u,
            (Bound::Included(l), Bound::Excluded(u))
            | (Bound::Excluded(l), Bound::Included(u))
            | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
            _ => false,
        }
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

fn make_bound(key: String, open: bool) -> Bound<String> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}

fn as_str_bound(bound: &Bound<String>) -> Bound<&str> {
    match bound {
        Bound::Included(k) => Bound::Included(k.as_str()),
        Bound::Excluded(k) => Bound::Excluded(k.as_str()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_contains_everything() {
        let range = KeyRange::all();
        assert!(range.contains(""));
        assert!(range.contains("loki"));
        assert!(!range.is_empty());
    }

    #[test]
    fn half_open_bound() {
        let range = KeyRange::bound("b", "d", false, true);
        assert!(!range.contains("a"));
        assert!(range.contains("b"));
        assert!(range.contains("c"));
        assert!(!range.contains("d"));
    }

    #[test]
    fn upper_bound_exclusive() {
        let range = KeyRange::upper_bound("m", true);
        assert!(range.contains("a"));
        assert!(!range.contains("m"));
        assert!(!range.contains("z"));
    }

    #[test]
    fn lower_bound_inclusive() {
        let range = KeyRange::lower_bound("m", false);
        assert!(!range.contains("a"));
        assert!(range.contains("m"));
        assert!(range.contains("z"));
    }

    #[test]
    fn degenerate_ranges_are_empty() {
        assert!(KeyRange::bound("a", "a", false, true).is_empty());
        assert!(!KeyRange::bound("a", "a", false, false).is_empty());
        assert!(KeyRange::bound("b", "a", false, false).is_empty());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;
        use std::collections::BTreeSet;

        fn bound_strategy() -> impl Strategy<Value = Option<(String, bool)>> {
            proptest::option::of(("[a-d]{0,3}", any::<bool>()))
        }

        fn range_of(lower: Option<(String, bool)>, upper: Option<(String, bool)>) -> KeyRange {
            match (lower, upper) {
                (None, None) => KeyRange::all(),
                (Some((l, lo)), None) => KeyRange::lower_bound(l, lo),
                (None, Some((u, uo))) => KeyRange::upper_bound(u, uo),
                (Some((l, lo)), Some((u, uo))) => KeyRange::bound(l, u, lo, uo),
            }
        }

        proptest! {
            #[test]
            fn contains_agrees_with_ordered_scan(
                keys in proptest::collection::btree_set("[a-d]{0,3}", 0..40),
                lower in bound_strategy(),
                upper in bound_strategy(),
            ) {
                let range = range_of(lower, upper);
                let filtered: BTreeSet<&String> =
                    keys.iter().filter(|k| range.contains(k)).collect();
                if range.is_empty() {
                    prop_assert!(filtered.is_empty());
                } else {
                    let scanned: BTreeSet<&String> =
                        keys.range::<str, _>((range.lower(), range.upper())).collect();
                    prop_assert_eq!(scanned, filtered);
                }
            }
        }
    }
}
