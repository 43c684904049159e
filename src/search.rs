//! Binary search over a node's key range.

use std::cmp::Ordering;

/// Result of searching for a key inside `buf[from..to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// The key was found at this index.
    Found(usize),
    /// The key was not found; this is the index it would need to be
    /// inserted at to keep the slice sorted.
    Missing(usize),
}

impl SearchResult {
    pub fn index(self) -> usize {
        match self {
            SearchResult::Found(i) | SearchResult::Missing(i) => i,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, SearchResult::Found(_))
    }
}

/// Binary search for `key` in `buf[from..to)` under `compare`.
///
/// Short-circuits on the first slot: incoming update streams frequently
/// fall before the existing minimum when both the tree and the update set
/// are sorted ascending, so checking `buf[from]` first avoids a full
/// `log n` descent in the common case.
pub fn find<V>(compare: &impl Fn(&V, &V) -> Ordering, key: &V, buf: &[V], from: usize, to: usize) -> SearchResult {
    if from >= to {
        return SearchResult::Missing(from);
    }

    match compare(key, &buf[from]) {
        Ordering::Less => return SearchResult::Missing(from),
        Ordering::Equal => return SearchResult::Found(from),
        Ordering::Greater => {}
    }

    let mut lo = from + 1;
    let mut hi = to;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match compare(key, &buf[mid]) {
            Ordering::Less => hi = mid,
            Ordering::Equal => return SearchResult::Found(mid),
            Ordering::Greater => lo = mid + 1,
        }
    }
    SearchResult::Missing(lo)
}
