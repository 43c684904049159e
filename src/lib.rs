//! An immutable, persistent B-tree over caller-ordered values.
//!
//! A [`Tree`] is a thin handle around a reference-counted root [`Node`].
//! Every mutating operation ([`Tree::build`], [`Tree::update`]) takes a
//! tree (or nothing, for a fresh build) and returns a brand-new tree; the
//! old one, and every subtree the change didn't touch, stay valid and
//! shareable — structural sharing all the way down via [`std::sync::Arc`].
//! There is no in-place mutation and no deletion.
//!
//! Ordering is supplied by the caller as a plain `Fn(&V, &V) -> Ordering`
//! rather than baked in via [`Ord`], so the same value type can be sorted
//! different ways in different trees (e.g. a secondary index).

mod bound;
mod builder;
pub mod config;
mod cursor;
mod driver;
mod node;
mod search;
mod wellformed;

use std::cmp::Ordering;
use std::sync::Arc;

pub use bound::Bound;
pub use cursor::Cursor;
pub use driver::{EarlyTerminate, ReplaceInsert, ReplaceMatch};
pub use node::Node;
pub use wellformed::{is_well_formed, Violation};

/// A persistent B-tree root. Cloning a `Tree` is an `Arc` refcount bump,
/// not a copy of the tree's contents — every clone shares the exact same
/// nodes until one of them is rebuilt via [`Tree::update`].
#[derive(Debug, Clone)]
pub struct Tree<V> {
    root: Arc<Node<V>>,
}

impl<V> Default for Tree<V> {
    fn default() -> Self {
        Tree { root: Node::empty_leaf() }
    }
}

impl<V: Clone> Tree<V> {
    /// Wraps an already-built root. Crate-internal: used by `driver`'s own
    /// tests so they can exercise `find`/`cursor_all` against a bare
    /// `Arc<Node<V>>` without duplicating `Tree`'s traversal logic.
    pub(crate) fn from_root(root: Arc<Node<V>>) -> Self {
        Tree { root }
    }

    /// The empty tree.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a tree from a finite collection of values, using the
    /// process-wide fan factor (see [`config::init`]).
    ///
    /// `sorted` lets the caller skip the initial sort when the source is
    /// already known to be in `compare` order.
    pub fn build(source: Vec<V>, compare: impl Fn(&V, &V) -> Ordering, sorted: bool) -> Self {
        Self::build_with_fanout(source, compare, sorted, config::fan_factor())
    }

    /// As [`Tree::build`], but with an explicit fan factor instead of the
    /// process-wide default. Mainly useful for tests that need to exercise
    /// more than one fan factor in the same process.
    pub fn build_with_fanout(source: Vec<V>, compare: impl Fn(&V, &V) -> Ordering, sorted: bool, fan: usize) -> Self {
        Tree { root: driver::build(source, &compare, sorted, fan) }
    }

    /// Merges `incoming` into this tree in a single descending traversal,
    /// returning a new tree that shares every subtree `incoming` didn't
    /// touch with `self`.
    ///
    /// `replace_match` resolves a key that exists in both `self` and
    /// `incoming` (default: the incoming value wins). `replace_insert`
    /// transforms a key that only exists in `incoming` before it is stored
    /// (default: stored as-is). `early_terminate`, if given, is checked
    /// once per incoming key and stops the merge early when it returns
    /// `true`, producing a tree reflecting only the keys processed so far.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        compare: impl Fn(&V, &V) -> Ordering,
        incoming: Vec<V>,
        sorted: bool,
        replace_match: Option<&ReplaceMatch<V>>,
        replace_insert: Option<&ReplaceInsert<V>>,
        early_terminate: Option<&EarlyTerminate>,
    ) -> Self {
        self.update_with_fanout(compare, incoming, sorted, replace_match, replace_insert, early_terminate, config::fan_factor())
    }

    /// As [`Tree::update`], but with an explicit fan factor.
    #[allow(clippy::too_many_arguments)]
    pub fn update_with_fanout(
        &self,
        compare: impl Fn(&V, &V) -> Ordering,
        incoming: Vec<V>,
        sorted: bool,
        replace_match: Option<&ReplaceMatch<V>>,
        replace_insert: Option<&ReplaceInsert<V>>,
        early_terminate: Option<&EarlyTerminate>,
        fan: usize,
    ) -> Self {
        Tree {
            root: driver::update(self.root.clone(), &compare, incoming, sorted, replace_match, replace_insert, early_terminate, fan),
        }
    }

    /// Looks up a single key, returning the stored value it matched.
    pub fn find(&self, compare: impl Fn(&V, &V) -> Ordering, key: &V) -> Option<&V> {
        let mut node = &self.root;
        loop {
            let key_end = node.key_end();
            match search::find(&compare, key, node.keys(), 0, key_end) {
                search::SearchResult::Found(i) => return Some(&node.keys()[i]),
                search::SearchResult::Missing(i) => {
                    if node.is_leaf() {
                        return None;
                    }
                    node = node.child(i);
                }
            }
        }
    }

    /// A forward or backward cursor over every value in the tree.
    ///
    /// `Cursor` is itself an `Iterator`; the comparator is captured at
    /// construction (`'static + Send + Sync`, same as `Tree<V>` itself)
    /// rather than threaded through every call.
    pub fn cursor_all(&self, compare: impl Fn(&V, &V) -> Ordering + Send + Sync + 'static, forward: bool) -> Cursor<V> {
        Cursor::new(self.root.clone(), Arc::new(compare), Bound::NegInf, Bound::PosInf, forward)
    }

    /// A forward or backward cursor over `[lo, hi]` (bounds given as
    /// `Bound::NegInf`/`Bound::PosInf` for an open end, `Bound::Value` for
    /// a closed one).
    pub fn cursor(
        &self,
        compare: impl Fn(&V, &V) -> Ordering + Send + Sync + 'static,
        lo: Bound<V>,
        hi: Bound<V>,
        forward: bool,
    ) -> Cursor<V> {
        Cursor::new(self.root.clone(), Arc::new(compare), lo, hi, forward)
    }

    /// Checks every structural invariant against the process-wide fan
    /// factor. Intended for tests and debug assertions, not the hot path.
    pub fn is_well_formed(&self, compare: impl Fn(&V, &V) -> Ordering) -> Result<(), Violation> {
        self.is_well_formed_with_fanout(compare, config::fan_factor())
    }

    /// As [`Tree::is_well_formed`], but against an explicit fan factor —
    /// needed by any test that builds with [`Tree::build_with_fanout`]
    /// rather than the process-wide default.
    pub fn is_well_formed_with_fanout(&self, compare: impl Fn(&V, &V) -> Ordering, fan: usize) -> Result<(), Violation> {
        wellformed::is_well_formed(&self.root, &compare, fan)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Total number of stored values. O(n) — recurses through every
    /// branch rather than tracking a running count.
    pub fn len(&self) -> usize {
        self.root.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icmp(a: &i32, b: &i32) -> Ordering {
        a.cmp(b)
    }

    #[test]
    fn empty_tree_finds_nothing() {
        let t: Tree<i32> = Tree::empty();
        assert_eq!(t.find(icmp, &5), None);
        assert!(t.is_empty());
    }

    #[test]
    fn build_then_find_round_trips() {
        let t = Tree::build_with_fanout((0..1000).collect(), icmp, true, 8);
        for i in 0..1000 {
            assert_eq!(t.find(icmp, &i), Some(&i));
        }
        assert_eq!(t.find(icmp, &-1), None);
        assert_eq!(t.find(icmp, &1000), None);
    }

    #[test]
    fn update_merges_without_disturbing_original() {
        let base = Tree::build_with_fanout((0..100).step_by(2).collect(), icmp, true, 8);
        let merged = base.update_with_fanout(icmp, (1..100).step_by(2).collect(), true, None, None, None, 8);

        assert_eq!(base.find(icmp, &1), None);
        assert_eq!(merged.find(icmp, &1), Some(&1));
        for i in 0..100 {
            assert_eq!(merged.find(icmp, &i), Some(&i));
        }
    }

    #[test]
    fn replace_match_prefers_existing_value_when_asked() {
        let base = Tree::build_with_fanout(vec![(1, "old")], |a: &(i32, &str), b: &(i32, &str)| a.0.cmp(&b.0), true);
        let keep_existing = |existing: &(i32, &str), _incoming: &(i32, &str)| *existing;
        let merged = base.update_with_fanout(
            |a: &(i32, &str), b: &(i32, &str)| a.0.cmp(&b.0),
            vec![(1, "new")],
            true,
            Some(&keep_existing),
            None,
            None,
            8,
        );
        assert_eq!(merged.find(|a, b: &(i32, &str)| a.0.cmp(&b.0), &(1, "")), Some(&(1, "old")));
    }

    #[test]
    fn well_formed_after_build_and_update() {
        let t = Tree::build_with_fanout((0..5000).collect(), icmp, true, 16);
        assert_eq!(t.is_well_formed(icmp), Ok(()));
        let t2 = t.update_with_fanout(icmp, (5000..6000).collect(), true, None, None, None, 16);
        assert_eq!(t2.is_well_formed(icmp), Ok(()));
    }
}
