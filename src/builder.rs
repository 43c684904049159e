//! Per-level scratch state for an in-progress build/update.
//!
//! A [`Level`] mirrors one depth of the tree being produced: it mirrors an
//! original node (`copy_from`) and accumulates the keys/children that will
//! make up its replacement, copying untouched runs across by reference and
//! only ever materializing a fresh `Node` when the level is finalized
//! ([`Level::ascend`]). Levels are kept in a plain `Vec` stack (root at
//! index 0) rather than a doubly-linked parent/child chain — the same
//! "no parent pointers, explicit path" idiom this crate already uses for
//! the range cursor, applied to the builder too.

use std::sync::Arc;

use crate::bound::Bound;
use crate::node::Node;

pub(crate) struct Level<V> {
    pub(crate) build_keys: Vec<V>,
    pub(crate) build_children: Vec<Arc<Node<V>>>,
    pub(crate) is_leaf: bool,
    pub(crate) copy_from: Arc<Node<V>>,
    pub(crate) copy_from_key_pos: usize,
    pub(crate) copy_from_child_pos: usize,
    pub(crate) upper_bound: Bound<V>,
}

/// What a finalized level hands back to its parent.
pub(crate) enum AscendResult<V> {
    /// Fits in one node: the parent should `finish_child` it.
    Single(Arc<Node<V>>),
    /// Overflowed: the parent should `add_extra_child(left, separator)`
    /// then `finish_child(right)`.
    Split {
        left: Arc<Node<V>>,
        separator: V,
        right: Arc<Node<V>>,
    },
}

impl<V: Clone> Level<V> {
    pub(crate) fn new(copy_from: Arc<Node<V>>, upper_bound: Bound<V>, is_leaf: bool) -> Self {
        Level {
            build_keys: Vec::new(),
            build_children: Vec::new(),
            is_leaf,
            copy_from,
            copy_from_key_pos: 0,
            copy_from_child_pos: 0,
            upper_bound,
        }
    }

    pub(crate) fn key_end(&self) -> usize {
        self.copy_from.key_end()
    }

    /// Bulk-copies `copy_from`'s keys `[copy_from_key_pos, to)` into
    /// `build_keys` by reference share (keys are cloned, but a cloned `V`
    /// for e.g. an `Arc<T>`-backed cell value is itself cheap — the spine
    /// sharing this crate cares about is at the *node* level, realized by
    /// `Arc<Node<V>>`, not at the per-value level).
    pub(crate) fn copy_keys(&mut self, to: usize) {
        while self.copy_from_key_pos < to {
            self.build_keys
                .push(self.copy_from.keys()[self.copy_from_key_pos].clone());
            self.copy_from_key_pos += 1;
        }
    }

    /// Emits one key at a match: either the incoming key, or the result of
    /// `replace_match(existing, incoming)` if a replace function is given.
    /// Always advances past the matched `copy_from` key, since it has now
    /// been superseded.
    pub(crate) fn replace_next_key(&mut self, incoming: V, replace_match: Option<&dyn Fn(&V, &V) -> V>) {
        let existing = &self.copy_from.keys()[self.copy_from_key_pos];
        let kept = match replace_match {
            Some(f) => f(existing, &incoming),
            None => incoming,
        };
        self.build_keys.push(kept);
        self.copy_from_key_pos += 1;
    }

    /// Emits one key at a pure insertion point, without consuming a
    /// `copy_from` key.
    pub(crate) fn add_new_key(&mut self, incoming: V, replace_insert: Option<&dyn Fn(&V) -> V>) {
        let kept = match replace_insert {
            Some(f) => f(&incoming),
            None => incoming,
        };
        self.build_keys.push(kept);
    }

    pub(crate) fn copy_children(&mut self, to: usize) {
        while self.copy_from_child_pos < to {
            self.build_children
                .push(self.copy_from.children()[self.copy_from_child_pos].clone());
            self.copy_from_child_pos += 1;
        }
    }

    /// Called by an overflowed child level: appends a spilled-off sibling
    /// and the separator key above it. Does not touch `copy_from_child_pos`
    /// — the spilled node is a fragment of the child subtree currently
    /// being processed, not a whole original child.
    pub(crate) fn add_extra_child(&mut self, child: Arc<Node<V>>, key_above: V) {
        self.build_keys.push(key_above);
        self.build_children.push(child);
    }

    /// Called when a child level finishes processing the one original
    /// child it was descended into: appends the child without a key, and
    /// advances `copy_from_child_pos` past the original child it replaces.
    pub(crate) fn finish_child(&mut self, child: Arc<Node<V>>) {
        self.build_children.push(child);
        self.copy_from_child_pos += 1;
    }

    /// If the next insertion would push this level's scratch past its
    /// `1 + 2*fan` capacity, spills the first `fan` keys (and, for a
    /// branch, the first `fan + 1` children) off into an immutable node
    /// and returns it together with the separator key the parent should
    /// route around it. Returns `None` if there is room to keep growing.
    pub(crate) fn ensure_room(&mut self, fan: usize) -> Option<(Arc<Node<V>>, V)> {
        if self.build_keys.len() < 1 + 2 * fan {
            return None;
        }
        if self.is_leaf {
            // A leaf split promotes its median the same way a branch split
            // does: the separator is removed from the scratch entirely and
            // handed up as a routing key, so the value it carries is stored
            // exactly once (in the parent), not duplicated into the leaf.
            let mut remaining_keys = self.build_keys.split_off(fan);
            let separator = remaining_keys.remove(0);
            let spilled_keys = std::mem::replace(&mut self.build_keys, remaining_keys);
            Some((Node::leaf(spilled_keys), separator))
        } else {
            let mut remaining_keys = self.build_keys.split_off(fan);
            let separator = remaining_keys.remove(0);
            let spilled_keys = std::mem::replace(&mut self.build_keys, remaining_keys);
            let remaining_children = self.build_children.split_off(fan + 1);
            let spilled_children = std::mem::replace(&mut self.build_children, remaining_children);
            Some((Node::branch(spilled_keys, spilled_children), separator))
        }
    }

    /// Finalizes this level: packages its scratch into one node if it fits
    /// in `fan` keys, or splits it at the midpoint otherwise. Consumes the
    /// level — once ascended it no longer participates in the build.
    pub(crate) fn ascend(self, fan: usize) -> AscendResult<V> {
        let kpos = self.build_keys.len();
        if kpos <= fan {
            AscendResult::Single(self.build_from_range())
        } else if self.is_leaf {
            let mut build_keys = self.build_keys;
            let mut right_keys = build_keys.split_off(kpos / 2);
            let separator = right_keys.remove(0);
            AscendResult::Split {
                left: Node::leaf(build_keys),
                separator,
                right: Node::leaf(right_keys),
            }
        } else {
            let mid = kpos / 2;
            let mut build_keys = self.build_keys;
            let mut build_children = self.build_children;
            let mut right_keys = build_keys.split_off(mid);
            let separator = right_keys.remove(0);
            let right_children = build_children.split_off(mid + 1);
            AscendResult::Split {
                left: Node::branch(build_keys, build_children),
                separator,
                right: Node::branch(right_keys, right_children),
            }
        }
    }

    fn build_from_range(self) -> Arc<Node<V>> {
        if self.is_leaf {
            Node::leaf(self.build_keys)
        } else {
            Node::branch(self.build_keys, self.build_children)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bound::Bound;

    fn leaf_level(values: Vec<i32>) -> Level<i32> {
        Level::new(Node::leaf(values), Bound::PosInf, true)
    }

    /// `is_leaf` drives every primitive tested here; `copy_from` itself is
    /// never consulted by `ensure_room`/`ascend`, so an empty leaf stands
    /// in regardless of which shape the level under test represents.
    fn branch_level() -> Level<i32> {
        Level::new(Node::empty_leaf(), Bound::PosInf, false)
    }

    #[test]
    fn copy_keys_advances_both_cursors() {
        let mut level = leaf_level(vec![1, 2, 3, 4, 5]);
        level.copy_keys(3);
        assert_eq!(level.build_keys, vec![1, 2, 3]);
        assert_eq!(level.copy_from_key_pos, 3);
    }

    #[test]
    fn replace_next_key_without_replace_fn_keeps_incoming() {
        let mut level = leaf_level(vec![10, 20, 30]);
        level.copy_keys(1);
        level.replace_next_key(99, None);
        assert_eq!(level.build_keys, vec![10, 99]);
        assert_eq!(level.copy_from_key_pos, 2);
    }

    #[test]
    fn replace_next_key_with_replace_fn_applies_it() {
        let mut level = leaf_level(vec![10, 20, 30]);
        level.copy_keys(1);
        let keep_existing = |existing: &i32, _incoming: &i32| *existing;
        level.replace_next_key(99, Some(&keep_existing));
        assert_eq!(level.build_keys, vec![10, 20]);
    }

    #[test]
    fn add_new_key_does_not_consume_copy_from() {
        let mut level = leaf_level(vec![10, 20]);
        level.add_new_key(15, None);
        assert_eq!(level.build_keys, vec![15]);
        assert_eq!(level.copy_from_key_pos, 0);
    }

    #[test]
    fn leaf_ensure_room_promotes_and_removes_the_separator() {
        let fan = 4;
        let mut level = leaf_level(vec![]);
        level.build_keys = (0..(1 + 2 * fan) as i32).collect();
        let (spilled, separator) = level.ensure_room(fan).expect("scratch is at capacity");
        assert_eq!(spilled.keys(), &[0, 1, 2, 3]);
        assert_eq!(separator, 4);
        // The separator is consumed: it does not also survive as leaf data.
        assert_eq!(level.build_keys[0], 5);
    }

    #[test]
    fn branch_ensure_room_consumes_the_separator() {
        let fan = 2;
        let mut level = branch_level();
        level.build_keys = (0..(1 + 2 * fan) as i32).collect();
        level.build_children = (0..=(1 + 2 * fan)).map(|_| Node::leaf(vec![])).collect();
        let before_children = level.build_children.len();
        let (spilled, separator) = level.ensure_room(fan).expect("scratch is at capacity");
        assert_eq!(spilled.keys(), &[0, 1]);
        assert_eq!(separator, 2);
        assert_eq!(level.build_keys[0], 3);
        assert_eq!(level.build_children.len() + spilled.children().len(), before_children);
    }

    #[test]
    fn ensure_room_is_noop_below_capacity() {
        let fan = 4;
        let mut level = leaf_level(vec![]);
        level.build_keys = vec![1, 2, 3];
        assert!(level.ensure_room(fan).is_none());
    }

    #[test]
    fn ascend_below_fan_yields_single_node() {
        let fan = 4;
        let mut level = leaf_level(vec![]);
        level.build_keys = vec![1, 2, 3];
        match level.ascend(fan) {
            AscendResult::Single(node) => assert_eq!(node.keys(), &[1, 2, 3]),
            AscendResult::Split { .. } => panic!("expected a single node"),
        }
    }

    #[test]
    fn ascend_above_fan_splits_at_midpoint() {
        let fan = 4;
        let mut level = leaf_level(vec![]);
        level.build_keys = (0..6).collect();
        match level.ascend(fan) {
            AscendResult::Split { left, separator, right } => {
                assert_eq!(left.keys(), &[0, 1, 2]);
                assert_eq!(separator, 3);
                assert_eq!(right.keys(), &[4, 5]);
            }
            AscendResult::Single(_) => panic!("expected a split"),
        }
    }

    #[cfg(feature = "proptest")]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Whenever a leaf's scratch is forced to spill, the spilled
            /// node, the promoted separator, and the level's own remaining
            /// scratch must partition the original keys exactly — every
            /// value accounted for once, none left as leaf data twice.
            #[test]
            fn leaf_spill_partitions_keys_exactly(fan in 2usize..8) {
                let total = 1 + 2 * fan;
                let keys: Vec<i32> = (0..total as i32).collect();
                let mut level = leaf_level(vec![]);
                level.build_keys = keys.clone();

                let (spilled, separator) = level.ensure_room(fan).unwrap();

                let mut seen: Vec<i32> = spilled.keys().to_vec();
                seen.push(separator);
                seen.extend_from_slice(&level.build_keys);
                prop_assert_eq!(seen, keys);
            }
        }
    }
}
