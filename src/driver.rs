//! Builder driver: orchestrates a bulk build/update as a single descending
//! traversal over a sorted incoming stream, and the quick-merge fast path
//! for small single-leaf trees.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::bound::{self, Bound};
use crate::builder::{AscendResult, Level};
use crate::node::Node;
use crate::search::{self, SearchResult};

/// Two-argument form, applied on a key match: `(existing, incoming) -> kept`.
pub type ReplaceMatch<'a, V> = dyn Fn(&V, &V) -> V + 'a;
/// One-argument form, applied on a pure insertion: `(incoming) -> kept`.
pub type ReplaceInsert<'a, V> = dyn Fn(&V) -> V + 'a;
/// Checked once per incoming key; `true` abandons the rest of the update.
pub type EarlyTerminate<'a> = dyn Fn() -> bool + 'a;

enum Dispatch<V> {
    Consumed,
    Descend { copy_from: Arc<Node<V>>, upper_bound: Bound<V> },
    AscendNotOwned,
}

/// A level "owns" `key` iff `key` strictly precedes its `upper_bound`.
fn dispatch<V: Clone>(
    level: &mut Level<V>,
    key: &V,
    compare: &impl Fn(&V, &V) -> Ordering,
    replace_match: Option<&ReplaceMatch<V>>,
    replace_insert: Option<&ReplaceInsert<V>>,
) -> Dispatch<V> {
    let key_end = level.key_end();
    let result = search::find(compare, key, level.copy_from.keys(), level.copy_from_key_pos, key_end);

    let owned = match result {
        SearchResult::Found(_) => true,
        SearchResult::Missing(i) => {
            i != key_end || bound::cmp_value(compare, key, &level.upper_bound) == Ordering::Less
        }
    };

    if !owned {
        level.copy_keys(key_end);
        if !level.is_leaf {
            level.copy_children(key_end + 1);
        }
        return Dispatch::AscendNotOwned;
    }

    match result {
        SearchResult::Found(i) => {
            level.copy_keys(i);
            level.replace_next_key(key.clone(), replace_match);
            if !level.is_leaf {
                level.copy_children(i + 1);
            }
            Dispatch::Consumed
        }
        SearchResult::Missing(i) => {
            if level.is_leaf {
                level.copy_keys(i);
                level.add_new_key(key.clone(), replace_insert);
                Dispatch::Consumed
            } else {
                level.copy_keys(i);
                level.copy_children(i);
                let copy_from = level.copy_from.child(i).clone();
                let upper_bound = if i < key_end {
                    Bound::Value(level.copy_from.keys()[i].clone())
                } else {
                    level.upper_bound.clone()
                };
                Dispatch::Descend { copy_from, upper_bound }
            }
        }
    }
}

/// Cascades a spill produced by `ensure_room` up through parent levels,
/// growing the tree by one level when the root itself overflows.
fn bubble_overflow<V: Clone>(stack: &mut Vec<Level<V>>, fan: usize) {
    let mut idx = stack.len() - 1;
    loop {
        let Some((node, separator)) = stack[idx].ensure_room(fan) else {
            return;
        };
        // The overflowed level's parent sits one slot below it, except when
        // the overflow reached the root: then a fresh wrapper level is
        // inserted ahead of it to become the new (and only) parent. Climb to
        // that parent and check it for overflow in turn — a long enough run
        // of spills can cascade all the way to the root.
        let parent_idx = if idx == 0 {
            stack.insert(0, Level::new(Node::empty_leaf(), Bound::PosInf, false));
            0
        } else {
            idx - 1
        };
        stack[parent_idx].add_extra_child(node, separator);
        idx = parent_idx;
    }
}

/// Flushes every level above the root (then the root itself) by copying
/// whatever original content each level hasn't copied yet and ascending,
/// bubbling the result into its parent. Returns the final tree root.
fn flush_all<V: Clone>(mut stack: Vec<Level<V>>, fan: usize) -> Arc<Node<V>> {
    loop {
        let idx = stack.len() - 1;
        {
            let level = &mut stack[idx];
            let key_end = level.key_end();
            level.copy_keys(key_end);
            if !level.is_leaf {
                level.copy_children(key_end + 1);
            }
        }
        if idx == 0 {
            let root_level = stack.pop().unwrap();
            return match root_level.ascend(fan) {
                AscendResult::Single(node) => node,
                AscendResult::Split { left, separator, right } => Node::branch(vec![separator], vec![left, right]),
            };
        }
        let level = stack.pop().unwrap();
        match level.ascend(fan) {
            AscendResult::Single(node) => stack.last_mut().unwrap().finish_child(node),
            AscendResult::Split { left, separator, right } => {
                let parent = stack.last_mut().unwrap();
                parent.add_extra_child(left, separator);
                parent.finish_child(right);
            }
        }
        bubble_overflow(&mut stack, fan);
    }
}

/// The general descending-traversal path shared by `build` (against a
/// synthetic empty root) and `update` (against a real root, once the
/// quick-merge fast path has been ruled out).
fn drive<V: Clone>(
    root: Arc<Node<V>>,
    compare: &impl Fn(&V, &V) -> Ordering,
    incoming: &[V],
    replace_match: Option<&ReplaceMatch<V>>,
    replace_insert: Option<&ReplaceInsert<V>>,
    early_terminate: Option<&EarlyTerminate>,
    fan: usize,
) -> Arc<Node<V>> {
    let mut stack = vec![Level::new(root.clone(), Bound::PosInf, root.is_leaf())];

    'keys: for key in incoming {
        if let Some(stop) = early_terminate {
            if stop() {
                break;
            }
        }
        loop {
            let top = stack.len() - 1;
            match dispatch(&mut stack[top], key, compare, replace_match, replace_insert) {
                Dispatch::Consumed => {
                    bubble_overflow(&mut stack, fan);
                    continue 'keys;
                }
                Dispatch::Descend { copy_from, upper_bound } => {
                    let is_leaf = copy_from.is_leaf();
                    stack.push(Level::new(copy_from, upper_bound, is_leaf));
                }
                Dispatch::AscendNotOwned => {
                    let finished = stack.pop().unwrap();
                    match finished.ascend(fan) {
                        AscendResult::Single(node) => stack.last_mut().unwrap().finish_child(node),
                        AscendResult::Split { left, separator, right } => {
                            let parent = stack.last_mut().unwrap();
                            parent.add_extra_child(left, separator);
                            parent.finish_child(right);
                        }
                    }
                    bubble_overflow(&mut stack, fan);
                }
            }
        }
    }

    flush_all(stack, fan)
}

/// Collapses adjacent equal-under-`compare` runs in an already-sorted
/// sequence into one entry each, so a single build/update pass never asks
/// the builder to store the same key twice. Every stored value in a node
/// is unique under the comparator, so the incoming stream must be
/// reduced to that shape before it ever reaches `dispatch`, which only
/// checks incoming keys against the *original* tree and has no way to
/// notice that an earlier key in this same pass already claimed a slot.
///
/// With no `replace_match`, the later occurrence wins (the same default
/// `Tree::update` documents for a key that matches the existing tree).
/// With one, runs fold pairwise left-to-right, so a key that appears three
/// times in one batch behaves the same as updating with it three times in
/// a row.
fn dedup_sorted<V: Clone>(source: Vec<V>, compare: &impl Fn(&V, &V) -> Ordering, replace_match: Option<&ReplaceMatch<V>>) -> Vec<V> {
    let mut out: Vec<V> = Vec::with_capacity(source.len());
    for item in source {
        match out.last() {
            Some(prev) if compare(prev, &item) == Ordering::Equal => {
                let kept = match replace_match {
                    Some(f) => f(prev, &item),
                    None => item,
                };
                *out.last_mut().unwrap() = kept;
            }
            _ => out.push(item),
        }
    }
    out
}

/// Builds a tree from an unordered/ordered finite collection.
pub fn build<V: Clone>(mut source: Vec<V>, compare: &impl Fn(&V, &V) -> Ordering, sorted: bool, fan: usize) -> Arc<Node<V>> {
    if !sorted {
        source.sort_by(compare);
    }
    let source = dedup_sorted(source, compare, None);
    if source.len() < fan {
        return Node::leaf(source);
    }
    drive(Node::empty_leaf(), compare, &source, None, None, None, fan)
}

/// Threshold below which a single-leaf root plus its incoming updates are
/// merged directly instead of going through the general builder path.
fn quick_merge_threshold(fan: usize) -> usize {
    fan.min(16) * 2
}

/// Linear single-leaf merge: for each incoming key, copy the untouched
/// prefix of the remaining root values, then emit the incoming key (after
/// applying the matching replace function, if any).
fn quick_merge<V: Clone>(
    root: &Arc<Node<V>>,
    compare: &impl Fn(&V, &V) -> Ordering,
    incoming: &[V],
    replace_match: Option<&ReplaceMatch<V>>,
    replace_insert: Option<&ReplaceInsert<V>>,
    fan: usize,
) -> Arc<Node<V>> {
    let existing = root.values();
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());
    let mut ei = 0;

    for key in incoming {
        while ei < existing.len() && compare(&existing[ei], key) == Ordering::Less {
            merged.push(existing[ei].clone());
            ei += 1;
        }
        if ei < existing.len() && compare(&existing[ei], key) == Ordering::Equal {
            merged.push(match replace_match {
                Some(f) => f(&existing[ei], key),
                None => key.clone(),
            });
            ei += 1;
        } else {
            merged.push(match replace_insert {
                Some(f) => f(key),
                None => key.clone(),
            });
        }
    }
    merged.extend_from_slice(&existing[ei..]);

    if merged.len() <= fan {
        return Node::leaf(merged);
    }

    // Unreachable at the default fan factor (32): there `Q = 2*min(F,16) =
    // 32 <= F`, so `merged.len() < Q` already implies `merged.len() <= F`.
    // A fan factor strictly between 16 and 32 breaks that inequality (`Q`
    // stays capped at 32 while `F` is smaller), making this genuinely
    // reachable; emit a correct split rather than assume it can't happen.
    let mid = merged.len() / 2;
    let mut right = merged.split_off(mid);
    let separator = right.remove(0);
    Node::branch(vec![separator], vec![Node::leaf(merged), Node::leaf(right)])
}

/// Bulk-merges `incoming` into `root`, producing a new root that shares
/// every subtree `incoming` doesn't touch.
#[allow(clippy::too_many_arguments)]
pub fn update<V: Clone>(
    root: Arc<Node<V>>,
    compare: &impl Fn(&V, &V) -> Ordering,
    mut incoming: Vec<V>,
    sorted: bool,
    replace_match: Option<&ReplaceMatch<V>>,
    replace_insert: Option<&ReplaceInsert<V>>,
    early_terminate: Option<&EarlyTerminate>,
    fan: usize,
) -> Arc<Node<V>> {
    if root.is_leaf() && root.key_end() == 0 {
        return build(incoming, compare, sorted, fan);
    }
    if !sorted {
        incoming.sort_by(compare);
    }
    let incoming = dedup_sorted(incoming, compare, replace_match);
    if root.is_leaf() && root.key_end() + incoming.len() < quick_merge_threshold(fan) {
        return quick_merge(&root, compare, &incoming, replace_match, replace_insert, fan);
    }
    drive(root, compare, &incoming, replace_match, replace_insert, early_terminate, fan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wellformed;

    fn icmp(a: &i32, b: &i32) -> Ordering {
        a.cmp(b)
    }

    #[test]
    fn build_below_fan_yields_a_single_leaf() {
        let root = build(vec![3, 1, 2], &icmp, false, 8);
        assert!(root.is_leaf());
        assert_eq!(root.keys(), &[1, 2, 3]);
    }

    #[test]
    fn build_above_fan_produces_a_well_formed_branch() {
        let root = build((0..200).collect(), &icmp, true, 8);
        assert!(!root.is_leaf());
        assert_eq!(wellformed::is_well_formed(&root, &icmp, 8), Ok(()));
    }

    #[test]
    fn update_against_empty_root_behaves_like_build() {
        let empty = Node::empty_leaf();
        let root = update(empty, &icmp, vec![5, 1, 3], false, None, None, None, 8);
        assert_eq!(root.keys(), &[1, 3, 5]);
    }

    /// The quick-merge fast path's own internal split is unreachable at the
    /// default fan factor but genuinely reachable for `16 < F < 32`, where
    /// `Q = 2*min(F,16)` stays capped at 32 while a merged leaf can still
    /// exceed `F` keys. `fan = 20` with a 15-key root and a 10-key disjoint
    /// incoming batch lands exactly there: `25 < Q(32)` enters quick-merge,
    /// and `25 > fan(20)` forces its split arm.
    #[test]
    fn quick_merge_overflow_splits_into_a_branch() {
        let fan = 20;
        assert_eq!(quick_merge_threshold(fan), 32);

        let root = build((0..15).collect(), &icmp, true, fan);
        assert!(root.is_leaf());
        assert!(root.key_end() + 10 < quick_merge_threshold(fan));

        let incoming: Vec<i32> = (15..25).collect();
        let merged = update(root, &icmp, incoming, true, None, None, None, fan);

        assert!(!merged.is_leaf());
        assert_eq!(merged.children().len(), 2);
        assert_eq!(wellformed::is_well_formed(&merged, &icmp, fan), Ok(()));

        // Every value is stored exactly once: the branch's own separator
        // key plus the two leaves, with no overlap between them.
        let mut all: Vec<i32> = merged.keys().to_vec();
        all.extend_from_slice(merged.children()[0].keys());
        all.extend_from_slice(merged.children()[1].keys());
        all.sort_unstable();
        assert_eq!(all, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn quick_merge_below_fan_stays_a_single_leaf() {
        let root = build(vec![1, 3, 5], &icmp, true, 8);
        let merged = update(root, &icmp, vec![2, 4], true, None, None, None, 8);
        assert!(merged.is_leaf());
        assert_eq!(merged.keys(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn update_replace_match_resolves_duplicate_keys() {
        // `replace_match` must stay pure with respect to the comparator —
        // it may only change the payload, never the part of the value the
        // comparator keys on — so the fixture here is a (key, payload)
        // pair rather than a bare `i32`.
        fn by_key(a: &(i32, i32), b: &(i32, i32)) -> Ordering {
            a.0.cmp(&b.0)
        }
        let base: Vec<(i32, i32)> = (0..50).map(|k| (k, k)).collect();
        let root = build(base, &by_key, true, 8);
        let tag_as_updated = |existing: &(i32, i32), _incoming: &(i32, i32)| (existing.0, -1);
        let merged = update(root, &by_key, vec![(20, 20)], true, Some(&tag_as_updated), None, None, 8);

        assert_eq!(crate::Tree::from_root(merged).find(by_key, &(20, 0)), Some(&(20, -1)));
    }

    #[test]
    fn update_collapses_duplicate_keys_within_one_batch() {
        let root = build(vec![1, 5, 9], &icmp, true, 8);
        let merged = update(root, &icmp, vec![3, 3, 3, 7], false, None, None, None, 8);
        assert_eq!(merged.keys(), &[1, 3, 5, 7, 9]);
    }

    #[test]
    fn update_folds_duplicate_keys_within_one_batch_through_replace_match() {
        fn by_key(a: &(i32, i32), b: &(i32, i32)) -> Ordering {
            a.0.cmp(&b.0)
        }
        let root = build(vec![(1, 0)], &by_key, true, 8);
        let last_wins = |_existing: &(i32, i32), incoming: &(i32, i32)| *incoming;
        let merged = update(root, &by_key, vec![(3, 10), (3, 20), (3, 30)], true, Some(&last_wins), None, None, 8);
        assert_eq!(crate::Tree::from_root(merged).find(by_key, &(3, 0)), Some(&(3, 30)));
    }

    #[test]
    fn update_grows_tree_depth_when_root_overflows() {
        let root = build((0..16).collect(), &icmp, true, 4);
        let merged = update(root, &icmp, (16..400).collect(), true, None, None, None, 4);
        assert_eq!(wellformed::is_well_formed(&merged, &icmp, 4), Ok(()));

        let count = crate::Tree::from_root(merged).cursor_all(icmp, true).count();
        assert_eq!(count, 400);
    }
}
