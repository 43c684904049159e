//! Bidirectional range cursor.
//!
//! Walks a published tree between two [`Bound`] edges without parent
//! pointers: the descent path is kept explicit, as a small stack of frames
//! bounded by [`crate::config::max_depth`], the same "no parent pointers,
//! explicit path" idiom [`crate::builder`] uses for the write side.
//!
//! Every stored value is visited exactly once, in order — including a
//! branch's own keys, which are real stored data here (not routing copies
//! of something also held in a leaf). A branch with `k` keys and `k + 1`
//! children is walked as the interleaved sequence `child[0], key[0],
//! child[1], key[1], ..., key[k - 1], child[k]`; a frame's `pos` is a slot
//! index into that sequence, even for a child, odd for a key.

use std::cmp::Ordering;
use std::sync::Arc;

use arrayvec::ArrayVec;

use crate::bound::{self, Bound};
use crate::config;
use crate::node::Node;
use crate::search::{self, SearchResult};

const MAX_STACK: usize = 64;

struct Frame<V> {
    node: Arc<Node<V>>,
    /// For a leaf, an index into its values. For a branch, a slot index in
    /// `0..=2*keys.len()`: even slots name a child, odd slots name a key.
    pos: usize,
}

type Compare<V> = dyn Fn(&V, &V) -> Ordering + Send + Sync;

/// A live, read-only traversal over a snapshot of a tree between `lo` and
/// `hi`. Borrows nothing from the tree beyond the `Arc` handles it holds, so
/// it can safely outlive the call that built it and run concurrently with
/// any number of other cursors or further updates to other trees.
pub struct Cursor<V> {
    stack: ArrayVec<Frame<V>, MAX_STACK>,
    compare: Arc<Compare<V>>,
    hi: Bound<V>,
    lo: Bound<V>,
    forward: bool,
    done: bool,
}

impl<V: Clone> Cursor<V> {
    /// Positions a cursor at the first (or, if `!forward`, the last) value
    /// inside `[lo, hi]` and descends to it.
    pub(crate) fn new(
        root: Arc<Node<V>>,
        compare: Arc<Compare<V>>,
        lo: Bound<V>,
        hi: Bound<V>,
        forward: bool,
    ) -> Self {
        let max_depth = config::max_depth();
        assert!(max_depth <= MAX_STACK, "configured fan factor needs a deeper path stack than this cursor allocates");

        let mut cursor = Cursor {
            stack: ArrayVec::new(),
            compare,
            hi,
            lo,
            forward,
            done: false,
        };

        if bound::cmp(&*cursor.compare, &cursor.lo, &cursor.hi) == Ordering::Greater {
            cursor.done = true;
            return cursor;
        }

        let found = if forward { cursor.seed_forward(root) } else { cursor.seed_backward(root) };
        if !found {
            cursor.done = true;
        } else {
            cursor.settle_bound();
        }
        cursor
    }

    /// Tries to position the cursor at the first value `>= lo` reachable
    /// from `node`. Returns `false` (leaving the stack as it found it) if
    /// no such value exists in this subtree.
    fn seed_forward(&mut self, node: Arc<Node<V>>) -> bool {
        match &*node {
            Node::Leaf(values) => {
                if values.is_empty() {
                    return false;
                }
                let pos = match &self.lo {
                    Bound::NegInf => 0,
                    Bound::Value(lo) => search::find(&*self.compare, lo, values, 0, values.len()).index(),
                    Bound::PosInf => values.len(),
                };
                if pos >= values.len() {
                    return false;
                }
                self.stack.push(Frame { node, pos });
                true
            }
            Node::Branch(b) => {
                let k = b.keys.len();
                let result = match &self.lo {
                    Bound::NegInf => SearchResult::Missing(0),
                    Bound::Value(lo) => search::find(&*self.compare, lo, &b.keys, 0, k),
                    Bound::PosInf => SearchResult::Missing(k),
                };
                match result {
                    SearchResult::Found(idx) => {
                        self.stack.push(Frame { node, pos: 2 * idx + 1 });
                        true
                    }
                    SearchResult::Missing(idx) => {
                        let child = b.children[idx].clone();
                        self.stack.push(Frame { node: node.clone(), pos: 2 * idx });
                        if self.seed_forward(child) {
                            true
                        } else {
                            self.stack.pop();
                            if idx < k {
                                self.stack.push(Frame { node, pos: 2 * idx + 1 });
                                true
                            } else {
                                false
                            }
                        }
                    }
                }
            }
        }
    }

    /// Mirror of [`Cursor::seed_forward`]: positions at the last value
    /// `<= hi` reachable from `node`.
    fn seed_backward(&mut self, node: Arc<Node<V>>) -> bool {
        match &*node {
            Node::Leaf(values) => {
                if values.is_empty() {
                    return false;
                }
                let pos = match &self.hi {
                    Bound::PosInf => values.len() - 1,
                    Bound::Value(hi) => match search::find(&*self.compare, hi, values, 0, values.len()) {
                        SearchResult::Found(i) => i,
                        SearchResult::Missing(0) => return false,
                        SearchResult::Missing(i) => i - 1,
                    },
                    Bound::NegInf => return false,
                };
                self.stack.push(Frame { node, pos });
                true
            }
            Node::Branch(b) => {
                let k = b.keys.len();
                let result = match &self.hi {
                    Bound::PosInf => SearchResult::Missing(k),
                    Bound::Value(hi) => search::find(&*self.compare, hi, &b.keys, 0, k),
                    Bound::NegInf => return false,
                };
                match result {
                    SearchResult::Found(idx) => {
                        self.stack.push(Frame { node, pos: 2 * idx + 1 });
                        true
                    }
                    SearchResult::Missing(idx) => {
                        let child = b.children[idx].clone();
                        self.stack.push(Frame { node: node.clone(), pos: 2 * idx });
                        if self.seed_backward(child) {
                            true
                        } else {
                            self.stack.pop();
                            if idx > 0 {
                                self.stack.push(Frame { node, pos: 2 * idx - 1 });
                                true
                            } else {
                                false
                            }
                        }
                    }
                }
            }
        }
    }

    /// After seeding or advancing, checks whether the current value is out
    /// of range and marks the cursor exhausted if so.
    fn settle_bound(&mut self) {
        let Some(v) = self.peek() else {
            self.done = true;
            return;
        };
        let out_of_range = if self.forward {
            bound::cmp_value(&*self.compare, v, &self.hi) == Ordering::Greater
        } else {
            bound::cmp_value(&*self.compare, v, &self.lo) == Ordering::Less
        };
        if out_of_range {
            self.done = true;
        }
    }

    fn peek(&self) -> Option<&V> {
        let frame = self.stack.last()?;
        match &*frame.node {
            Node::Leaf(values) => values.get(frame.pos),
            Node::Branch(b) => {
                debug_assert!(frame.pos % 2 == 1, "a branch frame must sit at one of its own keys when peeked");
                b.keys.get((frame.pos - 1) / 2)
            }
        }
    }

    /// Descends from `node` to the forward (leftmost) or backward
    /// (rightmost) extreme, pushing one frame per level. Every non-root
    /// node is non-empty, so this always lands on a peekable position.
    fn descend_extreme(&mut self, mut node: Arc<Node<V>>, forward: bool) {
        loop {
            match &*node {
                Node::Leaf(values) => {
                    debug_assert!(!values.is_empty(), "only the empty root is ever an empty leaf");
                    let pos = if forward { 0 } else { values.len() - 1 };
                    self.stack.push(Frame { node: node.clone(), pos });
                    return;
                }
                Node::Branch(b) => {
                    let k = b.keys.len();
                    let (slot, next) = if forward { (0, b.children[0].clone()) } else { (2 * k, b.children[k].clone()) };
                    self.stack.push(Frame { node: node.clone(), pos: slot });
                    node = next;
                }
            }
        }
    }

    /// Advances to the next value in traversal direction, descending into
    /// a fresh leaf, emitting a branch's own key, or popping back up to a
    /// parent frame as needed.
    fn step(&mut self) {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                self.done = true;
                return;
            };
            match &*frame.node {
                Node::Leaf(values) => {
                    let exhausted = if self.forward {
                        frame.pos += 1;
                        frame.pos >= values.len()
                    } else if frame.pos == 0 {
                        true
                    } else {
                        frame.pos -= 1;
                        false
                    };
                    if !exhausted {
                        return;
                    }
                    self.stack.pop();
                }
                Node::Branch(b) => {
                    let k = b.keys.len();
                    if frame.pos % 2 == 1 {
                        // Sitting at one of our own keys: move on to the
                        // child that follows it (forward) or precedes it
                        // (backward), descending to its near extreme.
                        let key_idx = (frame.pos - 1) / 2;
                        let next_child_idx = if self.forward { key_idx + 1 } else { key_idx };
                        frame.pos = 2 * next_child_idx;
                        let child = b.children[next_child_idx].clone();
                        self.descend_extreme(child, self.forward);
                        return;
                    } else {
                        // Just finished the child at this slot: move to
                        // the adjacent key, if this direction has one left,
                        // else pop up to this frame's own parent.
                        let child_idx = frame.pos / 2;
                        let has_key = if self.forward { child_idx < k } else { child_idx > 0 };
                        if has_key {
                            frame.pos = if self.forward { 2 * child_idx + 1 } else { 2 * child_idx - 1 };
                            return;
                        }
                        self.stack.pop();
                    }
                }
            }
        }
    }
}

impl<V: Clone> Iterator for Cursor<V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        if self.done {
            return None;
        }
        let value = self.peek()?.clone();
        self.step();
        if !self.done {
            self.settle_bound();
        }
        Some(value)
    }
}
