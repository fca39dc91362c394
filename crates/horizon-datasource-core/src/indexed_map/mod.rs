//! Indexed ordered map.
//!
//! [`IndexedMap`] is a red-black tree whose nodes also carry the sizes of
//! their left and right subtrees. Those counters make every key ↔ position
//! conversion O(log n):
//!
//! - [`IndexedMap::get_index`] walks down from the root, steering by
//!   `left_count`.
//! - [`IndexedMap::index_of`] accumulates `left_count + 1` every time the
//!   search steps right.
//!
//! Positions are never stored anywhere else. Counters are adjusted on the
//! insertion/removal path and inside the rotations themselves, so they stay
//! consistent while rebalancing moves subtrees around.
//!
//! # Example
//!
//! ```
//! use horizon_datasource_core::IndexedMap;
//!
//! let mut map = IndexedMap::new();
//! map.insert("b", 2);
//! map.insert("a", 1);
//! map.insert("c", 3);
//!
//! assert_eq!(map.get_index(1).unwrap(), (&"b", &2));
//! assert_eq!(map.index_of(&"c"), Some(2));
//!
//! // Range views are live windows onto the map.
//! let tail = map.tail_view("b", true);
//! assert_eq!(tail.len(), 2);
//! ```
//!
//! # Related
//!
//! - [`RangeView`] - backed head/tail/sub views, by key or by position

mod range;

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::mem;
use std::ops::Bound;
use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};

use crate::error::{IndexError, Result};
use crate::logging::targets;

pub use range::{Range, RangeMut, RangeView};

new_key_type! {
    /// Arena key of a tree node.
    struct NodeKey;
}

// =========================================================================
// Comparators
// =========================================================================

/// Defines the order of keys in an [`IndexedMap`].
///
/// Two keys for which [`compare`](Comparator::compare) returns
/// [`Ordering::Equal`] are the same key as far as the map is concerned.
pub trait Comparator<K: ?Sized>: Send + Sync {
    /// Compares two keys.
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// The natural [`Ord`] order of the key type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> Comparator<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Adapts a closure into a [`Comparator`].
#[derive(Clone)]
pub struct CompareFn<F>(pub F);

impl<K: ?Sized, F> Comparator<K> for CompareFn<F>
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &K, b: &K) -> Ordering {
        (self.0)(a, b)
    }
}

impl<F> fmt::Debug for CompareFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompareFn")
    }
}

impl<K: ?Sized, C: Comparator<K> + ?Sized> Comparator<K> for Arc<C> {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        (**self).compare(a, b)
    }
}

// =========================================================================
// Nodes
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    parent: Option<NodeKey>,
    left: Option<NodeKey>,
    right: Option<NodeKey>,
    color: Color,
    /// Number of nodes in the left subtree.
    left_count: usize,
    /// Number of nodes in the right subtree.
    right_count: usize,
}

impl<K, V> Node<K, V> {
    fn new(key: K, value: V, parent: Option<NodeKey>, color: Color) -> Self {
        Self {
            key,
            value,
            parent,
            left: None,
            right: None,
            color,
            left_count: 0,
            right_count: 0,
        }
    }
}

fn leftmost<K, V>(nodes: &SlotMap<NodeKey, Node<K, V>>, mut node: NodeKey) -> NodeKey {
    while let Some(left) = nodes[node].left {
        node = left;
    }
    node
}

fn rightmost<K, V>(nodes: &SlotMap<NodeKey, Node<K, V>>, mut node: NodeKey) -> NodeKey {
    while let Some(right) = nodes[node].right {
        node = right;
    }
    node
}

fn successor<K, V>(nodes: &SlotMap<NodeKey, Node<K, V>>, node: NodeKey) -> Option<NodeKey> {
    if let Some(right) = nodes[node].right {
        return Some(leftmost(nodes, right));
    }
    let mut child = node;
    let mut parent = nodes[node].parent;
    while let Some(p) = parent {
        if nodes[p].right != Some(child) {
            break;
        }
        child = p;
        parent = nodes[p].parent;
    }
    parent
}

// =========================================================================
// IndexedMap
// =========================================================================

/// An ordered map with O(log n) positional access.
///
/// Keys are ordered by a [`Comparator`] (the natural order by default).
/// Besides the usual map operations, entries can be read and removed by
/// position, and any key can be turned into its position.
///
/// Nodes live in an arena; links between them are arena keys, so the map
/// owns all of its data and is `Send`/`Sync` whenever its contents are.
#[derive(Clone)]
pub struct IndexedMap<K, V, C = NaturalOrder> {
    nodes: SlotMap<NodeKey, Node<K, V>>,
    root: Option<NodeKey>,
    comparator: C,
}

impl<K: Ord, V> IndexedMap<K, V, NaturalOrder> {
    /// Creates an empty map ordered by the natural order of `K`.
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<K: Ord, V> Default for IndexedMap<K, V, NaturalOrder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> IndexedMap<K, V, C> {
    /// Creates an empty map ordered by `comparator`.
    pub fn with_comparator(comparator: C) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            root: None,
            comparator,
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the comparator ordering this map.
    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        tracing::trace!(target: targets::INDEXED_MAP, len = self.len(), "map cleared");
        self.nodes.clear();
        self.root = None;
    }

    /// Returns the entry at `index` in key order.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfRange`] if `index >= len()`.
    pub fn get_index(&self, index: usize) -> Result<(&K, &V)> {
        let node = self.node_at(index)?;
        let node = &self.nodes[node];
        Ok((&node.key, &node.value))
    }

    /// Returns the entry at `index` with a mutable value.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfRange`] if `index >= len()`.
    pub fn get_index_mut(&mut self, index: usize) -> Result<(&K, &mut V)> {
        let node = self.node_at(index)?;
        let node = &mut self.nodes[node];
        Ok((&node.key, &mut node.value))
    }

    /// Returns the smallest entry.
    pub fn first(&self) -> Option<(&K, &V)> {
        let node = &self.nodes[leftmost(&self.nodes, self.root?)];
        Some((&node.key, &node.value))
    }

    /// Returns the largest entry.
    pub fn last(&self) -> Option<(&K, &V)> {
        let node = &self.nodes[rightmost(&self.nodes, self.root?)];
        Some((&node.key, &node.value))
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        self.iter_from(0)
    }

    /// Iterates over the entries from position `start` to the end.
    ///
    /// An iterator starting at or past the end is empty.
    pub fn iter_from(&self, start: usize) -> Iter<'_, K, V> {
        let remaining = self.len().saturating_sub(start);
        self.iter_slice(start, remaining)
    }

    /// Iterates over the keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    /// Iterates over the values in key order.
    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    fn iter_slice(&self, start: usize, len: usize) -> Iter<'_, K, V> {
        let next = if len == 0 {
            None
        } else {
            self.node_at(start).ok()
        };
        Iter {
            nodes: &self.nodes,
            next,
            remaining: if next.is_some() { len } else { 0 },
        }
    }

    /// Finds the node at `index` by steering on the left subtree sizes.
    fn node_at(&self, index: usize) -> Result<NodeKey> {
        let len = self.len();
        if index >= len {
            return Err(IndexError::out_of_range(index, len));
        }
        let mut remaining = index;
        let mut current = self.root;
        while let Some(node) = current {
            let left_count = self.nodes[node].left_count;
            match remaining.cmp(&left_count) {
                Ordering::Less => current = self.nodes[node].left,
                Ordering::Equal => return Ok(node),
                Ordering::Greater => {
                    remaining -= left_count + 1;
                    current = self.nodes[node].right;
                }
            }
        }
        Err(IndexError::out_of_range(index, len))
    }

    /// Searches the tree with a probe, like [`slice::binary_search_by`]:
    /// `probe` returns how a stored key orders relative to the target.
    fn locate_by<F>(&self, mut probe: F) -> Option<(NodeKey, usize)>
    where
        F: FnMut(&K) -> Ordering,
    {
        let mut current = self.root;
        let mut offset = 0;
        while let Some(node) = current {
            let entry = &self.nodes[node];
            match probe(&entry.key) {
                Ordering::Greater => current = entry.left,
                Ordering::Less => {
                    offset += entry.left_count + 1;
                    current = entry.right;
                }
                Ordering::Equal => return Some((node, offset + entry.left_count)),
            }
        }
        None
    }

    /// Returns the position of the entry matched by `probe`.
    ///
    /// `probe` must be consistent with the map's order: it returns how a
    /// stored key orders relative to the entry being searched for. This
    /// allows searching with a target that cannot be built as a `K`.
    pub fn position_by<F>(&self, probe: F) -> Option<usize>
    where
        F: FnMut(&K) -> Ordering,
    {
        self.locate_by(probe).map(|(_, index)| index)
    }

    /// Removes and returns the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfRange`] if `index >= len()`.
    pub fn remove_index(&mut self, index: usize) -> Result<(K, V)> {
        let node = self.node_at(index)?;
        Ok(self.delete_node(node))
    }

    // -------------------------------------------------------------------------
    // Structural helpers
    // -------------------------------------------------------------------------

    fn color_of(&self, node: Option<NodeKey>) -> Color {
        node.map_or(Color::Black, |n| self.nodes[n].color)
    }

    fn set_color(&mut self, node: Option<NodeKey>, color: Color) {
        if let Some(n) = node {
            self.nodes[n].color = color;
        }
    }

    fn parent_of(&self, node: Option<NodeKey>) -> Option<NodeKey> {
        node.and_then(|n| self.nodes[n].parent)
    }

    fn left_of(&self, node: Option<NodeKey>) -> Option<NodeKey> {
        node.and_then(|n| self.nodes[n].left)
    }

    fn right_of(&self, node: Option<NodeKey>) -> Option<NodeKey> {
        node.and_then(|n| self.nodes[n].right)
    }

    /// Replaces `old` with `new` in the child slot of `old`'s parent.
    fn replace_child(&mut self, parent: Option<NodeKey>, old: NodeKey, new: Option<NodeKey>) {
        match parent {
            None => self.root = new,
            Some(p) => {
                if self.nodes[p].left == Some(old) {
                    self.nodes[p].left = new;
                } else {
                    self.nodes[p].right = new;
                }
            }
        }
    }

    /// Left rotation around `x`; subtree sizes of `x` and its right child are
    /// recomputed from the subtrees that move.
    fn rotate_left(&mut self, x: Option<NodeKey>) {
        let Some(x) = x else { return };
        let Some(y) = self.nodes[x].right else { return };

        let y_left = self.nodes[y].left;
        self.nodes[x].right = y_left;
        self.nodes[x].right_count = self.nodes[y].left_count;
        if let Some(yl) = y_left {
            self.nodes[yl].parent = Some(x);
        }

        let parent = self.nodes[x].parent;
        self.nodes[y].parent = parent;
        self.replace_child(parent, x, Some(y));

        self.nodes[y].left = Some(x);
        self.nodes[x].parent = Some(y);
        self.nodes[y].left_count = self.nodes[x].left_count + self.nodes[x].right_count + 1;
    }

    /// Mirror image of [`rotate_left`](Self::rotate_left).
    fn rotate_right(&mut self, x: Option<NodeKey>) {
        let Some(x) = x else { return };
        let Some(y) = self.nodes[x].left else { return };

        let y_right = self.nodes[y].right;
        self.nodes[x].left = y_right;
        self.nodes[x].left_count = self.nodes[y].right_count;
        if let Some(yr) = y_right {
            self.nodes[yr].parent = Some(x);
        }

        let parent = self.nodes[x].parent;
        self.nodes[y].parent = parent;
        self.replace_child(parent, x, Some(y));

        self.nodes[y].right = Some(x);
        self.nodes[x].parent = Some(y);
        self.nodes[y].right_count = self.nodes[x].left_count + self.nodes[x].right_count + 1;
    }

    /// Adds `delta` to the subtree counter of every ancestor of `node` on the
    /// side that leads to `node`.
    fn adjust_ancestor_counts(&mut self, node: NodeKey, grow: bool) {
        let mut child = node;
        let mut parent = self.nodes[node].parent;
        while let Some(p) = parent {
            let entry = &mut self.nodes[p];
            let counter = if entry.left == Some(child) {
                &mut entry.left_count
            } else {
                &mut entry.right_count
            };
            if grow {
                *counter += 1;
            } else {
                *counter -= 1;
            }
            child = p;
            parent = entry.parent;
        }
    }

    fn fix_after_insertion(&mut self, node: NodeKey) {
        let mut x = Some(node);
        self.set_color(x, Color::Red);

        while x.is_some() && x != self.root && self.color_of(self.parent_of(x)) == Color::Red {
            let parent = self.parent_of(x);
            let grandparent = self.parent_of(parent);
            if parent == self.left_of(grandparent) {
                let uncle = self.right_of(grandparent);
                if self.color_of(uncle) == Color::Red {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    x = grandparent;
                } else {
                    if x == self.right_of(parent) {
                        x = parent;
                        self.rotate_left(x);
                    }
                    let parent = self.parent_of(x);
                    let grandparent = self.parent_of(parent);
                    self.set_color(parent, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.left_of(grandparent);
                if self.color_of(uncle) == Color::Red {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    x = grandparent;
                } else {
                    if x == self.left_of(parent) {
                        x = parent;
                        self.rotate_right(x);
                    }
                    let parent = self.parent_of(x);
                    let grandparent = self.parent_of(parent);
                    self.set_color(parent, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    self.rotate_left(grandparent);
                }
            }
        }
        let root = self.root;
        self.set_color(root, Color::Black);
    }

    fn fix_after_deletion(&mut self, node: NodeKey) {
        let mut x = Some(node);

        while x != self.root && self.color_of(x) == Color::Black {
            if x == self.left_of(self.parent_of(x)) {
                let mut sibling = self.right_of(self.parent_of(x));
                if self.color_of(sibling) == Color::Red {
                    self.set_color(sibling, Color::Black);
                    self.set_color(self.parent_of(x), Color::Red);
                    self.rotate_left(self.parent_of(x));
                    sibling = self.right_of(self.parent_of(x));
                }
                if self.color_of(self.left_of(sibling)) == Color::Black
                    && self.color_of(self.right_of(sibling)) == Color::Black
                {
                    self.set_color(sibling, Color::Red);
                    x = self.parent_of(x);
                } else {
                    if self.color_of(self.right_of(sibling)) == Color::Black {
                        self.set_color(self.left_of(sibling), Color::Black);
                        self.set_color(sibling, Color::Red);
                        self.rotate_right(sibling);
                        sibling = self.right_of(self.parent_of(x));
                    }
                    self.set_color(sibling, self.color_of(self.parent_of(x)));
                    self.set_color(self.parent_of(x), Color::Black);
                    self.set_color(self.right_of(sibling), Color::Black);
                    self.rotate_left(self.parent_of(x));
                    x = self.root;
                }
            } else {
                let mut sibling = self.left_of(self.parent_of(x));
                if self.color_of(sibling) == Color::Red {
                    self.set_color(sibling, Color::Black);
                    self.set_color(self.parent_of(x), Color::Red);
                    self.rotate_right(self.parent_of(x));
                    sibling = self.left_of(self.parent_of(x));
                }
                if self.color_of(self.right_of(sibling)) == Color::Black
                    && self.color_of(self.left_of(sibling)) == Color::Black
                {
                    self.set_color(sibling, Color::Red);
                    x = self.parent_of(x);
                } else {
                    if self.color_of(self.left_of(sibling)) == Color::Black {
                        self.set_color(self.right_of(sibling), Color::Black);
                        self.set_color(sibling, Color::Red);
                        self.rotate_left(sibling);
                        sibling = self.left_of(self.parent_of(x));
                    }
                    self.set_color(sibling, self.color_of(self.parent_of(x)));
                    self.set_color(self.parent_of(x), Color::Black);
                    self.set_color(self.left_of(sibling), Color::Black);
                    self.rotate_right(self.parent_of(x));
                    x = self.root;
                }
            }
        }
        self.set_color(x, Color::Black);
    }

    /// Unlinks `target` from the tree and returns its entry.
    ///
    /// A node with two children swaps places with its in-order successor,
    /// which has at most one child and is the node physically removed.
    /// Ancestor counters are decremented before any rebalancing, so every
    /// rotation in the fix-up already sees the post-removal sizes.
    fn delete_node(&mut self, target: NodeKey) -> (K, V) {
        let victim = match (self.nodes[target].left, self.nodes[target].right) {
            (Some(_), Some(right)) => leftmost(&self.nodes, right),
            _ => target,
        };

        self.adjust_ancestor_counts(victim, false);

        let replacement = self.nodes[victim].left.or(self.nodes[victim].right);
        let parent = self.nodes[victim].parent;
        let victim_color = self.nodes[victim].color;

        if let Some(child) = replacement {
            self.nodes[child].parent = parent;
            self.replace_child(parent, victim, Some(child));
            if victim_color == Color::Black {
                self.fix_after_deletion(child);
            }
        } else if parent.is_none() {
            self.root = None;
        } else {
            // The victim stands in for the missing child during the fix-up
            // and is unlinked afterwards.
            if victim_color == Color::Black {
                self.fix_after_deletion(victim);
            }
            let parent = self.nodes[victim].parent;
            if parent.is_some() {
                self.replace_child(parent, victim, None);
            }
        }

        let removed = self.nodes.remove(victim);
        match removed {
            Some(removed) if victim != target => {
                let entry = &mut self.nodes[target];
                let key = mem::replace(&mut entry.key, removed.key);
                let value = mem::replace(&mut entry.value, removed.value);
                (key, value)
            }
            Some(removed) => (removed.key, removed.value),
            None => unreachable!("victim node is always present in the arena"),
        }
    }
}

impl<K, V, C: Comparator<K>> IndexedMap<K, V, C> {
    /// Inserts an entry, returning the previous value for an equal key.
    ///
    /// When the key is already present, the stored key is kept and only the
    /// value is replaced.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let Some(mut current) = self.root else {
            let node = self.nodes.insert(Node::new(key, value, None, Color::Black));
            self.root = Some(node);
            return None;
        };

        let go_left = loop {
            match self.comparator.compare(&key, &self.nodes[current].key) {
                Ordering::Less => match self.nodes[current].left {
                    Some(left) => current = left,
                    None => break true,
                },
                Ordering::Greater => match self.nodes[current].right {
                    Some(right) => current = right,
                    None => break false,
                },
                Ordering::Equal => {
                    return Some(mem::replace(&mut self.nodes[current].value, value));
                }
            }
        };

        let node = self
            .nodes
            .insert(Node::new(key, value, Some(current), Color::Red));
        if go_left {
            self.nodes[current].left = Some(node);
        } else {
            self.nodes[current].right = Some(node);
        }
        self.adjust_ancestor_counts(node, true);
        self.fix_after_insertion(node);
        None
    }

    /// Returns `(node, index)` for `key`, if present.
    fn locate<Q>(&self, key: &Q) -> Option<(NodeKey, usize)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        self.locate_by(|node_key| {
            <C as Comparator<Q>>::compare(&self.comparator, node_key.borrow(), key)
        })
    }

    /// Returns the value for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        self.locate(key).map(|(node, _)| &self.nodes[node].value)
    }

    /// Returns the stored key and value for `key`.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        self.locate(key).map(|(node, _)| {
            let entry = &self.nodes[node];
            (&entry.key, &entry.value)
        })
    }

    /// Returns a mutable reference to the value for `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        let (node, _) = self.locate(key)?;
        Some(&mut self.nodes[node].value)
    }

    /// Returns `true` if `key` is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        self.locate(key).is_some()
    }

    /// Returns the position of `key` in key order.
    pub fn index_of<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        self.locate(key).map(|(_, index)| index)
    }

    /// Removes `key`, returning its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes `key`, returning the stored key and its value.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: Comparator<Q>,
    {
        let (node, _) = self.locate(key)?;
        Some(self.delete_node(node))
    }

    /// Number of keys strictly below `key`.
    fn count_below(&self, key: &K) -> usize {
        self.count_where(|node_key| self.comparator.compare(node_key, key) == Ordering::Less)
    }

    /// Number of keys below or equal to `key`.
    fn count_up_to(&self, key: &K) -> usize {
        self.count_where(|node_key| self.comparator.compare(node_key, key) != Ordering::Greater)
    }

    /// Counts the keys satisfying a predicate that holds for a prefix of the
    /// key order.
    fn count_where(&self, in_prefix: impl Fn(&K) -> bool) -> usize {
        let mut count = 0;
        let mut current = self.root;
        while let Some(node) = current {
            let entry = &self.nodes[node];
            if in_prefix(&entry.key) {
                count += entry.left_count + 1;
                current = entry.right;
            } else {
                current = entry.left;
            }
        }
        count
    }

    /// Position of the first entry inside `lower`.
    fn lower_rank(&self, lower: &Bound<K>) -> usize {
        match lower {
            Bound::Unbounded => 0,
            Bound::Included(key) => self.count_below(key),
            Bound::Excluded(key) => self.count_up_to(key),
        }
    }

    /// Position one past the last entry inside `upper`.
    fn upper_rank(&self, upper: &Bound<K>) -> usize {
        match upper {
            Bound::Unbounded => self.len(),
            Bound::Included(key) => self.count_up_to(key),
            Bound::Excluded(key) => self.count_below(key),
        }
    }

    /// Checks the structural invariants of the tree.
    ///
    /// Verifies, by a full traversal, that every node's `left_count` and
    /// `right_count` match the real subtree sizes, that parent links are
    /// consistent, that keys are strictly increasing, and that the
    /// red-black coloring rules hold.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let Some(root) = self.root else {
            return if self.nodes.is_empty() {
                Ok(())
            } else {
                Err(format!("empty tree with {} arena nodes", self.nodes.len()))
            };
        };
        if self.nodes[root].parent.is_some() {
            return Err("root has a parent".into());
        }
        if self.nodes[root].color != Color::Black {
            return Err("root is red".into());
        }
        let (size, _) = self.check_subtree(root)?;
        if size != self.nodes.len() {
            return Err(format!("tree reaches {size} of {} nodes", self.nodes.len()));
        }
        let mut previous: Option<&K> = None;
        for (key, _) in self.iter() {
            if let Some(prev) = previous {
                if self.comparator.compare(prev, key) != Ordering::Less {
                    return Err("keys are not strictly increasing".into());
                }
            }
            previous = Some(key);
        }
        Ok(())
    }

    /// Returns `(size, black_height)` of the subtree rooted at `node`.
    fn check_subtree(&self, node: NodeKey) -> std::result::Result<(usize, usize), String> {
        let entry = &self.nodes[node];
        let mut sizes = [0usize; 2];
        let mut heights = [1usize; 2];
        for (slot, child) in [entry.left, entry.right].into_iter().enumerate() {
            if let Some(child) = child {
                if self.nodes[child].parent != Some(node) {
                    return Err("broken parent link".into());
                }
                if entry.color == Color::Red && self.nodes[child].color == Color::Red {
                    return Err("red node with red child".into());
                }
                let (size, height) = self.check_subtree(child)?;
                sizes[slot] = size;
                heights[slot] = height;
            }
        }
        if entry.left_count != sizes[0] {
            return Err(format!("left_count {} but subtree has {}", entry.left_count, sizes[0]));
        }
        if entry.right_count != sizes[1] {
            return Err(format!("right_count {} but subtree has {}", entry.right_count, sizes[1]));
        }
        if heights[0] != heights[1] {
            return Err("unequal black heights".into());
        }
        let own = usize::from(entry.color == Color::Black);
        Ok((sizes[0] + sizes[1] + 1, heights[0] + own))
    }
}

impl<K: Clone, V, C: Comparator<K>> IndexedMap<K, V, C> {
    /// Returns a backed view of the entries with keys below `to`
    /// (or up to `to` when `inclusive`).
    pub fn head_view(&self, to: K, inclusive: bool) -> Range<'_, K, V, C> {
        let upper = if inclusive {
            Bound::Included(to)
        } else {
            Bound::Excluded(to)
        };
        RangeView::new(self, Bound::Unbounded, upper)
    }

    /// Returns a backed view of the entries with keys above `from`
    /// (or from `from` on when `inclusive`).
    pub fn tail_view(&self, from: K, inclusive: bool) -> Range<'_, K, V, C> {
        let lower = if inclusive {
            Bound::Included(from)
        } else {
            Bound::Excluded(from)
        };
        RangeView::new(self, lower, Bound::Unbounded)
    }

    /// Returns a backed view of the entries between `from` and `to`.
    pub fn sub_view(
        &self,
        from: K,
        from_inclusive: bool,
        to: K,
        to_inclusive: bool,
    ) -> Range<'_, K, V, C> {
        let lower = if from_inclusive {
            Bound::Included(from)
        } else {
            Bound::Excluded(from)
        };
        let upper = if to_inclusive {
            Bound::Included(to)
        } else {
            Bound::Excluded(to)
        };
        RangeView::new(self, lower, upper)
    }

    /// Returns a backed view over any [`RangeBounds`](std::ops::RangeBounds) of keys.
    pub fn range_view<R>(&self, range: R) -> Range<'_, K, V, C>
    where
        R: std::ops::RangeBounds<K>,
    {
        RangeView::new(self, range.start_bound().cloned(), range.end_bound().cloned())
    }

    /// Returns a mutable backed view over a range of keys.
    ///
    /// Inserting through the view rejects keys outside of `range`.
    pub fn range_view_mut<R>(&mut self, range: R) -> RangeMut<'_, K, V, C>
    where
        R: std::ops::RangeBounds<K>,
    {
        let lower = range.start_bound().cloned();
        let upper = range.end_bound().cloned();
        RangeView::new(self, lower, upper)
    }

    /// Returns a backed view of the first `end` positions.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfRange`] if `end > len()`.
    pub fn head_view_by_index(&self, end: usize) -> Result<Range<'_, K, V, C>> {
        let (_, upper) = self.bounds_for_positions(0, end)?;
        Ok(RangeView::new(self, Bound::Unbounded, upper))
    }

    /// Returns a backed view from position `start` to the end.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfRange`] if `start > len()`.
    pub fn tail_view_by_index(&self, start: usize) -> Result<Range<'_, K, V, C>> {
        let (lower, _) = self.bounds_for_positions(start, self.len())?;
        Ok(RangeView::new(self, lower, Bound::Unbounded))
    }

    /// Returns a backed view of positions `start..end`.
    ///
    /// The positions are resolved to their keys when the view is built; the
    /// view then follows those keys as the map changes.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfRange`] unless `start <= end <= len()`.
    pub fn sub_view_by_index(&self, start: usize, end: usize) -> Result<Range<'_, K, V, C>> {
        let (lower, upper) = self.bounds_for_positions(start, end)?;
        Ok(RangeView::new(self, lower, upper))
    }

    /// Mutable variant of [`sub_view_by_index`](Self::sub_view_by_index).
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfRange`] unless `start <= end <= len()`.
    pub fn sub_view_by_index_mut(
        &mut self,
        start: usize,
        end: usize,
    ) -> Result<RangeMut<'_, K, V, C>> {
        let (lower, upper) = self.bounds_for_positions(start, end)?;
        Ok(RangeView::new(self, lower, upper))
    }

    fn bounds_for_positions(&self, start: usize, end: usize) -> Result<(Bound<K>, Bound<K>)> {
        let len = self.len();
        if end > len {
            return Err(IndexError::out_of_range(end, len));
        }
        if start > end {
            return Err(IndexError::out_of_range(start, end));
        }
        let lower = if start < len {
            Bound::Included(self.get_index(start)?.0.clone())
        } else {
            match self.last() {
                Some((key, _)) => Bound::Excluded(key.clone()),
                None => Bound::Unbounded,
            }
        };
        let upper = if end < len {
            Bound::Excluded(self.get_index(end)?.0.clone())
        } else {
            Bound::Unbounded
        };
        Ok((lower, upper))
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C> fmt::Debug for IndexedMap<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for IndexedMap<K, V, NaturalOrder> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K, V, C: Comparator<K>> Extend<(K, V)> for IndexedMap<K, V, C> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'a, K, V, C> IntoIterator for &'a IndexedMap<K, V, C> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// In-order iterator over the entries of an [`IndexedMap`].
pub struct Iter<'a, K, V> {
    nodes: &'a SlotMap<NodeKey, Node<K, V>>,
    next: Option<NodeKey>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.next?;
        self.remaining -= 1;
        self.next = successor(self.nodes, node);
        let entry = &self.nodes[node];
        Some((&entry.key, &entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
