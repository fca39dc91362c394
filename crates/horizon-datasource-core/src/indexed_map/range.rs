//! Backed range views over an [`IndexedMap`].

use std::cmp::Ordering;
use std::ops::{Bound, Deref, DerefMut};

use super::{Comparator, IndexedMap, Iter};
use crate::error::{IndexError, Result};

/// A live window onto a key range of an [`IndexedMap`].
///
/// The view stores only its bounds. Its length and every position are
/// derived from the underlying map on each call, so mutations made through
/// the map (or through a mutable view) are reflected immediately.
///
/// Positions reported by the view are relative to its first entry.
///
/// Use the [`Range`] and [`RangeMut`] aliases rather than naming `M` directly.
#[derive(Debug, Clone)]
pub struct RangeView<M, K> {
    map: M,
    lower: Bound<K>,
    upper: Bound<K>,
}

/// A read-only range view.
pub type Range<'a, K, V, C> = RangeView<&'a IndexedMap<K, V, C>, K>;

/// A range view that can insert and remove entries inside its bounds.
pub type RangeMut<'a, K, V, C> = RangeView<&'a mut IndexedMap<K, V, C>, K>;

impl<M, K> RangeView<M, K> {
    pub(super) fn new(map: M, lower: Bound<K>, upper: Bound<K>) -> Self {
        Self { map, lower, upper }
    }

    /// Returns the lower bound of the view.
    pub fn lower_bound(&self) -> Bound<&K> {
        self.lower.as_ref()
    }

    /// Returns the upper bound of the view.
    pub fn upper_bound(&self) -> Bound<&K> {
        self.upper.as_ref()
    }
}

impl<M, K, V, C> RangeView<M, K>
where
    M: Deref<Target = IndexedMap<K, V, C>>,
    C: Comparator<K>,
{
    /// Position of the view's first entry in the underlying map.
    fn start(&self) -> usize {
        self.map.lower_rank(&self.lower)
    }

    /// Returns `true` if `key` lies inside the view's bounds.
    pub fn in_bounds(&self, key: &K) -> bool {
        let cmp = self.map.comparator();
        let above_lower = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(lo) => cmp.compare(key, lo) != Ordering::Less,
            Bound::Excluded(lo) => cmp.compare(key, lo) == Ordering::Greater,
        };
        let below_upper = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(hi) => cmp.compare(key, hi) != Ordering::Greater,
            Bound::Excluded(hi) => cmp.compare(key, hi) == Ordering::Less,
        };
        above_lower && below_upper
    }

    /// Returns the number of entries inside the view.
    pub fn len(&self) -> usize {
        let end = self.map.upper_rank(&self.upper);
        end.saturating_sub(self.start())
    }

    /// Returns `true` if no entry lies inside the view.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value for `key` if it lies inside the view.
    pub fn get<'a>(&'a self, key: &K) -> Option<&'a V>
    where
        C: 'a,
    {
        if !self.in_bounds(key) {
            return None;
        }
        self.map.get(key)
    }

    /// Returns `true` if `key` is present and inside the view.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Returns the entry at view-relative position `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfRange`] if `index >= len()`.
    pub fn get_index<'a>(&'a self, index: usize) -> Result<(&'a K, &'a V)>
    where
        C: 'a,
    {
        let len = self.len();
        if index >= len {
            return Err(IndexError::out_of_range(index, len));
        }
        self.map.get_index(self.start() + index)
    }

    /// Returns the view-relative position of `key`.
    pub fn index_of(&self, key: &K) -> Option<usize> {
        if !self.in_bounds(key) {
            return None;
        }
        let absolute = self.map.index_of(key)?;
        Some(absolute - self.start())
    }

    /// Returns the smallest entry inside the view.
    pub fn first<'a>(&'a self) -> Option<(&'a K, &'a V)>
    where
        C: 'a,
    {
        self.iter().next()
    }

    /// Returns the largest entry inside the view.
    pub fn last<'a>(&'a self) -> Option<(&'a K, &'a V)>
    where
        C: 'a,
    {
        let len = self.len();
        if len == 0 {
            return None;
        }
        self.get_index(len - 1).ok()
    }

    /// Iterates over the entries inside the view in key order.
    pub fn iter<'a>(&'a self) -> Iter<'a, K, V>
    where
        C: 'a,
    {
        self.map.iter_slice(self.start(), self.len())
    }
}

impl<M, K, V, C> RangeView<M, K>
where
    M: DerefMut<Target = IndexedMap<K, V, C>>,
    C: Comparator<K>,
{
    /// Inserts an entry through the view.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfBounds`] if `key` lies outside the view;
    /// the map is left untouched.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        if !self.in_bounds(&key) {
            return Err(IndexError::OutOfBounds);
        }
        Ok(self.map.insert(key, value))
    }

    /// Removes `key` if it lies inside the view.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.in_bounds(key) {
            return None;
        }
        self.map.remove(key)
    }

    /// Removes the entry at view-relative position `index`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::OutOfRange`] if `index >= len()`.
    pub fn remove_index(&mut self, index: usize) -> Result<(K, V)> {
        let len = self.len();
        if index >= len {
            return Err(IndexError::out_of_range(index, len));
        }
        let start = self.start();
        self.map.remove_index(start + index)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::IndexError;
    use crate::indexed_map::IndexedMap;

    fn letters() -> IndexedMap<char, usize> {
        ('a'..='j').enumerate().map(|(i, c)| (c, i)).collect()
    }

    #[test]
    fn test_head_and_tail_views() {
        let map = letters();
        let head = map.head_view('d', false);
        assert_eq!(head.len(), 3);
        assert_eq!(head.last().map(|(k, _)| *k), Some('c'));

        let tail = map.tail_view('d', true);
        assert_eq!(tail.len(), 7);
        assert_eq!(tail.get_index(0).unwrap(), (&'d', &3));
        assert_eq!(tail.index_of(&'f'), Some(2));
        assert_eq!(tail.index_of(&'b'), None);
    }

    #[test]
    fn test_sub_view_bounds() {
        let map = letters();
        let view = map.sub_view('c', false, 'g', true);
        let keys: Vec<_> = view.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!['d', 'e', 'f', 'g']);
        assert_eq!(view.get(&'c'), None);
        assert!(view.contains_key(&'e'));
        assert!(!map.sub_view('c', false, 'g', true).contains_key(&'h'));
        assert_eq!(view.get(&'g'), Some(&6));
        assert_eq!(
            view.get_index(4),
            Err(IndexError::OutOfRange { index: 4, len: 4 })
        );
    }

    #[test]
    fn test_view_reflects_map_changes() {
        let mut map = letters();
        {
            let mut view = map.range_view_mut('c'..'f');
            assert_eq!(view.len(), 3);
            view.remove(&'d');
            assert_eq!(view.len(), 2);
            assert_eq!(view.insert('d', 99).unwrap(), None);
            assert_eq!(view.get_index(1).unwrap(), (&'d', &99));
        }
        map.remove(&'c');
        let view = map.range_view('c'..'f');
        assert_eq!(view.len(), 2);
        assert_eq!(view.first().map(|(k, _)| *k), Some('d'));
    }

    #[test]
    fn test_insert_outside_bounds_is_rejected() {
        let mut map = letters();
        let mut view = map.range_view_mut('c'..='e');
        assert_eq!(view.insert('z', 0), Err(IndexError::OutOfBounds));
        assert_eq!(view.remove(&'a'), None);
        drop(view);
        assert!(!map.contains_key(&'z'));
        assert!(map.contains_key(&'a'));
    }

    #[test]
    fn test_views_by_index() {
        let map = letters();
        let view = map.sub_view_by_index(2, 5).unwrap();
        let keys: Vec<_> = view.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!['c', 'd', 'e']);

        assert_eq!(map.head_view_by_index(4).unwrap().len(), 4);
        assert_eq!(map.tail_view_by_index(7).unwrap().len(), 3);
        assert!(map.tail_view_by_index(10).unwrap().is_empty());
        assert!(map.sub_view_by_index(3, 3).unwrap().is_empty());

        assert!(map.sub_view_by_index(4, 2).is_err());
        assert!(map.head_view_by_index(11).is_err());
    }

    #[test]
    fn test_remove_index_through_view() {
        let mut map = letters();
        let mut view = map.sub_view_by_index_mut(5, 8).unwrap();
        assert_eq!(view.remove_index(0).unwrap(), ('f', 5));
        assert_eq!(view.len(), 2);
        assert!(view.remove_index(2).is_err());
        drop(view);
        assert_eq!(map.len(), 9);
        map.check_invariants().unwrap();
    }
}
