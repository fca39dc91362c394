//! Storage behind keyed views.
//!
//! [`ListState`] orders items by key. [`SortedState`] keeps the same keyed
//! identity map plus a second tree ordered by a [`Sorter`], so a key lookup
//! and a positional lookup are both O(log n).

use std::cmp::Ordering;
use std::fmt;
use std::mem;
use std::sync::Arc;

use horizon_datasource_core::{Comparator, IndexedMap};

use crate::event::ChangeEvent;
use crate::sort::Sorter;

/// Read access to a view's contents.
pub trait ViewRead<T> {
    /// Number of items.
    fn len(&self) -> usize;

    /// Item at `index` in view order.
    fn get_index(&self, index: usize) -> Option<&T>;

    /// Item with `key`.
    fn get(&self, key: &str) -> Option<&T>;

    /// Position of the item with `key`.
    fn index_of(&self, key: &str) -> Option<usize>;

    /// Items in view order, starting at `start`.
    fn iter_from(&self, start: usize) -> Box<dyn Iterator<Item = &T> + '_>;

    /// Returns `true` if there are no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the contents in view order.
    fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter_from(0).cloned().collect()
    }
}

/// Mutable storage of a keyed view.
///
/// Mutations report the events they cause instead of emitting them; the
/// owning view decides whether to notify.
pub trait ViewState<T>: ViewRead<T> + Send {
    /// Inserts or replaces the item stored under `key`.
    fn upsert(&mut self, key: String, item: T, events: &mut Vec<ChangeEvent<T>>);

    /// Removes the item stored under `key`.
    fn remove(&mut self, key: &str) -> Option<ChangeEvent<T>>;

    /// Removes every item.
    fn clear(&mut self);

    /// Replaces the contents. Later duplicates of a key win.
    fn load(&mut self, items: Vec<(String, T)>) {
        self.clear();
        let mut discarded = Vec::new();
        for (key, item) in items {
            self.upsert(key, item, &mut discarded);
            discarded.clear();
        }
    }
}

// =========================================================================
// ListState
// =========================================================================

/// Items ordered by key.
pub struct ListState<T> {
    entries: IndexedMap<String, T>,
}

impl<T> ListState<T> {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self {
            entries: IndexedMap::new(),
        }
    }
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ViewRead<T> for ListState<T> {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get_index(&self, index: usize) -> Option<&T> {
        self.entries.get_index(index).ok().map(|(_, item)| item)
    }

    fn get(&self, key: &str) -> Option<&T> {
        self.entries.get(key)
    }

    fn index_of(&self, key: &str) -> Option<usize> {
        self.entries.index_of(key)
    }

    fn iter_from(&self, start: usize) -> Box<dyn Iterator<Item = &T> + '_> {
        Box::new(self.entries.iter_from(start).map(|(_, item)| item))
    }
}

impl<T: Clone + Send> ViewState<T> for ListState<T> {
    fn upsert(&mut self, key: String, item: T, events: &mut Vec<ChangeEvent<T>>) {
        if let Some(slot) = self.entries.get_mut(key.as_str()) {
            let old = mem::replace(slot, item.clone());
            let index = self.entries.index_of(key.as_str()).unwrap_or_default();
            events.push(ChangeEvent::update(index, item, old));
            return;
        }
        self.entries.insert(key.clone(), item.clone());
        let index = self.entries.index_of(key.as_str()).unwrap_or_default();
        events.push(ChangeEvent::add(index, item));
    }

    fn remove(&mut self, key: &str) -> Option<ChangeEvent<T>> {
        let index = self.entries.index_of(key)?;
        let (_, old) = self.entries.remove_index(index).ok()?;
        Some(ChangeEvent::remove(index, old))
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: fmt::Debug> fmt::Debug for ListState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

// =========================================================================
// SortedState
// =========================================================================

struct SortEntry<T> {
    key: String,
    item: T,
}

/// Sort order, with the key as the final tie-break so no two entries are
/// ever equal.
struct ItemOrder<T> {
    sorter: Arc<Sorter<T>>,
}

impl<T> ItemOrder<T> {
    fn compare_parts(&self, a_item: &T, a_key: &str, b_item: &T, b_key: &str) -> Ordering {
        self.sorter
            .compare(a_item, b_item)
            .then_with(|| a_key.cmp(b_key))
    }
}

impl<T> Comparator<SortEntry<T>> for ItemOrder<T> {
    fn compare(&self, a: &SortEntry<T>, b: &SortEntry<T>) -> Ordering {
        self.compare_parts(&a.item, &a.key, &b.item, &b.key)
    }
}

/// Items ordered by a [`Sorter`].
///
/// Both trees always hold the same keys.
pub struct SortedState<T> {
    identity: IndexedMap<String, T>,
    sorted: IndexedMap<SortEntry<T>, (), ItemOrder<T>>,
}

impl<T> SortedState<T> {
    /// Creates an empty state ordered by `sorter`.
    pub fn new(sorter: Arc<Sorter<T>>) -> Self {
        Self {
            identity: IndexedMap::new(),
            sorted: IndexedMap::with_comparator(ItemOrder { sorter }),
        }
    }

    /// Sorted position of the item currently stored under `key`.
    fn position(&self, key: &str) -> Option<usize> {
        let item = self.identity.get(key)?;
        self.position_of(key, item)
    }

    fn position_of(&self, key: &str, item: &T) -> Option<usize> {
        let order = self.sorted.comparator();
        self.sorted
            .position_by(|entry| order.compare_parts(&entry.item, &entry.key, item, key))
    }

    fn assert_consistent(&self) {
        assert_eq!(
            self.sorted.len(),
            self.identity.len(),
            "sorted and identity trees diverged"
        );
    }
}

impl<T> ViewRead<T> for SortedState<T> {
    fn len(&self) -> usize {
        self.sorted.len()
    }

    fn get_index(&self, index: usize) -> Option<&T> {
        self.sorted.get_index(index).ok().map(|(entry, _)| &entry.item)
    }

    fn get(&self, key: &str) -> Option<&T> {
        self.identity.get(key)
    }

    fn index_of(&self, key: &str) -> Option<usize> {
        self.position(key)
    }

    fn iter_from(&self, start: usize) -> Box<dyn Iterator<Item = &T> + '_> {
        Box::new(self.sorted.iter_from(start).map(|(entry, _)| &entry.item))
    }
}

impl<T: Clone + Send> ViewState<T> for SortedState<T> {
    /// A change that moves the item emits `Remove` at the old position
    /// followed by `Add` at the new one; otherwise `Update`.
    fn upsert(&mut self, key: String, item: T, events: &mut Vec<ChangeEvent<T>>) {
        let previous = self.position(&key).and_then(|index| {
            self.sorted
                .remove_index(index)
                .ok()
                .map(|(entry, _)| (index, entry.item))
        });

        self.sorted.insert(
            SortEntry {
                key: key.clone(),
                item: item.clone(),
            },
            (),
        );
        let index = self.position_of(&key, &item).unwrap_or_default();
        self.identity.insert(key, item.clone());
        self.assert_consistent();

        match previous {
            Some((old_index, old)) if old_index == index => {
                events.push(ChangeEvent::update(index, item, old));
            }
            Some((old_index, old)) => {
                events.push(ChangeEvent::remove(old_index, old));
                events.push(ChangeEvent::add(index, item));
            }
            None => events.push(ChangeEvent::add(index, item)),
        }
    }

    fn remove(&mut self, key: &str) -> Option<ChangeEvent<T>> {
        let index = self.position(key)?;
        let (entry, _) = self.sorted.remove_index(index).ok()?;
        self.identity.remove(key);
        self.assert_consistent();
        Some(ChangeEvent::remove(index, entry.item))
    }

    fn clear(&mut self) {
        self.sorted.clear();
        self.identity.clear();
    }
}

impl<T> fmt::Debug for SortedState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedState")
            .field("len", &self.sorted.len())
            .field("sort", &self.sorted.comparator().sorter.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;
    use crate::getter::{AttributeRegistry, SharedGetter};
    use crate::sort::SortSpec;

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        id: &'static str,
        rank: i64,
    }

    fn row(id: &'static str, rank: i64) -> Row {
        Row { id, rank }
    }

    fn sorted_state(spec: &str) -> SortedState<Row> {
        let getter: SharedGetter<Row> = Arc::new(
            AttributeRegistry::new(|r: &Row| r.id.to_string()).attribute("rank", |r: &Row| r.rank),
        );
        let sorter = Sorter::new(SortSpec::parse(spec).unwrap(), getter).unwrap();
        SortedState::new(Arc::new(sorter))
    }

    fn upsert<S: ViewState<Row>>(state: &mut S, item: Row) -> Vec<ChangeEvent<Row>> {
        let mut events = Vec::new();
        state.upsert(item.id.to_string(), item, &mut events);
        events
    }

    fn ids<S: ViewRead<Row>>(state: &S) -> Vec<&'static str> {
        state.iter_from(0).map(|r| r.id).collect()
    }

    #[test]
    fn test_list_state_add_then_update() {
        let mut state = ListState::new();
        let events = upsert(&mut state, row("b", 1));
        assert_eq!(events[0].kind, ChangeKind::Add);
        assert_eq!(events[0].index, Some(0));

        let events = upsert(&mut state, row("a", 1));
        assert_eq!(events[0].index, Some(0));

        let events = upsert(&mut state, row("b", 9));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Update);
        assert_eq!(events[0].index, Some(1));
        assert_eq!(events[0].old_item, Some(row("b", 1)));
    }

    #[test]
    fn test_list_state_remove_reports_prior_index() {
        let mut state = ListState::new();
        for id in ["a", "b", "c"] {
            upsert(&mut state, row(id, 0));
        }
        let event = state.remove("b").unwrap();
        assert_eq!(event.index, Some(1));
        assert_eq!(ids(&state), vec!["a", "c"]);
        assert!(state.remove("b").is_none());
    }

    #[test]
    fn test_sorted_state_orders_by_sorter() {
        let mut state = sorted_state("-rank");
        upsert(&mut state, row("a", 1));
        upsert(&mut state, row("b", 3));
        upsert(&mut state, row("c", 2));
        assert_eq!(ids(&state), vec!["b", "c", "a"]);
        assert_eq!(state.index_of("a"), Some(2));
        assert_eq!(state.get("c"), Some(&row("c", 2)));
    }

    #[test]
    fn test_sorted_state_ties_break_on_key() {
        let mut state = sorted_state("+rank");
        upsert(&mut state, row("z", 1));
        upsert(&mut state, row("m", 1));
        upsert(&mut state, row("a", 1));
        assert_eq!(ids(&state), vec!["a", "m", "z"]);
    }

    #[test]
    fn test_sorted_state_move_is_remove_then_add() {
        let mut state = sorted_state("+rank");
        upsert(&mut state, row("a", 1));
        upsert(&mut state, row("b", 2));
        upsert(&mut state, row("c", 3));

        let events = upsert(&mut state, row("a", 10));
        let kinds: Vec<_> = events.iter().map(|e| (e.kind, e.index)).collect();
        assert_eq!(
            kinds,
            vec![(ChangeKind::Remove, Some(0)), (ChangeKind::Add, Some(2))]
        );
        assert_eq!(ids(&state), vec!["b", "c", "a"]);

        let events = upsert(&mut state, row("a", 11));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Update);
        assert_eq!(events[0].index, Some(2));
    }

    #[test]
    fn test_load_replaces_contents() {
        let mut state = sorted_state("+rank");
        upsert(&mut state, row("old", 0));
        state.load(vec![
            ("x".to_string(), row("x", 5)),
            ("y".to_string(), row("y", 4)),
            ("x".to_string(), row("x", 1)),
        ]);
        assert_eq!(ids(&state), vec!["x", "y"]);
        assert_eq!(state.get("x"), Some(&row("x", 1)));
        assert!(state.get("old").is_none());
    }
}
