//! Per-group item counts.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use horizon_datasource_core::{Observer, ObserverId};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::event::{ChangeEvent, ChangeKind};
use crate::getter::{AttributeRegistry, SharedGetter};
use crate::logging::targets;
use crate::view::{Item, KeyedList, ReactiveView, SharedView};

/// Number of items in one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCount {
    /// Group key.
    pub key: String,
    /// Display text.
    pub text: String,
    /// Items currently in the group.
    pub count: usize,
}

impl GroupCount {
    /// Getter for lists of group counts.
    pub fn getter() -> SharedGetter<GroupCount> {
        Arc::new(
            AttributeRegistry::new(|g: &GroupCount| g.key.clone())
                .attribute("key", |g: &GroupCount| g.key.clone())
                .attribute("text", |g: &GroupCount| g.text.clone())
                .attribute("count", |g: &GroupCount| g.count as i64),
        )
    }
}

type GroupFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Maintains a list of [`GroupCount`]s over a source view.
///
/// A group appears when its first item does and disappears when its count
/// drops to zero.
pub struct GroupByCounter<T: Item> {
    group_fn: GroupFn<T>,
    text_fn: Option<GroupFn<T>>,
    getter: SharedGetter<T>,
    /// Group each counted item is in, by item key.
    members: Mutex<HashMap<String, String>>,
    counts: Arc<KeyedList<GroupCount>>,
    upstream: Mutex<Option<(SharedView<T>, ObserverId)>>,
}

impl<T: Item> GroupByCounter<T> {
    /// Creates a counter with list id `id`, grouping by `group_fn`.
    pub fn new<F>(id: impl Into<String>, getter: SharedGetter<T>, group_fn: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self {
            group_fn: Arc::new(group_fn),
            text_fn: None,
            getter,
            members: Mutex::new(HashMap::new()),
            counts: KeyedList::new(id, GroupCount::getter()),
            upstream: Mutex::new(None),
        }
    }

    /// Sets the display text of groups. Defaults to the group key.
    pub fn with_text<F>(mut self, text_fn: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.text_fn = Some(Arc::new(text_fn));
        self
    }

    /// Returns the list of counts.
    pub fn counts(&self) -> &Arc<KeyedList<GroupCount>> {
        &self.counts
    }

    /// Returns the count of `group`, zero if it has no items.
    pub fn count_of(&self, group: &str) -> usize {
        self.counts.get(group).map_or(0, |g| g.count)
    }

    fn text_of(&self, item: &T, group: &str) -> String {
        match &self.text_fn {
            Some(text_fn) => text_fn(item),
            None => group.to_string(),
        }
    }

    fn increment(&self, item: &T, group: String) {
        let count = self.count_of(&group) + 1;
        self.counts.add(GroupCount {
            text: self.text_of(item, &group),
            key: group,
            count,
        });
    }

    fn decrement(&self, group: &str) {
        let Some(mut current) = self.counts.get(group) else {
            return;
        };
        if current.count <= 1 {
            self.counts.remove_key(group);
        } else {
            current.count -= 1;
            self.counts.update(current);
        }
    }

    /// Counts `item`, moving it if it was counted in another group.
    pub fn add_item(&self, item: &T) {
        let key = self.getter.key(item);
        let group = (self.group_fn)(item);
        let mut members = self.members.lock();
        match members.get(&key) {
            Some(previous) if *previous == group => return,
            Some(previous) => self.decrement(previous),
            None => {}
        }
        members.insert(key, group.clone());
        self.increment(item, group);
    }

    /// Stops counting `item`.
    pub fn remove_item(&self, item: &T) {
        let key = self.getter.key(item);
        let mut members = self.members.lock();
        if let Some(group) = members.remove(&key) {
            self.decrement(&group);
        }
    }

    /// Recounts from `items`.
    pub fn reset(&self, items: &[T]) {
        let mut members = self.members.lock();
        members.clear();
        let mut counts: HashMap<String, GroupCount> = HashMap::new();
        for item in items {
            let group = (self.group_fn)(item);
            members.insert(self.getter.key(item), group.clone());
            counts
                .entry(group.clone())
                .or_insert_with(|| GroupCount {
                    text: self.text_of(item, &group),
                    key: group,
                    count: 0,
                })
                .count += 1;
        }
        debug!(
            target: targets::GROUPING,
            list = %self.counts.list_id(),
            groups = counts.len(),
            "group counts rebuilt"
        );
        self.counts.snapshot(counts.into_values().collect());
    }

    /// Forgets every item.
    pub fn clear(&self) {
        self.members.lock().clear();
        self.counts.clear();
    }

    /// Follows `source`, replacing any previous source.
    pub fn attach(self: &Arc<Self>, source: &SharedView<T>) {
        self.detach();
        let feed = Arc::new(CountFeed {
            counter: Arc::downgrade(self),
        });
        let id = source.subscribe(feed);
        *self.upstream.lock() = Some((source.clone(), id));
    }

    /// Stops following the current source.
    pub fn detach(&self) {
        let previous = self.upstream.lock().take();
        if let Some((source, id)) = previous {
            source.unsubscribe(id);
        }
    }
}

impl<T: Item> Drop for GroupByCounter<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T: Item> fmt::Debug for GroupByCounter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupByCounter")
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

struct CountFeed<T: Item> {
    counter: Weak<GroupByCounter<T>>,
}

impl<T: Item> Observer<ChangeEvent<T>> for CountFeed<T> {
    fn on_event(&self, event: &ChangeEvent<T>) {
        let Some(counter) = self.counter.upgrade() else {
            return;
        };
        match event.kind {
            ChangeKind::Snapshot => counter.reset(event.snapshot_items()),
            ChangeKind::Add | ChangeKind::Update => {
                if let Some(item) = &event.new_item {
                    counter.add_item(item);
                }
            }
            ChangeKind::Remove => {
                if let Some(item) = &event.old_item {
                    counter.remove_item(item);
                }
            }
            ChangeKind::Clear => counter.clear(),
            ChangeKind::Destroy => {
                counter.upstream.lock().take();
                counter.clear();
            }
        }
    }
}
