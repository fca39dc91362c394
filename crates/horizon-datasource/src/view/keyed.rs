//! Keyed views: root lists, filtered views and sorted views.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use horizon_datasource_core::{Observer, ObserverId};
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, trace, warn};

use super::state::{ListState, SortedState, ViewRead, ViewState};
use super::{Item, ReactiveView, SharedObserver, SharedView, ViewCore};
use crate::error::{Error, Result};
use crate::event::{ChangeEvent, ChangeKind};
use crate::filter::SharedFilter;
use crate::getter::SharedGetter;
use crate::logging::targets;
use crate::sort::{SortSpec, Sorter};

/// A reactive view over a [`ViewState`].
///
/// Mutators come in pairs: the plain form notifies observers, the `_quiet`
/// form only changes the state. Every mutation and its notification happen
/// under the view's lock.
pub struct KeyedView<T, S> {
    core: ViewCore<T>,
    state: ReentrantMutex<RefCell<S>>,
    upstream: Mutex<Option<ObserverId>>,
}

/// A view ordered by item key. Root lists and filtered views are this type.
pub type KeyedList<T> = KeyedView<T, ListState<T>>;

/// A view ordered by a [`Sorter`].
pub type SortedView<T> = KeyedView<T, SortedState<T>>;

impl<T: Item, S: ViewState<T> + 'static> KeyedView<T, S> {
    fn with_state(core: ViewCore<T>, state: S) -> Self {
        Self {
            core,
            state: ReentrantMutex::new(RefCell::new(state)),
            upstream: Mutex::new(None),
        }
    }

    /// Applies `op` to the state and optionally notifies the events it
    /// reports. Returns `true` if anything changed.
    fn apply<F>(&self, notify: bool, op: F) -> bool
    where
        F: FnOnce(&mut S, &mut Vec<ChangeEvent<T>>),
    {
        let guard = self.state.lock();
        let mut events = Vec::new();
        op(&mut guard.borrow_mut(), &mut events);
        if notify {
            for event in &events {
                trace!(
                    target: targets::VIEW,
                    list = %self.core.list_id,
                    kind = ?event.kind,
                    index = ?event.index,
                    "view changed"
                );
                self.core.observers().notify(event);
            }
        }
        !events.is_empty()
    }

    fn key_of(&self, item: &T) -> String {
        self.core.getter.key(item)
    }

    /// Adds `item` and notifies. Returns `false` if the filter rejects it.
    ///
    /// Adding an item whose key is already present replaces it.
    pub fn add(&self, item: T) -> bool {
        self.add_impl(item, true)
    }

    /// [`add`](Self::add) without notification.
    pub fn add_quiet(&self, item: T) -> bool {
        self.add_impl(item, false)
    }

    fn add_impl(&self, item: T, notify: bool) -> bool {
        if !self.core.admits(&item) {
            return false;
        }
        let key = self.key_of(&item);
        self.apply(notify, |state, events| state.upsert(key, item, events))
    }

    /// Replaces the item with the same key and notifies.
    ///
    /// An item that no longer passes the filter is removed; one that now
    /// passes is added.
    pub fn update(&self, item: T) -> bool {
        self.update_impl(item, true)
    }

    /// [`update`](Self::update) without notification.
    pub fn update_quiet(&self, item: T) -> bool {
        self.update_impl(item, false)
    }

    fn update_impl(&self, item: T, notify: bool) -> bool {
        let key = self.key_of(&item);
        if self.core.admits(&item) {
            self.apply(notify, |state, events| state.upsert(key, item, events))
        } else {
            self.apply(notify, |state, events| events.extend(state.remove(&key)))
        }
    }

    /// Removes the item with the same key as `item` and notifies.
    pub fn remove(&self, item: &T) -> bool {
        let key = self.key_of(item);
        self.remove_key(&key)
    }

    /// [`remove`](Self::remove) without notification.
    pub fn remove_quiet(&self, item: &T) -> bool {
        let key = self.key_of(item);
        self.remove_key_quiet(&key)
    }

    /// Removes the item stored under `key` and notifies.
    pub fn remove_key(&self, key: &str) -> bool {
        self.apply(true, |state, events| events.extend(state.remove(key)))
    }

    /// [`remove_key`](Self::remove_key) without notification.
    pub fn remove_key_quiet(&self, key: &str) -> bool {
        self.apply(false, |state, events| events.extend(state.remove(key)))
    }

    /// Replaces the contents without notification.
    pub fn snapshot_quiet(&self, items: Vec<T>) {
        self.load(items, false);
    }

    fn load(&self, items: Vec<T>, notify: bool) {
        let guard = self.state.lock();
        let keyed = items
            .into_iter()
            .filter(|item| self.core.admits(item))
            .map(|item| (self.key_of(&item), item))
            .collect();
        let contents = {
            let mut state = guard.borrow_mut();
            state.load(keyed);
            state.to_vec()
        };
        debug!(
            target: targets::VIEW,
            list = %self.core.list_id,
            len = contents.len(),
            "view loaded"
        );
        if notify {
            self.core.observers().notify(&ChangeEvent::snapshot(contents));
        }
    }

    /// Removes every item and notifies.
    pub fn clear(&self) {
        self.clear_impl(true);
    }

    /// [`clear`](Self::clear) without notification.
    pub fn clear_quiet(&self) {
        self.clear_impl(false);
    }

    fn clear_impl(&self, notify: bool) {
        let guard = self.state.lock();
        guard.borrow_mut().clear();
        if notify {
            self.core.observers().notify(&ChangeEvent::clear());
        }
    }

    /// Installs the view's filter, drops the items it rejects and notifies
    /// a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FilterAlreadySet`] if the view already has a filter,
    /// and [`Error::ViewShared`] once a derived view or a [`ViewCache`]
    /// depends on this view's key.
    ///
    /// [`ViewCache`]: super::ViewCache
    pub fn set_filter(&self, filter: SharedFilter<T>) -> Result<()> {
        let guard = self.state.lock();
        if self.core.is_sealed() {
            return Err(Error::ViewShared {
                view: self.core.key().to_string(),
            });
        }
        if self.core.set_filter(filter).is_err() {
            return Err(Error::FilterAlreadySet {
                view: self.core.key().to_string(),
            });
        }
        let current = guard.borrow().to_vec();
        self.load(current, true);
        Ok(())
    }

    /// Subscribes this view to its source so it follows the source's
    /// changes.
    fn attach(self: &Arc<Self>) {
        let Some(source) = self.core.source.clone() else {
            return;
        };
        let link = Arc::new(UpstreamLink {
            target: Arc::downgrade(self),
        });
        let id = source.subscribe(link);
        *self.upstream.lock() = Some(id);
        debug!(
            target: targets::VIEW,
            view = %self.core.key(),
            source = %source.key(),
            "derived view attached"
        );
    }
}

impl<T: Item> KeyedList<T> {
    /// Creates an empty root list.
    pub fn new(list_id: impl Into<String>, getter: SharedGetter<T>) -> Arc<Self> {
        Arc::new(Self::with_state(
            ViewCore::root(list_id, getter),
            ListState::new(),
        ))
    }

    /// Creates a view of `source` restricted to `filter`.
    ///
    /// A request filter's view is not attached to its source; it holds
    /// whatever is loaded into it with [`snapshot`](ReactiveView::snapshot).
    pub fn derived(source: &SharedView<T>, filter: SharedFilter<T>) -> Arc<Self> {
        let attach = !filter.is_request_filter();
        let view = Arc::new(Self::with_state(
            ViewCore::derived(source.clone(), Some(filter), None),
            ListState::new(),
        ));
        if attach {
            view.attach();
        }
        view
    }
}

impl<T: Item> SortedView<T> {
    /// Creates a view of `source` ordered by `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingSort`] for an empty spec and
    /// [`Error::UnknownAttribute`] for a criterion the getter does not know.
    pub fn new(source: &SharedView<T>, spec: SortSpec) -> Result<Arc<Self>> {
        let sorter = Sorter::new(spec, source.getter().clone())?;
        Ok(Self::with_sorter(source, Arc::new(sorter)))
    }

    /// Creates a view of `source` ordered by an already bound sorter.
    pub fn with_sorter(source: &SharedView<T>, sorter: Arc<Sorter<T>>) -> Arc<Self> {
        let view = Arc::new(Self::with_state(
            ViewCore::derived(source.clone(), None, Some(sorter.clone())),
            SortedState::new(sorter),
        ));
        view.attach();
        view
    }
}

impl<T: Item, S: ViewState<T> + 'static> ReactiveView<T> for KeyedView<T, S> {
    fn core(&self) -> &ViewCore<T> {
        &self.core
    }

    fn read_locked(&self, f: &mut dyn FnMut(&dyn ViewRead<T>)) {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&*state);
    }

    fn subscribe(&self, observer: SharedObserver<T>) -> ObserverId {
        let guard = self.state.lock();
        if self.is_destroyed() {
            warn!(
                target: targets::VIEW,
                view = %self.core.key(),
                "subscribing to a destroyed view; no further events will follow"
            );
        }
        let id = self.core.observers().add(observer);
        let contents = guard.borrow().to_vec();
        self.core
            .observers()
            .notify_one(id, &ChangeEvent::snapshot(contents));
        trace!(target: targets::VIEW, view = %self.core.key(), %id, "subscribed");
        id
    }

    fn snapshot(&self, items: Vec<T>) {
        self.load(items, true);
    }

    fn destroy(&self) {
        if !self.core.mark_destroyed() {
            return;
        }
        if let (Some(source), Some(id)) = (&self.core.source, self.upstream.lock().take()) {
            source.unsubscribe(id);
        }
        let guard = self.state.lock();
        self.core.observers().notify(&ChangeEvent::destroy());
        self.core.observers().clear();
        guard.borrow_mut().clear();
        debug!(target: targets::VIEW, view = %self.core.key(), "view destroyed");
    }
}

impl<T, S> fmt::Debug for KeyedView<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedView")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

/// Forwards a source's events into a derived view.
struct UpstreamLink<T, S> {
    target: Weak<KeyedView<T, S>>,
}

impl<T: Item, S: ViewState<T> + 'static> Observer<ChangeEvent<T>> for UpstreamLink<T, S> {
    fn on_event(&self, event: &ChangeEvent<T>) {
        let Some(target) = self.target.upgrade() else {
            return;
        };
        match event.kind {
            ChangeKind::Snapshot => target.load(event.snapshot_items().to_vec(), true),
            ChangeKind::Add | ChangeKind::Update => {
                if let Some(item) = &event.new_item {
                    target.update(item.clone());
                }
            }
            ChangeKind::Remove => {
                if let Some(item) = &event.old_item {
                    target.remove(item);
                }
            }
            ChangeKind::Clear => target.clear(),
            ChangeKind::Destroy => target.destroy(),
        }
    }
}
