//! Reactive views.
//!
//! A reactive view is an ordered, keyed collection of items that notifies
//! observers of every change. Views are composed into chains:
//!
//! ```text
//! root list ──▶ filtered view ──▶ sorted view
//! ```
//!
//! Each derived view subscribes to its source and reconciles the source's
//! events into its own state, re-indexing them in its own order. The first
//! event every observer receives is a [`ChangeKind::Snapshot`] of the view's
//! contents at subscription time; it is delivered under the view's lock, so
//! no mutation can slip between the snapshot and the observer's first
//! incremental event.
//!
//! # Locking
//!
//! Each view guards its state with a reentrant mutex and emits events while
//! still holding it. Events flow source → derived, so locks are always taken
//! in that order. Observers may read the emitting view from inside a
//! callback.
//!
//! [`ChangeKind::Snapshot`]: crate::event::ChangeKind::Snapshot

mod cache;
mod key;
mod keyed;
mod state;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use horizon_datasource_core::{Observer, ObserverId, ObserverRegistry};

use crate::event::ChangeEvent;
use crate::filter::SharedFilter;
use crate::getter::SharedGetter;
use crate::sort::Sorter;

pub use cache::ViewCache;
pub use key::ViewKey;
pub use keyed::{KeyedList, KeyedView, SortedView};
pub use state::{ListState, SortedState, ViewRead, ViewState};

/// Bounds every item type held by a view.
pub trait Item: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Item for T {}

/// Shared handle to any reactive view.
pub type SharedView<T> = Arc<dyn ReactiveView<T>>;

/// Observer of a view's change events.
pub type SharedObserver<T> = Arc<dyn Observer<ChangeEvent<T>>>;

/// Identity and bookkeeping shared by every view implementation.
pub struct ViewCore<T> {
    list_id: String,
    getter: SharedGetter<T>,
    source: Option<SharedView<T>>,
    filter: OnceLock<SharedFilter<T>>,
    sort: Option<Arc<Sorter<T>>>,
    observers: ObserverRegistry<ChangeEvent<T>>,
    permanent: AtomicBool,
    destroyed: AtomicBool,
    /// Set once other views or the cache depend on this view's key.
    sealed: AtomicBool,
}

impl<T: Item> ViewCore<T> {
    /// Core of a root view named `list_id`.
    pub fn root(list_id: impl Into<String>, getter: SharedGetter<T>) -> Self {
        Self {
            list_id: list_id.into(),
            getter,
            source: None,
            filter: OnceLock::new(),
            sort: None,
            observers: ObserverRegistry::new(),
            permanent: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            sealed: AtomicBool::new(false),
        }
    }

    /// Core of a view derived from `source`.
    pub fn derived(
        source: SharedView<T>,
        filter: Option<SharedFilter<T>>,
        sort: Option<Arc<Sorter<T>>>,
    ) -> Self {
        source.core().seal();
        let filter_cell = OnceLock::new();
        if let Some(filter) = filter {
            let _ = filter_cell.set(filter);
        }
        Self {
            list_id: source.list_id().to_string(),
            getter: source.getter().clone(),
            source: Some(source),
            filter: filter_cell,
            sort,
            observers: ObserverRegistry::new(),
            permanent: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            sealed: AtomicBool::new(false),
        }
    }

    /// Computes the view's cache key from its chain.
    pub fn key(&self) -> ViewKey {
        let filter = self.filter.get().map(ToString::to_string);
        let sort = self.sort.as_ref().map(ToString::to_string);
        let base = match &self.source {
            Some(source) => source.key().as_str().to_string(),
            None => self.list_id.clone(),
        };
        ViewKey::compose(&base, filter.as_deref(), sort.as_deref())
    }

    /// Returns `true` if `item` passes this view's own filter.
    pub fn admits(&self, item: &T) -> bool {
        self.filter.get().is_none_or(|filter| filter.include(item))
    }

    /// Returns the observer registry.
    pub fn observers(&self) -> &ObserverRegistry<ChangeEvent<T>> {
        &self.observers
    }

    /// Installs the view's filter; fails if one is already set.
    pub(crate) fn set_filter(&self, filter: SharedFilter<T>) -> Result<(), SharedFilter<T>> {
        self.filter.set(filter)
    }

    /// Freezes the view's key: its filter can no longer be installed.
    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Returns `true` once a derived view or the cache depends on this view.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Marks the core destroyed; returns `false` if it already was.
    pub(crate) fn mark_destroyed(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }
}

impl<T> fmt::Debug for ViewCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCore")
            .field("list_id", &self.list_id)
            .field("filter", &self.filter.get().map(ToString::to_string))
            .field("sort", &self.sort.as_ref().map(ToString::to_string))
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// An observable, ordered, keyed collection.
///
/// Implementors provide storage access ([`read_locked`]), subscription,
/// bulk loading and teardown. Everything else has a default built on
/// [`core`].
///
/// [`read_locked`]: ReactiveView::read_locked
/// [`core`]: ReactiveView::core
pub trait ReactiveView<T: Item>: Send + Sync {
    /// Returns the shared identity and bookkeeping.
    fn core(&self) -> &ViewCore<T>;

    /// Runs `f` with read access to the contents, under the view's lock.
    ///
    /// Nothing can mutate the view while `f` runs.
    fn read_locked(&self, f: &mut dyn FnMut(&dyn ViewRead<T>));

    /// Registers `observer` and delivers it a snapshot of the contents
    /// before any other event.
    fn subscribe(&self, observer: SharedObserver<T>) -> ObserverId;

    /// Replaces the contents with `items` and notifies a snapshot.
    fn snapshot(&self, items: Vec<T>);

    /// Detaches from the source, notifies [`Destroy`] and drops all
    /// observers. Idempotent.
    ///
    /// [`Destroy`]: crate::event::ChangeKind::Destroy
    fn destroy(&self);

    /// Returns the cache key.
    fn key(&self) -> ViewKey {
        self.core().key()
    }

    /// Returns the id of the root list this view derives from.
    fn list_id(&self) -> &str {
        &self.core().list_id
    }

    /// Returns the attribute getter.
    fn getter(&self) -> &SharedGetter<T> {
        &self.core().getter
    }

    /// Returns the view this one derives from.
    fn source(&self) -> Option<&SharedView<T>> {
        self.core().source.as_ref()
    }

    /// Returns this view's own filter.
    fn filter(&self) -> Option<&SharedFilter<T>> {
        self.core().filter.get()
    }

    /// Returns this view's own sort.
    fn sort(&self) -> Option<&Arc<Sorter<T>>> {
        self.core().sort.as_ref()
    }

    /// Returns the number of items.
    fn len(&self) -> usize {
        let mut len = 0;
        self.read_locked(&mut |contents| len = contents.len());
        len
    }

    /// Returns `true` if the view holds no items.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the item at `index`.
    fn get_index(&self, index: usize) -> Option<T> {
        let mut item = None;
        self.read_locked(&mut |contents| item = contents.get_index(index).cloned());
        item
    }

    /// Returns a copy of the item with `key`.
    fn get(&self, key: &str) -> Option<T> {
        let mut item = None;
        self.read_locked(&mut |contents| item = contents.get(key).cloned());
        item
    }

    /// Returns the position of the item with `key`.
    fn index_of(&self, key: &str) -> Option<usize> {
        let mut index = None;
        self.read_locked(&mut |contents| index = contents.index_of(key));
        index
    }

    /// Returns a copy of the contents in view order.
    fn items(&self) -> Vec<T> {
        let mut items = Vec::new();
        self.read_locked(&mut |contents| items = contents.to_vec());
        items
    }

    /// Removes an observer. Returns `false` if it was not registered.
    fn unsubscribe(&self, id: ObserverId) -> bool {
        self.core().observers.remove(id)
    }

    /// Returns the number of registered observers.
    fn observer_count(&self) -> usize {
        self.core().observers.len()
    }

    /// Returns how long the view has had no observers, if it has none.
    fn idle_for(&self) -> Option<Duration> {
        self.core().observers.last_emptied().map(|at| at.elapsed())
    }

    /// Returns `true` if the view is exempt from idle eviction.
    fn is_permanent(&self) -> bool {
        self.core().permanent.load(Ordering::Acquire)
    }

    /// Exempts the view from (or re-exposes it to) idle eviction.
    fn set_permanent(&self, permanent: bool) {
        self.core().permanent.store(permanent, Ordering::Release);
    }

    /// Returns `true` if the view holds the result of a query, i.e. its own
    /// filter is a request filter.
    fn is_query_result(&self) -> bool {
        self.filter().is_some_and(|filter| filter.is_request_filter())
    }

    /// Returns `true` once [`destroy`](ReactiveView::destroy) has run.
    fn is_destroyed(&self) -> bool {
        self.core().destroyed.load(Ordering::Acquire)
    }
}

/// Returns the view that client-side refinements of `view` apply to.
///
/// Walks up past sorts and ordinary filters, stopping at a query result or
/// at the root list. Re-filtering `orders|#q1|status=open|+id` therefore
/// narrows the query result `orders|#q1` rather than the already filtered
/// view, and re-filtering `orders|status=open` starts over from `orders`.
pub fn refinement_base<T: Item>(view: &SharedView<T>) -> SharedView<T> {
    let mut current = view.clone();
    loop {
        if current.is_query_result() {
            return current;
        }
        match current.source().cloned() {
            Some(source) => current = source,
            None => return current,
        }
    }
}
