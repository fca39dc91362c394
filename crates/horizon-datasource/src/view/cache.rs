//! Sharing of derived views by key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use horizon_datasource_core::ObserverId;
use parking_lot::Mutex;
use tracing::debug;

use super::{Item, KeyedList, SharedObserver, SharedView, SortedView, ViewKey};
use crate::filter::SharedFilter;
use crate::logging::targets;
use crate::sort::Sorter;

/// Cache of derived views, keyed by [`ViewKey`].
///
/// Requesting the same `(source, filter, sort)` combination twice yields
/// the same view instance, so many listeners share one reconciliation.
pub struct ViewCache<T> {
    views: Mutex<HashMap<ViewKey, SharedView<T>>>,
}

impl<T: Item> ViewCache<T> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the view of `source` restricted by `filter` and ordered by
    /// `sort`, creating the missing links of the chain.
    ///
    /// The chain is `source → filter → sort`; with neither, `source` itself
    /// is returned.
    ///
    /// An unobserved view can be evicted as soon as this returns. Callers
    /// that go on to subscribe should use
    /// [`fetch_and_subscribe`](Self::fetch_and_subscribe) instead.
    pub fn fetch_or_create(
        &self,
        source: &SharedView<T>,
        filter: Option<SharedFilter<T>>,
        sort: Option<Arc<Sorter<T>>>,
    ) -> SharedView<T> {
        let mut views = self.views.lock();
        Self::fetch_locked(&mut views, source, filter, sort)
    }

    /// Like [`fetch_or_create`](Self::fetch_or_create), and subscribes
    /// `observer` before the cache lock is released, so no eviction can
    /// destroy the view in between.
    pub fn fetch_and_subscribe(
        &self,
        source: &SharedView<T>,
        filter: Option<SharedFilter<T>>,
        sort: Option<Arc<Sorter<T>>>,
        observer: SharedObserver<T>,
    ) -> (SharedView<T>, ObserverId) {
        let mut views = self.views.lock();
        let view = Self::fetch_locked(&mut views, source, filter, sort);
        let id = view.subscribe(observer);
        (view, id)
    }

    fn fetch_locked(
        views: &mut HashMap<ViewKey, SharedView<T>>,
        source: &SharedView<T>,
        filter: Option<SharedFilter<T>>,
        sort: Option<Arc<Sorter<T>>>,
    ) -> SharedView<T> {
        source.core().seal();
        let mut current = source.clone();
        if let Some(filter) = filter {
            let key = ViewKey::compose(current.key().as_str(), Some(&filter.to_string()), None);
            let base = current.clone();
            current = Self::lookup_or_insert(views, key, || KeyedList::derived(&base, filter));
        }
        if let Some(sort) = sort {
            let key = ViewKey::compose(current.key().as_str(), None, Some(&sort.to_string()));
            let base = current.clone();
            current = Self::lookup_or_insert(views, key, || {
                SortedView::with_sorter(&base, sort)
            });
        }
        current
    }

    fn lookup_or_insert<F>(
        views: &mut HashMap<ViewKey, SharedView<T>>,
        key: ViewKey,
        create: F,
    ) -> SharedView<T>
    where
        F: FnOnce() -> SharedView<T>,
    {
        if let Some(view) = views.get(&key).filter(|view| !view.is_destroyed()) {
            return view.clone();
        }
        let view = create();
        view.core().seal();
        debug!(target: targets::VIEW, %key, "view cached");
        views.insert(key, view.clone());
        view
    }

    /// Returns the cached view with `key`.
    pub fn get(&self, key: &ViewKey) -> Option<SharedView<T>> {
        self.views.lock().get(key).cloned()
    }

    /// Number of cached views.
    pub fn len(&self) -> usize {
        self.views.lock().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.views.lock().is_empty()
    }

    /// Drops the view with `key` from the cache and destroys it.
    pub fn remove(&self, key: &ViewKey) -> Option<SharedView<T>> {
        let view = self.views.lock().remove(key)?;
        view.destroy();
        Some(view)
    }

    /// Destroys and drops views that have had no observers for at least
    /// `max_idle`. Permanent views are kept. Returns how many were evicted.
    ///
    /// A view feeding a cached child is observed by it, so chains are
    /// released leaf first over successive calls.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut evicted = Vec::new();
        self.views.lock().retain(|key, view| {
            let idle = !view.is_permanent() && view.idle_for().is_some_and(|d| d >= max_idle);
            if idle || view.is_destroyed() {
                debug!(target: targets::VIEW, %key, "view evicted");
                evicted.push(view.clone());
                false
            } else {
                true
            }
        });
        for view in &evicted {
            view.destroy();
        }
        evicted.len()
    }

    /// Destroys every cached view.
    pub fn clear(&self) {
        let views: Vec<_> = self.views.lock().drain().map(|(_, view)| view).collect();
        for view in views {
            view.destroy();
        }
    }
}

impl<T: Item> Default for ViewCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ViewCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let views = self.views.lock();
        let mut keys: Vec<_> = views.keys().map(ViewKey::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("ViewCache").field("views", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeEvent;
    use crate::filter::FnFilter;
    use crate::getter::{AttributeRegistry, SharedGetter};
    use crate::error::Error;
    use crate::sort::SortSpec;
    use horizon_datasource_core::FnObserver;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    fn getter() -> SharedGetter<i64> {
        Arc::new(AttributeRegistry::new(|n: &i64| format!("{n:+05}")).attribute("n", |n: &i64| *n))
    }

    fn positive() -> SharedFilter<i64> {
        Arc::new(FnFilter::new("positive", |n: &i64| *n > 0))
    }

    fn descending(getter: &SharedGetter<i64>) -> Arc<Sorter<i64>> {
        Arc::new(Sorter::new(SortSpec::parse("-n").unwrap(), getter.clone()).unwrap())
    }

    #[test]
    fn test_same_key_same_view() {
        let root: SharedView<i64> = KeyedList::new("nums", getter());
        let cache = ViewCache::new();

        let a = cache.fetch_or_create(&root, Some(positive()), Some(descending(root.getter())));
        let b = cache.fetch_or_create(&root, Some(positive()), Some(descending(root.getter())));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.key().as_str(), "nums|positive|-n");
        assert_eq!(cache.len(), 2);

        let plain = cache.fetch_or_create(&root, None, None);
        assert!(Arc::ptr_eq(&plain, &root));
    }

    #[test]
    fn test_chain_reflects_source() {
        let list = KeyedList::new("nums", getter());
        let root: SharedView<i64> = list.clone();
        let cache = ViewCache::new();
        let view = cache.fetch_or_create(&root, Some(positive()), Some(descending(root.getter())));

        for n in [3, -1, 7, 0, 5] {
            list.add(n);
        }
        assert_eq!(view.items(), vec![7, 5, 3]);
    }

    #[test]
    fn test_evict_idle_spares_observed_and_permanent() {
        let root: SharedView<i64> = KeyedList::new("nums", getter());
        let cache = ViewCache::new();
        let sorted = cache.fetch_or_create(&root, None, Some(descending(root.getter())));
        let filtered = cache.fetch_or_create(&root, Some(positive()), None);

        let id = sorted.subscribe(Arc::new(FnObserver(|_: &ChangeEvent<i64>| {})));
        assert_eq!(cache.evict_idle(Duration::ZERO), 1);
        assert!(filtered.is_destroyed());
        assert!(!sorted.is_destroyed());

        sorted.set_permanent(true);
        sorted.unsubscribe(id);
        assert_eq!(cache.evict_idle(Duration::ZERO), 0);

        sorted.set_permanent(false);
        assert_eq!(cache.evict_idle(Duration::ZERO), 1);
        assert!(cache.is_empty());
        assert_eq!(root.observer_count(), 0);
    }

    #[test]
    fn test_destroyed_view_is_replaced() {
        let root: SharedView<i64> = KeyedList::new("nums", getter());
        let cache = ViewCache::new();
        let first = cache.fetch_or_create(&root, Some(positive()), None);
        first.destroy();
        let second = cache.fetch_or_create(&root, Some(positive()), None);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_destroyed());
    }

    #[test]
    fn test_fetch_and_subscribe_after_eviction_yields_live_view() {
        let list = KeyedList::new("nums", getter());
        let root: SharedView<i64> = list.clone();
        let cache = ViewCache::new();

        let stale = cache.fetch_or_create(&root, Some(positive()), None);
        assert_eq!(cache.evict_idle(Duration::ZERO), 1);
        assert!(stale.is_destroyed());

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let (view, _id) = cache.fetch_and_subscribe(
            &root,
            Some(positive()),
            None,
            Arc::new(FnObserver(move |_: &ChangeEvent<i64>| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        assert!(!Arc::ptr_eq(&stale, &view));
        assert!(!view.is_destroyed());
        assert_eq!(cache.evict_idle(Duration::ZERO), 0);

        list.add(4);
        assert!(seen.load(Ordering::SeqCst) >= 1);
        assert_eq!(view.items(), vec![4]);
    }

    #[test]
    fn test_fetch_and_subscribe_races_eviction() {
        let list = KeyedList::new("nums", getter());
        let root: SharedView<i64> = list.clone();
        let cache = ViewCache::new();
        let stop = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                while !stop.load(Ordering::SeqCst) {
                    cache.evict_idle(Duration::ZERO);
                }
            });
            for n in 1..=200 {
                let seen = Arc::new(AtomicUsize::new(0));
                let counter = seen.clone();
                let (view, id) = cache.fetch_and_subscribe(
                    &root,
                    Some(positive()),
                    None,
                    Arc::new(FnObserver(move |_: &ChangeEvent<i64>| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })),
                );
                assert!(!view.is_destroyed());
                list.add(n);
                assert!(seen.load(Ordering::SeqCst) >= 1, "add {n} was not delivered");
                view.unsubscribe(id);
            }
            stop.store(true, Ordering::SeqCst);
        });
    }

    #[test]
    fn test_cached_source_is_sealed() {
        let list = KeyedList::new("nums", getter());
        let root: SharedView<i64> = list.clone();
        let cache = ViewCache::new();

        let filtered = cache.fetch_or_create(&root, Some(positive()), None);
        assert!(root.core().is_sealed());
        assert!(filtered.core().is_sealed());
        assert!(matches!(
            list.set_filter(positive()),
            Err(Error::ViewShared { view }) if view == "nums"
        ));
        assert_eq!(filtered.key().as_str(), "nums|positive");
        assert!(Arc::ptr_eq(
            &cache.fetch_or_create(&root, Some(positive()), None),
            &filtered
        ));
    }
}
