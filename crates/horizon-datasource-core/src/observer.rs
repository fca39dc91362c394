//! Observer registry with re-entrancy-safe dispatch.
//!
//! An [`ObserverRegistry`] holds an ordered set of [`Observer`]s and delivers
//! events to them. Observers are allowed to add or remove observers (including
//! themselves) from inside [`Observer::on_event`]: while a dispatch is in
//! progress such changes are buffered and applied once the outermost dispatch
//! completes, adds first, then removes.
//!
//! Consequently a notification pass never sees the set change under it, an
//! observer added during a pass does not receive that pass's event, and an
//! observer removed during a pass still receives it.
//!
//! # Example
//!
//! ```
//! use horizon_datasource_core::ObserverRegistry;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let registry = ObserverRegistry::<u32>::new();
//! let total = Arc::new(AtomicUsize::new(0));
//!
//! let sink = total.clone();
//! let id = registry.add_fn(move |n| {
//!     sink.fetch_add(*n as usize, Ordering::SeqCst);
//! });
//!
//! registry.notify(&3);
//! registry.notify(&4);
//! assert_eq!(total.load(Ordering::SeqCst), 7);
//!
//! assert!(registry.remove(id));
//! assert!(registry.is_empty());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::logging::targets;

/// Receives events from an [`ObserverRegistry`].
pub trait Observer<E>: Send + Sync {
    /// Called for every event delivered by the registry.
    fn on_event(&self, event: &E);
}

/// Adapts a closure into an [`Observer`].
pub struct FnObserver<F>(pub F);

impl<E, F> Observer<E> for FnObserver<F>
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.0)(event)
    }
}

impl<F> fmt::Debug for FnObserver<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnObserver")
    }
}

/// Identifies an observer within a registry.
///
/// Ids are process-unique, so an id from one registry never matches an
/// observer of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

type Entry<E> = (ObserverId, Arc<dyn Observer<E>>);

struct Inner<E> {
    observers: Vec<Entry<E>>,
    /// Nesting depth of in-flight dispatches.
    depth: usize,
    pending_add: Vec<Entry<E>>,
    pending_remove: Vec<ObserverId>,
    last_emptied: Option<Instant>,
}

impl<E> Inner<E> {
    fn remove_now(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        let removed = self.observers.len() != before;
        if removed && self.observers.is_empty() {
            self.last_emptied = Some(Instant::now());
        }
        removed
    }

    fn apply_pending(&mut self) {
        let adds = std::mem::take(&mut self.pending_add);
        self.observers.extend(adds);
        for id in std::mem::take(&mut self.pending_remove) {
            self.remove_now(id);
        }
    }
}

/// An ordered set of observers with deferred mutation during dispatch.
///
/// The registry lock is never held while an observer runs, so observers may
/// freely call back into the registry. Callers that need events to be
/// delivered in mutation order serialize [`notify`](Self::notify) under their
/// own lock.
pub struct ObserverRegistry<E> {
    inner: Mutex<Inner<E>>,
}

impl<E> Default for ObserverRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ObserverRegistry<E> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                observers: Vec::new(),
                depth: 0,
                pending_add: Vec::new(),
                pending_remove: Vec::new(),
                last_emptied: Some(Instant::now()),
            }),
        }
    }

    /// Adds an observer at the end of the dispatch order.
    ///
    /// During a dispatch the addition is deferred until the dispatch ends.
    pub fn add(&self, observer: Arc<dyn Observer<E>>) -> ObserverId {
        let id = ObserverId::next();
        let mut inner = self.inner.lock();
        if inner.depth > 0 {
            tracing::trace!(target: targets::OBSERVER, %id, "deferring observer add");
            inner.pending_add.push((id, observer));
        } else {
            inner.observers.push((id, observer));
            inner.last_emptied = None;
        }
        id
    }

    /// Adds a closure as an observer.
    pub fn add_fn<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&E) + Send + Sync + 'static,
        E: 'static,
    {
        self.add(Arc::new(FnObserver(f)))
    }

    /// Removes an observer.
    ///
    /// Returns `true` if the observer was registered (or pending addition).
    /// During a dispatch the removal is deferred until the dispatch ends.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut inner = self.inner.lock();
        if inner.depth == 0 {
            return inner.remove_now(id);
        }
        let known = inner.observers.iter().any(|(oid, _)| *oid == id)
            || inner.pending_add.iter().any(|(oid, _)| *oid == id);
        if known && !inner.pending_remove.contains(&id) {
            tracing::trace!(target: targets::OBSERVER, %id, "deferring observer remove");
            inner.pending_remove.push(id);
        }
        known
    }

    /// Returns `true` if `id` is currently registered.
    pub fn contains(&self, id: ObserverId) -> bool {
        self.inner.lock().observers.iter().any(|(oid, _)| *oid == id)
    }

    /// Returns the number of registered observers.
    pub fn len(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Returns `true` if no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().observers.is_empty()
    }

    /// Removes every observer, including pending additions.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.pending_add.clear();
        if inner.depth > 0 {
            let ids: Vec<_> = inner.observers.iter().map(|(id, _)| *id).collect();
            inner.pending_remove.extend(ids);
        } else {
            if !inner.observers.is_empty() {
                inner.last_emptied = Some(Instant::now());
            }
            inner.observers.clear();
        }
    }

    /// Returns when the registry last became empty, or `None` while it has
    /// observers.
    pub fn last_emptied(&self) -> Option<Instant> {
        let inner = self.inner.lock();
        if inner.observers.is_empty() {
            inner.last_emptied
        } else {
            None
        }
    }

    /// Delivers `event` to every registered observer in order.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Arc<dyn Observer<E>>> = {
            let mut inner = self.inner.lock();
            inner.depth += 1;
            inner.observers.iter().map(|(_, o)| o.clone()).collect()
        };
        tracing::trace!(
            target: targets::OBSERVER,
            observer_count = snapshot.len(),
            "dispatching event"
        );

        let _guard = DispatchGuard { registry: self };
        for observer in &snapshot {
            observer.on_event(event);
        }
    }

    /// Delivers `event` to the single observer `id`.
    ///
    /// Returns `false` if the observer is not registered.
    pub fn notify_one(&self, id: ObserverId, event: &E) -> bool {
        let observer = {
            let mut inner = self.inner.lock();
            let found = inner
                .observers
                .iter()
                .chain(inner.pending_add.iter())
                .find(|(oid, _)| *oid == id)
                .map(|(_, o)| o.clone());
            if found.is_some() {
                inner.depth += 1;
            }
            found
        };
        let Some(observer) = observer else {
            return false;
        };
        let _guard = DispatchGuard { registry: self };
        observer.on_event(event);
        true
    }
}

/// Closes a dispatch, applying deferred changes when the outermost dispatch
/// ends. Runs on unwind too, so a panicking observer cannot wedge the
/// registry in dispatch mode.
struct DispatchGuard<'a, E> {
    registry: &'a ObserverRegistry<E>,
}

impl<E> Drop for DispatchGuard<'_, E> {
    fn drop(&mut self) {
        let mut inner = self.registry.inner.lock();
        inner.depth -= 1;
        if inner.depth == 0 {
            inner.apply_pending();
        }
    }
}

impl<E> fmt::Debug for ObserverRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ObserverRegistry")
            .field("observers", &inner.observers.len())
            .field("depth", &inner.depth)
            .field("pending_add", &inner.pending_add.len())
            .field("pending_remove", &inner.pending_remove.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Arc<dyn Observer<u32>> {
        let log = log.clone();
        Arc::new(FnObserver(move |n: &u32| log.lock().push(format!("{name}:{n}"))))
    }

    #[test]
    fn test_notify_in_order() {
        let registry = ObserverRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add(recorder(&log, "a"));
        registry.add(recorder(&log, "b"));

        registry.notify(&1);
        assert_eq!(*log.lock(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn test_remove() {
        let registry = ObserverRegistry::<u32>::new();
        let id = registry.add_fn(|_| {});
        assert!(registry.contains(id));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_during_dispatch_is_deferred() {
        let registry = Arc::new(ObserverRegistry::<u32>::new());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let reg = registry.clone();
        let late = late_calls.clone();
        let added = Arc::new(AtomicUsize::new(0));
        let added_flag = added.clone();
        registry.add_fn(move |_| {
            if added_flag.swap(1, Ordering::SeqCst) == 0 {
                let late = late.clone();
                reg.add_fn(move |_| {
                    late.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        registry.notify(&1);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 2);

        registry.notify(&2);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_self_removal_during_dispatch() {
        let registry = Arc::new(ObserverRegistry::<u32>::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let own_id = Arc::new(Mutex::new(None::<ObserverId>));
        let reg = registry.clone();
        let id_cell = own_id.clone();
        let first_log = log.clone();
        let id = registry.add_fn(move |n| {
            first_log.lock().push(format!("once:{n}"));
            if let Some(id) = *id_cell.lock() {
                assert!(reg.remove(id));
            }
        });
        *own_id.lock() = Some(id);
        registry.add(recorder(&log, "b"));

        registry.notify(&1);
        // The removed observer still saw the event, and so did its successor.
        assert_eq!(*log.lock(), vec!["once:1", "b:1"]);
        assert_eq!(registry.len(), 1);

        registry.notify(&2);
        assert_eq!(*log.lock(), vec!["once:1", "b:1", "b:2"]);
    }

    #[test]
    fn test_add_then_remove_during_dispatch() {
        let registry = Arc::new(ObserverRegistry::<u32>::new());
        let reg = registry.clone();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        registry.add_fn(move |_| {
            if flag.swap(1, Ordering::SeqCst) == 0 {
                let id = reg.add_fn(|_| {});
                assert!(reg.remove(id));
            }
        });
        registry.notify(&0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_notify_one() {
        let registry = ObserverRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = registry.add(recorder(&log, "a"));
        registry.add(recorder(&log, "b"));

        assert!(registry.notify_one(a, &5));
        assert_eq!(*log.lock(), vec!["a:5"]);
        assert!(!registry.notify_one(ObserverId(u64::MAX), &5));
    }

    #[test]
    fn test_last_emptied() {
        let registry = ObserverRegistry::<u32>::new();
        assert!(registry.last_emptied().is_some());
        let id = registry.add_fn(|_| {});
        assert!(registry.last_emptied().is_none());
        registry.remove(id);
        assert!(registry.last_emptied().is_some());
    }

    #[test]
    fn test_clear_during_dispatch() {
        let registry = Arc::new(ObserverRegistry::<u32>::new());
        let reg = registry.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        registry.add_fn(move |_| reg.clear());
        registry.add_fn(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_notify_from_multiple_threads() {
        let registry = Arc::new(ObserverRegistry::<u32>::new());
        let total = Arc::new(AtomicUsize::new(0));
        let t = total.clone();
        registry.add_fn(move |n| {
            t.fetch_add(*n as usize, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        registry.notify(&1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(total.load(Ordering::SeqCst), 400);
    }
}
