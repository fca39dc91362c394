//! Windowed viewport listeners.
//!
//! A [`ViewportListener`] is one client's scrollable, selectable window onto
//! a reactive view. It does not forward individual change events. Instead,
//! events only set dirty flags:
//!
//! - `values`: something visible (or the window itself) changed
//! - `size`: only the item count changed
//!
//! and the first event after a drain marks the listener ready in the
//! service's pending queue. The next poll builds one [`DeltaRecord`] from the
//! view's *current* state, however many mutations happened in between.
//!
//! # Locking
//!
//! Commands and drains take the listener's poll lock, then the view's lock.
//! Event callbacks run under the view's lock and touch only atomics and the
//! summary list, so they never wait on the poll lock.
//!
//! # Query results
//!
//! Filters and sorts requested by the client are applied on top of the
//! view's [`refinement_base`]: a query result stays the thing being
//! narrowed, while an ordinary live list is re-filtered from the root.

mod selection;
mod summary;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use horizon_datasource_core::{Observer, ObserverId, PerfSpan};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::event::{ChangeEvent, ChangeKind};
use crate::filter::{SharedFilter, build_filter};
use crate::getter::{Getter, LocaleContext, SharedGetter};
use crate::logging::targets;
use crate::service::{DeltaKind, DeltaRecord, DeltaRow, Handle, PendingQueue};
use crate::sort::Sorter;
use crate::view::{Item, SharedView, ViewCache, ViewRead, refinement_base};

pub use selection::{ClickModifiers, Selection, SelectionMode};
pub use summary::{AverageSummary, CountSummary, SumSummary, SummaryHandler};

/// Construction parameters of a viewport.
#[derive(Debug, Clone)]
pub struct ViewportOptions {
    /// Initial number of visible rows.
    pub window_size: usize,
    /// Upper bound for [`ViewportListener::resize`].
    pub max_window_size: usize,
    /// Selection behavior.
    pub selection_mode: SelectionMode,
    /// Attribute rendered in each column.
    pub columns: Vec<String>,
    /// Marker that turns a filter expression into a query reference.
    pub query_marker: char,
    /// Locale used to render cell text.
    pub locale: LocaleContext,
}

impl Default for ViewportOptions {
    fn default() -> Self {
        Self {
            window_size: 50,
            max_window_size: 1000,
            selection_mode: SelectionMode::default(),
            columns: Vec::new(),
            query_marker: '#',
            locale: LocaleContext::default(),
        }
    }
}

/// State guarded by the poll lock.
struct ViewportState<T> {
    view: SharedView<T>,
    observer: Option<ObserverId>,
    /// View that client filters and sorts are applied to.
    base: SharedView<T>,
    filter: Option<SharedFilter<T>>,
    sort: Option<Arc<Sorter<T>>>,
    columns: Vec<String>,
    /// Key of the first visible row at the last drain.
    anchor_key: Option<String>,
    selection: Selection,
}

/// Why a drain produced nothing.
enum Drain {
    Clean,
    Aborted { index: usize },
}

/// A client's window onto a reactive view.
pub struct ViewportListener<T: Item> {
    handle: Handle,
    getter: SharedGetter<T>,
    cache: Arc<ViewCache<T>>,
    queue: Arc<PendingQueue>,
    query_marker: char,
    max_window_size: usize,
    locale: LocaleContext,

    values_changed: AtomicBool,
    size_changed: AtomicBool,
    queued: AtomicBool,
    first_index: AtomicUsize,
    window_size: AtomicUsize,
    snap_to_bottom: AtomicBool,
    destroyed: AtomicBool,

    summaries: Mutex<Vec<(usize, Box<dyn SummaryHandler<T>>)>>,
    state: Mutex<ViewportState<T>>,
    this: Weak<Self>,
}

impl<T: Item> ViewportListener<T> {
    /// Creates a viewport on `view` and subscribes to it.
    ///
    /// The view is looked up again in `cache` and subscribed under the
    /// cache lock, so a view evicted before this call is replaced by a live
    /// one with the same key. The subscription snapshot marks the viewport
    /// dirty, so the first drain delivers the initial window.
    pub fn new(
        handle: Handle,
        view: SharedView<T>,
        cache: Arc<ViewCache<T>>,
        queue: Arc<PendingQueue>,
        options: ViewportOptions,
    ) -> Arc<Self> {
        let base = refinement_base(&view);
        let (filter, sort) = own_refinements(&view, &base);
        let window_size = options.window_size.clamp(1, options.max_window_size.max(1));
        let listener = Arc::new_cyclic(|this| Self {
            handle,
            getter: view.getter().clone(),
            cache,
            queue,
            query_marker: options.query_marker,
            max_window_size: options.max_window_size.max(1),
            locale: options.locale,
            values_changed: AtomicBool::new(false),
            size_changed: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            first_index: AtomicUsize::new(0),
            window_size: AtomicUsize::new(window_size),
            snap_to_bottom: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            summaries: Mutex::new(Vec::new()),
            state: Mutex::new(ViewportState {
                view: view.clone(),
                observer: None,
                base,
                filter,
                sort,
                columns: options.columns,
                anchor_key: None,
                selection: Selection::new(options.selection_mode),
            }),
            this: this.clone(),
        });
        {
            let mut state = listener.state.lock();
            let (current, id) = listener.cache.fetch_and_subscribe(
                &state.base,
                state.filter.clone(),
                state.sort.clone(),
                listener.observer(),
            );
            state.view = current;
            state.observer = Some(id);
        }
        debug!(
            target: targets::VIEWPORT,
            handle,
            view = %view.key(),
            window_size,
            "viewport created"
        );
        listener
    }

    fn observer(&self) -> Arc<ViewportObserver<T>> {
        Arc::new(ViewportObserver {
            listener: self.this.clone(),
        })
    }

    /// Returns the subscription handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Returns the view currently shown.
    pub fn view(&self) -> SharedView<T> {
        self.state.lock().view.clone()
    }

    /// Returns the first visible position as of the last drain or move.
    pub fn first_index(&self) -> usize {
        self.first_index.load(Ordering::Acquire)
    }

    /// Returns the number of visible rows.
    pub fn window_size(&self) -> usize {
        self.window_size.load(Ordering::Acquire)
    }

    /// Returns the selected keys.
    pub fn selected_keys(&self) -> Vec<String> {
        self.state.lock().selection.keys()
    }

    /// Returns `true` if a drain would produce a record.
    pub fn has_event(&self) -> bool {
        self.values_changed.load(Ordering::Acquire) || self.size_changed.load(Ordering::Acquire)
    }

    // =====================================================================
    // Dirty tracking
    // =====================================================================

    fn mark_dirty(&self, values: bool) {
        if values {
            self.values_changed.store(true, Ordering::Release);
        } else {
            self.size_changed.store(true, Ordering::Release);
        }
        if !self.queued.swap(true, Ordering::AcqRel) {
            trace!(target: targets::VIEWPORT, handle = self.handle, "viewport queued");
            self.queue.mark_ready(self.handle);
        }
    }

    /// Classifies a view event. Runs under the view's lock.
    fn on_view_event(&self, event: &ChangeEvent<T>) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let has_summaries = {
            let mut summaries = self.summaries.lock();
            for (_, handler) in summaries.iter_mut() {
                handler.on_event(event, &*self.getter);
            }
            !summaries.is_empty()
        };

        let first = self.first_index.load(Ordering::Acquire);
        let end = first.saturating_add(self.window_size.load(Ordering::Acquire));
        let snapped = self.snap_to_bottom.load(Ordering::Acquire);
        let index = event.index.unwrap_or_default();
        match event.kind {
            ChangeKind::Update if (first..end).contains(&index) => self.mark_dirty(true),
            ChangeKind::Update if has_summaries => self.mark_dirty(false),
            ChangeKind::Update => {}
            ChangeKind::Add | ChangeKind::Remove => self.mark_dirty(snapped || index < end),
            ChangeKind::Clear | ChangeKind::Snapshot | ChangeKind::Destroy => {
                self.mark_dirty(true)
            }
        }
    }

    // =====================================================================
    // Drain
    // =====================================================================

    /// Builds the pending delta, clearing the dirty flags.
    ///
    /// Returns `None` when nothing changed since the last drain. If a row of
    /// the window cannot be read, the drain is abandoned, the listener stays
    /// dirty and is queued again, so the next poll retries.
    pub fn get_event(&self) -> Option<DeltaRecord> {
        let _perf = PerfSpan::new("viewport_drain");
        let mut state = self.state.lock();
        if self.destroyed.load(Ordering::Acquire) {
            return None;
        }
        let view = state.view.clone();
        let mut outcome = Err(Drain::Clean);
        view.read_locked(&mut |rows| outcome = self.build(&mut state, rows));

        match outcome {
            Ok(record) => {
                debug!(
                    target: targets::VIEWPORT,
                    handle = self.handle,
                    rows = record.rows.len(),
                    total = ?record.total_size,
                    "viewport drained"
                );
                Some(record)
            }
            Err(Drain::Clean) => None,
            Err(Drain::Aborted { index }) => {
                warn!(
                    target: targets::VIEWPORT,
                    handle = self.handle,
                    index,
                    "row vanished during drain; retrying next poll"
                );
                self.mark_dirty(true);
                None
            }
        }
    }

    /// Runs under both the poll lock and the view's lock, so no event can
    /// interleave between reading the flags and reading the rows.
    fn build(
        &self,
        state: &mut ViewportState<T>,
        rows: &dyn ViewRead<T>,
    ) -> std::result::Result<DeltaRecord, Drain> {
        let values = self.values_changed.swap(false, Ordering::AcqRel);
        let size = self.size_changed.swap(false, Ordering::AcqRel);
        self.queued.store(false, Ordering::Release);
        if !values && !size {
            return Err(Drain::Clean);
        }

        let total = rows.len();
        let window = self.window_size.load(Ordering::Acquire);
        let last_first = total.saturating_sub(window);
        let first = if self.snap_to_bottom.load(Ordering::Acquire) {
            last_first
        } else {
            state
                .anchor_key
                .as_deref()
                .and_then(|key| rows.index_of(key))
                .unwrap_or_else(|| self.first_index.load(Ordering::Acquire))
                .min(last_first)
        };
        self.first_index.store(first, Ordering::Release);
        state.anchor_key = rows.get_index(first).map(|item| self.getter.key(item));
        state.selection.retain(|key| rows.get(key).is_some());

        let mut record = DeltaRecord::new(DeltaKind::Viewport, self.handle).with_total_size(total);
        record.first_index = Some(first);
        record.selection = Some(state.selection.keys());
        record.summaries = self
            .summaries
            .lock()
            .iter()
            .map(|(column, handler)| (*column, handler.text()))
            .collect();

        if values {
            let end = first.saturating_add(window).min(total);
            let mut window_rows = Vec::with_capacity(end - first);
            for index in first..end {
                let item = rows.get_index(index).ok_or(Drain::Aborted { index })?;
                let mut row = DeltaRow::render(
                    &*self.getter,
                    item,
                    Some(index),
                    &state.columns,
                    &self.locale,
                );
                row.selected = state.selection.is_selected(&row.key);
                window_rows.push(row);
            }
            record = record.with_rows(window_rows);
        }
        Ok(record)
    }

    // =====================================================================
    // Commands
    // =====================================================================

    /// Scrolls so that `index` is the first visible row.
    pub fn move_to(&self, index: usize) {
        let mut state = self.state.lock();
        state.anchor_key = None;
        self.snap_to_bottom.store(false, Ordering::Release);
        self.first_index.store(index, Ordering::Release);
        self.mark_dirty(true);
    }

    /// Pins the window to the end of the view, following appended rows.
    pub fn set_snap_to_bottom(&self, snap: bool) {
        let _state = self.state.lock();
        if self.snap_to_bottom.swap(snap, Ordering::AcqRel) != snap {
            self.mark_dirty(true);
        }
    }

    /// Changes the number of visible rows, clamped to `1..=max`.
    pub fn resize(&self, window_size: usize) {
        let _state = self.state.lock();
        let window_size = window_size.clamp(1, self.max_window_size);
        if self.window_size.swap(window_size, Ordering::AcqRel) != window_size {
            self.mark_dirty(true);
        }
    }

    /// Applies a click on the row with `key`.
    pub fn click(&self, key: &str, modifiers: ClickModifiers) {
        self.edit_selection(|selection, rows, getter| {
            selection.click(key, modifiers, rows, getter)
        });
    }

    /// Selects every row (multi-selection only).
    pub fn select_all(&self) {
        self.edit_selection(|selection, rows, getter| selection.select_all(rows, getter));
    }

    /// Deselects everything.
    pub fn clear_selection(&self) {
        self.edit_selection(|selection, _, _| selection.clear());
    }

    fn edit_selection<F>(&self, mut edit: F)
    where
        F: FnMut(&mut Selection, &dyn ViewRead<T>, &dyn Getter<T>) -> bool,
    {
        let mut state = self.state.lock();
        let view = state.view.clone();
        let mut changed = false;
        view.read_locked(&mut |rows| {
            changed = edit(&mut state.selection, rows, &*self.getter);
        });
        if changed {
            self.mark_dirty(true);
        }
    }

    /// Sets the columns rendered in each row.
    pub fn set_columns(&self, columns: Vec<String>) {
        let mut state = self.state.lock();
        state.columns = columns;
        self.mark_dirty(true);
    }

    /// Re-sorts the viewport. An empty spec removes the sort.
    ///
    /// # Errors
    ///
    /// Returns the parse error of `spec`; the viewport is left unchanged.
    pub fn set_sort(&self, spec: &str) -> Result<()> {
        let sort = Sorter::parse(spec, &self.getter)?.map(Arc::new);
        let mut state = self.state.lock();
        state.sort = sort;
        self.switch_view(&mut state);
        Ok(())
    }

    /// Re-filters the viewport. An empty expression removes the filter.
    ///
    /// A query reference switches to that query's result; any other
    /// expression narrows the current base.
    ///
    /// # Errors
    ///
    /// Returns the parse error of `expression`; the viewport is left
    /// unchanged.
    pub fn set_filter(&self, expression: &str) -> Result<()> {
        let filter = build_filter(expression, self.query_marker, &self.getter)?;
        let mut state = self.state.lock();
        match filter {
            Some(query) if query.is_request_filter() => {
                let root = unqueried(&state.base);
                state.base = self.cache.fetch_or_create(&root, Some(query), None);
                state.filter = None;
            }
            filter => state.filter = filter,
        }
        self.switch_view(&mut state);
        Ok(())
    }

    /// Moves the subscription to the view for the current base, filter and
    /// sort.
    fn switch_view(&self, state: &mut ViewportState<T>) {
        let next = self
            .cache
            .fetch_or_create(&state.base, state.filter.clone(), state.sort.clone());
        // Still observed by us, so it cannot have been evicted.
        if Arc::ptr_eq(&next, &state.view) {
            return;
        }
        if let Some(id) = state.observer.take() {
            state.view.unsubscribe(id);
        }
        let (next, id) = self.cache.fetch_and_subscribe(
            &state.base,
            state.filter.clone(),
            state.sort.clone(),
            self.observer(),
        );
        debug!(
            target: targets::VIEWPORT,
            handle = self.handle,
            from = %state.view.key(),
            to = %next.key(),
            "viewport switched view"
        );
        state.view = next;
        state.observer = Some(id);
    }

    /// Installs a summary for `column`, seeded with the current contents.
    pub fn add_summary(&self, column: usize, handler: Box<dyn SummaryHandler<T>>) {
        let state = self.state.lock();
        let mut handler = Some(handler);
        // Seed and install under the view's lock so no event is missed.
        state.view.read_locked(&mut |rows| {
            if let Some(mut handler) = handler.take() {
                handler.on_event(&ChangeEvent::snapshot(rows.to_vec()), &*self.getter);
                self.summaries.lock().push((column, handler));
            }
        });
        self.mark_dirty(true);
    }

    /// Unsubscribes from the view and drops anything queued. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        if let Some(id) = state.observer.take() {
            state.view.unsubscribe(id);
        }
        self.summaries.lock().clear();
        self.queue.forget(self.handle);
        debug!(target: targets::VIEWPORT, handle = self.handle, "viewport destroyed");
    }

    /// Returns `true` once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl<T: Item> Drop for ViewportListener<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Splits the refinements between `base` and `view` into the client filter
/// and sort.
fn own_refinements<T: Item>(
    view: &SharedView<T>,
    base: &SharedView<T>,
) -> (Option<SharedFilter<T>>, Option<Arc<Sorter<T>>>) {
    let mut filter = None;
    let mut sort = None;
    let mut current = view.clone();
    while !Arc::ptr_eq(&current, base) {
        if sort.is_none() {
            sort = current.sort().cloned();
        }
        if filter.is_none() {
            filter = current.filter().cloned();
        }
        match current.source().cloned() {
            Some(source) => current = source,
            None => break,
        }
    }
    (filter, sort)
}

/// The list a query result was taken from.
fn unqueried<T: Item>(base: &SharedView<T>) -> SharedView<T> {
    match base.source() {
        Some(source) if base.is_query_result() => source.clone(),
        _ => base.clone(),
    }
}

/// Forwards view events to a viewport without keeping it alive.
struct ViewportObserver<T: Item> {
    listener: Weak<ViewportListener<T>>,
}

impl<T: Item> Observer<ChangeEvent<T>> for ViewportObserver<T> {
    fn on_event(&self, event: &ChangeEvent<T>) {
        if let Some(listener) = self.listener.upgrade() {
            listener.on_view_event(event);
        }
    }
}
