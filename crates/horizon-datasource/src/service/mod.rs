//! The per-session data source service.
//!
//! A [`DataSourceService`] owns one session's subscriptions. Sources and the
//! cache of derived views live in a [`SourceRegistry`] shared by all
//! sessions, so two sessions asking for the same `(source, filter, sort)`
//! share one view.
//!
//! Outbound traffic is pull-based: listeners push records (or, for
//! viewports, a "ready" mark) into the session's [`PendingQueue`], and the
//! transport calls [`DataSourceService::drain_pending`] to collect them.

mod delta;
mod listener;
mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use horizon_datasource_core::{ObserverId, PerfSpan};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::DataSourceConfig;
use crate::error::{Error, Result};
use crate::filter::{SharedFilter, build_filter};
use crate::logging::targets;
use crate::sort::Sorter;
use crate::view::{Item, SharedView};
use crate::viewport::{ClickModifiers, SelectionMode, ViewportListener, ViewportOptions};

pub use delta::{DeltaKind, DeltaRecord, DeltaRow, Handle, PendingQueue, Segment};
pub use listener::{ListListener, ListMode};
pub use registry::{SourceRegistry, TreeControl};

// ============================================================================
// Requests
// ============================================================================

/// Kind of listener a subscription creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    /// Every change, full rows.
    #[default]
    List,
    /// Every change, updates reduced to the columns that changed.
    AttributeDiff,
    /// A coalesced, windowed view.
    Viewport,
}

/// Parameters of [`DataSourceService::subscribe`].
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SubscribeRequest {
    /// Listener kind.
    pub kind: ListenerKind,
    /// Data source id or type name.
    pub source: String,
    /// Filter expression or query reference; empty for none.
    pub filter: String,
    /// Sort specification; empty for none.
    pub sort: String,
    /// Attribute shown in each column.
    pub columns: Vec<String>,
    /// Viewport window size; the configured default when absent.
    pub window_size: Option<usize>,
    /// Viewport selection mode.
    pub selection_mode: SelectionMode,
}

impl SubscribeRequest {
    /// A request for `kind` on `source` with no filter or sort.
    pub fn new(kind: ListenerKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            ..Self::default()
        }
    }

    /// Sets the filter expression.
    pub fn filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = expression.into();
        self
    }

    /// Sets the sort specification.
    pub fn sort(mut self, spec: impl Into<String>) -> Self {
        self.sort = spec.into();
        self
    }

    /// Sets the columns.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the viewport window size.
    pub fn window_size(mut self, rows: usize) -> Self {
        self.window_size = Some(rows);
        self
    }

    /// Sets the viewport selection mode.
    pub fn selection_mode(mut self, mode: SelectionMode) -> Self {
        self.selection_mode = mode;
        self
    }
}

/// A command routed to a viewport subscription.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ViewportCommand {
    /// Scroll so `index` is the first visible row.
    MoveTo { index: usize },
    /// Change the number of visible rows.
    Resize { window_size: usize },
    /// Keep the window at the end of the list.
    SnapToBottom { enabled: bool },
    /// Click on a row.
    Click {
        key: String,
        #[serde(default)]
        modifiers: ClickModifiers,
    },
    /// Select every row.
    SelectAll,
    /// Deselect every row.
    ClearSelection,
    /// Re-sort; empty removes the sort.
    SetSort { spec: String },
    /// Re-filter; empty removes the filter.
    SetFilter { expression: String },
    /// Change the columns.
    SetColumns { columns: Vec<String> },
    /// Expand or collapse a group of the grouping tree behind the viewport.
    Expand { path: String, expanded: bool },
}

// ============================================================================
// Service
// ============================================================================

/// A source with the parsed filter and sort of a request.
type Refinement<T> = (SharedView<T>, Option<SharedFilter<T>>, Option<Arc<Sorter<T>>>);

enum Subscription<T: Item> {
    List {
        view: SharedView<T>,
        observer: ObserverId,
    },
    Viewport {
        listener: Arc<ViewportListener<T>>,
        source: String,
    },
}

impl<T: Item> Subscription<T> {
    fn teardown(self, queue: &PendingQueue, handle: Handle) {
        match self {
            Self::List { view, observer } => {
                view.unsubscribe(observer);
                queue.forget(handle);
            }
            Self::Viewport { listener, .. } => listener.destroy(),
        }
    }
}

/// One session's subscriptions over a shared [`SourceRegistry`].
pub struct DataSourceService<T: Item> {
    registry: Arc<SourceRegistry<T>>,
    config: DataSourceConfig,
    queue: Arc<PendingQueue>,
    subscriptions: Mutex<HashMap<Handle, Subscription<T>>>,
}

impl<T: Item> DataSourceService<T> {
    /// Creates a session over `registry`.
    pub fn new(registry: Arc<SourceRegistry<T>>, config: DataSourceConfig) -> Self {
        Self {
            registry,
            config,
            queue: Arc::new(PendingQueue::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shared registry.
    pub fn registry(&self) -> &Arc<SourceRegistry<T>> {
        &self.registry
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    /// Returns the view of source `id` restricted by `filter` and ordered by
    /// `sort`, creating it if needed. `id` may be a type name.
    ///
    /// Returns `Ok(None)` if no such source is registered.
    ///
    /// # Errors
    ///
    /// Returns the parse error of `filter` or `sort`.
    pub fn resolve_view(&self, id: &str, filter: &str, sort: &str) -> Result<Option<SharedView<T>>> {
        let Some((source, filter, sort)) = self.resolve_request(id, filter, sort)? else {
            return Ok(None);
        };
        Ok(Some(self.registry.cache().fetch_or_create(&source, filter, sort)))
    }

    /// Looks up source `id` and parses `filter` and `sort` against its
    /// getter.
    fn resolve_request(&self, id: &str, filter: &str, sort: &str) -> Result<Option<Refinement<T>>> {
        let Some(source) = self.registry.source(id) else {
            return Ok(None);
        };
        let getter = source.getter().clone();
        let filter = build_filter(filter, self.config.query_marker, &getter)?;
        let sort = Sorter::parse(sort, &getter)?.map(Arc::new);
        Ok(Some((source, filter, sort)))
    }

    /// Loads `items` as the result of query `reference` on source `id`.
    ///
    /// Returns `Ok(false)` if no such source is registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFilter`] if `reference` is not a query
    /// reference.
    pub fn publish_query(&self, id: &str, reference: &str, items: Vec<T>) -> Result<bool> {
        if !reference.trim().starts_with(self.config.query_marker) {
            return Err(Error::invalid_filter(reference, "not a query reference"));
        }
        let Some(view) = self.resolve_view(id, reference, "")? else {
            return Ok(false);
        };
        debug!(
            target: targets::SERVICE,
            view = %view.key(),
            items = items.len(),
            "query result published"
        );
        view.snapshot(items);
        Ok(true)
    }

    /// Subscribes `handle` as described by `request`.
    ///
    /// Returns `Ok(false)` if the source is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleInUse`] if `handle` is taken, or the parse
    /// error of the request's filter or sort.
    pub fn subscribe(&self, handle: Handle, request: SubscribeRequest) -> Result<bool> {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains_key(&handle) {
            return Err(Error::HandleInUse { handle });
        }
        let Some((source, filter, sort)) =
            self.resolve_request(&request.source, &request.filter, &request.sort)?
        else {
            return Ok(false);
        };

        let (view, subscription) = match request.kind {
            ListenerKind::List | ListenerKind::AttributeDiff => {
                let mode = if request.kind == ListenerKind::AttributeDiff {
                    ListMode::AttributeDiff
                } else {
                    ListMode::Full
                };
                let listener = Arc::new(ListListener::new(
                    handle,
                    source.getter().clone(),
                    request.columns,
                    self.config.snapshot_segment_size,
                    mode,
                    self.queue.clone(),
                ));
                let (view, observer) =
                    self.registry.cache().fetch_and_subscribe(&source, filter, sort, listener);
                (view.clone(), Subscription::List { view, observer })
            }
            ListenerKind::Viewport => {
                let options = ViewportOptions {
                    window_size: request.window_size.unwrap_or(self.config.default_window_size),
                    max_window_size: self.config.max_window_size,
                    selection_mode: request.selection_mode,
                    columns: request.columns,
                    query_marker: self.config.query_marker,
                    ..ViewportOptions::default()
                };
                let view = self.registry.cache().fetch_or_create(&source, filter, sort);
                let listener = ViewportListener::new(
                    handle,
                    view,
                    self.registry.cache().clone(),
                    self.queue.clone(),
                    options,
                );
                (
                    listener.view(),
                    Subscription::Viewport {
                        listener,
                        source: request.source,
                    },
                )
            }
        };
        debug!(
            target: targets::SERVICE,
            handle,
            kind = ?request.kind,
            view = %view.key(),
            "subscribed"
        );
        subscriptions.insert(handle, subscription);
        Ok(true)
    }

    /// Removes and tears down the subscription `handle`.
    pub fn unsubscribe(&self, handle: Handle) -> bool {
        let removed = self.subscriptions.lock().remove(&handle);
        match removed {
            Some(subscription) => {
                subscription.teardown(&self.queue, handle);
                debug!(target: targets::SERVICE, handle, "unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Routes `command` to the viewport `handle`.
    ///
    /// Returns `Ok(false)` for an unknown handle or a tree command that
    /// changed nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotAViewport`] if `handle` is not a viewport,
    /// [`Error::NotATree`] for a tree command on a source that is not a
    /// grouping tree, or the parse error of a sort or filter.
    pub fn command(&self, handle: Handle, command: ViewportCommand) -> Result<bool> {
        let (viewport, source) = match self.subscriptions.lock().get(&handle) {
            Some(Subscription::Viewport { listener, source }) => (listener.clone(), source.clone()),
            Some(Subscription::List { .. }) => return Err(Error::NotAViewport { handle }),
            None => {
                warn!(target: targets::SERVICE, handle, "command for unknown handle");
                return Ok(false);
            }
        };
        match command {
            ViewportCommand::MoveTo { index } => viewport.move_to(index),
            ViewportCommand::Resize { window_size } => viewport.resize(window_size),
            ViewportCommand::SnapToBottom { enabled } => viewport.set_snap_to_bottom(enabled),
            ViewportCommand::Click { key, modifiers } => viewport.click(&key, modifiers),
            ViewportCommand::SelectAll => viewport.select_all(),
            ViewportCommand::ClearSelection => viewport.clear_selection(),
            ViewportCommand::SetSort { spec } => viewport.set_sort(&spec)?,
            ViewportCommand::SetFilter { expression } => viewport.set_filter(&expression)?,
            ViewportCommand::SetColumns { columns } => viewport.set_columns(columns),
            ViewportCommand::Expand { path, expanded } => {
                let tree = self
                    .registry
                    .tree(&source)
                    .ok_or_else(|| Error::NotATree { id: source.clone() })?;
                return Ok(tree.set_expanded(&path, expanded));
            }
        }
        Ok(true)
    }

    /// Returns the viewport listener of `handle`.
    pub fn viewport(&self, handle: Handle) -> Option<Arc<ViewportListener<T>>> {
        match self.subscriptions.lock().get(&handle) {
            Some(Subscription::Viewport { listener, .. }) => Some(listener.clone()),
            _ => None,
        }
    }

    /// Collects everything queued since the last drain.
    ///
    /// Records pushed by list listeners come first, in push order, followed
    /// by one record per ready viewport.
    pub fn drain_pending(&self) -> Vec<DeltaRecord> {
        let _perf = PerfSpan::new("drain_pending");
        let (mut records, ready) = self.queue.take();
        let viewports: Vec<_> = {
            let subscriptions = self.subscriptions.lock();
            ready
                .iter()
                .filter_map(|handle| match subscriptions.get(handle) {
                    Some(Subscription::Viewport { listener, .. }) => Some(listener.clone()),
                    _ => None,
                })
                .collect()
        };
        let pushed = records.len();
        records.extend(viewports.iter().filter_map(|viewport| viewport.get_event()));
        if !records.is_empty() {
            debug!(
                target: targets::SERVICE,
                pushed,
                viewports = records.len() - pushed,
                "pending drained"
            );
        }
        records
    }

    /// Evicts cached views idle for longer than the configured time.
    pub fn evict_idle(&self) -> usize {
        self.registry.evict_idle(self.config.idle_eviction())
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Tears down every subscription.
    pub fn shutdown(&self) {
        let subscriptions: Vec<_> = self.subscriptions.lock().drain().collect();
        if subscriptions.is_empty() {
            return;
        }
        debug!(target: targets::SERVICE, count = subscriptions.len(), "session shut down");
        for (handle, subscription) in subscriptions {
            subscription.teardown(&self.queue, handle);
        }
    }
}

impl<T: Item> Drop for DataSourceService<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Item> fmt::Debug for DataSourceService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceService")
            .field("config", &self.config)
            .field("subscriptions", &self.listener_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::getter::{AttributeRegistry, SharedGetter};
    use crate::view::{KeyedList, ReactiveView};

    #[derive(Debug, Clone)]
    struct Order {
        id: u32,
        status: &'static str,
        qty: i64,
    }

    fn order(id: u32, status: &'static str, qty: i64) -> Order {
        Order { id, status, qty }
    }

    fn getter() -> SharedGetter<Order> {
        Arc::new(
            AttributeRegistry::new(|o: &Order| format!("{:03}", o.id))
                .attribute("status", |o: &Order| o.status)
                .attribute("qty", |o: &Order| o.qty),
        )
    }

    fn setup() -> (Arc<KeyedList<Order>>, DataSourceService<Order>) {
        let list = KeyedList::new("orders", getter());
        list.add(order(1, "open", 5));
        list.add(order(2, "done", 1));
        let registry = Arc::new(SourceRegistry::new());
        registry.register("orders", "Order", list.clone());
        (list, DataSourceService::new(registry, DataSourceConfig::default()))
    }

    #[test]
    fn test_resolve_view() {
        let (_list, service) = setup();
        let view = service.resolve_view("Order", "status=open", "-qty").unwrap().unwrap();
        assert_eq!(view.key().as_str(), "orders|status=open|-qty");
        assert_eq!(view.len(), 1);
        assert!(service.resolve_view("nothing", "", "").unwrap().is_none());
        assert!(service.resolve_view("orders", "nope=1", "").is_err());
    }

    #[test]
    fn test_list_subscription_forwards_changes() {
        let (list, service) = setup();
        let request = SubscribeRequest::new(ListenerKind::List, "orders").columns(["qty"]);
        assert!(service.subscribe(1, request.clone()).unwrap());
        assert!(matches!(
            service.subscribe(1, request),
            Err(Error::HandleInUse { handle: 1 })
        ));

        list.add(order(3, "open", 2));
        let records = service.drain_pending();
        let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![DeltaKind::Snapshot, DeltaKind::Add]);
        assert_eq!(records[1].keys, vec!["003"]);

        assert!(service.unsubscribe(1));
        assert!(!service.unsubscribe(1));
        list.add(order(4, "open", 2));
        assert!(service.drain_pending().is_empty());
    }

    #[test]
    fn test_unknown_source_is_not_an_error() {
        let (_list, service) = setup();
        let request = SubscribeRequest::new(ListenerKind::Viewport, "missing");
        assert!(!service.subscribe(1, request).unwrap());
        assert_eq!(service.listener_count(), 0);
    }

    #[test]
    fn test_viewport_commands() {
        let (list, service) = setup();
        let request = SubscribeRequest::new(ListenerKind::Viewport, "orders")
            .columns(["status"])
            .window_size(10);
        service.subscribe(5, request).unwrap();
        assert_eq!(service.drain_pending().len(), 1);

        assert!(service
            .command(5, ViewportCommand::SetSort { spec: "-qty".into() })
            .unwrap());
        let records = service.drain_pending();
        assert_eq!(records[0].keys, vec!["001", "002"]);

        list.add(order(3, "open", 9));
        let records = service.drain_pending();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].keys, vec!["003", "001", "002"]);

        assert!(!service.command(99, ViewportCommand::SelectAll).unwrap());
        assert!(matches!(
            service.command(5, ViewportCommand::Expand { path: "/x".into(), expanded: true }),
            Err(Error::NotATree { .. })
        ));
    }

    #[test]
    fn test_command_on_list_is_rejected() {
        let (_list, service) = setup();
        service
            .subscribe(2, SubscribeRequest::new(ListenerKind::AttributeDiff, "orders"))
            .unwrap();
        assert!(matches!(
            service.command(2, ViewportCommand::SelectAll),
            Err(Error::NotAViewport { handle: 2 })
        ));
    }

    #[test]
    fn test_publish_query() {
        let (_list, service) = setup();
        assert!(service.publish_query("orders", "#mine", vec![order(7, "open", 1)]).unwrap());
        let view = service.resolve_view("orders", "#mine", "").unwrap().unwrap();
        assert!(view.is_query_result());
        assert_eq!(view.items().len(), 1);
        assert!(service.publish_query("orders", "status=open", Vec::new()).is_err());
        assert!(!service.publish_query("missing", "#mine", Vec::new()).unwrap());
    }

    #[test]
    fn test_shutdown_releases_views() {
        let (list, service) = setup();
        service
            .subscribe(1, SubscribeRequest::new(ListenerKind::List, "orders"))
            .unwrap();
        service
            .subscribe(2, SubscribeRequest::new(ListenerKind::Viewport, "orders"))
            .unwrap();
        assert_eq!(list.observer_count(), 2);
        drop(service);
        assert_eq!(list.observer_count(), 0);
    }

    #[test]
    fn test_command_deserializes() {
        let command: ViewportCommand =
            serde_json::from_str(r#"{"command":"click","key":"001","modifiers":{"shift":true}}"#)
                .unwrap();
        assert_eq!(
            command,
            ViewportCommand::Click {
                key: "001".into(),
                modifiers: ClickModifiers::SHIFT
            }
        );
        let request: SubscribeRequest =
            serde_json::from_str(r#"{"kind":"viewport","source":"orders","window_size":20}"#).unwrap();
        assert_eq!(request.kind, ListenerKind::Viewport);
        assert_eq!(request.window_size, Some(20));
    }
}
