//! Viewport drains over a view whose rows can go missing mid-read.

use std::sync::Arc;

use horizon_datasource::prelude::*;
use horizon_datasource::service::PendingQueue;
use horizon_datasource::view::{SharedObserver, ViewCore, ViewRead};
use horizon_datasource::{ObserverId, ViewCache, ViewportListener, ViewportOptions};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn getter() -> SharedGetter<String> {
    Arc::new(AttributeRegistry::new(|s: &String| s.clone()).attribute("name", |s: &String| s.clone()))
}

/// Rows plus the length the view reports, which may run ahead of them.
struct Rows {
    items: Vec<String>,
    claimed: usize,
}

impl ViewRead<String> for Rows {
    fn len(&self) -> usize {
        self.claimed
    }

    fn get_index(&self, index: usize) -> Option<&String> {
        self.items.get(index)
    }

    fn get(&self, key: &str) -> Option<&String> {
        self.items.iter().find(|item| item.as_str() == key)
    }

    fn index_of(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|item| item == key)
    }

    fn iter_from(&self, start: usize) -> Box<dyn Iterator<Item = &String> + '_> {
        Box::new(self.items.iter().skip(start))
    }
}

/// A root view that claims more rows than it can hand out until settled.
struct LaggingView {
    core: ViewCore<String>,
    rows: Mutex<Rows>,
}

impl LaggingView {
    fn new(items: &[&str], claimed: usize) -> Arc<Self> {
        Arc::new(Self {
            core: ViewCore::root("lagging", getter()),
            rows: Mutex::new(Rows {
                items: items.iter().map(|s| s.to_string()).collect(),
                claimed,
            }),
        })
    }

    fn settle(&self) {
        let mut rows = self.rows.lock();
        rows.claimed = rows.items.len();
    }
}

impl ReactiveView<String> for LaggingView {
    fn core(&self) -> &ViewCore<String> {
        &self.core
    }

    fn read_locked(&self, f: &mut dyn FnMut(&dyn ViewRead<String>)) {
        let rows = self.rows.lock();
        f(&*rows);
    }

    fn subscribe(&self, observer: SharedObserver<String>) -> ObserverId {
        let rows = self.rows.lock();
        let id = self.core.observers().add(observer);
        self.core
            .observers()
            .notify_one(id, &ChangeEvent::snapshot(rows.items.clone()));
        id
    }

    fn snapshot(&self, items: Vec<String>) {
        let mut rows = self.rows.lock();
        rows.claimed = items.len();
        rows.items = items;
        self.core
            .observers()
            .notify(&ChangeEvent::snapshot(rows.items.clone()));
    }

    fn destroy(&self) {
        self.core.observers().notify(&ChangeEvent::destroy());
        self.core.observers().clear();
    }
}

#[test]
fn test_aborted_drain_retries_on_next_poll() {
    init_tracing();
    let view = LaggingView::new(&["a", "b"], 3);
    let queue = Arc::new(PendingQueue::new());
    let viewport = ViewportListener::new(
        1,
        view.clone(),
        Arc::new(ViewCache::new()),
        queue.clone(),
        ViewportOptions {
            columns: vec!["name".to_string()],
            ..ViewportOptions::default()
        },
    );
    assert_eq!(queue.ready_len(), 1);
    queue.take();

    // Row 2 is missing: nothing is delivered and the viewport stays dirty.
    assert!(viewport.get_event().is_none());
    assert!(viewport.has_event());
    assert_eq!(queue.ready_len(), 1);

    view.settle();
    let record = viewport.get_event().unwrap();
    assert_eq!(record.total_size, Some(2));
    assert_eq!(record.keys, vec!["a", "b"]);
    assert!(!viewport.has_event());
    assert!(viewport.get_event().is_none());
}

#[test]
fn test_service_keeps_polling_an_aborted_viewport() {
    init_tracing();
    let view = LaggingView::new(&["a"], 2);
    let registry = Arc::new(SourceRegistry::new());
    registry.register("lagging", "Lagging", view.clone());
    let service = DataSourceService::new(registry, DataSourceConfig::default());
    service
        .subscribe(4, SubscribeRequest::new(ListenerKind::Viewport, "lagging"))
        .unwrap();

    assert!(service.drain_pending().is_empty());
    assert!(service.drain_pending().is_empty());
    assert!(service.viewport(4).unwrap().has_event());

    view.settle();
    let records = service.drain_pending();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].keys, vec!["a"]);
    assert!(service.drain_pending().is_empty());
}
