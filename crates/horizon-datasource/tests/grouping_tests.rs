//! Grouping trees and group counts served to clients.

use std::sync::Arc;

use horizon_datasource::prelude::*;
use horizon_datasource::{Error, GroupByCounter, GroupRecord};

#[derive(Debug, Clone)]
struct Task {
    id: u32,
    status: &'static str,
    owner: &'static str,
}

fn task(id: u32, status: &'static str, owner: &'static str) -> Task {
    Task { id, status, owner }
}

fn getter() -> SharedGetter<Task> {
    Arc::new(
        AttributeRegistry::new(|t: &Task| t.id.to_string())
            .attribute("status", |t: &Task| t.status)
            .attribute("owner", |t: &Task| t.owner),
    )
}

fn paths(record: &DeltaRecord) -> Vec<&str> {
    record
        .rows
        .iter()
        .filter_map(|row| row.values.get(&0).map(String::as_str))
        .collect()
}

struct Board {
    tasks: Arc<KeyedList<Task>>,
    tree: Arc<GroupingTree<Task>>,
    service: DataSourceService<TreeRow<Task>>,
}

fn board() -> Board {
    let tasks = KeyedList::new("tasks", getter());
    tasks.add(task(1, "open", "ann"));
    tasks.add(task(2, "open", "bob"));
    tasks.add(task(3, "done", "ann"));

    let levels = vec![
        GroupLevel::new("status", |t: &Task| t.status.to_string())
            .with_records([GroupRecord::new("open", "Open"), GroupRecord::new("done", "Done")]),
    ];
    let tree = GroupingTree::new("task_tree", getter(), levels, false);
    let source: SharedView<Task> = tasks.clone();
    tree.attach(&source);

    let registry = Arc::new(SourceRegistry::new());
    registry.register_tree("TaskTree", tree.clone());
    let service = DataSourceService::new(registry, DataSourceConfig::default());
    service
        .subscribe(
            1,
            SubscribeRequest::new(ListenerKind::Viewport, "TaskTree").columns(["path", "group"]),
        )
        .unwrap();
    Board {
        tasks,
        tree,
        service,
    }
}

#[test]
fn test_expand_through_viewport() {
    let board = board();
    let records = board.service.drain_pending();
    assert_eq!(paths(&records[0]), vec!["/done", "/open"]);
    assert_eq!(records[0].rows[1].values.get(&1).map(String::as_str), Some("Open"));
    assert_eq!(records[0].rows[1].state.as_deref(), Some("collapsed"));

    let expand = ViewportCommand::Expand {
        path: "/open".into(),
        expanded: true,
    };
    assert!(board.service.command(1, expand.clone()).unwrap());
    assert!(!board.service.command(1, expand).unwrap());

    let records = board.service.drain_pending();
    assert_eq!(records.len(), 1);
    assert_eq!(paths(&records[0]), vec!["/done", "/open", "/open/1", "/open/2"]);
    assert_eq!(records[0].rows[1].state.as_deref(), Some("expanded"));
}

#[test]
fn test_empty_groups_prune_themselves() {
    let board = board();
    board
        .service
        .command(
            1,
            ViewportCommand::Expand {
                path: "/open".into(),
                expanded: true,
            },
        )
        .unwrap();
    board.service.drain_pending();

    board.tasks.remove_key("3");
    let records = board.service.drain_pending();
    assert_eq!(paths(&records[0]), vec!["/open", "/open/1", "/open/2"]);
    assert!(!board.tree.contains_path("/done"));
    assert!(
        !board
            .service
            .command(
                1,
                ViewportCommand::Expand {
                    path: "/done".into(),
                    expanded: true,
                },
            )
            .unwrap()
    );

    // Moving a task re-creates its group, collapsed by default.
    board.tasks.update(task(1, "done", "ann"));
    let records = board.service.drain_pending();
    assert_eq!(paths(&records[0]), vec!["/done", "/open", "/open/2"]);
    assert_eq!(board.tree.is_expanded("/done"), Some(false));
}

#[test]
fn test_expand_requires_a_tree() {
    let tasks = KeyedList::new("tasks", getter());
    let registry = Arc::new(SourceRegistry::new());
    registry.register("tasks", "Task", tasks);
    let service = DataSourceService::new(registry, DataSourceConfig::default());
    service
        .subscribe(1, SubscribeRequest::new(ListenerKind::Viewport, "tasks"))
        .unwrap();

    let result = service.command(
        1,
        ViewportCommand::Expand {
            path: "/open".into(),
            expanded: true,
        },
    );
    assert!(matches!(result, Err(Error::NotATree { .. })));
}

#[test]
fn test_group_counts_follow_source() {
    let tasks = KeyedList::new("tasks", getter());
    tasks.add(task(1, "open", "ann"));
    tasks.add(task(2, "open", "bob"));
    let counter = Arc::new(
        GroupByCounter::new("by_owner", getter(), |t: &Task| t.owner.to_string())
            .with_text(|t: &Task| t.owner.to_uppercase()),
    );
    let source: SharedView<Task> = tasks.clone();
    counter.attach(&source);
    assert_eq!(counter.count_of("ann"), 1);
    assert_eq!(counter.count_of("bob"), 1);

    tasks.add(task(3, "done", "ann"));
    tasks.update(task(2, "open", "ann"));
    assert_eq!(counter.count_of("ann"), 3);
    assert_eq!(counter.count_of("bob"), 0);
    assert!(counter.counts().get("bob").is_none());
    assert_eq!(counter.counts().get("ann").map(|g| g.text), Some("ANN".to_string()));

    // The counts list is itself a view and can be served.
    let registry = Arc::new(SourceRegistry::new());
    registry.register("owners", "OwnerCount", counter.counts().clone());
    let service = DataSourceService::new(registry, DataSourceConfig::default());
    service
        .subscribe(
            5,
            SubscribeRequest::new(ListenerKind::Viewport, "owners")
                .sort("-count")
                .columns(["count"]),
        )
        .unwrap();
    let records = service.drain_pending();
    assert_eq!(records[0].keys, vec!["ann"]);
    assert_eq!(records[0].rows[0].values.get(&0).map(String::as_str), Some("3"));

    counter.detach();
    assert_eq!(tasks.observer_count(), 0);
}
