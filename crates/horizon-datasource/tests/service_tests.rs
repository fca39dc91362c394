//! End-to-end tests of sessions over a shared registry.

use std::sync::Arc;

use horizon_datasource::prelude::*;
use horizon_datasource::service::Segment;

#[derive(Debug, Clone)]
struct Trade {
    id: u32,
    desk: &'static str,
    qty: i64,
}

fn trade(id: u32, desk: &'static str, qty: i64) -> Trade {
    Trade { id, desk, qty }
}

fn getter() -> SharedGetter<Trade> {
    Arc::new(
        AttributeRegistry::new(|t: &Trade| format!("{:04}", t.id))
            .attribute("desk", |t: &Trade| t.desk)
            .attribute("qty", |t: &Trade| t.qty),
    )
}

fn session(
    config: DataSourceConfig,
) -> (Arc<KeyedList<Trade>>, Arc<SourceRegistry<Trade>>, DataSourceService<Trade>) {
    let trades = KeyedList::new("trades", getter());
    let registry = Arc::new(SourceRegistry::new());
    registry.register("trades", "Trade", trades.clone());
    let service = DataSourceService::new(registry.clone(), config);
    (trades, registry, service)
}

#[test]
fn test_rapid_mutations_coalesce_into_one_record() {
    let (trades, _registry, service) = session(DataSourceConfig::default());
    service
        .subscribe(
            1,
            SubscribeRequest::new(ListenerKind::Viewport, "trades")
                .columns(["qty"])
                .window_size(5),
        )
        .unwrap();
    service.drain_pending();

    for i in 0..100 {
        trades.add(trade(i, "rates", i64::from(i)));
    }
    for i in 0..50 {
        trades.remove_key(&format!("{i:04}"));
    }
    trades.update(trade(50, "rates", -1));

    let records = service.drain_pending();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.kind, DeltaKind::Viewport);
    assert_eq!(record.total_size, Some(50));
    assert_eq!(record.keys, vec!["0050", "0051", "0052", "0053", "0054"]);
    assert_eq!(record.rows[0].values.get(&0).map(String::as_str), Some("-1"));

    assert!(service.drain_pending().is_empty());
}

#[test]
fn test_large_snapshot_is_delivered_in_segments() {
    let config = DataSourceConfig::builder().snapshot_segment_size(100).build();
    let (trades, _registry, service) = session(config);
    for i in 0..250 {
        trades.add_quiet(trade(i, "fx", 1));
    }

    // List snapshots are split by the configured segment size alone.
    let request = SubscribeRequest::new(ListenerKind::List, "trades").columns(["desk"]);
    assert!(service.subscribe(9, request).unwrap());

    let records = service.drain_pending();
    let sizes: Vec<_> = records.iter().map(|r| r.rows.len()).collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.kind, DeltaKind::Snapshot);
        assert_eq!(record.segment, Some(Segment { index: i, count: 3 }));
        assert_eq!(record.total_size, Some(250));
    }
    assert_eq!(records[2].rows[0].index, Some(200));
    assert_eq!(records[2].keys.last().map(String::as_str), Some("0249"));
}

#[test]
fn test_selection_protocol() {
    let (trades, _registry, service) = session(DataSourceConfig::default());
    for (id, desk) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
        trades.add(trade(id as u32, desk, 0));
    }
    service
        .subscribe(
            3,
            SubscribeRequest::new(ListenerKind::Viewport, "trades")
                .selection_mode(SelectionMode::Multi),
        )
        .unwrap();

    let click = |key: &str, modifiers| {
        service
            .command(3, ViewportCommand::Click { key: key.to_string(), modifiers })
            .unwrap()
    };
    click("0001", ClickModifiers::PLAIN);
    click("0003", ClickModifiers::SHIFT);
    let records = service.drain_pending();
    assert_eq!(
        records[0].selection.as_deref(),
        Some(&["0001".to_string(), "0002".to_string(), "0003".to_string()][..])
    );

    click("0002", ClickModifiers::CTRL);
    let records = service.drain_pending();
    assert_eq!(records[0].selection.clone().unwrap(), vec!["0001", "0003"]);
    let selected: Vec<_> = records[0]
        .rows
        .iter()
        .filter(|row| row.selected)
        .map(|row| row.key.as_str())
        .collect();
    assert_eq!(selected, vec!["0001", "0003"]);

    // Removing a selected row drops it from the selection.
    trades.remove_key("0003");
    let records = service.drain_pending();
    assert_eq!(records[0].selection.clone().unwrap(), vec!["0001"]);
}

#[test]
fn test_query_result_switching() {
    let (trades, registry, service) = session(DataSourceConfig::default());
    for i in 0..6 {
        trades.add(trade(i, if i % 2 == 0 { "fx" } else { "rates" }, i64::from(i)));
    }
    service
        .publish_query("Trade", "#big", vec![trade(4, "fx", 4), trade(5, "rates", 5)])
        .unwrap();
    service
        .publish_query("Trade", "#small", vec![trade(0, "fx", 0), trade(1, "rates", 1)])
        .unwrap();

    service
        .subscribe(
            1,
            SubscribeRequest::new(ListenerKind::Viewport, "trades")
                .filter("#big")
                .sort("-qty"),
        )
        .unwrap();
    assert_eq!(service.drain_pending()[0].keys, vec!["0005", "0004"]);

    // A client filter narrows the query result, not the whole list.
    service
        .command(1, ViewportCommand::SetFilter { expression: "desk=fx".into() })
        .unwrap();
    let view = service.viewport(1).unwrap().view();
    assert_eq!(view.key().as_str(), "trades|#big|desk=fx|-qty");
    assert_eq!(service.drain_pending()[0].keys, vec!["0004"]);

    // Another query reference switches to the sibling query view.
    service
        .command(1, ViewportCommand::SetFilter { expression: "#small".into() })
        .unwrap();
    let view = service.viewport(1).unwrap().view();
    assert_eq!(view.key().as_str(), "trades|#small|-qty");
    assert_eq!(service.drain_pending()[0].keys, vec!["0001", "0000"]);

    // Both query views are cached and shared.
    let cached = service.resolve_view("trades", "#big", "").unwrap().unwrap();
    assert!(cached.is_query_result());
    assert!(registry.cache().len() >= 4);
}

#[test]
fn test_sessions_share_views() {
    let (trades, registry, first) = session(DataSourceConfig::default());
    let second = DataSourceService::new(registry.clone(), DataSourceConfig::default());
    let request = SubscribeRequest::new(ListenerKind::Viewport, "trades").filter("qty>0");
    first.subscribe(1, request.clone()).unwrap();
    second.subscribe(1, request).unwrap();

    let a = first.viewport(1).unwrap().view();
    let b = second.viewport(1).unwrap().view();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.observer_count(), 2);

    trades.add(trade(1, "fx", 3));
    assert_eq!(first.drain_pending()[0].total_size, Some(1));
    assert_eq!(second.drain_pending()[0].total_size, Some(1));

    drop(first);
    assert_eq!(b.observer_count(), 1);
}

#[test]
fn test_idle_views_are_evicted() {
    let config = DataSourceConfig::builder().idle_eviction_secs(0).build();
    let (_trades, registry, service) = session(config);
    service
        .subscribe(1, SubscribeRequest::new(ListenerKind::List, "trades").sort("qty"))
        .unwrap();
    assert_eq!(registry.cache().len(), 1);
    assert_eq!(service.evict_idle(), 0);

    service.unsubscribe(1);
    assert_eq!(service.evict_idle(), 1);
    assert!(registry.cache().is_empty());
    assert!(registry.source("trades").is_some());
}
