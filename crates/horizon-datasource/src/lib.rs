//! Horizon Datasource - reactive, indexed data sources for windowed clients.
//!
//! Lists of items are published as reactive views. Clients subscribe to a
//! view of a list (filtered, sorted, or both) and receive changes either
//! one by one or, for scrollable tables, as one coalesced window per poll.
//!
//! - **Views**: [`KeyedList`] root lists and filtered views, [`SortedView`]
//!   sorted views, shared per `(list, filter, sort)` through a [`ViewCache`]
//! - **Viewports**: [`ViewportListener`] windows with key-anchored scrolling,
//!   selection and column summaries
//! - **Grouping**: [`GroupingTree`] N-level trees flattened into a list, and
//!   [`GroupByCounter`] per-group counts
//! - **Service**: [`DataSourceService`] sessions over a shared
//!   [`SourceRegistry`], producing [`DeltaRecord`]s
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use horizon_datasource::prelude::*;
//!
//! #[derive(Clone)]
//! struct Order {
//!     id: u32,
//!     qty: i64,
//! }
//!
//! let getter: SharedGetter<Order> = Arc::new(
//!     AttributeRegistry::new(|o: &Order| o.id.to_string()).attribute("qty", |o: &Order| o.qty),
//! );
//! let orders = KeyedList::new("orders", getter);
//! orders.add(Order { id: 1, qty: 3 });
//!
//! let registry = Arc::new(SourceRegistry::new());
//! registry.register("orders", "Order", orders.clone());
//!
//! let service = DataSourceService::new(registry, DataSourceConfig::default());
//! let request = SubscribeRequest::new(ListenerKind::Viewport, "orders")
//!     .sort("-qty")
//!     .columns(["qty"]);
//! service.subscribe(1, request).unwrap();
//!
//! orders.add(Order { id: 2, qty: 8 });
//! let records = service.drain_pending();
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].keys, vec!["2", "1"]);
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod getter;
pub mod grouping;
pub mod prelude;
pub mod service;
pub mod sort;
pub mod value;
pub mod view;
pub mod viewport;

pub use horizon_datasource_core::{IndexError, IndexedMap, Observer, ObserverId, ObserverRegistry, logging};

pub use config::{DataSourceConfig, DataSourceConfigBuilder};
pub use error::{Error, Result};
pub use event::{ChangeEvent, ChangeKind};
pub use filter::{AttributeFilter, Filter, FnFilter, RequestFilter, SharedFilter};
pub use getter::{AttributeRegistry, Getter, LocaleContext, SharedGetter};
pub use grouping::{GroupByCounter, GroupCount, GroupLevel, GroupRecord, GroupingTree, RowKind, TreeRow};
pub use service::{
    DataSourceService, DeltaKind, DeltaRecord, DeltaRow, ListenerKind, SourceRegistry,
    SubscribeRequest, ViewportCommand,
};
pub use sort::{SortCriterion, SortDirection, SortSpec, Sorter};
pub use value::AttrValue;
pub use view::{Item, KeyedList, ReactiveView, SharedView, SortedView, ViewCache, ViewKey};
pub use viewport::{ClickModifiers, SelectionMode, ViewportListener, ViewportOptions};
