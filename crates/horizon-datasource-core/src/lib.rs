//! Core structures for Horizon Datasource.
//!
//! This crate provides the item-agnostic machinery the reactive data-source
//! framework is built from:
//!
//! - **Indexed Ordered Map**: a red-black tree with subtree counts, giving
//!   O(log n) access by key and by position, plus backed range views
//! - **Observer Registry**: an ordered listener set whose dispatch tolerates
//!   observers adding or removing observers mid-notification
//! - **Logging**: tracing targets and span helpers shared by the workspace
//!
//! # Indexed Map Example
//!
//! ```
//! use horizon_datasource_core::IndexedMap;
//!
//! let mut rows = IndexedMap::new();
//! for (key, name) in [(30, "carol"), (10, "alice"), (20, "bob")] {
//!     rows.insert(key, name);
//! }
//!
//! // Position <-> key, both O(log n)
//! assert_eq!(rows.get_index(0).unwrap(), (&10, &"alice"));
//! assert_eq!(rows.index_of(&30), Some(2));
//!
//! rows.remove_index(1).unwrap();
//! assert_eq!(rows.len(), 2);
//! ```
//!
//! # Observer Example
//!
//! ```
//! use horizon_datasource_core::ObserverRegistry;
//!
//! let registry = ObserverRegistry::<String>::new();
//! let id = registry.add_fn(|text| println!("changed: {text}"));
//! registry.notify(&"hello".to_string());
//! registry.remove(id);
//! ```

mod error;
pub mod indexed_map;
pub mod logging;
pub mod observer;

pub use error::{IndexError, Result};
pub use indexed_map::{CompareFn, Comparator, IndexedMap, NaturalOrder, Range, RangeMut, RangeView};
pub use logging::PerfSpan;
pub use observer::{FnObserver, Observer, ObserverId, ObserverRegistry};
