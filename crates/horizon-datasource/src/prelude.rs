//! Prelude module for Horizon Datasource.
//!
//! ```ignore
//! use horizon_datasource::prelude::*;
//! ```
//!
//! Brings in the view types and the [`ReactiveView`] trait their methods
//! come from, the getter registry, and the service entry points.

// ============================================================================
// Items and Views
// ============================================================================

pub use crate::getter::{AttributeRegistry, Getter, SharedGetter};
pub use crate::view::{Item, KeyedList, ReactiveView, SharedView, SortedView};

// ============================================================================
// Events
// ============================================================================

pub use crate::event::{ChangeEvent, ChangeKind};
pub use horizon_datasource_core::Observer;

// ============================================================================
// Service
// ============================================================================

pub use crate::config::DataSourceConfig;
pub use crate::service::{
    DataSourceService, DeltaKind, DeltaRecord, ListenerKind, SourceRegistry, SubscribeRequest,
    ViewportCommand,
};
pub use crate::viewport::{ClickModifiers, SelectionMode};

// ============================================================================
// Grouping
// ============================================================================

pub use crate::grouping::{GroupLevel, GroupingTree, TreeRow};
