//! Outbound delta records and the pending queue they wait in.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;

use parking_lot::Mutex;
use serde::Serialize;

use crate::event::ChangeKind;
use crate::getter::{Getter, LocaleContext};

/// Subscription handle chosen by the client.
pub type Handle = u32;

/// Discriminates delta records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    /// Full contents (possibly one segment of them).
    Snapshot,
    /// Rows entered the source.
    Add,
    /// Rows changed.
    Update,
    /// Rows left the source.
    Remove,
    /// The source was emptied.
    Clear,
    /// The source is gone.
    Destroy,
    /// Coalesced state of a viewport window.
    Viewport,
}

impl From<ChangeKind> for DeltaKind {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Add => Self::Add,
            ChangeKind::Update => Self::Update,
            ChangeKind::Remove => Self::Remove,
            ChangeKind::Clear => Self::Clear,
            ChangeKind::Snapshot => Self::Snapshot,
            ChangeKind::Destroy => Self::Destroy,
        }
    }
}

/// One rendered row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaRow {
    /// Item key.
    pub key: String,
    /// Position in the source view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Whether the row is selected (viewports only).
    #[serde(skip_serializing_if = "is_false")]
    pub selected: bool,
    /// Row state string from the getter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Rendered text by column index.
    pub values: BTreeMap<usize, String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl DeltaRow {
    /// Renders `item` for `columns`.
    ///
    /// Columns the getter has no text for are left out of
    /// [`values`](Self::values).
    pub fn render<T>(
        getter: &dyn Getter<T>,
        item: &T,
        index: Option<usize>,
        columns: &[String],
        locale: &LocaleContext,
    ) -> Self {
        let values = columns
            .iter()
            .enumerate()
            .filter_map(|(column, attribute)| {
                getter
                    .text(item, attribute, locale)
                    .map(|text| (column, text))
            })
            .collect();
        Self {
            key: getter.key(item),
            index,
            selected: false,
            state: getter.row_state(item),
            values,
        }
    }
}

/// Position of a record within a segmented snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Zero-based segment number.
    pub index: usize,
    /// Total number of segments.
    pub count: usize,
}

/// A change delivered to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaRecord {
    /// What the record describes.
    pub kind: DeltaKind,
    /// Subscription it belongs to.
    pub handle: Handle,
    /// Keys of the affected items.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Rendered rows.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<DeltaRow>,
    /// Selected keys (viewports only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Vec<String>>,
    /// First visible position (viewports only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_index: Option<usize>,
    /// Number of items in the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<usize>,
    /// Summary text by column index.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub summaries: BTreeMap<usize, String>,
    /// Segment tag of a split snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<Segment>,
}

impl DeltaRecord {
    /// Creates an empty record.
    pub fn new(kind: DeltaKind, handle: Handle) -> Self {
        Self {
            kind,
            handle,
            keys: Vec::new(),
            rows: Vec::new(),
            selection: None,
            first_index: None,
            total_size: None,
            summaries: BTreeMap::new(),
            segment: None,
        }
    }

    /// Sets the rows and derives [`keys`](Self::keys) from them.
    pub fn with_rows(mut self, rows: Vec<DeltaRow>) -> Self {
        self.keys = rows.iter().map(|row| row.key.clone()).collect();
        self.rows = rows;
        self
    }

    /// Sets the total size.
    pub fn with_total_size(mut self, total_size: usize) -> Self {
        self.total_size = Some(total_size);
        self
    }
}

/// Outbox of a service: complete records pushed by listeners, and the
/// handles of viewports that have a record ready to be built.
#[derive(Debug, Default)]
pub struct PendingQueue {
    inner: Mutex<Outbox>,
}

#[derive(Debug, Default)]
struct Outbox {
    events: Vec<DeltaRecord>,
    ready: BTreeSet<Handle>,
}

impl PendingQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a complete record.
    pub fn push(&self, record: DeltaRecord) {
        self.inner.lock().events.push(record);
    }

    /// Marks the viewport `handle` as having an event to build.
    pub fn mark_ready(&self, handle: Handle) {
        self.inner.lock().ready.insert(handle);
    }

    /// Drops everything queued for `handle`.
    pub fn forget(&self, handle: Handle) {
        let mut outbox = self.inner.lock();
        outbox.ready.remove(&handle);
        outbox.events.retain(|record| record.handle != handle);
    }

    /// Number of ready viewports.
    pub fn ready_len(&self) -> usize {
        self.inner.lock().ready.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        let outbox = self.inner.lock();
        outbox.events.is_empty() && outbox.ready.is_empty()
    }

    /// Swaps out both queues in one step, so a push or mark lands either
    /// wholly in this drain or wholly in the next.
    pub fn take(&self) -> (Vec<DeltaRecord>, BTreeSet<Handle>) {
        let Outbox { events, ready } = mem::take(&mut *self.inner.lock());
        (events, ready)
    }
}
