//! Listeners that forward every change of a view.

use std::collections::BTreeMap;
use std::sync::Arc;

use horizon_datasource_core::{Observer, PerfSpan};
use tracing::trace;

use super::delta::{DeltaKind, DeltaRecord, DeltaRow, Handle, PendingQueue, Segment};
use crate::event::{ChangeEvent, ChangeKind};
use crate::getter::{LocaleContext, SharedGetter};
use crate::logging::targets;
use crate::view::Item;

/// How a [`ListListener`] reports updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// Every update carries the full row.
    Full,
    /// Updates carry only the columns whose text changed; an update that
    /// changes no column is dropped.
    AttributeDiff,
}

/// Forwards each change of a view to the pending queue as a delta record.
///
/// Snapshots longer than the segment size are split into ordered segments
/// tagged with their position, so no single record carries an unbounded
/// number of rows.
pub struct ListListener<T> {
    handle: Handle,
    getter: SharedGetter<T>,
    columns: Vec<String>,
    locale: LocaleContext,
    segment_size: usize,
    mode: ListMode,
    queue: Arc<PendingQueue>,
}

impl<T: Item> ListListener<T> {
    /// Creates a listener for `handle` rendering `columns`.
    pub fn new(
        handle: Handle,
        getter: SharedGetter<T>,
        columns: Vec<String>,
        segment_size: usize,
        mode: ListMode,
        queue: Arc<PendingQueue>,
    ) -> Self {
        Self {
            handle,
            getter,
            columns,
            locale: LocaleContext::default(),
            segment_size: segment_size.max(1),
            mode,
            queue,
        }
    }

    /// Sets the locale used to render cell text.
    pub fn with_locale(mut self, locale: LocaleContext) -> Self {
        self.locale = locale;
        self
    }

    /// Returns the subscription handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Returns the update mode.
    pub fn mode(&self) -> ListMode {
        self.mode
    }

    fn render(&self, item: &T, index: Option<usize>) -> DeltaRow {
        DeltaRow::render(&*self.getter, item, index, &self.columns, &self.locale)
    }

    fn push_snapshot(&self, items: &[T]) {
        let _perf = PerfSpan::new("list_snapshot");
        let total = items.len();
        if total <= self.segment_size {
            let rows = items
                .iter()
                .enumerate()
                .map(|(index, item)| self.render(item, Some(index)))
                .collect();
            self.queue.push(
                DeltaRecord::new(DeltaKind::Snapshot, self.handle)
                    .with_rows(rows)
                    .with_total_size(total),
            );
            return;
        }

        let count = total.div_ceil(self.segment_size);
        for (segment, chunk) in items.chunks(self.segment_size).enumerate() {
            let offset = segment * self.segment_size;
            let rows = chunk
                .iter()
                .enumerate()
                .map(|(i, item)| self.render(item, Some(offset + i)))
                .collect();
            let mut record = DeltaRecord::new(DeltaKind::Snapshot, self.handle)
                .with_rows(rows)
                .with_total_size(total);
            record.segment = Some(Segment {
                index: segment,
                count,
            });
            self.queue.push(record);
        }
        trace!(
            target: targets::SERVICE,
            handle = self.handle,
            total,
            segments = count,
            "snapshot segmented"
        );
    }

    fn push_update(&self, index: Option<usize>, new: &T, old: Option<&T>) {
        let mut row = self.render(new, index);
        if let (ListMode::AttributeDiff, Some(old)) = (self.mode, old) {
            let before = self.render(old, index);
            row.values = diff_values(&before.values, row.values);
            if row.values.is_empty() && before.state == row.state {
                return;
            }
        }
        self.queue
            .push(DeltaRecord::new(DeltaKind::Update, self.handle).with_rows(vec![row]));
    }
}

/// Keeps the entries of `after` whose text differs from `before`.
fn diff_values(
    before: &BTreeMap<usize, String>,
    after: BTreeMap<usize, String>,
) -> BTreeMap<usize, String> {
    after
        .into_iter()
        .filter(|(column, text)| before.get(column) != Some(text))
        .collect()
}

impl<T: Item> Observer<ChangeEvent<T>> for ListListener<T> {
    fn on_event(&self, event: &ChangeEvent<T>) {
        match event.kind {
            ChangeKind::Snapshot => self.push_snapshot(event.snapshot_items()),
            ChangeKind::Add => {
                if let Some(item) = &event.new_item {
                    let row = self.render(item, event.index);
                    self.queue
                        .push(DeltaRecord::new(DeltaKind::Add, self.handle).with_rows(vec![row]));
                }
            }
            ChangeKind::Update => {
                if let Some(item) = &event.new_item {
                    self.push_update(event.index, item, event.old_item.as_ref());
                }
            }
            ChangeKind::Remove => {
                if let Some(item) = &event.old_item {
                    let mut record = DeltaRecord::new(DeltaKind::Remove, self.handle);
                    record.keys = vec![self.getter.key(item)];
                    record.first_index = event.index;
                    self.queue.push(record);
                }
            }
            ChangeKind::Clear | ChangeKind::Destroy => {
                self.queue
                    .push(DeltaRecord::new(event.kind.into(), self.handle).with_total_size(0));
            }
        }
    }
}
