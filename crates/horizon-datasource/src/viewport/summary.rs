//! Column summaries.
//!
//! A [`SummaryHandler`] is fed every change event that reaches a viewport and
//! renders an aggregate (a count, a sum, an average) that is attached to the
//! viewport's deltas under the column it was installed for.

use crate::event::{ChangeEvent, ChangeKind};
use crate::getter::Getter;

/// Incrementally maintained column aggregate.
pub trait SummaryHandler<T>: Send {
    /// Folds `event` into the aggregate.
    fn on_event(&mut self, event: &ChangeEvent<T>, getter: &dyn Getter<T>);

    /// Renders the current aggregate.
    fn text(&self) -> String;
}

/// Number of rows.
#[derive(Debug, Clone, Default)]
pub struct CountSummary {
    count: usize,
}

impl CountSummary {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> SummaryHandler<T> for CountSummary {
    fn on_event(&mut self, event: &ChangeEvent<T>, _getter: &dyn Getter<T>) {
        match event.kind {
            ChangeKind::Add => self.count += 1,
            ChangeKind::Remove => self.count = self.count.saturating_sub(1),
            ChangeKind::Snapshot => self.count = event.snapshot_items().len(),
            ChangeKind::Clear | ChangeKind::Destroy => self.count = 0,
            ChangeKind::Update => {}
        }
    }

    fn text(&self) -> String {
        self.count.to_string()
    }
}

/// Running total and count of an attribute's numeric values.
#[derive(Debug, Clone, Default)]
struct Accumulator {
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn apply<T>(&mut self, event: &ChangeEvent<T>, getter: &dyn Getter<T>, attribute: &str) {
        let number = |item: &T| getter.value(item, attribute).and_then(|v| v.as_f64());
        match event.kind {
            ChangeKind::Snapshot => {
                *self = Self::default();
                for value in event.snapshot_items().iter().filter_map(number) {
                    self.add(value);
                }
            }
            ChangeKind::Clear | ChangeKind::Destroy => *self = Self::default(),
            ChangeKind::Add | ChangeKind::Update | ChangeKind::Remove => {
                if let Some(old) = event.old_item.as_ref().and_then(number) {
                    self.subtract(old);
                }
                if let Some(new) = event.new_item.as_ref().and_then(number) {
                    self.add(new);
                }
            }
        }
    }

    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn subtract(&mut self, value: f64) {
        self.sum -= value;
        self.count = self.count.saturating_sub(1);
    }
}

/// Sum of an attribute over all rows. Rows without a numeric value are
/// skipped.
#[derive(Debug, Clone)]
pub struct SumSummary {
    attribute: String,
    totals: Accumulator,
}

impl SumSummary {
    /// Sums `attribute`.
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            totals: Accumulator::default(),
        }
    }
}

impl<T> SummaryHandler<T> for SumSummary {
    fn on_event(&mut self, event: &ChangeEvent<T>, getter: &dyn Getter<T>) {
        self.totals.apply(event, getter, &self.attribute);
    }

    fn text(&self) -> String {
        self.totals.sum.to_string()
    }
}

/// Mean of an attribute over the rows that have a numeric value.
#[derive(Debug, Clone)]
pub struct AverageSummary {
    attribute: String,
    totals: Accumulator,
}

impl AverageSummary {
    /// Averages `attribute`.
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            totals: Accumulator::default(),
        }
    }
}

impl<T> SummaryHandler<T> for AverageSummary {
    fn on_event(&mut self, event: &ChangeEvent<T>, getter: &dyn Getter<T>) {
        self.totals.apply(event, getter, &self.attribute);
    }

    /// Two decimals; empty when no row has a value.
    fn text(&self) -> String {
        if self.totals.count == 0 {
            return String::new();
        }
        format!("{:.2}", self.totals.sum / self.totals.count as f64)
    }
}
