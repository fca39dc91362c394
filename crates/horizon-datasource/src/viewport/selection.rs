//! Key-based selection for viewports.
//!
//! Selection is held by item key, so it survives re-sorting and scrolling.
//! Range selection resolves positions against the view's current order at
//! the time of the click.
//!
//! # Example
//!
//! Given rows `[a, b, c, d, e]`:
//!
//! - click `b` selects `{b}` and anchors at `b`
//! - shift-click `d` selects `{b, c, d}`; the anchor stays at `b`
//! - ctrl-click `c` toggles it out, leaving `{b, d}`

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::getter::Getter;
use crate::view::ViewRead;

/// How a viewport allows rows to be selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Nothing can be selected.
    None,
    /// At most one row (default). Modifiers are ignored.
    #[default]
    Single,
    /// Any number of rows, with shift ranges and ctrl toggles.
    Multi,
}

/// Modifier keys held during a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClickModifiers {
    /// Extend to a range from the anchor.
    #[serde(default)]
    pub shift: bool,
    /// Toggle one row.
    #[serde(default)]
    pub ctrl: bool,
}

impl ClickModifiers {
    /// No modifiers.
    pub const PLAIN: Self = Self {
        shift: false,
        ctrl: false,
    };

    /// Shift held.
    pub const SHIFT: Self = Self {
        shift: true,
        ctrl: false,
    };

    /// Ctrl held.
    pub const CTRL: Self = Self {
        shift: false,
        ctrl: true,
    };
}

/// Selected keys plus the anchor that range selection extends from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    mode: SelectionMode,
    selected: BTreeSet<String>,
    anchor: Option<String>,
}

impl Selection {
    /// Creates an empty selection.
    pub fn new(mode: SelectionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Returns the selection mode.
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Returns `true` if `key` is selected.
    pub fn is_selected(&self, key: &str) -> bool {
        self.selected.contains(key)
    }

    /// Number of selected keys.
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    /// Returns `true` if nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Returns the anchor of range selection.
    pub fn anchor(&self) -> Option<&str> {
        self.anchor.as_deref()
    }

    /// Returns the selected keys in key order.
    pub fn keys(&self) -> Vec<String> {
        self.selected.iter().cloned().collect()
    }

    /// Applies a click on `key`. Returns `true` if the selection changed.
    ///
    /// A shift-click with no anchor in the current rows behaves like a plain
    /// click.
    pub fn click<T>(
        &mut self,
        key: &str,
        modifiers: ClickModifiers,
        rows: &dyn ViewRead<T>,
        getter: &dyn Getter<T>,
    ) -> bool {
        let before = self.selected.clone();
        match self.mode {
            SelectionMode::None => return false,
            SelectionMode::Multi if modifiers.shift => {
                let range = self
                    .anchor
                    .as_deref()
                    .and_then(|anchor| rows.index_of(anchor))
                    .zip(rows.index_of(key));
                match range {
                    Some((from, to)) => {
                        let (low, high) = if from <= to { (from, to) } else { (to, from) };
                        self.selected = rows
                            .iter_from(low)
                            .take(high - low + 1)
                            .map(|item| getter.key(item))
                            .collect();
                    }
                    None => self.replace(key),
                }
            }
            SelectionMode::Multi if modifiers.ctrl => {
                if self.selected.remove(key) {
                    if self.anchor.as_deref() == Some(key) {
                        self.anchor = None;
                    }
                } else {
                    self.selected.insert(key.to_string());
                    self.anchor = Some(key.to_string());
                }
            }
            SelectionMode::Single | SelectionMode::Multi => self.replace(key),
        }
        self.selected != before
    }

    fn replace(&mut self, key: &str) {
        self.selected.clear();
        self.selected.insert(key.to_string());
        self.anchor = Some(key.to_string());
    }

    /// Selects every row. Only multi-selection allows this.
    pub fn select_all<T>(&mut self, rows: &dyn ViewRead<T>, getter: &dyn Getter<T>) -> bool {
        if self.mode != SelectionMode::Multi {
            return false;
        }
        let all: BTreeSet<String> = rows.iter_from(0).map(|item| getter.key(item)).collect();
        let changed = all != self.selected;
        self.selected = all;
        changed
    }

    /// Deselects everything. Returns `true` if anything was selected.
    pub fn clear(&mut self) -> bool {
        self.anchor = None;
        let changed = !self.selected.is_empty();
        self.selected.clear();
        changed
    }

    /// Keeps only the keys for which `keep` returns `true`, dropping the
    /// anchor if it goes.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.selected.retain(|key| keep(key));
        if self.anchor.as_deref().is_some_and(|anchor| !keep(anchor)) {
            self.anchor = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::getter::{AttributeRegistry, SharedGetter};
    use crate::view::{ListState, ViewState};
    use std::sync::Arc;

    fn getter() -> SharedGetter<&'static str> {
        Arc::new(AttributeRegistry::new(|s: &&'static str| s.to_string()))
    }

    fn rows(keys: &[&'static str]) -> ListState<&'static str> {
        let mut state = ListState::new();
        state.load(keys.iter().map(|k| (k.to_string(), *k)).collect());
        state
    }

    fn selected(selection: &Selection) -> Vec<String> {
        selection.keys()
    }

    #[test]
    fn test_shift_then_ctrl() {
        let rows = rows(&["a", "b", "c", "d", "e"]);
        let getter = getter();
        let mut selection = Selection::new(SelectionMode::Multi);

        selection.click("b", ClickModifiers::PLAIN, &rows, &*getter);
        selection.click("d", ClickModifiers::SHIFT, &rows, &*getter);
        assert_eq!(selected(&selection), vec!["b", "c", "d"]);
        assert_eq!(selection.anchor(), Some("b"));

        selection.click("c", ClickModifiers::CTRL, &rows, &*getter);
        assert_eq!(selected(&selection), vec!["b", "d"]);
    }

    #[test]
    fn test_shift_range_upwards() {
        let rows = rows(&["a", "b", "c", "d", "e"]);
        let getter = getter();
        let mut selection = Selection::new(SelectionMode::Multi);
        selection.click("d", ClickModifiers::PLAIN, &rows, &*getter);
        selection.click("a", ClickModifiers::SHIFT, &rows, &*getter);
        assert_eq!(selected(&selection), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_ctrl_removing_anchor_clears_it() {
        let rows = rows(&["a", "b", "c"]);
        let getter = getter();
        let mut selection = Selection::new(SelectionMode::Multi);
        selection.click("a", ClickModifiers::PLAIN, &rows, &*getter);
        selection.click("c", ClickModifiers::CTRL, &rows, &*getter);
        assert_eq!(selection.anchor(), Some("c"));

        selection.click("c", ClickModifiers::CTRL, &rows, &*getter);
        assert_eq!(selection.anchor(), None);
        assert_eq!(selected(&selection), vec!["a"]);

        // No anchor: shift falls back to a plain click.
        selection.click("b", ClickModifiers::SHIFT, &rows, &*getter);
        assert_eq!(selected(&selection), vec!["b"]);
    }

    #[test]
    fn test_single_mode_ignores_modifiers() {
        let rows = rows(&["a", "b", "c"]);
        let getter = getter();
        let mut selection = Selection::new(SelectionMode::Single);
        selection.click("a", ClickModifiers::PLAIN, &rows, &*getter);
        selection.click("c", ClickModifiers::SHIFT, &rows, &*getter);
        assert_eq!(selected(&selection), vec!["c"]);
        assert!(!selection.select_all(&rows, &*getter));
    }

    #[test]
    fn test_none_mode_selects_nothing() {
        let rows = rows(&["a"]);
        let getter = getter();
        let mut selection = Selection::new(SelectionMode::None);
        assert!(!selection.click("a", ClickModifiers::PLAIN, &rows, &*getter));
        assert!(selection.is_empty());
    }

    #[test]
    fn test_retain_drops_missing_keys() {
        let rows = rows(&["a", "b", "c"]);
        let getter = getter();
        let mut selection = Selection::new(SelectionMode::Multi);
        selection.click("a", ClickModifiers::PLAIN, &rows, &*getter);
        selection.click("c", ClickModifiers::CTRL, &rows, &*getter);

        selection.retain(|key| key != "c");
        assert_eq!(selected(&selection), vec!["a"]);
        assert_eq!(selection.anchor(), None);

        assert!(selection.clear());
        assert!(!selection.clear());
    }

    #[test]
    fn test_select_all() {
        let rows = rows(&["a", "b", "c"]);
        let getter = getter();
        let mut selection = Selection::new(SelectionMode::Multi);
        assert!(selection.select_all(&rows, &*getter));
        assert_eq!(selection.len(), 3);
        assert!(!selection.select_all(&rows, &*getter));
    }
}
