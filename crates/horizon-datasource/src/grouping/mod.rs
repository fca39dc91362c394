//! Grouping trees.
//!
//! A [`GroupingTree`] groups the items of a flat view by N key attributes,
//! one per [`GroupLevel`], and exposes the expanded part of the tree as a
//! single flat [`KeyedList`] of [`TreeRow`]s that viewports can window over.
//!
//! ```text
//! /                       (root, always expanded)
//! ├── /emea               group, level "."
//! │   ├── /emea/de        group, level ".."
//! │   │   └── /emea/de/17 leaf,  level "..."
//! │   └── /emea/fr
//! └── /apac
//! ```
//!
//! Flat-list keys join path components with `\u{1}`, which sorts before any
//! printable character, so the key order of the flat list is the depth-first
//! order of the tree.
//!
//! [`GroupByCounter`] maintains per-group item counts for a single level
//! without building a tree.

mod group_by;
mod tree;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::getter::{AttributeRegistry, Getter, LocaleContext, SharedGetter};
use crate::value::AttrValue;
use crate::view::{KeyedList, ReactiveView};

pub use group_by::{GroupByCounter, GroupCount};
pub use tree::GroupingTree;

/// Separator between components of a flat-list key.
pub(crate) const KEY_SEPARATOR: char = '\u{1}';

/// Display record of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRecord {
    /// Group key as extracted from items.
    pub key: String,
    /// Display text.
    pub text: String,
    /// `true` if the record was made up because none was registered.
    pub placeholder: bool,
}

impl GroupRecord {
    /// A registered group record.
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
            placeholder: false,
        }
    }

    /// A stand-in record whose text is its key.
    pub fn placeholder(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            text: key.clone(),
            key,
            placeholder: true,
        }
    }

    /// Getter for lists of group records.
    pub fn getter() -> SharedGetter<GroupRecord> {
        Arc::new(
            AttributeRegistry::new(|r: &GroupRecord| r.key.clone())
                .attribute("key", |r: &GroupRecord| r.key.clone())
                .attribute("text", |r: &GroupRecord| r.text.clone())
                .attribute("placeholder", |r: &GroupRecord| r.placeholder),
        )
    }
}

type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// One level of a grouping tree.
///
/// Each level owns a list of [`GroupRecord`]s that supplies group text.
/// Records can be registered up front; a group key seen without a record
/// gets a placeholder.
pub struct GroupLevel<T> {
    name: String,
    key_fn: KeyFn<T>,
    text_fn: Option<KeyFn<T>>,
    records: Arc<KeyedList<GroupRecord>>,
}

impl<T> GroupLevel<T> {
    /// Creates a level named `name` grouping by `key_fn`.
    pub fn new<F>(name: impl Into<String>, key_fn: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            records: KeyedList::new(name.clone(), GroupRecord::getter()),
            name,
            key_fn: Arc::new(key_fn),
            text_fn: None,
        }
    }

    /// Sets how placeholder text is derived from the first item seen in a
    /// group. Defaults to the group key.
    pub fn with_text<F>(mut self, text_fn: F) -> Self
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.text_fn = Some(Arc::new(text_fn));
        self
    }

    /// Registers display records for group keys.
    pub fn with_records(self, records: impl IntoIterator<Item = GroupRecord>) -> Self {
        for record in records {
            self.records.add(record);
        }
        self
    }

    /// Returns the level name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extracts the group key of `item`.
    pub fn key_of(&self, item: &T) -> String {
        (self.key_fn)(item)
    }

    /// Returns the level's group records.
    pub fn records(&self) -> &Arc<KeyedList<GroupRecord>> {
        &self.records
    }

    /// Registers a placeholder record for `key` unless one exists.
    pub(crate) fn ensure_record(&self, key: &str, item: &T) {
        if self.records.get(key).is_some() {
            return;
        }
        let mut record = GroupRecord::placeholder(key);
        if let Some(text_fn) = &self.text_fn {
            record.text = text_fn(item);
        }
        self.records.add(record);
    }

    /// Returns the display text of `key`.
    pub(crate) fn text_for(&self, key: &str) -> String {
        self.records
            .get(key)
            .map_or_else(|| key.to_string(), |record| record.text)
    }
}

impl<T> fmt::Debug for GroupLevel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupLevel")
            .field("name", &self.name)
            .field("has_text_fn", &self.text_fn.is_some())
            .field("records", &self.records.len())
            .finish()
    }
}

/// What a [`TreeRow`] shows.
#[derive(Debug, Clone)]
pub enum RowKind<T> {
    /// A group node.
    Group {
        /// Group key at its level.
        key: String,
        /// Display text.
        text: String,
        /// Whether the group's children are shown.
        expanded: bool,
    },
    /// An item under its deepest group.
    Leaf(T),
}

/// One row of a grouping tree's flat list.
#[derive(Debug, Clone)]
pub struct TreeRow<T> {
    /// Ordering key in the flat list.
    pub flat_key: String,
    /// Display path, `/k1/k2/...`.
    pub path: String,
    /// Depth as a dot string: `.` for top-level groups.
    pub level: String,
    /// Group or leaf payload.
    pub kind: RowKind<T>,
}

impl<T> TreeRow<T> {
    /// Returns the item of a leaf row.
    pub fn item(&self) -> Option<&T> {
        match &self.kind {
            RowKind::Leaf(item) => Some(item),
            RowKind::Group { .. } => None,
        }
    }

    /// Returns `true` for group rows.
    pub fn is_group(&self) -> bool {
        matches!(self.kind, RowKind::Group { .. })
    }

    /// Depth below the root.
    pub fn depth(&self) -> usize {
        self.level.len()
    }
}

/// Getter for tree rows.
///
/// Every row answers `path`, `level` and `depth`. Group rows also answer
/// `group` (their text) and `expanded`; leaf rows delegate everything else
/// to the item getter. Row state is `expanded`/`collapsed` for groups.
pub struct TreeRowGetter<T> {
    items: SharedGetter<T>,
}

impl<T> TreeRowGetter<T> {
    /// Wraps the item getter.
    pub fn new(items: SharedGetter<T>) -> Self {
        Self { items }
    }
}

impl<T> Getter<TreeRow<T>> for TreeRowGetter<T> {
    fn key(&self, row: &TreeRow<T>) -> String {
        row.flat_key.clone()
    }

    fn value(&self, row: &TreeRow<T>, attribute: &str) -> Option<AttrValue> {
        match (attribute, &row.kind) {
            ("path", _) => Some(row.path.as_str().into()),
            ("level", _) => Some(row.level.as_str().into()),
            ("depth", _) => Some(AttrValue::Int(row.depth() as i64)),
            ("group", RowKind::Group { text, .. }) => Some(text.as_str().into()),
            ("expanded", RowKind::Group { expanded, .. }) => Some((*expanded).into()),
            (_, RowKind::Group { .. }) => None,
            (_, RowKind::Leaf(item)) => self.items.value(item, attribute),
        }
    }

    fn text(&self, row: &TreeRow<T>, attribute: &str, locale: &LocaleContext) -> Option<String> {
        match &row.kind {
            RowKind::Leaf(item) if !matches!(attribute, "path" | "level" | "depth") => {
                self.items.text(item, attribute, locale)
            }
            _ => self.value(row, attribute).map(|v| v.to_string()),
        }
    }

    fn row_state(&self, row: &TreeRow<T>) -> Option<String> {
        match &row.kind {
            RowKind::Group { expanded: true, .. } => Some("expanded".to_string()),
            RowKind::Group { expanded: false, .. } => Some("collapsed".to_string()),
            RowKind::Leaf(item) => self.items.row_state(item),
        }
    }

    fn has_attribute(&self, attribute: &str) -> bool {
        matches!(attribute, "path" | "level" | "depth" | "group" | "expanded")
            || self.items.has_attribute(attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(path: &str, item: u32) -> TreeRow<u32> {
        TreeRow {
            flat_key: path.replace('/', "\u{1}"),
            path: path.to_string(),
            level: "..".to_string(),
            kind: RowKind::Leaf(item),
        }
    }

    fn items() -> SharedGetter<u32> {
        Arc::new(AttributeRegistry::new(|n: &u32| n.to_string()).attribute("n", |n: &u32| *n))
    }

    #[test]
    fn test_level_placeholder_records() {
        let level = GroupLevel::new("parity", |n: &u32| (n % 2).to_string())
            .with_records([GroupRecord::new("0", "Even")])
            .with_text(|n: &u32| format!("odd, first seen {n}"));
        level.ensure_record("0", &4);
        assert_eq!(level.text_for("0"), "Even");
        assert_eq!(level.text_for("1"), "1");

        level.ensure_record("1", &7);
        level.ensure_record("1", &9);
        let record = level.records().get("1").unwrap();
        assert!(record.placeholder);
        assert_eq!(record.text, "odd, first seen 7");
        assert_eq!(level.key_of(&7), "1");
    }

    #[test]
    fn test_row_getter() {
        let getter = TreeRowGetter::new(items());
        let row = leaf("/a/5", 5);
        assert_eq!(getter.value(&row, "n"), Some(AttrValue::Int(5)));
        assert_eq!(getter.value(&row, "depth"), Some(AttrValue::Int(2)));
        assert_eq!(
            getter.text(&row, "path", &LocaleContext::default()).as_deref(),
            Some("/a/5")
        );

        let group = TreeRow::<u32> {
            flat_key: "a".into(),
            path: "/a".into(),
            level: ".".into(),
            kind: RowKind::Group {
                key: "a".into(),
                text: "Alpha".into(),
                expanded: false,
            },
        };
        assert_eq!(getter.row_state(&group).as_deref(), Some("collapsed"));
        assert_eq!(getter.value(&group, "group"), Some("Alpha".into()));
        assert_eq!(getter.value(&group, "n"), None);
        assert!(getter.has_attribute("expanded"));
    }
}
