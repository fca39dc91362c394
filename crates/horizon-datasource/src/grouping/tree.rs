//! The grouping tree and its flattened view.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use horizon_datasource_core::{Observer, ObserverId};
use parking_lot::Mutex;
use tracing::debug;

use super::{GroupLevel, RowKind, TreeRow, TreeRowGetter, KEY_SEPARATOR};
use crate::event::{ChangeEvent, ChangeKind};
use crate::getter::SharedGetter;
use crate::logging::targets;
use crate::view::{Item, KeyedList, ReactiveView, SharedView};

// ============================================================================
// Nodes
// ============================================================================

/// A group node. The root has no expanded flag and is always open.
struct GroupNode<T> {
    expanded: Option<bool>,
    children: BTreeMap<String, GroupNode<T>>,
    leaves: BTreeMap<String, T>,
}

impl<T> GroupNode<T> {
    fn root() -> Self {
        Self {
            expanded: None,
            children: BTreeMap::new(),
            leaves: BTreeMap::new(),
        }
    }

    fn group(expanded: bool) -> Self {
        Self {
            expanded: Some(expanded),
            ..Self::root()
        }
    }

    /// Whether this node's children are shown when the node itself is.
    fn is_open(&self) -> bool {
        self.expanded != Some(false)
    }

    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.leaves.is_empty()
    }

    fn group_count(&self) -> usize {
        self.children
            .values()
            .map(|child| 1 + child.group_count())
            .sum()
    }

    fn find(&self, path: &[String]) -> Option<&GroupNode<T>> {
        path.iter()
            .try_fold(self, |node, key| node.children.get(key))
    }

    /// Copies expanded flags from `previous` onto groups present in both.
    fn restore_flags(&mut self, previous: &GroupNode<T>) {
        for (key, child) in &mut self.children {
            if let Some(old) = previous.children.get(key) {
                child.expanded = old.expanded;
                child.restore_flags(old);
            }
        }
    }
}

struct TreeInner<T> {
    root: GroupNode<T>,
    /// Group path of every item, by item key.
    leaf_paths: HashMap<String, Vec<String>>,
}

fn flat_key(path: &[String]) -> String {
    let mut key = String::new();
    for (i, component) in path.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(component);
    }
    key
}

/// Renders `path` as `/k1/k2`, escaping `\` and `/` inside keys with a
/// backslash. The empty path renders as `""` and a group keyed by the empty
/// string as `"/"`.
fn display_path(path: &[String]) -> String {
    let mut out = String::new();
    for component in path {
        out.push('/');
        for c in component.chars() {
            if matches!(c, '/' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
    }
    out
}

/// Inverse of [`display_path`].
fn parse_path(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    let mut components = Vec::new();
    let mut current = String::new();
    let mut chars = path.strip_prefix('/').unwrap_or(path).chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.extend(chars.next()),
            '/' => components.push(mem::take(&mut current)),
            c => current.push(c),
        }
    }
    components.push(current);
    components
}

fn child_path(prefix: &[String], key: &str) -> Vec<String> {
    let mut path = prefix.to_vec();
    path.push(key.to_string());
    path
}

// ============================================================================
// GroupingTree
// ============================================================================

/// Groups a view's items by one key per level and publishes the expanded
/// part of the tree as a flat list.
///
/// Groups are created on demand when an item needs them and pruned as soon
/// as they hold nothing; the root is never pruned. Newly created groups
/// start expanded or collapsed according to `default_expanded`.
///
/// Rows of the flat list are ordered depth-first. Toggling a group open
/// shows its direct children, and further down whatever those children's
/// own flags allow. Toggling it closed collapses every descendant group too.
pub struct GroupingTree<T: Item> {
    id: String,
    levels: Vec<GroupLevel<T>>,
    getter: SharedGetter<T>,
    default_expanded: bool,
    inner: Mutex<TreeInner<T>>,
    flat: Arc<KeyedList<TreeRow<T>>>,
    upstream: Mutex<Option<(SharedView<T>, ObserverId)>>,
}

impl<T: Item> GroupingTree<T> {
    /// Creates an empty tree grouping by `levels`, outermost first.
    pub fn new(
        id: impl Into<String>,
        getter: SharedGetter<T>,
        levels: Vec<GroupLevel<T>>,
        default_expanded: bool,
    ) -> Arc<Self> {
        let id = id.into();
        let flat = KeyedList::new(id.clone(), Arc::new(TreeRowGetter::new(getter.clone())));
        Arc::new(Self {
            id,
            levels,
            getter,
            default_expanded,
            inner: Mutex::new(TreeInner {
                root: GroupNode::root(),
                leaf_paths: HashMap::new(),
            }),
            flat,
            upstream: Mutex::new(None),
        })
    }

    /// Returns the tree id, which is also the flat list's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the grouping levels.
    pub fn levels(&self) -> &[GroupLevel<T>] {
        &self.levels
    }

    /// Returns the flattened view of the visible rows.
    pub fn flat_list(&self) -> &Arc<KeyedList<TreeRow<T>>> {
        &self.flat
    }

    /// Returns the flattened view as a shared view.
    pub fn shared_view(&self) -> SharedView<TreeRow<T>> {
        self.flat.clone()
    }

    /// Number of items in the tree.
    pub fn len(&self) -> usize {
        self.inner.lock().leaf_paths.len()
    }

    /// Returns `true` if the tree holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of groups, not counting the root.
    pub fn node_count(&self) -> usize {
        self.inner.lock().root.group_count()
    }

    /// Returns `true` if the group at `path` exists. Paths are written
    /// `/k1/k2` with `/` and `\` escaped inside keys; `""` is the root and
    /// `"/"` a group keyed by the empty string.
    pub fn contains_path(&self, path: &str) -> bool {
        self.inner.lock().root.find(&parse_path(path)).is_some()
    }

    /// Returns the expanded flag of the group at `path`. The root has none.
    pub fn is_expanded(&self, path: &str) -> Option<bool> {
        self.inner
            .lock()
            .root
            .find(&parse_path(path))
            .and_then(|node| node.expanded)
    }

    // ------------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------------

    fn group_row(&self, path: &[String], expanded: bool) -> TreeRow<T> {
        let depth = path.len();
        let key = path[depth - 1].clone();
        TreeRow {
            flat_key: flat_key(path),
            path: display_path(path),
            level: ".".repeat(depth),
            kind: RowKind::Group {
                text: self.levels[depth - 1].text_for(&key),
                key,
                expanded,
            },
        }
    }

    fn leaf_row(&self, path: &[String], item_key: &str, item: T) -> TreeRow<T> {
        let full = child_path(path, item_key);
        TreeRow {
            flat_key: flat_key(&full),
            path: display_path(&full),
            level: ".".repeat(full.len()),
            kind: RowKind::Leaf(item),
        }
    }

    fn group_path(&self, item: &T) -> Vec<String> {
        self.levels.iter().map(|level| level.key_of(item)).collect()
    }

    /// Appends the rows below `node` that are visible when `node` is.
    fn collect_rows(&self, node: &GroupNode<T>, prefix: &[String], out: &mut Vec<TreeRow<T>>) {
        for (key, child) in &node.children {
            let path = child_path(prefix, key);
            out.push(self.group_row(&path, child.is_open()));
            if child.is_open() {
                self.collect_rows(child, &path, out);
            }
        }
        for (key, item) in &node.leaves {
            out.push(self.leaf_row(prefix, key, item.clone()));
        }
    }

    fn show_children(&self, node: &GroupNode<T>, prefix: &[String]) {
        let mut rows = Vec::new();
        self.collect_rows(node, prefix, &mut rows);
        for row in rows {
            self.flat.add(row);
        }
    }

    /// Collapses every group below `node`. `shown` says whether `node`'s
    /// children are currently in the flat list.
    fn hide_children(&self, node: &mut GroupNode<T>, prefix: &[String], shown: bool) {
        for (key, child) in &mut node.children {
            let path = child_path(prefix, key);
            let child_shown = shown && child.is_open();
            child.expanded = Some(false);
            self.hide_children(child, &path, child_shown);
            if shown {
                self.flat.remove_key(&flat_key(&path));
            }
        }
        if shown {
            for key in node.leaves.keys() {
                self.flat.remove_key(&flat_key(&child_path(prefix, key)));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------------

    fn insert(&self, inner: &mut TreeInner<T>, item: T, emit: bool) {
        let item_key = self.getter.key(&item);
        let path = self.group_path(&item);

        let mut node = &mut inner.root;
        let mut shown = true;
        for depth in 0..path.len() {
            let (child, created) = match node.children.entry(path[depth].clone()) {
                Entry::Occupied(entry) => (entry.into_mut(), false),
                Entry::Vacant(entry) => (entry.insert(GroupNode::group(self.default_expanded)), true),
            };
            if created {
                self.levels[depth].ensure_record(&path[depth], &item);
                if emit && shown {
                    self.flat.add(self.group_row(&path[..=depth], self.default_expanded));
                }
            }
            shown = shown && child.is_open();
            node = child;
        }

        node.leaves.insert(item_key.clone(), item.clone());
        if emit && shown {
            self.flat.add(self.leaf_row(&path, &item_key, item));
        }
        inner.leaf_paths.insert(item_key, path);
    }

    fn remove_locked(&self, inner: &mut TreeInner<T>, item_key: &str) -> bool {
        let Some(path) = inner.leaf_paths.remove(item_key) else {
            return false;
        };
        self.prune(&mut inner.root, &path, 0, item_key, true);
        true
    }

    /// Removes the leaf `item_key` under `path` and drops every group left
    /// empty on the way back up.
    fn prune(
        &self,
        node: &mut GroupNode<T>,
        path: &[String],
        depth: usize,
        item_key: &str,
        shown: bool,
    ) {
        if depth == path.len() {
            if node.leaves.remove(item_key).is_some() && shown {
                self.flat.remove_key(&flat_key(&child_path(path, item_key)));
            }
            return;
        }
        let key = &path[depth];
        let Some(child) = node.children.get_mut(key) else {
            return;
        };
        let child_shown = shown && child.is_open();
        self.prune(child, path, depth + 1, item_key, child_shown);
        if child.is_empty() {
            node.children.remove(key);
            if shown {
                self.flat.remove_key(&flat_key(&path[..=depth]));
            }
            debug!(
                target: targets::GROUPING,
                tree = %self.id,
                group = %display_path(&path[..=depth]),
                "empty group pruned"
            );
        }
    }

    fn update_locked(&self, inner: &mut TreeInner<T>, item: T) {
        let item_key = self.getter.key(&item);
        let path = self.group_path(&item);
        match inner.leaf_paths.get(&item_key).map(|old| *old == path) {
            Some(true) => {
                let mut node = &mut inner.root;
                let mut shown = true;
                for key in &path {
                    let Some(child) = node.children.get_mut(key) else {
                        return;
                    };
                    shown = shown && child.is_open();
                    node = child;
                }
                node.leaves.insert(item_key.clone(), item.clone());
                if shown {
                    self.flat.update(self.leaf_row(&path, &item_key, item));
                }
            }
            Some(false) => {
                self.remove_locked(inner, &item_key);
                self.insert(inner, item, true);
            }
            None => self.insert(inner, item, true),
        }
    }

    /// Adds `item`, creating the groups it needs. An item whose key is
    /// already present is updated instead.
    pub fn add_item(&self, item: T) {
        self.update_item(item);
    }

    /// Replaces `item` in place, or moves it if its group path changed.
    pub fn update_item(&self, item: T) {
        let mut inner = self.inner.lock();
        self.update_locked(&mut inner, item);
    }

    /// Removes `item` and prunes the groups it leaves empty.
    pub fn remove_item(&self, item: &T) -> bool {
        let key = self.getter.key(item);
        self.remove_key(&key)
    }

    /// Removes the item stored under `key`.
    pub fn remove_key(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        self.remove_locked(&mut inner, key)
    }

    /// Rebuilds the tree from `items` and publishes the flat list as a
    /// snapshot. Groups that survive keep their expanded flag.
    pub fn reset(&self, items: Vec<T>) {
        let mut inner = self.inner.lock();
        let previous = mem::replace(&mut inner.root, GroupNode::root());
        inner.leaf_paths.clear();
        for item in items {
            self.insert(&mut inner, item, false);
        }
        inner.root.restore_flags(&previous);

        let mut rows = Vec::new();
        self.collect_rows(&inner.root, &[], &mut rows);
        debug!(
            target: targets::GROUPING,
            tree = %self.id,
            items = inner.leaf_paths.len(),
            rows = rows.len(),
            "tree rebuilt"
        );
        self.flat.snapshot(rows);
    }

    /// Removes every item and group.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.root = GroupNode::root();
        inner.leaf_paths.clear();
        self.flat.clear();
    }

    /// Expands or collapses the group at `path`, written as for
    /// [`contains_path`](Self::contains_path). Returns `false` if there is
    /// no such group or it is already in that state.
    pub fn set_expanded(&self, path: &str, expanded: bool) -> bool {
        let path = parse_path(path);
        if path.is_empty() {
            return false;
        }
        let mut inner = self.inner.lock();
        let mut node = &mut inner.root;
        let mut visible = true;
        for key in &path {
            visible = visible && node.is_open();
            let Some(child) = node.children.get_mut(key) else {
                return false;
            };
            node = child;
        }
        if node.expanded == Some(expanded) {
            return false;
        }
        node.expanded = Some(expanded);

        if visible {
            self.flat.update(self.group_row(&path, expanded));
        }
        if expanded {
            if visible {
                self.show_children(node, &path);
            }
        } else {
            self.hide_children(node, &path, visible);
        }
        debug!(
            target: targets::GROUPING,
            tree = %self.id,
            group = %display_path(&path),
            expanded,
            "group toggled"
        );
        true
    }

    // ------------------------------------------------------------------------
    // Source
    // ------------------------------------------------------------------------

    /// Follows `source`: its snapshot rebuilds the tree and its changes are
    /// applied as they happen. Replaces any previous source.
    pub fn attach(self: &Arc<Self>, source: &SharedView<T>) {
        self.detach();
        let feed = Arc::new(TreeFeed {
            tree: Arc::downgrade(self),
        });
        let id = source.subscribe(feed);
        *self.upstream.lock() = Some((source.clone(), id));
        debug!(
            target: targets::GROUPING,
            tree = %self.id,
            source = %source.key(),
            "tree attached"
        );
    }

    /// Stops following the current source.
    pub fn detach(&self) {
        let previous = self.upstream.lock().take();
        if let Some((source, id)) = previous {
            source.unsubscribe(id);
        }
    }
}

impl<T: Item> Drop for GroupingTree<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T: Item> fmt::Debug for GroupingTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupingTree")
            .field("id", &self.id)
            .field("levels", &self.levels)
            .field("default_expanded", &self.default_expanded)
            .finish_non_exhaustive()
    }
}

struct TreeFeed<T: Item> {
    tree: Weak<GroupingTree<T>>,
}

impl<T: Item> Observer<ChangeEvent<T>> for TreeFeed<T> {
    fn on_event(&self, event: &ChangeEvent<T>) {
        let Some(tree) = self.tree.upgrade() else {
            return;
        };
        match event.kind {
            ChangeKind::Snapshot => tree.reset(event.snapshot_items().to_vec()),
            ChangeKind::Add | ChangeKind::Update => {
                if let Some(item) = &event.new_item {
                    tree.update_item(item.clone());
                }
            }
            ChangeKind::Remove => {
                if let Some(item) = &event.old_item {
                    tree.remove_item(item);
                }
            }
            ChangeKind::Clear => tree.clear(),
            ChangeKind::Destroy => {
                tree.upstream.lock().take();
                tree.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::getter::AttributeRegistry;
    use crate::grouping::GroupRecord;

    #[derive(Debug, Clone, PartialEq)]
    struct Sale {
        id: u32,
        region: &'static str,
        country: &'static str,
    }

    fn sale(id: u32, region: &'static str, country: &'static str) -> Sale {
        Sale {
            id,
            region,
            country,
        }
    }

    fn getter() -> SharedGetter<Sale> {
        Arc::new(
            AttributeRegistry::new(|s: &Sale| s.id.to_string())
                .attribute("region", |s: &Sale| s.region)
                .attribute("country", |s: &Sale| s.country),
        )
    }

    fn tree(default_expanded: bool) -> Arc<GroupingTree<Sale>> {
        let levels = vec![
            GroupLevel::new("region", |s: &Sale| s.region.to_string())
                .with_records([GroupRecord::new("emea", "Europe")]),
            GroupLevel::new("country", |s: &Sale| s.country.to_string()),
        ];
        GroupingTree::new("sales", getter(), levels, default_expanded)
    }

    fn paths(tree: &GroupingTree<Sale>) -> Vec<String> {
        tree.flat_list().items().into_iter().map(|row| row.path).collect()
    }

    #[test]
    fn test_collapsed_tree_shows_top_level() {
        let tree = tree(false);
        tree.add_item(sale(1, "emea", "de"));
        tree.add_item(sale(2, "emea", "fr"));
        tree.add_item(sale(3, "apac", "jp"));

        assert_eq!(paths(&tree), vec!["/apac", "/emea"]);
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.is_expanded("/emea"), Some(false));
        assert_eq!(tree.is_expanded("/"), None);
    }

    #[test]
    fn test_expand_and_collapse() {
        let tree = tree(false);
        tree.add_item(sale(1, "emea", "de"));
        tree.add_item(sale(2, "emea", "fr"));

        assert!(tree.set_expanded("/emea", true));
        assert!(!tree.set_expanded("/emea", true));
        assert_eq!(paths(&tree), vec!["/emea", "/emea/de", "/emea/fr"]);

        assert!(tree.set_expanded("/emea/de", true));
        assert_eq!(
            paths(&tree),
            vec!["/emea", "/emea/de", "/emea/de/1", "/emea/fr"]
        );

        // Collapsing the parent collapses its descendants too.
        assert!(tree.set_expanded("/emea", false));
        assert_eq!(paths(&tree), vec!["/emea"]);
        assert_eq!(tree.is_expanded("/emea/de"), Some(false));

        assert!(tree.set_expanded("/emea", true));
        assert_eq!(paths(&tree), vec!["/emea", "/emea/de", "/emea/fr"]);
        assert!(!tree.set_expanded("/nowhere", true));
    }

    #[test]
    fn test_expanding_hidden_group_keeps_rows() {
        let tree = tree(false);
        tree.add_item(sale(1, "emea", "de"));
        assert!(tree.set_expanded("/emea/de", true));
        assert_eq!(paths(&tree), vec!["/emea"]);

        // The child's own flag is honoured once the parent opens.
        tree.set_expanded("/emea", true);
        assert_eq!(paths(&tree), vec!["/emea", "/emea/de", "/emea/de/1"]);
    }

    #[test]
    fn test_rows_carry_level_and_text() {
        let tree = tree(true);
        tree.add_item(sale(1, "emea", "de"));
        let rows = tree.flat_list().items();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].level, ".");
        assert!(matches!(&rows[0].kind, RowKind::Group { text, .. } if text == "Europe"));
        assert_eq!(rows[2].level, "...");
        assert_eq!(rows[2].item(), Some(&sale(1, "emea", "de")));

        // "de" had no record and got a placeholder.
        let record = tree.levels()[1].records().get("de").unwrap();
        assert!(record.placeholder);
    }

    #[test]
    fn test_removal_prunes_empty_groups() {
        let tree = tree(true);
        tree.add_item(sale(1, "emea", "de"));
        tree.add_item(sale(2, "emea", "fr"));

        assert!(tree.remove_item(&sale(1, "emea", "de")));
        assert!(!tree.contains_path("/emea/de"));
        assert!(tree.contains_path("/emea"));

        assert!(tree.remove_key("2"));
        assert_eq!(tree.node_count(), 0);
        assert!(tree.flat_list().is_empty());
        assert!(!tree.remove_key("2"));
    }

    #[test]
    fn test_update_moves_between_groups() {
        let tree = tree(true);
        tree.add_item(sale(1, "emea", "de"));
        tree.update_item(sale(1, "emea", "fr"));
        assert_eq!(paths(&tree), vec!["/emea", "/emea/fr", "/emea/fr/1"]);

        tree.update_item(sale(1, "emea", "fr"));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_attach_follows_source() {
        let source = KeyedList::new("sales", getter());
        source.add(sale(1, "emea", "de"));
        let tree = tree(true);
        let shared: SharedView<Sale> = source.clone();
        tree.attach(&shared);
        assert_eq!(tree.len(), 1);

        tree.set_expanded("/emea/de", false);
        source.add(sale(2, "apac", "jp"));
        source.add(sale(3, "emea", "de"));
        assert_eq!(
            paths(&tree),
            vec!["/apac", "/apac/jp", "/apac/jp/2", "/emea", "/emea/de"]
        );

        // A fresh snapshot keeps the collapsed flag.
        source.snapshot(vec![sale(3, "emea", "de")]);
        assert_eq!(paths(&tree), vec!["/emea", "/emea/de"]);

        source.remove_key("3");
        assert_eq!(tree.node_count(), 0);

        tree.detach();
        assert_eq!(source.observer_count(), 0);
    }

    #[test]
    fn test_paths_address_slash_and_empty_keys() {
        let levels = vec![GroupLevel::new("region", |s: &Sale| s.region.to_string())];
        let tree = GroupingTree::new("sales", getter(), levels, false);
        tree.add_item(sale(1, "usr/bin", "x"));
        tree.add_item(sale(2, "", "y"));
        assert_eq!(paths(&tree), vec!["/", "/usr\\/bin"]);
        assert!(tree.contains_path("/"));
        assert!(tree.contains_path("/usr\\/bin"));
        assert!(!tree.contains_path("/usr/bin"));
        assert_eq!(tree.is_expanded(""), None);
        assert_eq!(tree.is_expanded("/"), Some(false));

        assert!(tree.set_expanded("/usr\\/bin", true));
        assert_eq!(paths(&tree), vec!["/", "/usr\\/bin", "/usr\\/bin/1"]);

        assert!(tree.set_expanded("/", true));
        assert_eq!(paths(&tree), vec!["/", "//2", "/usr\\/bin", "/usr\\/bin/1"]);
        assert!(!tree.set_expanded("", true));
    }

    #[test]
    fn test_display_path_round_trips_escapes() {
        let path: Vec<String> = vec!["a\\b".into(), "".into(), "c/d".into()];
        let shown = display_path(&path);
        assert_eq!(shown, "/a\\\\b//c\\/d");
        assert_eq!(parse_path(&shown), path);
        assert!(parse_path("").is_empty());
    }
}
