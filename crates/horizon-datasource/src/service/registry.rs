//! Registered data sources, shared by every session.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use crate::grouping::{GroupingTree, TreeRow};
use crate::logging::targets;
use crate::view::{Item, SharedView, ViewCache};

/// Expand/collapse control of a grouping tree, independent of its item type.
pub trait TreeControl: Send + Sync {
    /// Expands or collapses the group at `path`.
    fn set_expanded(&self, path: &str, expanded: bool) -> bool;

    /// Returns the expanded flag of the group at `path`.
    fn is_expanded(&self, path: &str) -> Option<bool>;
}

impl<T: Item> TreeControl for GroupingTree<T> {
    fn set_expanded(&self, path: &str, expanded: bool) -> bool {
        GroupingTree::set_expanded(self, path, expanded)
    }

    fn is_expanded(&self, path: &str) -> Option<bool> {
        GroupingTree::is_expanded(self, path)
    }
}

struct SourceEntry<T> {
    view: SharedView<T>,
    tree: Option<Arc<dyn TreeControl>>,
}

/// Data sources by id, plus the cache of views derived from them.
///
/// A source can also be looked up by the type name it was registered with;
/// [`canonical_id`](Self::canonical_id) performs that translation.
pub struct SourceRegistry<T> {
    sources: RwLock<HashMap<String, SourceEntry<T>>>,
    aliases: RwLock<HashMap<String, String>>,
    cache: Arc<ViewCache<T>>,
}

impl<T: Item> SourceRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
            cache: Arc::new(ViewCache::new()),
        }
    }

    /// Registers `list` under `id`, also reachable through `type_name`.
    ///
    /// Registered lists are permanent: idle eviction never destroys them.
    /// Registering an id again replaces the previous source.
    pub fn register(&self, id: impl Into<String>, type_name: impl Into<String>, list: SharedView<T>) {
        self.insert(id.into(), type_name.into(), list, None);
    }

    fn insert(
        &self,
        id: String,
        type_name: String,
        view: SharedView<T>,
        tree: Option<Arc<dyn TreeControl>>,
    ) {
        view.set_permanent(true);
        debug!(
            target: targets::SERVICE,
            %id,
            %type_name,
            tree = tree.is_some(),
            "data source registered"
        );
        if !type_name.is_empty() {
            self.aliases.write().insert(type_name, id.clone());
        }
        self.sources.write().insert(id, SourceEntry { view, tree });
    }

    /// Removes the source `id` and its aliases.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.sources.write().remove(id).is_some();
        if removed {
            self.aliases.write().retain(|_, target| target != id);
            debug!(target: targets::SERVICE, %id, "data source unregistered");
        }
        removed
    }

    /// Translates `id_or_type` to a registered id.
    pub fn canonical_id(&self, id_or_type: &str) -> Option<String> {
        if self.sources.read().contains_key(id_or_type) {
            return Some(id_or_type.to_string());
        }
        self.aliases.read().get(id_or_type).cloned()
    }

    /// Returns the source registered as `id_or_type`.
    pub fn source(&self, id_or_type: &str) -> Option<SharedView<T>> {
        let id = self.canonical_id(id_or_type)?;
        self.sources.read().get(&id).map(|entry| entry.view.clone())
    }

    /// Returns the tree control of the source `id_or_type`, if it is a
    /// grouping tree.
    pub fn tree(&self, id_or_type: &str) -> Option<Arc<dyn TreeControl>> {
        let id = self.canonical_id(id_or_type)?;
        self.sources.read().get(&id).and_then(|entry| entry.tree.clone())
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.sources.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the shared view cache.
    pub fn cache(&self) -> &Arc<ViewCache<T>> {
        &self.cache
    }

    /// Evicts derived views that have been unobserved for `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.cache.evict_idle(max_idle)
    }
}

impl<T: Item> SourceRegistry<TreeRow<T>> {
    /// Registers the flat list of `tree` under the tree's id.
    pub fn register_tree(&self, type_name: impl Into<String>, tree: Arc<GroupingTree<T>>) {
        let id = tree.id().to_string();
        let view = tree.shared_view();
        let control: Arc<dyn TreeControl> = tree;
        self.insert(id, type_name.into(), view, Some(control));
    }
}

impl<T: Item> Default for SourceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SourceRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.sources.read().len())
            .field("aliases", &self.aliases.read().len())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::getter::{AttributeRegistry, SharedGetter};
    use crate::grouping::GroupLevel;
    use crate::view::KeyedList;

    fn getter() -> SharedGetter<String> {
        Arc::new(AttributeRegistry::new(|s: &String| s.clone()))
    }

    #[test]
    fn test_lookup_by_id_and_type() {
        let registry = SourceRegistry::new();
        let list: SharedView<String> = KeyedList::new("users", getter());
        registry.register("users", "User", list.clone());

        assert_eq!(registry.canonical_id("users").as_deref(), Some("users"));
        assert_eq!(registry.canonical_id("User").as_deref(), Some("users"));
        assert!(registry.canonical_id("Group").is_none());
        assert!(Arc::ptr_eq(&registry.source("User").unwrap(), &list));
        assert!(list.is_permanent());
        assert!(registry.tree("users").is_none());

        assert!(registry.unregister("users"));
        assert!(registry.source("User").is_none());
        assert!(!registry.unregister("users"));
    }

    #[test]
    fn test_register_tree() {
        let tree = GroupingTree::new(
            "by_initial",
            getter(),
            vec![GroupLevel::new("initial", |s: &String| s[..1].to_string())],
            false,
        );
        tree.add_item("ada".to_string());

        let registry = SourceRegistry::new();
        registry.register_tree("UserTree", tree.clone());
        assert_eq!(registry.ids(), vec!["by_initial"]);

        let control = registry.tree("UserTree").unwrap();
        assert!(control.set_expanded("/a", true));
        assert_eq!(control.is_expanded("/a"), Some(true));
        assert_eq!(registry.source("by_initial").unwrap().len(), 2);
    }
}
