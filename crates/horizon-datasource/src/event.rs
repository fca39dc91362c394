//! Change events emitted by reactive views.

use serde::{Deserialize, Serialize};

/// The kind of a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// An item entered the view.
    Add,
    /// An item in the view changed in place.
    Update,
    /// An item left the view.
    Remove,
    /// The view was emptied.
    Clear,
    /// The full contents of the view, delivered first to every new observer
    /// and after bulk loads.
    Snapshot,
    /// The view was destroyed; no further events follow.
    Destroy,
}

/// A change to a reactive view.
///
/// `index` is the item's position in the emitting view's ordering at the
/// moment of emission. For [`ChangeKind::Remove`] it is the position the item
/// had before it was removed. Events that are not about a single item carry
/// no index.
#[derive(Debug, Clone)]
pub struct ChangeEvent<T> {
    /// What happened.
    pub kind: ChangeKind,
    /// Position in the emitting view.
    pub index: Option<usize>,
    /// The item after the change (`Add`, `Update`).
    pub new_item: Option<T>,
    /// The item before the change (`Update`, `Remove`).
    pub old_item: Option<T>,
    /// The full contents, in view order (`Snapshot`).
    pub snapshot: Option<Vec<T>>,
}

impl<T> ChangeEvent<T> {
    fn bare(kind: ChangeKind) -> Self {
        Self {
            kind,
            index: None,
            new_item: None,
            old_item: None,
            snapshot: None,
        }
    }

    /// An item was added at `index`.
    pub fn add(index: usize, item: T) -> Self {
        Self {
            index: Some(index),
            new_item: Some(item),
            ..Self::bare(ChangeKind::Add)
        }
    }

    /// The item at `index` changed from `old` to `new`.
    pub fn update(index: usize, new: T, old: T) -> Self {
        Self {
            index: Some(index),
            new_item: Some(new),
            old_item: Some(old),
            ..Self::bare(ChangeKind::Update)
        }
    }

    /// The item that was at `index` was removed.
    pub fn remove(index: usize, old: T) -> Self {
        Self {
            index: Some(index),
            old_item: Some(old),
            ..Self::bare(ChangeKind::Remove)
        }
    }

    /// The view was cleared.
    pub fn clear() -> Self {
        Self::bare(ChangeKind::Clear)
    }

    /// The full contents of the view.
    pub fn snapshot(items: Vec<T>) -> Self {
        Self {
            snapshot: Some(items),
            ..Self::bare(ChangeKind::Snapshot)
        }
    }

    /// The view was destroyed.
    pub fn destroy() -> Self {
        Self::bare(ChangeKind::Destroy)
    }

    /// Returns the item the event is about: the new item if there is one,
    /// otherwise the old one.
    pub fn item(&self) -> Option<&T> {
        self.new_item.as_ref().or(self.old_item.as_ref())
    }

    /// Returns the snapshot contents, or an empty slice.
    pub fn snapshot_items(&self) -> &[T] {
        self.snapshot.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let add = ChangeEvent::add(3, "a");
        assert_eq!(add.kind, ChangeKind::Add);
        assert_eq!(add.index, Some(3));
        assert_eq!(add.item(), Some(&"a"));

        let update = ChangeEvent::update(1, "new", "old");
        assert_eq!(update.item(), Some(&"new"));
        assert_eq!(update.old_item, Some("old"));

        let remove = ChangeEvent::remove(0, "gone");
        assert_eq!(remove.item(), Some(&"gone"));
        assert!(remove.new_item.is_none());
    }

    #[test]
    fn test_snapshot_items() {
        let snapshot = ChangeEvent::snapshot(vec![1, 2, 3]);
        assert_eq!(snapshot.snapshot_items(), &[1, 2, 3]);
        assert!(ChangeEvent::<i32>::clear().snapshot_items().is_empty());
        assert_eq!(ChangeEvent::<i32>::destroy().index, None);
    }
}
