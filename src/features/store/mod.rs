//! Optimistic mutation store.
//!
//! Holds the canonical item array. Every mutator reads the latest snapshot,
//! builds a new array and swaps it in under the lock, so readers holding an
//! older `Arc` never observe a half-applied change. The version counter only
//! moves when the array actually changed.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tracing::{debug, warn};

use crate::core::{Item, ItemPatch};

#[derive(Debug, Default)]
struct Snapshot {
    items: Arc<Vec<Item>>,
    version: u64,
}

/// Canonical item array with atomic, synchronous mutators.
#[derive(Debug, Default)]
pub struct ItemStore {
    inner: RwLock<Snapshot>,
}

impl ItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_items(items: Vec<Item>) -> Self {
        let store = Self::new();
        store.replace_all(items);
        store
    }

    /// The current array. Cheap; clones the `Arc`.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Item>> {
        Arc::clone(&self.read().items)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.read().version
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Item> {
        self.read().items.iter().find(|item| item.id == id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.read().items.iter().any(|item| item.id == id)
    }

    /// Active children of `parent_id` (root items for `None`).
    #[must_use]
    pub fn siblings(&self, parent_id: Option<&str>) -> Vec<Item> {
        self.read()
            .items
            .iter()
            .filter(|item| item.active && item.parent_id.as_deref() == parent_id)
            .cloned()
            .collect()
    }

    /// Add an item created locally. No-op if the id is already present.
    pub fn add_optimistic(&self, item: Item) -> bool {
        self.mutate(|items| {
            if items.iter().any(|existing| existing.id == item.id) {
                return false;
            }
            items.push(item);
            true
        })
    }

    /// Deactivate every currently active item in `ids`. Returns how many changed.
    pub fn mark_as_deleted(&self, ids: &[String]) -> usize {
        let mut changed = 0;
        self.mutate(|items| {
            for item in items.iter_mut() {
                if item.active && ids.contains(&item.id) {
                    item.active = false;
                    changed += 1;
                }
            }
            changed > 0
        });
        changed
    }

    /// Reactivate an item.
    pub fn mark_as_restored(&self, id: &str) -> bool {
        self.mutate(|items| {
            items
                .iter_mut()
                .find(|item| item.id == id && !item.active)
                .map(|item| item.active = true)
                .is_some()
        })
    }

    /// Remove an item from the array entirely.
    pub fn remove_permanently(&self, id: &str) -> Option<Item> {
        let mut removed = None;
        self.mutate(|items| {
            if let Some(pos) = items.iter().position(|item| item.id == id) {
                removed = Some(items.remove(pos));
            }
            removed.is_some()
        });
        removed
    }

    /// Apply a patch and stamp `updated_at`. Missing ids are logged and ignored.
    pub fn update_in_store(&self, id: &str, patch: &ItemPatch) -> bool {
        let found = self.mutate(|items| {
            let Some(item) = items.iter_mut().find(|item| item.id == id) else {
                return false;
            };
            if patch.apply_to(item) {
                if patch.updated_at.is_none() {
                    item.updated_at = Some(Utc::now());
                }
                return true;
            }
            false
        });
        if !found && !self.contains(id) {
            warn!(id, "update for an item that is not in the store");
        }
        found
    }

    /// Run `f` on one item. Returns whether the item exists and changed.
    pub fn modify<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Item),
    {
        self.mutate(|items| {
            let Some(item) = items.iter_mut().find(|item| item.id == id) else {
                return false;
            };
            let before = item.clone();
            f(item);
            *item != before
        })
    }

    /// Replace the array wholesale, e.g. after a full resync.
    pub fn replace_all(&self, items: Vec<Item>) {
        let mut guard = self.write();
        if *guard.items == items {
            return;
        }
        guard.items = Arc::new(items);
        guard.version += 1;
        debug!(version = guard.version, len = guard.items.len(), "store replaced");
    }

    /// Swap a locally created item for its backend counterpart.
    ///
    /// Children pointing at `temp_id` are re-parented to the real id.
    pub fn promote(&self, temp_id: &str, item: Item) -> bool {
        let real_id = item.id.clone();
        self.mutate(|items| {
            items.retain(|existing| existing.id != temp_id && existing.id != real_id);
            for child in items.iter_mut() {
                if child.parent_id.as_deref() == Some(temp_id) {
                    child.parent_id = Some(real_id.clone());
                }
            }
            items.push(item);
            true
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Snapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy-on-write update. `f` returns whether it changed anything; only then
    /// is the new array published.
    fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut Vec<Item>) -> bool,
    {
        let mut guard = self.write();
        let mut next = (*guard.items).clone();
        if !f(&mut next) {
            return false;
        }
        guard.items = Arc::new(next);
        guard.version += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ItemType;

    fn item(id: &str) -> Item {
        Item::new(id, "ws", ItemType::Note, id)
    }

    #[test]
    fn test_add_optimistic_is_noop_for_existing_id() {
        let store = ItemStore::new();
        assert!(store.add_optimistic(item("a")));
        let before = store.snapshot();

        assert!(!store.add_optimistic(item("a")));

        assert!(Arc::ptr_eq(&before, &store.snapshot()));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_soft_delete_and_restore_round_trip() {
        let store = ItemStore::with_items(vec![item("a"), item("b")]);
        let original = store.get("a").unwrap();

        assert_eq!(store.mark_as_deleted(&["a".to_string()]), 1);
        assert!(!store.get("a").unwrap().active);
        assert_eq!(store.snapshot().len(), 2);

        // Deleting again changes nothing
        let version = store.version();
        assert_eq!(store.mark_as_deleted(&["a".to_string()]), 0);
        assert_eq!(store.version(), version);

        assert!(store.mark_as_restored("a"));
        assert_eq!(store.get("a").unwrap(), original);
    }

    #[test]
    fn test_remove_permanently() {
        let store = ItemStore::with_items(vec![item("a"), item("b")]);

        assert_eq!(store.remove_permanently("a").unwrap().id, "a");
        assert!(store.remove_permanently("a").is_none());
        assert!(!store.contains("a"));
    }

    #[test]
    fn test_update_in_store() {
        let store = ItemStore::with_items(vec![item("a")]);
        let patch = ItemPatch {
            title: Some("Renamed".to_string()),
            ..ItemPatch::default()
        };

        assert!(store.update_in_store("a", &patch));
        let updated = store.get("a").unwrap();
        assert_eq!(updated.title, "Renamed");
        assert!(updated.updated_at.is_some());

        // Same value again is not a change
        let version = store.version();
        assert!(!store.update_in_store("a", &patch));
        assert_eq!(store.version(), version);

        assert!(!store.update_in_store("missing", &patch));
    }

    #[test]
    fn test_snapshots_are_copy_on_write() {
        let store = ItemStore::with_items(vec![item("a")]);
        let old = store.snapshot();

        store.mark_as_deleted(&["a".to_string()]);

        assert!(old[0].active);
        assert!(!store.snapshot()[0].active);
    }

    #[test]
    fn test_promote_rewrites_children() {
        let mut child = item("b");
        child.parent_id = Some("temp-1".to_string());
        let store = ItemStore::with_items(vec![item("temp-1"), child]);

        store.promote("temp-1", item("real-5"));

        assert!(!store.contains("temp-1"));
        assert_eq!(store.get("b").unwrap().parent_id.as_deref(), Some("real-5"));
    }

    #[test]
    fn test_modify() {
        let store = ItemStore::with_items(vec![item("a")]);

        assert!(store.modify("a", |it| it.order_index = 7));
        assert!(!store.modify("a", |it| it.order_index = 7));
        assert!(!store.modify("missing", |it| it.order_index = 1));
        assert_eq!(store.get("a").unwrap().order_index, 7);
    }

    #[test]
    fn test_siblings_skip_inactive() {
        let mut a = item("a");
        a.parent_id = Some("p".to_string());
        let mut b = item("b");
        b.parent_id = Some("p".to_string());
        b.active = false;
        let store = ItemStore::with_items(vec![a, b, item("c")]);

        let siblings = store.siblings(Some("p"));
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].id, "a");
        assert_eq!(store.siblings(None).len(), 1);
    }
}
