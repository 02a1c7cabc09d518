//! Items that exist only on this client until their create is confirmed.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::core::{HierarchicalItem, ItemPatch, NewItem};

/// A locally created item waiting for its canonical counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
    /// Displayed node, keyed by the temp id.
    pub item: HierarchicalItem,
    /// Payload sent (or to be sent) with the create.
    pub data: NewItem,
    /// Backend id once the create succeeded.
    pub resolved_id: Option<String>,
}

impl PendingItem {
    #[must_use]
    pub fn new(temp_id: &str, data: NewItem) -> Self {
        Self {
            item: HierarchicalItem::leaf(data.to_item(temp_id, Utc::now())),
            data,
            resolved_id: None,
        }
    }

    #[must_use]
    pub fn temp_id(&self) -> &str {
        self.item.id()
    }

    /// Apply an edit made before the item reached the backend.
    pub fn apply(&mut self, patch: &ItemPatch) {
        patch.apply_to(&mut self.item.item);
        patch.apply_to_new(&mut self.data);
    }
}

/// Pending items keyed by temp id. Temp ids embed a timestamp, so iteration
/// roughly follows creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingItems {
    items: BTreeMap<String, PendingItem>,
}

impl PendingItems {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pending: PendingItem) {
        self.items.insert(pending.temp_id().to_string(), pending);
    }

    pub fn remove(&mut self, temp_id: &str) -> Option<PendingItem> {
        self.items.remove(temp_id)
    }

    #[must_use]
    pub fn get(&self, temp_id: &str) -> Option<&PendingItem> {
        self.items.get(temp_id)
    }

    pub fn get_mut(&mut self, temp_id: &str) -> Option<&mut PendingItem> {
        self.items.get_mut(temp_id)
    }

    #[must_use]
    pub fn contains(&self, temp_id: &str) -> bool {
        self.items.contains_key(temp_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingItem> {
        self.items.values()
    }

    /// Temp ids whose parent is `temp_id`.
    #[must_use]
    pub fn children_of(&self, temp_id: &str) -> Vec<String> {
        self.items
            .values()
            .filter(|p| p.data.parent_id.as_deref() == Some(temp_id))
            .map(|p| p.temp_id().to_string())
            .collect()
    }

    /// Point pending children of `from` at `to`.
    pub fn reparent(&mut self, from: &str, to: &str) {
        for pending in self.items.values_mut() {
            if pending.data.parent_id.as_deref() == Some(from) {
                pending.data.parent_id = Some(to.to_string());
                pending.item.item.parent_id = Some(to.to_string());
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ItemType;

    #[test]
    fn test_apply_updates_item_and_payload() {
        let mut pending = PendingItem::new("temp-1-a", NewItem::new("ws", ItemType::Note, "Draft"));
        pending.apply(&ItemPatch {
            title: Some("Final".to_string()),
            ..ItemPatch::default()
        });

        assert_eq!(pending.item.item.title, "Final");
        assert_eq!(pending.data.title, "Final");
        assert_eq!(pending.temp_id(), "temp-1-a");
    }

    #[test]
    fn test_reparent_children() {
        let mut items = PendingItems::new();
        items.insert(PendingItem::new("temp-1-a", NewItem::new("ws", ItemType::Folder, "A")));
        items.insert(PendingItem::new(
            "temp-2-b",
            NewItem::new("ws", ItemType::Note, "B").with_parent(Some("temp-1-a".to_string())),
        ));

        assert_eq!(items.children_of("temp-1-a"), vec!["temp-2-b".to_string()]);

        items.reparent("temp-1-a", "real-5");

        let child = items.get("temp-2-b").unwrap();
        assert_eq!(child.data.parent_id.as_deref(), Some("real-5"));
        assert_eq!(child.item.item.parent_id.as_deref(), Some("real-5"));
    }
}
