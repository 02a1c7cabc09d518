//! Item types shared by every engine component.
//!
//! `Item` is the canonical, server-confirmed shape. `HierarchicalItem` is the
//! derived tree view handed to the UI and is never persisted.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SyncError;

/// Kind of entity stored in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// Container for other items.
    #[default]
    Folder,
    /// Rich-text note.
    Note,
    /// Embedded video.
    Video,
    /// Section heading grouping siblings.
    Section,
    /// Checkable task.
    Task,
}

impl ItemType {
    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::Note => "note",
            Self::Video => "video",
            Self::Section => "section",
            Self::Task => "task",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "folder" => Ok(Self::Folder),
            "note" => Ok(Self::Note),
            "video" => Ok(Self::Video),
            "section" => Ok(Self::Section),
            "task" => Ok(Self::Task),
            other => Err(SyncError::InvalidInput(format!("Unknown item type: {other}"))),
        }
    }
}

const fn default_true() -> bool {
    true
}

/// A canonical item as known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub workspace_id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub order_index: i64,
    /// Soft-delete flag; inactive items are hidden but restorable.
    #[serde(default = "default_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    /// Client-generated UUID sent with the create and echoed back by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Item {
    /// Create an active root item with default values.
    #[must_use]
    pub fn new(id: impl Into<String>, workspace_id: impl Into<String>, item_type: ItemType, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            item_type,
            title: title.into(),
            content: None,
            youtube_url: None,
            youtube_id: None,
            parent_id: None,
            order_index: 0,
            active: true,
            created_at: Utc::now(),
            updated_at: None,
            completed: None,
            client_id: None,
        }
    }

    /// Builder-style parent assignment.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Builder-style order assignment.
    #[must_use]
    pub const fn with_order(mut self, order_index: i64) -> Self {
        self.order_index = order_index;
        self
    }

    /// Check if this is a root item (no parent).
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// An item together with its ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchicalItem {
    #[serde(flatten)]
    pub item: Item,
    #[serde(default)]
    pub children: Vec<HierarchicalItem>,
}

impl HierarchicalItem {
    /// Wrap an item without children.
    #[must_use]
    pub const fn leaf(item: Item) -> Self {
        Self {
            item,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.item.id
    }

    /// Number of nodes in this subtree, including `self`.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(Self::len).sum::<usize>()
    }

    /// Always false; a node counts itself.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Depth-first search for a node by id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Self> {
        if self.item.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// Find a node anywhere in a forest.
#[must_use]
pub fn find_in_forest<'a>(forest: &'a [HierarchicalItem], id: &str) -> Option<&'a HierarchicalItem> {
    forest.iter().find_map(|n| n.find(id))
}

/// Pre-order list of every item in a forest.
#[must_use]
pub fn flatten_forest(forest: &[HierarchicalItem]) -> Vec<&Item> {
    fn walk<'a>(nodes: &'a [HierarchicalItem], out: &mut Vec<&'a Item>) {
        for node in nodes {
            out.push(&node.item);
            walk(&node.children, out);
        }
    }

    let mut out = Vec::new();
    walk(forest, &mut out);
    out
}

/// Creation payload sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub workspace_id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl NewItem {
    #[must_use]
    pub fn new(workspace_id: impl Into<String>, item_type: ItemType, title: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            item_type,
            title: title.into(),
            content: None,
            youtube_url: None,
            youtube_id: None,
            parent_id: None,
            order_index: None,
            client_id: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Materialize the payload as a local item with the given id.
    #[must_use]
    pub fn to_item(&self, id: &str, now: DateTime<Utc>) -> Item {
        Item {
            id: id.to_string(),
            workspace_id: self.workspace_id.clone(),
            item_type: self.item_type,
            title: self.title.clone(),
            content: self.content.clone(),
            youtube_url: self.youtube_url.clone(),
            youtube_id: self.youtube_id.clone(),
            parent_id: self.parent_id.clone(),
            order_index: self.order_index.unwrap_or(0),
            active: true,
            created_at: now,
            updated_at: None,
            completed: None,
            client_id: self.client_id.clone(),
        }
    }
}

/// Fields of an item that callers may edit one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemField {
    Title,
    Content,
    YoutubeUrl,
    YoutubeId,
    Completed,
    ParentId,
    OrderIndex,
}

impl ItemField {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Content => "content",
            Self::YoutubeUrl => "youtube_url",
            Self::YoutubeId => "youtube_id",
            Self::Completed => "completed",
            Self::ParentId => "parent_id",
            Self::OrderIndex => "order_index",
        }
    }
}

impl FromStr for ItemField {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(Self::Title),
            "content" => Ok(Self::Content),
            "youtube_url" | "youtubeUrl" => Ok(Self::YoutubeUrl),
            "youtube_id" | "youtubeId" => Ok(Self::YoutubeId),
            "completed" => Ok(Self::Completed),
            "parent_id" | "parentId" => Ok(Self::ParentId),
            "order_index" | "orderIndex" => Ok(Self::OrderIndex),
            other => Err(SyncError::InvalidInput(format!("Unknown item field: {other}"))),
        }
    }
}

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

/// Partial update of an item. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    /// `Some(None)` moves the item to the root.
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ItemPatch {
    /// Build a single-field patch from a loosely typed value.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidInput` if the value has the wrong shape.
    pub fn from_field(field: ItemField, value: &serde_json::Value) -> crate::Result<Self> {
        let mut patch = Self::default();
        let bad = || {
            SyncError::InvalidInput(format!("Invalid value for {}: {value}", field.as_str()))
        };
        match field {
            ItemField::Title => patch.title = Some(value.as_str().ok_or_else(bad)?.to_string()),
            ItemField::Content => patch.content = Some(value.as_str().ok_or_else(bad)?.to_string()),
            ItemField::YoutubeUrl => {
                patch.youtube_url = Some(value.as_str().ok_or_else(bad)?.to_string());
            },
            ItemField::YoutubeId => {
                patch.youtube_id = Some(value.as_str().ok_or_else(bad)?.to_string());
            },
            ItemField::Completed => patch.completed = Some(value.as_bool().ok_or_else(bad)?),
            ItemField::ParentId => {
                patch.parent_id = Some(if value.is_null() {
                    None
                } else {
                    Some(value.as_str().ok_or_else(bad)?.to_string())
                });
            },
            ItemField::OrderIndex => patch.order_index = Some(value.as_i64().ok_or_else(bad)?),
        }
        Ok(patch)
    }

    /// True when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Fold a later patch into this one; fields set in `later` win.
    pub fn merge(&mut self, later: Self) {
        if later.title.is_some() {
            self.title = later.title;
        }
        if later.content.is_some() {
            self.content = later.content;
        }
        if later.youtube_url.is_some() {
            self.youtube_url = later.youtube_url;
        }
        if later.youtube_id.is_some() {
            self.youtube_id = later.youtube_id;
        }
        if later.completed.is_some() {
            self.completed = later.completed;
        }
        if later.parent_id.is_some() {
            self.parent_id = later.parent_id;
        }
        if later.order_index.is_some() {
            self.order_index = later.order_index;
        }
        if later.active.is_some() {
            self.active = later.active;
        }
        if later.updated_at.is_some() {
            self.updated_at = later.updated_at;
        }
    }

    /// Apply to an item. Returns whether any field changed.
    pub fn apply_to(&self, item: &mut Item) -> bool {
        let before = item.clone();
        if let Some(title) = &self.title {
            item.title.clone_from(title);
        }
        if let Some(content) = &self.content {
            item.content = Some(content.clone());
        }
        if let Some(url) = &self.youtube_url {
            item.youtube_url = Some(url.clone());
        }
        if let Some(yid) = &self.youtube_id {
            item.youtube_id = Some(yid.clone());
        }
        if let Some(completed) = self.completed {
            item.completed = Some(completed);
        }
        if let Some(parent_id) = &self.parent_id {
            item.parent_id.clone_from(parent_id);
        }
        if let Some(order_index) = self.order_index {
            item.order_index = order_index;
        }
        if let Some(active) = self.active {
            item.active = active;
        }
        if let Some(updated_at) = self.updated_at {
            item.updated_at = Some(updated_at);
        }
        *item != before
    }

    /// Apply to a creation payload that has not reached the backend yet.
    pub fn apply_to_new(&self, data: &mut NewItem) {
        if let Some(title) = &self.title {
            data.title.clone_from(title);
        }
        if let Some(content) = &self.content {
            data.content = Some(content.clone());
        }
        if let Some(url) = &self.youtube_url {
            data.youtube_url = Some(url.clone());
        }
        if let Some(yid) = &self.youtube_id {
            data.youtube_id = Some(yid.clone());
        }
        if let Some(parent_id) = &self.parent_id {
            data.parent_id.clone_from(parent_id);
        }
        if let Some(order_index) = self.order_index {
            data.order_index = Some(order_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_type_round_trip_names() {
        assert_eq!(ItemType::Video.as_str(), "video");
        assert_eq!("Section".parse::<ItemType>().unwrap(), ItemType::Section);
        assert!("playlist".parse::<ItemType>().is_err());
    }

    #[test]
    fn test_item_deserialization_defaults() {
        let json = r#"{
            "id": "a1",
            "workspace_id": "ws",
            "type": "note",
            "title": "Hello",
            "created_at": "2024-01-01T10:00:00Z"
        }"#;
        let item: Item = serde_json::from_str(json).unwrap();
        assert!(item.active);
        assert!(item.parent_id.is_none());
        assert_eq!(item.order_index, 0);
        assert_eq!(item.item_type, ItemType::Note);
    }

    #[test]
    fn test_patch_parent_null_vs_absent() {
        let absent: ItemPatch = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert_eq!(absent.parent_id, None);

        let to_root: ItemPatch = serde_json::from_str(r#"{"parent_id":null}"#).unwrap();
        assert_eq!(to_root.parent_id, Some(None));

        let json = serde_json::to_value(&to_root).unwrap();
        assert_eq!(json, json!({"parent_id": null}));
    }

    #[test]
    fn test_patch_merge_later_wins() {
        let mut first = ItemPatch {
            title: Some("one".to_string()),
            content: Some("body".to_string()),
            ..Default::default()
        };
        first.merge(ItemPatch {
            title: Some("two".to_string()),
            ..Default::default()
        });
        assert_eq!(first.title.as_deref(), Some("two"));
        assert_eq!(first.content.as_deref(), Some("body"));
    }

    #[test]
    fn test_patch_apply_is_idempotent() {
        let mut item = Item::new("a", "ws", ItemType::Note, "old");
        let patch = ItemPatch::from_field(ItemField::Title, &json!("new")).unwrap();

        assert!(patch.apply_to(&mut item));
        let once = item.clone();
        assert!(!patch.apply_to(&mut item));
        assert_eq!(item, once);
    }

    #[test]
    fn test_from_field_rejects_wrong_type() {
        assert!(ItemPatch::from_field(ItemField::Completed, &json!("yes")).is_err());
        let patch = ItemPatch::from_field(ItemField::ParentId, &json!(null)).unwrap();
        assert_eq!(patch.parent_id, Some(None));
    }

    #[test]
    fn test_hierarchical_item_find_and_len() {
        let mut root = HierarchicalItem::leaf(Item::new("r", "ws", ItemType::Folder, "root"));
        root.children
            .push(HierarchicalItem::leaf(Item::new("c", "ws", ItemType::Note, "child").with_parent("r")));
        assert_eq!(root.len(), 2);
        assert!(root.find("c").is_some());
        assert!(root.find("zzz").is_none());
        assert_eq!(flatten_forest(std::slice::from_ref(&root)).len(), 2);
    }
}
