//! Tree merge.
//!
//! Combines three sources into one forest:
//! - canonical items from the store,
//! - the live-edit tree (unsaved title/content changes win),
//! - pending items, which are either promoted onto their canonical
//!   counterpart or inserted as-is.
//!
//! The merge never touches its inputs.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::pending::{PendingItem, PendingItems};
use crate::core::{is_temp_id, HierarchicalItem, Item, TreeArena};

/// Merge knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Match pending items by `(parent_id, type, title)` when no id or
    /// client id links them to a canonical item.
    pub heuristic_promotion: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            heuristic_promotion: true,
        }
    }
}

/// A temp id that found its canonical item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub temp_id: String,
    pub real_id: String,
}

/// Result of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub tree: Vec<HierarchicalItem>,
    /// Pending items the caller can now forget.
    pub promoted: Vec<Promotion>,
}

/// Merge canonical items, live edits and pending items into a forest.
#[must_use]
pub fn merge_tree(
    canonical: &[Item],
    live_edits: &[HierarchicalItem],
    pending: &PendingItems,
    options: MergeOptions,
) -> MergeOutcome {
    let hidden = hidden_ids(canonical);
    let mut arena = TreeArena::from_items(canonical.iter().filter(|item| !hidden.contains(&item.id)));

    apply_live_edits(&mut arena, live_edits);

    let mut claimed: HashSet<String> = HashSet::new();
    let mut resolved: HashMap<String, String> = HashMap::new();
    let mut promoted = Vec::new();

    for candidate in pending.iter() {
        let temp_id = candidate.temp_id();
        let Some(real_id) = find_match(&arena, canonical, &hidden, candidate, &claimed, &resolved, options)
        else {
            continue;
        };

        arena.remove(temp_id);
        arena.reparent_children(temp_id, &real_id);
        claimed.insert(real_id.clone());
        resolved.insert(temp_id.to_string(), real_id.clone());
        debug!(temp_id, real_id = %real_id, "promoted pending item");
        promoted.push(Promotion {
            temp_id: temp_id.to_string(),
            real_id,
        });
    }

    for candidate in pending.iter() {
        let temp_id = candidate.temp_id();
        if resolved.contains_key(temp_id) || arena.contains(temp_id) {
            continue;
        }
        let mut item = candidate.item.item.clone();
        if let Some(parent) = item.parent_id.as_deref() {
            if let Some(real) = resolved.get(parent) {
                item.parent_id = Some(real.clone());
            }
        }
        // Under a hidden parent the item is hidden too
        if item
            .parent_id
            .as_deref()
            .is_some_and(|parent| hidden.contains(parent))
        {
            continue;
        }
        arena.insert(item);
    }

    MergeOutcome {
        tree: arena.into_forest(),
        promoted,
    }
}

/// Inactive items plus everything below them.
fn hidden_ids(items: &[Item]) -> HashSet<String> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for item in items {
        if let Some(parent) = item.parent_id.as_deref() {
            children.entry(parent).or_default().push(&item.id);
        }
    }

    let mut hidden = HashSet::new();
    let mut stack: Vec<&str> = items
        .iter()
        .filter(|item| !item.active)
        .map(|item| item.id.as_str())
        .collect();
    while let Some(id) = stack.pop() {
        if !hidden.insert(id.to_string()) {
            continue;
        }
        if let Some(kids) = children.get(id) {
            stack.extend(kids.iter().copied());
        }
    }
    hidden
}

fn apply_live_edits(arena: &mut TreeArena, live: &[HierarchicalItem]) {
    for node in live {
        if let Some(item) = arena.get_mut(node.id()) {
            if item.title != node.item.title {
                item.title.clone_from(&node.item.title);
            }
            if item.content != node.item.content {
                item.content.clone_from(&node.item.content);
            }
        }
        apply_live_edits(arena, &node.children);
    }
}

fn find_match(
    arena: &TreeArena,
    canonical: &[Item],
    hidden: &HashSet<String>,
    candidate: &PendingItem,
    claimed: &HashSet<String>,
    resolved: &HashMap<String, String>,
    options: MergeOptions,
) -> Option<String> {
    let available = |item: &&Item| {
        !is_temp_id(&item.id) && !claimed.contains(&item.id) && !hidden.contains(&item.id)
    };

    // A confirmed create matches its item even when that item is hidden now
    if let Some(real) = candidate.resolved_id.as_deref() {
        if (arena.contains(real) || hidden.contains(real)) && !claimed.contains(real) {
            return Some(real.to_string());
        }
    }

    if let Some(client_id) = candidate.data.client_id.as_deref() {
        if let Some(item) = canonical
            .iter()
            .filter(available)
            .find(|item| item.client_id.as_deref() == Some(client_id))
        {
            return Some(item.id.clone());
        }
    }

    if !options.heuristic_promotion {
        return None;
    }

    let data = &candidate.data;
    let parent = data
        .parent_id
        .as_deref()
        .map(|p| resolved.get(p).map_or(p, String::as_str));
    let created_at = candidate.item.item.created_at;
    canonical
        .iter()
        .filter(available)
        .find(|item| {
            // Only items the backend created after this one was drafted, and
            // never ones that belong to a different client draft.
            item.client_id.is_none()
                && item.created_at >= created_at
                && item.parent_id.as_deref() == parent
                && item.item_type == data.item_type
                && item.title == data.title
        })
        .map(|item| item.id.clone())
}
