//! Flat item list to forest conversion.
//!
//! Items live in an arena indexed by id, so lookups and patches are O(1) while
//! the tree is assembled. Parent links are plain ids; the nested
//! `HierarchicalItem` view is only materialized at the very end.

use std::collections::HashMap;

use super::item::{HierarchicalItem, Item};

/// Flat `id -> item` arena that can be turned into a forest.
#[derive(Debug, Clone, Default)]
pub struct TreeArena {
    slots: Vec<Option<Item>>,
    index: HashMap<String, usize>,
}

impl TreeArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an arena from items; a repeated id keeps the last occurrence.
    pub fn from_items<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = &'a Item>,
    {
        let mut arena = Self::new();
        for item in items {
            arena.insert(item.clone());
        }
        arena
    }

    /// Insert or replace an item.
    pub fn insert(&mut self, item: Item) {
        if let Some(&slot) = self.index.get(&item.id) {
            self.slots[slot] = Some(item);
        } else {
            self.index.insert(item.id.clone(), self.slots.len());
            self.slots.push(Some(item));
        }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Item> {
        self.index.get(id).and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Item> {
        let slot = *self.index.get(id)?;
        self.slots[slot].as_mut()
    }

    /// Remove an item, leaving its children pointing at a missing parent.
    pub fn remove(&mut self, id: &str) -> Option<Item> {
        let slot = self.index.remove(id)?;
        self.slots[slot].take()
    }

    /// Point every item whose parent is `from` at `to`. Returns how many moved.
    pub fn reparent_children(&mut self, from: &str, to: &str) -> usize {
        let mut moved = 0;
        for item in self.slots.iter_mut().flatten() {
            if item.parent_id.as_deref() == Some(from) {
                item.parent_id = Some(to.to_string());
                moved += 1;
            }
        }
        moved
    }

    /// Live items in insertion order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.slots.iter().flatten()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Assemble the forest.
    ///
    /// Items with a missing, self-referencing or cyclic parent are attached at
    /// the root. Siblings are ordered by `order_index`, ties keep insertion order.
    #[must_use]
    pub fn into_forest(self) -> Vec<HierarchicalItem> {
        let mut items: Vec<Option<Item>> = self.slots.into_iter().filter(Option::is_some).collect();
        let n = items.len();

        let position: HashMap<String, usize> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.as_ref().map(|it| (it.id.clone(), i)))
            .collect();

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut has_parent = vec![false; n];
        for (i, item) in items.iter().enumerate() {
            let parent = item
                .as_ref()
                .and_then(|it| it.parent_id.as_deref())
                .and_then(|pid| position.get(pid).copied())
                .filter(|&p| p != i);
            if let Some(p) = parent {
                children[p].push(i);
                has_parent[i] = true;
            }
        }

        let mut roots: Vec<usize> = (0..n).filter(|&i| !has_parent[i]).collect();

        // Anything not reachable from a root sits on a cycle; cut it loose.
        let mut reachable = vec![false; n];
        for &root in &roots {
            mark_reachable(root, &children, &mut reachable);
        }
        for i in 0..n {
            if reachable[i] {
                continue;
            }
            for list in &mut children {
                list.retain(|&c| c != i);
            }
            roots.push(i);
            mark_reachable(i, &children, &mut reachable);
        }

        let order_of = |i: &usize| items[*i].as_ref().map_or(0, |it| it.order_index);
        roots.sort_by_key(order_of);
        for list in &mut children {
            list.sort_by_key(order_of);
        }

        roots
            .into_iter()
            .filter_map(|root| materialize(root, &children, &mut items))
            .collect()
    }
}

fn mark_reachable(start: usize, children: &[Vec<usize>], reachable: &mut [bool]) {
    let mut stack = vec![start];
    while let Some(i) = stack.pop() {
        if reachable[i] {
            continue;
        }
        reachable[i] = true;
        stack.extend(children[i].iter().copied());
    }
}

fn materialize(
    i: usize,
    children: &[Vec<usize>],
    items: &mut [Option<Item>],
) -> Option<HierarchicalItem> {
    let item = items[i].take()?;
    let kids = children[i]
        .iter()
        .filter_map(|&c| materialize(c, children, items))
        .collect();
    Some(HierarchicalItem {
        item,
        children: kids,
    })
}

/// Build a forest from a flat item list.
#[must_use]
pub fn build_hierarchy(items: &[Item]) -> Vec<HierarchicalItem> {
    TreeArena::from_items(items).into_forest()
}
