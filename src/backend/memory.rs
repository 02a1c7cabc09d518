//! In-process persistence service.
//!
//! Behaves like a real backend where it matters to the engine: it assigns ids,
//! echoes `client_id`, rejects duplicate sibling order indices with a conflict
//! and reports missing entities as not-found. Failures can be injected.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::service::{BatchSyncResult, PersistenceService};
use crate::core::{Item, ItemPatch, NewItem};
use crate::error::{Result, SyncError};
use crate::features::sync::{OperationType, PendingOperation};

#[derive(Debug, Default)]
struct State {
    items: Vec<Item>,
    next_id: u64,
    offline: bool,
    injected: VecDeque<SyncError>,
    order_conflicts: u32,
    calls: Vec<String>,
}

impl State {
    fn position(&self, id: &str) -> Result<usize> {
        self.items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| SyncError::NotFound(format!("item {id}")))
    }

    fn index_taken(&self, workspace_id: &str, parent_id: Option<&str>, order_index: i64, except: &str) -> bool {
        self.items.iter().any(|item| {
            item.active
                && item.id != except
                && item.workspace_id == workspace_id
                && item.parent_id.as_deref() == parent_id
                && item.order_index == order_index
        })
    }

    fn next_index(&self, workspace_id: &str, parent_id: Option<&str>) -> i64 {
        self.items
            .iter()
            .filter(|item| item.workspace_id == workspace_id && item.parent_id.as_deref() == parent_id)
            .map(|item| item.order_index + 1)
            .max()
            .unwrap_or(0)
    }

    /// Shared prologue of every call: record it and fail if asked to.
    fn enter(&mut self, call: String) -> Result<()> {
        self.calls.push(call);
        if self.offline {
            return Err(SyncError::Network("backend unreachable".to_string()));
        }
        self.injected.pop_front().map_or(Ok(()), Err)
    }

    fn apply(&mut self, op: &PendingOperation) -> Result<()> {
        match op.op_type {
            OperationType::Create => {
                return Err(SyncError::InvalidInput(
                    "creates are not accepted in batches".to_string(),
                ))
            },
            OperationType::Update => {
                let patch = op.patch()?;
                let pos = self.position(&op.id)?;
                patch.apply_to(&mut self.items[pos]);
            },
            OperationType::Delete => {
                let pos = self.position(&op.id)?;
                if op.delete_payload().permanent {
                    self.items.remove(pos);
                } else {
                    self.items[pos].active = false;
                }
            },
            OperationType::Move | OperationType::UpdateOrder => {
                let target = op.move_target()?;
                self.set_order(&op.id, target.order_index, target.parent_id)?;
            },
        }
        Ok(())
    }

    fn set_order(&mut self, id: &str, order_index: i64, parent_id: Option<String>) -> Result<Item> {
        let pos = self.position(id)?;
        let workspace_id = self.items[pos].workspace_id.clone();
        if self.order_conflicts > 0 || self.index_taken(&workspace_id, parent_id.as_deref(), order_index, id) {
            self.order_conflicts = self.order_conflicts.saturating_sub(1);
            return Err(SyncError::Conflict(format!(
                "duplicate key value violates unique constraint (order_index {order_index})"
            )));
        }
        let item = &mut self.items[pos];
        item.parent_id = parent_id;
        item.order_index = order_index;
        item.updated_at = Some(Utc::now());
        Ok(item.clone())
    }
}

/// A [`PersistenceService`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with existing items.
    #[must_use]
    pub fn with_items(items: Vec<Item>) -> Self {
        let backend = Self::new();
        backend.lock().items = items;
        backend
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call fail with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fail the next call with `error`. Injected errors are consumed in order.
    pub fn fail_next(&self, error: SyncError) {
        self.lock().injected.push_back(error);
    }

    /// Make the next `count` order writes fail with a conflict.
    pub fn inject_order_conflicts(&self, count: u32) {
        self.lock().order_conflicts = count;
    }

    /// Insert or replace an item directly, bypassing conflict checks.
    pub fn put(&self, item: Item) {
        let mut state = self.lock();
        state.items.retain(|existing| existing.id != item.id);
        state.items.push(item);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Item> {
        self.lock().items.iter().find(|item| item.id == id).cloned()
    }

    #[must_use]
    pub fn items(&self) -> Vec<Item> {
        self.lock().items.clone()
    }

    /// Names of the calls received so far, e.g. `"update_order:a"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl PersistenceService for MemoryBackend {
    async fn fetch_items(&self, workspace_id: &str) -> Result<Vec<Item>> {
        let mut state = self.lock();
        state.enter(format!("fetch_items:{workspace_id}"))?;
        Ok(state
            .items
            .iter()
            .filter(|item| item.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn create(&self, workspace_id: &str, data: &NewItem) -> Result<Item> {
        let mut state = self.lock();
        state.enter(format!("create:{}", data.title))?;

        let parent_id = data.parent_id.as_deref();
        if let Some(parent) = parent_id {
            state.position(parent)?;
        }
        let order_index = match data.order_index {
            Some(index) if state.index_taken(workspace_id, parent_id, index, "") => {
                return Err(SyncError::Conflict(format!(
                    "duplicate key value violates unique constraint (order_index {index})"
                )));
            },
            Some(index) => index,
            None => state.next_index(workspace_id, parent_id),
        };

        state.next_id += 1;
        let mut item = data.to_item(&format!("item-{}", state.next_id), Utc::now());
        item.workspace_id = workspace_id.to_string();
        item.order_index = order_index;
        state.items.push(item.clone());
        Ok(item)
    }

    async fn update(&self, id: &str, patch: &ItemPatch) -> Result<Item> {
        let mut state = self.lock();
        state.enter(format!("update:{id}"))?;
        let pos = state.position(id)?;
        let item = &mut state.items[pos];
        patch.apply_to(item);
        item.updated_at = Some(Utc::now());
        Ok(item.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.enter(format!("delete:{id}"))?;
        let pos = state.position(id)?;
        state.items[pos].active = false;
        Ok(())
    }

    async fn restore(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.enter(format!("restore:{id}"))?;
        let pos = state.position(id)?;
        state.items[pos].active = true;
        Ok(())
    }

    async fn permanent_delete(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        state.enter(format!("permanent_delete:{id}"))?;
        let pos = state.position(id)?;
        state.items.remove(pos);
        Ok(())
    }

    async fn update_order(
        &self,
        id: &str,
        order_index: i64,
        parent_id: Option<String>,
    ) -> Result<Item> {
        let mut state = self.lock();
        state.enter(format!("update_order:{id}"))?;
        state.set_order(id, order_index, parent_id)
    }

    async fn sync_batch(&self, operations: &[PendingOperation]) -> Result<BatchSyncResult> {
        let mut state = self.lock();
        state.enter(format!("sync_batch:{}", operations.len()))?;

        let mut result = BatchSyncResult::default();
        for op in operations {
            match state.apply(op) {
                // Already gone counts as applied
                Ok(()) | Err(SyncError::NotFound(_)) => result.synced.push(op.key()),
                Err(_) => result.failed.push(op.key()),
            }
        }
        result.success = result.failed.is_empty();
        Ok(result)
    }
}
