//! Optimistic UI operations.
//!
//! Each operation patches local state first, then makes one attempt against
//! the backend:
//! - success keeps the patch (and adopts server values where they matter)
//! - a connectivity failure keeps the patch and queues the operation
//! - not-found means the item is already gone; it is dropped locally
//! - any other failure rolls the patch back and is returned

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use super::SyncEngine;
use crate::core::{is_temp_id, new_client_id, new_temp_id, Item, ItemField, ItemPatch, NewItem};
use crate::error::{Result, SyncError};
use crate::features::ordering::{append_index, insert_index, now_millis};
use crate::features::reconcile::PendingItem;
use crate::features::sync::{key_for, OperationType, PendingOperation};

impl SyncEngine {
    /// Create an item. Returns its temp id immediately usable by the UI.
    ///
    /// The item shows up in [`SyncEngine::tree`] right away and is swapped
    /// for its canonical counterpart once the backend confirms it.
    ///
    /// # Errors
    ///
    /// Returns the backend error (after removing the draft) if the create was
    /// rejected for a reason other than connectivity.
    pub async fn add_item(&self, draft: NewItem) -> Result<String> {
        let mut data = draft;
        data.workspace_id.clone_from(&self.inner.workspace_id);
        data.parent_id = data.parent_id.as_deref().map(|p| self.resolve_id(p));
        if data.client_id.is_none() {
            data.client_id = Some(new_client_id());
        }
        if data.order_index.is_none() {
            data.order_index = Some(self.next_append_index(data.parent_id.as_deref()));
        }

        let temp_id = new_temp_id();
        self.with_pending(|pending| pending.insert(PendingItem::new(&temp_id, data.clone())));
        info!(temp_id = %temp_id, title = %data.title, "item added optimistically");

        // A parent that only exists locally has to reach the backend first
        let parent_is_local = data.parent_id.as_deref().is_some_and(is_temp_id);
        if parent_is_local || !self.is_online() {
            self.enqueue(&PendingOperation::create(&temp_id, &data)?)?;
            return Ok(temp_id);
        }

        let result = self.persist_create(&data).await;
        let discarded = !self.read_pending().value.contains(&temp_id);
        match result {
            Ok(item) if discarded => {
                // Discarded while the create was in flight
                warn!(temp_id = %temp_id, id = %item.id, "draft discarded during create; removing");
                if let Err(e) = self.inner.service.permanent_delete(&item.id).await {
                    warn!(id = %item.id, error = %e, "failed to remove orphaned item");
                }
            },
            Ok(item) => {
                if self.confirm_create(&temp_id, item) {
                    self.spawn_drain();
                }
            },
            Err(e) if e.is_transient() => {
                self.enqueue(&PendingOperation::create(&temp_id, &data)?)?;
            },
            Err(e) => {
                warn!(temp_id = %temp_id, error = %e, "create rejected; discarding draft");
                self.discard_pending(&temp_id)?;
                return Err(e);
            },
        }
        Ok(temp_id)
    }

    /// Send a create, retrying with a fresh order index on conflicts.
    pub(super) async fn persist_create(&self, data: &NewItem) -> Result<Item> {
        let parent = data.parent_id.clone();
        self.inner
            .retry
            .run(
                |attempt| {
                    let mut attempt_data = data.clone();
                    if attempt > 0 {
                        let max = self.max_sibling(parent.as_deref(), None);
                        attempt_data.order_index =
                            Some(append_index(max) + i64::from(attempt));
                    }
                    let service = Arc::clone(&self.inner.service);
                    let workspace_id = self.inner.workspace_id.clone();
                    async move { service.create(&workspace_id, &attempt_data).await }
                },
                SyncError::is_conflict,
            )
            .await
    }

    /// Set one field from a loosely typed value.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidInput` for a value of the wrong shape, or the
    /// backend error after rolling back.
    pub async fn update_item(
        &self,
        id: &str,
        field: ItemField,
        value: serde_json::Value,
    ) -> Result<()> {
        let patch = ItemPatch::from_field(field, &value)?;
        self.update_fields(id, patch).await
    }

    /// Apply a patch of several fields.
    ///
    /// A new `parent_id` is checked the same way [`SyncEngine::move_item`]
    /// checks it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidInput` for a parent that is unknown or would
    /// create a cycle, or the backend error after rolling back.
    pub async fn update_fields(&self, id: &str, mut patch: ItemPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let id = self.resolve_id(id);
        if let Some(parent) = patch.parent_id.as_mut() {
            *parent = parent.as_deref().map(|p| self.resolve_id(p));
            self.validate_move(&id, parent.as_deref())?;
        }

        if is_temp_id(&id) {
            let found = self.with_pending(|pending| {
                pending.get_mut(&id).map(|entry| entry.apply(&patch)).is_some()
            });
            if !found {
                warn!(id = %id, "update for an unknown draft");
                return Ok(());
            }
            self.enqueue(&PendingOperation::update(&id, &self.inner.workspace_id, &patch)?)?;
            return Ok(());
        }

        let Some(before) = self.inner.store.get(&id) else {
            warn!(id = %id, "update for an item that is not loaded");
            return Ok(());
        };
        self.inner.store.update_in_store(&id, &patch);

        if !self.is_online() {
            self.enqueue(&PendingOperation::update(&id, &self.inner.workspace_id, &patch)?)?;
            return Ok(());
        }

        match self.inner.service.update(&id, &patch).await {
            Ok(saved) => {
                self.inner.store.modify(&id, |item| item.updated_at = saved.updated_at);
                Ok(())
            },
            Err(e) if e.is_transient() => {
                self.enqueue(&PendingOperation::update(&id, &self.inner.workspace_id, &patch)?)?;
                Ok(())
            },
            Err(e) if e.is_not_found() => {
                self.drop_locally(&id)?;
                Ok(())
            },
            Err(e) => {
                warn!(id = %id, error = %e, "update rejected; rolling back");
                self.inner.store.modify(&id, |item| revert_fields(item, &before, &patch));
                Err(e)
            },
        }
    }

    /// Soft-delete one item.
    ///
    /// # Errors
    ///
    /// Returns the backend error after restoring the item.
    pub async fn delete_item(&self, id: &str) -> Result<()> {
        self.delete_batch(&[id.to_string()]).await
    }

    /// Soft-delete several items at once.
    ///
    /// Drafts that never reached the backend are discarded outright. Every
    /// other item is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first backend rejection; rejected items are restored.
    pub async fn delete_batch(&self, ids: &[String]) -> Result<()> {
        let mut targets = Vec::new();
        for id in ids {
            let id = self.resolve_id(id);
            if is_temp_id(&id) {
                self.discard_pending(&id)?;
            } else {
                self.forget_pending_for(&id);
                targets.push(id);
            }
        }
        let changed = self.inner.store.mark_as_deleted(&targets);
        info!(requested = ids.len(), changed, "items deleted optimistically");

        let mut online = self.is_online();
        let mut first_error = None;
        for id in targets {
            if !online {
                self.enqueue(&PendingOperation::delete(&id, &self.inner.workspace_id, false)?)?;
                continue;
            }
            match self.inner.service.delete(&id).await {
                Ok(()) => {},
                Err(e) if e.is_transient() => {
                    // The rest would fail the same way
                    online = false;
                    self.enqueue(&PendingOperation::delete(&id, &self.inner.workspace_id, false)?)?;
                },
                Err(e) if e.is_not_found() => self.drop_locally(&id)?,
                Err(e) => {
                    warn!(id = %id, error = %e, "delete rejected; restoring");
                    self.inner.store.mark_as_restored(&id);
                    first_error.get_or_insert(e);
                },
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Undo a soft delete.
    ///
    /// A delete still waiting in the queue is simply cancelled.
    ///
    /// # Errors
    ///
    /// Returns the backend error after deactivating the item again.
    pub async fn restore_item(&self, id: &str) -> Result<()> {
        let id = self.resolve_id(id);
        if !self.inner.store.mark_as_restored(&id) {
            warn!(id = %id, "restore for an item that is not deleted");
            return Ok(());
        }

        let delete_key = key_for(OperationType::Delete, &id);
        let queued_delete = self.queue().get(&delete_key)?;
        if let Some(op) = queued_delete {
            if !op.delete_payload().permanent {
                self.queue().remove(&delete_key)?;
                info!(id = %id, "cancelled queued delete");
                return Ok(());
            }
        }

        let reactivate = ItemPatch {
            active: Some(true),
            ..ItemPatch::default()
        };
        if !self.is_online() {
            self.enqueue(&PendingOperation::update(&id, &self.inner.workspace_id, &reactivate)?)?;
            return Ok(());
        }

        match self.inner.service.restore(&id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                self.enqueue(&PendingOperation::update(&id, &self.inner.workspace_id, &reactivate)?)?;
                Ok(())
            },
            Err(e) if e.is_not_found() => {
                self.drop_locally(&id)?;
                Ok(())
            },
            Err(e) => {
                warn!(id = %id, error = %e, "restore rejected; deleting again");
                self.inner.store.mark_as_deleted(&[id]);
                Err(e)
            },
        }
    }

    /// Delete an item for good.
    ///
    /// # Errors
    ///
    /// Returns the backend error after putting the item back.
    pub async fn remove_item_permanently(&self, id: &str) -> Result<()> {
        let id = self.resolve_id(id);
        if is_temp_id(&id) {
            return self.discard_pending(&id);
        }

        self.forget_pending_for(&id);
        let removed = self.inner.store.remove_permanently(&id);
        // Nothing else queued for the item matters any more
        self.queue().remove_entity(&id)?;

        let op = PendingOperation::delete(&id, &self.inner.workspace_id, true)?;
        if !self.is_online() {
            self.enqueue(&op)?;
            return Ok(());
        }

        match self.inner.service.permanent_delete(&id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                self.enqueue(&op)?;
                Ok(())
            },
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => {
                warn!(id = %id, error = %e, "permanent delete rejected; restoring");
                if let Some(item) = removed {
                    self.inner.store.add_optimistic(item);
                }
                Err(e)
            },
        }
    }

    /// Move an item under `parent_id` (`None` for the root).
    ///
    /// The item lands after its new siblings. Order-index conflicts are
    /// retried with a fresh index. On success a full resync is scheduled.
    ///
    /// # Errors
    ///
    /// - `SyncError::InvalidInput` when moving an item under itself or one of
    ///   its descendants, or under an unknown parent
    /// - `SyncError::NotFound` when the item is not loaded
    /// - the backend error (after rolling back) on any other rejection
    pub async fn move_item(&self, id: &str, parent_id: Option<&str>) -> Result<()> {
        let id = self.resolve_id(id);
        let parent = parent_id.map(|p| self.resolve_id(p));
        self.validate_move(&id, parent.as_deref())?;

        if is_temp_id(&id) {
            return self.move_draft(&id, parent);
        }

        let before = self
            .inner
            .store
            .get(&id)
            .ok_or_else(|| SyncError::NotFound(format!("item {id}")))?;

        self.inner.store.modify(&id, |item| item.parent_id.clone_from(&parent));
        let index = insert_index(
            self.max_sibling(parent.as_deref(), Some(&id)),
            0,
            now_millis(),
        );
        self.inner.store.modify(&id, |item| item.order_index = index);
        info!(id = %id, parent = ?parent, index, "item moved optimistically");

        if !self.is_online() || parent.as_deref().is_some_and(is_temp_id) {
            self.enqueue(&PendingOperation::moved(&id, &self.inner.workspace_id, parent, index)?)?;
            return Ok(());
        }

        match self.persist_order(&id, parent.clone(), index).await {
            Ok(saved) => {
                self.inner.store.modify(&id, |item| {
                    item.parent_id = saved.parent_id;
                    item.order_index = saved.order_index;
                    item.updated_at = saved.updated_at;
                });
                self.schedule_resync(self.resync_delay());
                Ok(())
            },
            Err(e) if e.is_transient() => {
                let current = self.inner.store.get(&id).map_or(index, |item| item.order_index);
                self.enqueue(&PendingOperation::moved(&id, &self.inner.workspace_id, parent, current)?)?;
                Ok(())
            },
            Err(e) if e.is_not_found() => {
                self.drop_locally(&id)?;
                Ok(())
            },
            Err(e) => {
                warn!(id = %id, error = %e, "move rejected; rolling back");
                self.inner.store.modify(&id, |item| {
                    item.parent_id = before.parent_id;
                    item.order_index = before.order_index;
                });
                Err(e)
            },
        }
    }

    /// Write an order index, reallocating on conflicts.
    ///
    /// Each retry recomputes the index with the attempt number folded in and
    /// applies it locally before sending.
    pub(super) async fn persist_order(
        &self,
        id: &str,
        parent: Option<String>,
        first_index: i64,
    ) -> Result<Item> {
        self.inner
            .retry
            .run(
                |attempt| {
                    let index = if attempt == 0 {
                        first_index
                    } else {
                        let index = insert_index(
                            self.max_sibling(parent.as_deref(), Some(id)),
                            attempt,
                            now_millis(),
                        );
                        self.inner.store.modify(id, |item| item.order_index = index);
                        index
                    };
                    let service = Arc::clone(&self.inner.service);
                    let id = id.to_string();
                    let parent = parent.clone();
                    async move { service.update_order(&id, index, parent).await }
                },
                SyncError::is_conflict,
            )
            .await
    }

    /// Forget a draft that has not been confirmed yet.
    ///
    /// If the backend already confirmed it, the real item is deleted instead.
    /// Returns whether there was anything to cancel.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be updated or the delete fails.
    pub async fn cancel_pending(&self, temp_id: &str) -> Result<bool> {
        let real = self.resolve_id(temp_id);
        if real != temp_id {
            self.delete_item(&real).await?;
            return Ok(true);
        }
        if !self.read_pending().value.contains(temp_id) {
            return Ok(false);
        }
        self.discard_pending(temp_id)?;
        Ok(true)
    }

    fn validate_move(&self, id: &str, parent: Option<&str>) -> Result<()> {
        let Some(parent) = parent else {
            return Ok(());
        };
        if !self.knows(parent) {
            return Err(SyncError::InvalidInput(format!("unknown parent {parent}")));
        }

        // Walk up from the new parent; meeting `id` means it is a descendant
        let mut visited = HashSet::new();
        let mut current = Some(parent.to_string());
        while let Some(node) = current {
            if node == id {
                return Err(SyncError::InvalidInput(format!(
                    "cannot move {id} into itself or one of its descendants"
                )));
            }
            if !visited.insert(node.clone()) {
                break;
            }
            current = self.parent_of(&node);
        }
        Ok(())
    }

    fn knows(&self, id: &str) -> bool {
        self.inner.store.contains(id) || self.read_pending().value.contains(id)
    }

    fn parent_of(&self, id: &str) -> Option<String> {
        if let Some(item) = self.inner.store.get(id) {
            return item.parent_id;
        }
        self.read_pending()
            .value
            .get(id)
            .and_then(|p| p.data.parent_id.clone())
    }

    /// Move an unconfirmed draft; only the local copy and its queued create
    /// change.
    fn move_draft(&self, temp_id: &str, parent: Option<String>) -> Result<()> {
        let index = append_index(self.max_sibling(parent.as_deref(), Some(temp_id)));
        let patch = ItemPatch {
            parent_id: Some(parent.clone()),
            order_index: Some(index),
            ..ItemPatch::default()
        };
        let found = self.with_pending(|pending| {
            pending.get_mut(temp_id).map(|entry| entry.apply(&patch)).is_some()
        });
        if !found {
            return Err(SyncError::NotFound(format!("draft {temp_id}")));
        }
        self.enqueue(&PendingOperation::moved(temp_id, &self.inner.workspace_id, parent, index)?)?;
        Ok(())
    }

    /// Remove a draft and its draft descendants, cancelling their creates.
    pub(super) fn discard_pending(&self, temp_id: &str) -> Result<()> {
        let mut doomed = vec![temp_id.to_string()];
        {
            let pending = self.read_pending();
            let mut cursor = 0;
            while cursor < doomed.len() {
                for child in pending.value.children_of(&doomed[cursor]) {
                    if !doomed.contains(&child) {
                        doomed.push(child);
                    }
                }
                cursor += 1;
            }
        }

        self.with_pending(|pending| {
            for id in &doomed {
                pending.remove(id);
            }
        });
        let queue = self.queue();
        for id in &doomed {
            queue.remove_entity(id)?;
        }
        info!(temp_id, discarded = doomed.len(), "drafts discarded");
        Ok(())
    }

    /// The backend no longer has the item; mirror that locally.
    pub(super) fn drop_locally(&self, id: &str) -> Result<()> {
        self.forget_pending_for(id);
        self.inner.store.remove_permanently(id);
        self.queue().remove_entity(id)?;
        info!(id, "item gone on the backend; removed locally");
        Ok(())
    }
}

/// Put back the fields a rejected patch touched.
fn revert_fields(item: &mut Item, before: &Item, patch: &ItemPatch) {
    if patch.title.is_some() {
        item.title.clone_from(&before.title);
    }
    if patch.content.is_some() {
        item.content.clone_from(&before.content);
    }
    if patch.youtube_url.is_some() {
        item.youtube_url.clone_from(&before.youtube_url);
    }
    if patch.youtube_id.is_some() {
        item.youtube_id.clone_from(&before.youtube_id);
    }
    if patch.completed.is_some() {
        item.completed = before.completed;
    }
    if patch.parent_id.is_some() {
        item.parent_id.clone_from(&before.parent_id);
    }
    if patch.order_index.is_some() {
        item.order_index = before.order_index;
    }
    if patch.active.is_some() {
        item.active = before.active;
    }
    item.updated_at = before.updated_at;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::super::test_support::{engine_with, fast_config, folder, memory_engine, note};
    use super::*;
    use crate::backend::{
        BatchSyncResult, Connectivity, MemoryBackend, MockPersistenceService, PersistenceService,
    };
    use crate::core::{find_in_forest, ItemType};
    use crate::features::sync::OperationQueue;
    use crate::storage::Database;

    /// Memory backend whose creates wait until released.
    struct GatedCreate {
        backend: Arc<MemoryBackend>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl PersistenceService for GatedCreate {
        async fn fetch_items(&self, workspace_id: &str) -> Result<Vec<Item>> {
            self.backend.fetch_items(workspace_id).await
        }

        async fn create(&self, workspace_id: &str, data: &NewItem) -> Result<Item> {
            self.release.notified().await;
            self.backend.create(workspace_id, data).await
        }

        async fn update(&self, id: &str, patch: &ItemPatch) -> Result<Item> {
            self.backend.update(id, patch).await
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.backend.delete(id).await
        }

        async fn restore(&self, id: &str) -> Result<()> {
            self.backend.restore(id).await
        }

        async fn permanent_delete(&self, id: &str) -> Result<()> {
            self.backend.permanent_delete(id).await
        }

        async fn update_order(
            &self,
            id: &str,
            order_index: i64,
            parent_id: Option<String>,
        ) -> Result<Item> {
            self.backend.update_order(id, order_index, parent_id).await
        }

        async fn sync_batch(&self, operations: &[PendingOperation]) -> Result<BatchSyncResult> {
            self.backend.sync_batch(operations).await
        }
    }

    fn children_indices(backend: &MemoryBackend, parent: &str) -> Vec<i64> {
        backend
            .items()
            .iter()
            .filter(|item| item.parent_id.as_deref() == Some(parent))
            .map(|item| item.order_index)
            .collect()
    }

    #[tokio::test]
    async fn test_add_item_online_is_promoted_to_the_real_item() {
        let (engine, backend) = memory_engine(vec![folder("f", 0), note("n", "f", 0)]).await;

        let temp = engine
            .add_item(NewItem::new("ws", ItemType::Note, "Draft").with_parent(Some("f".to_string())))
            .await
            .unwrap();
        assert!(is_temp_id(&temp));

        let created = backend.items().into_iter().find(|i| i.title == "Draft").unwrap();
        assert_eq!(created.parent_id.as_deref(), Some("f"));
        assert_eq!(created.order_index, 1);
        assert!(created.client_id.is_some());

        let tree = engine.tree();
        let folder_node = find_in_forest(&tree, "f").unwrap();
        assert_eq!(folder_node.children.len(), 2);
        assert!(find_in_forest(&tree, &created.id).is_some());
        assert!(find_in_forest(&tree, &temp).is_none());
        assert!(engine.pending_items().is_empty());
    }

    #[tokio::test]
    async fn test_add_item_offline_shows_draft_and_queues_create() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend.clone(), false);

        let temp = engine
            .add_item(NewItem::new("ws", ItemType::Folder, "Offline"))
            .await
            .unwrap();

        let tree = engine.tree();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id(), temp);
        let queued = engine.queued_operations().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].op_type, OperationType::Create);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_create_discards_draft() {
        let (engine, backend) = memory_engine(vec![]).await;
        backend.fail_next(SyncError::Backend("quota exceeded".to_string()));

        let err = engine
            .add_item(NewItem::new("ws", ItemType::Note, "Nope"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Backend(_)));
        assert!(engine.pending_items().is_empty());
        assert!(engine.tree().is_empty());
        assert!(engine.queued_operations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_backend_queues_create() {
        let (engine, backend) = memory_engine(vec![]).await;
        backend.set_offline(true);

        engine
            .add_item(NewItem::new("ws", ItemType::Note, "Later"))
            .await
            .unwrap();

        assert_eq!(engine.pending_items().len(), 1);
        assert_eq!(engine.queued_operations().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let (engine, backend) = memory_engine(vec![folder("a", 0)]).await;

        engine.update_item("a", ItemField::Title, json!("New")).await.unwrap();
        let once = engine.items();
        engine.update_item("a", ItemField::Title, json!("New")).await.unwrap();

        assert_eq!(backend.get("a").unwrap().title, "New");
        assert_eq!(engine.items().len(), once.len());
        assert_eq!(engine.items()[0].title, "New");
        assert!(engine.queued_operations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_updates_collapse_into_one_entry() {
        let (engine, _backend) = memory_engine(vec![folder("a", 0)]).await;
        engine.connectivity().set_online(false);

        engine.update_item("a", ItemField::Title, json!("One")).await.unwrap();
        engine.update_item("a", ItemField::Title, json!("Two")).await.unwrap();
        engine.update_item("a", ItemField::Completed, json!(true)).await.unwrap();

        let queued = engine.queued_operations().unwrap();
        assert_eq!(queued.len(), 1);
        let patch = queued[0].patch().unwrap();
        assert_eq!(patch.title.as_deref(), Some("Two"));
        assert_eq!(patch.completed, Some(true));
    }

    #[tokio::test]
    async fn test_update_rolls_back_on_terminal_failure() {
        let mut mock = MockPersistenceService::new();
        mock.expect_fetch_items()
            .returning(|_| Ok(vec![folder("a", 0)]));
        mock.expect_update()
            .times(1)
            .returning(|_, _| Err(SyncError::Backend("permission denied".to_string())));
        let engine = engine_with(Arc::new(mock), true);
        engine.refresh().await.unwrap();

        let err = engine
            .update_item("a", ItemField::Title, json!("Nope"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Backend(_)));
        let item = engine.items()[0].clone();
        assert_eq!(item.title, "Folder a");
        assert!(engine.queued_operations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_of_vanished_item_removes_it() {
        let (engine, backend) = memory_engine(vec![folder("a", 0)]).await;
        backend.fail_next(SyncError::NotFound("item a".to_string()));

        engine.update_item("a", ItemField::Title, json!("Gone")).await.unwrap();

        assert!(engine.items().is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_and_restore_round_trip() {
        let (engine, backend) = memory_engine(vec![folder("f", 0), note("n", "f", 0)]).await;
        let before = engine.tree();

        engine.delete_item("f").await.unwrap();
        assert!(engine.tree().is_empty());
        assert!(!backend.get("f").unwrap().active);
        // Soft-deleted items stay in the store
        assert_eq!(engine.items().len(), 2);

        engine.restore_item("f").await.unwrap();
        assert!(backend.get("f").unwrap().active);
        let after = engine.tree();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].children.len(), 1);
        assert_eq!(after[0].item.title, before[0].item.title);
    }

    #[tokio::test]
    async fn test_rejected_delete_restores_item() {
        let (engine, backend) = memory_engine(vec![folder("a", 0), folder("b", 1)]).await;
        backend.fail_next(SyncError::Backend("locked".to_string()));

        let err = engine
            .delete_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Backend(_)));
        let items = engine.items();
        assert!(items.iter().find(|i| i.id == "a").unwrap().active);
        assert!(!items.iter().find(|i| i.id == "b").unwrap().active);
    }

    #[tokio::test]
    async fn test_restore_cancels_queued_delete() {
        let (engine, backend) = memory_engine(vec![folder("a", 0)]).await;
        engine.connectivity().set_online(false);

        engine.delete_item("a").await.unwrap();
        assert_eq!(engine.queued_operations().unwrap().len(), 1);
        engine.restore_item("a").await.unwrap();

        assert!(engine.queued_operations().unwrap().is_empty());
        assert!(engine.items()[0].active);
        assert!(!backend.calls().contains(&"delete:a".to_string()));
    }

    #[tokio::test]
    async fn test_delete_of_offline_draft_cancels_its_create() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, false);
        let parent = engine
            .add_item(NewItem::new("ws", ItemType::Folder, "Parent"))
            .await
            .unwrap();
        engine
            .add_item(NewItem::new("ws", ItemType::Note, "Child").with_parent(Some(parent.clone())))
            .await
            .unwrap();

        engine.delete_item(&parent).await.unwrap();

        assert!(engine.pending_items().is_empty());
        assert!(engine.queued_operations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_permanently_rolls_back_on_failure() {
        let (engine, backend) = memory_engine(vec![folder("a", 0)]).await;
        backend.fail_next(SyncError::Backend("nope".to_string()));

        assert!(engine.remove_item_permanently("a").await.is_err());
        assert_eq!(engine.items().len(), 1);

        engine.remove_item_permanently("a").await.unwrap();
        assert!(engine.items().is_empty());
        assert!(backend.get("a").is_none());
    }

    #[tokio::test]
    async fn test_moves_survive_order_conflicts_with_distinct_indices() {
        let mut items = vec![folder("src", 0), folder("dst", 1)];
        items.extend((0..5).map(|i| note(&format!("n{i}"), "src", i)));
        let (engine, backend) = memory_engine(items).await;
        backend.inject_order_conflicts(2);

        for i in 0..5 {
            engine.move_item(&format!("n{i}"), Some("dst")).await.unwrap();
        }

        let mut indices = children_indices(&backend, "dst");
        assert_eq!(indices.len(), 5);
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 5);
        assert!(indices.iter().all(|&i| i > 0 && i < crate::features::ordering::MAX_ORDER));

        let order_calls = backend
            .calls()
            .iter()
            .filter(|c| c.starts_with("update_order:"))
            .count();
        assert_eq!(order_calls, 7);
    }

    #[tokio::test]
    async fn test_concurrent_moves_into_same_folder_get_distinct_indices() {
        let (engine, backend) =
            memory_engine(vec![folder("dst", 0), folder("a", 1), folder("b", 2)]).await;

        let (first, second) = tokio::join!(
            engine.move_item("a", Some("dst")),
            engine.move_item("b", Some("dst")),
        );
        first.unwrap();
        second.unwrap();

        let indices = children_indices(&backend, "dst");
        assert_eq!(indices.len(), 2);
        assert_ne!(indices[0], indices[1]);
        assert!(indices.iter().all(|&i| i != 0));
    }

    #[tokio::test]
    async fn test_move_gives_up_after_repeated_conflicts_and_rolls_back() {
        let (engine, backend) = memory_engine(vec![folder("dst", 0), folder("a", 1)]).await;
        backend.inject_order_conflicts(10);

        let err = engine.move_item("a", Some("dst")).await.unwrap_err();

        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }));
        let item = engine.items().iter().find(|i| i.id == "a").cloned().unwrap();
        assert_eq!(item.parent_id, None);
        assert_eq!(item.order_index, 1);
    }

    #[tokio::test]
    async fn test_move_rolls_back_on_terminal_failure() {
        let mut mock = MockPersistenceService::new();
        mock.expect_fetch_items()
            .returning(|_| Ok(vec![folder("dst", 0), folder("a", 1)]));
        mock.expect_update_order()
            .times(1)
            .returning(|_, _, _| Err(SyncError::Backend("forbidden".to_string())));
        let engine = engine_with(Arc::new(mock), true);
        engine.refresh().await.unwrap();

        assert!(engine.move_item("a", Some("dst")).await.is_err());

        let item = engine.items().iter().find(|i| i.id == "a").cloned().unwrap();
        assert_eq!(item.parent_id, None);
        assert_eq!(item.order_index, 1);
    }

    #[tokio::test]
    async fn test_move_rejects_cycles_and_unknown_parents() {
        let (engine, _backend) = memory_engine(vec![folder("f", 0), note("n", "f", 0)]).await;

        for (id, parent) in [("f", "f"), ("f", "n"), ("f", "missing")] {
            let err = engine.move_item(id, Some(parent)).await.unwrap_err();
            assert!(matches!(err, SyncError::InvalidInput(_)), "{id} -> {parent}");
        }
    }

    #[tokio::test]
    async fn test_offline_move_is_queued() {
        let (engine, _backend) = memory_engine(vec![folder("dst", 0), folder("a", 1)]).await;
        engine.connectivity().set_online(false);

        engine.move_item("a", Some("dst")).await.unwrap();

        let queued = engine.queued_operations().unwrap();
        assert_eq!(queued.len(), 1);
        let target = queued[0].move_target().unwrap();
        assert_eq!(target.parent_id.as_deref(), Some("dst"));
        let tree = engine.tree();
        assert_eq!(find_in_forest(&tree, "dst").unwrap().children.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let backend = Arc::new(MemoryBackend::new());
        let engine = engine_with(backend, false);
        let temp = engine
            .add_item(NewItem::new("ws", ItemType::Note, "Draft"))
            .await
            .unwrap();

        assert!(engine.cancel_pending(&temp).await.unwrap());
        assert!(!engine.cancel_pending(&temp).await.unwrap());
        assert!(engine.tree().is_empty());
        assert!(engine.queued_operations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_during_inflight_create_survives_confirmation() {
        let backend = Arc::new(MemoryBackend::new());
        let release = Arc::new(Notify::new());
        let service = Arc::new(GatedCreate {
            backend: backend.clone(),
            release: release.clone(),
        });
        let engine = engine_with(service, true);

        let adding = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .add_item(NewItem::new("ws", ItemType::Note, "Draft"))
                    .await
            })
        };
        while engine.pending_items().is_empty() {
            tokio::task::yield_now().await;
        }
        let temp = engine.pending_items()[0].temp_id().to_string();
        engine
            .update_item(&temp, ItemField::Title, json!("Final"))
            .await
            .unwrap();

        release.notify_one();
        assert_eq!(adding.await.unwrap().unwrap(), temp);

        let tree = engine.tree();
        assert_eq!(tree.len(), 1);
        assert!(!is_temp_id(tree[0].id()));
        assert_eq!(tree[0].item.title, "Final");

        engine.sync_now().await.unwrap();
        assert_eq!(backend.items()[0].title, "Final");
        assert!(engine.queued_operations().unwrap().is_empty());
        assert_eq!(engine.tree()[0].item.title, "Final");
    }

    #[tokio::test]
    async fn test_parent_update_cannot_create_a_cycle() {
        let (engine, backend) = memory_engine(vec![folder("f", 0), note("n", "f", 0)]).await;

        let err = engine
            .update_item("f", ItemField::ParentId, json!("n"))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidInput(_)));
        let local = engine.items().iter().find(|item| item.id == "f").cloned().unwrap();
        assert_eq!(local.parent_id, None);
        assert_eq!(backend.get("f").unwrap().parent_id, None);
        assert!(!backend.calls().iter().any(|call| call.starts_with("update:")));

        let err = engine
            .update_item("n", ItemField::ParentId, json!("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));

        // Moving to the root is always allowed
        engine
            .update_item("n", ItemField::ParentId, serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(backend.get("n").unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn test_confirmed_create_is_kept_when_queue_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let backend = Arc::new(MemoryBackend::new());
        let engine = SyncEngine::new(
            "ws",
            backend.clone(),
            OperationQueue::with_database(Database::open_at(&path).unwrap()),
            Connectivity::new(true),
            fast_config(),
        );

        // Pull the table out from under the engine's connection
        Database::open_at(&path)
            .unwrap()
            .connection()
            .execute_batch("DROP TABLE pending_operations")
            .unwrap();

        let temp = engine
            .add_item(NewItem::new("ws", ItemType::Note, "Kept"))
            .await
            .unwrap();

        assert!(is_temp_id(&temp));
        assert_eq!(backend.items().len(), 1);
        let tree = engine.tree();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].item.title, "Kept");
    }
}
