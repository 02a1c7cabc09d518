//! Persistence service trait.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::core::{Item, ItemPatch, NewItem};
use crate::error::Result;
use crate::features::sync::PendingOperation;

/// Outcome of a batched replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSyncResult {
    /// Queue keys the backend applied
    pub synced: Vec<String>,
    /// Queue keys the backend rejected
    pub failed: Vec<String>,
    pub success: bool,
}

/// The authoritative store behind the engine.
///
/// Implementations classify failures through [`crate::SyncError`]: `Network`
/// for connectivity problems, `Conflict` for order-index uniqueness or
/// deadlock errors, `NotFound` for vanished entities and `Backend` for the rest.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Every item of a workspace, including inactive ones.
    async fn fetch_items(&self, workspace_id: &str) -> Result<Vec<Item>>;

    /// Create an item. The returned item carries the backend id and echoes
    /// `client_id`.
    async fn create(&self, workspace_id: &str, data: &NewItem) -> Result<Item>;

    async fn update(&self, id: &str, patch: &ItemPatch) -> Result<Item>;

    /// Soft delete.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn restore(&self, id: &str) -> Result<()>;

    async fn permanent_delete(&self, id: &str) -> Result<()>;

    /// Set an item's position. Fails with `Conflict` when the index is taken.
    async fn update_order(
        &self,
        id: &str,
        order_index: i64,
        parent_id: Option<String>,
    ) -> Result<Item>;

    /// Apply several queued non-create operations in one call.
    async fn sync_batch(&self, operations: &[PendingOperation]) -> Result<BatchSyncResult>;
}
