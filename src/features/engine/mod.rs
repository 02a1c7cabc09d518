//! The sync engine.
//!
//! [`SyncEngine`] owns the store, the pending items, the live-edit tree and the
//! offline queue for one workspace, and exposes the operations the UI calls.
//! Mutations are applied optimistically and then sent to the backend once;
//! connectivity failures fall back to the queue, which is drained later.
//!
//! The engine is a cheap handle; clone it freely. Locks guarding local state
//! are never held across an `.await`.

mod operations;
mod sync;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::backend::{Connectivity, PersistenceService};
use crate::config::Config;
use crate::core::{is_temp_id, HierarchicalItem, Item, RetryPolicy};
use crate::error::Result;
use crate::features::ordering::{append_index, max_sibling_index};
use crate::features::reconcile::{merge_tree, MergeOptions, PendingItem, PendingItems};
use crate::features::store::ItemStore;
use crate::features::sync::{
    key_for, OperationQueue, OperationType, PendingOperation, QueueStats, SaveOutcome,
    SyncCoordinator,
};

use self::sync::overlay_queued;

#[derive(Debug, Default)]
struct Versioned<T> {
    value: T,
    version: u64,
}

struct CachedTree {
    key: (u64, u64, u64),
    tree: Arc<Vec<HierarchicalItem>>,
}

struct EngineInner {
    workspace_id: String,
    service: Arc<dyn PersistenceService>,
    connectivity: Connectivity,
    config: Config,
    retry: RetryPolicy,
    store: ItemStore,
    queue: Mutex<OperationQueue>,
    coordinator: SyncCoordinator,
    pending: RwLock<Versioned<PendingItems>>,
    live: RwLock<Versioned<Arc<Vec<HierarchicalItem>>>>,
    /// Temp id -> backend id for creates confirmed this session.
    resolutions: Mutex<HashMap<String, String>>,
    merged: Mutex<Option<CachedTree>>,
}

/// Optimistic sync engine for one workspace.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("workspace_id", &self.inner.workspace_id)
            .field("online", &self.inner.connectivity.is_online())
            .field("syncing", &self.inner.coordinator.is_syncing())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine. Nothing is fetched until [`SyncEngine::start`] or
    /// [`SyncEngine::refresh`] runs.
    #[must_use]
    pub fn new(
        workspace_id: impl Into<String>,
        service: Arc<dyn PersistenceService>,
        queue: OperationQueue,
        connectivity: Connectivity,
        config: Config,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        Self {
            inner: Arc::new(EngineInner {
                workspace_id: workspace_id.into(),
                service,
                connectivity,
                config,
                retry,
                store: ItemStore::new(),
                queue: Mutex::new(queue),
                coordinator: SyncCoordinator::new(),
                pending: RwLock::default(),
                live: RwLock::default(),
                resolutions: Mutex::default(),
                merged: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn workspace_id(&self) -> &str {
        &self.inner.workspace_id
    }

    #[must_use]
    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.inner.coordinator.is_syncing()
    }

    /// Canonical items as last confirmed, including inactive ones.
    #[must_use]
    pub fn items(&self) -> Arc<Vec<Item>> {
        self.inner.store.snapshot()
    }

    /// Items created locally and not yet matched with the backend.
    #[must_use]
    pub fn pending_items(&self) -> Vec<PendingItem> {
        self.read_pending().value.iter().cloned().collect()
    }

    /// Everything waiting in the offline queue for this workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn queued_operations(&self) -> Result<Vec<PendingOperation>> {
        self.queue().get_all(Some(&self.inner.workspace_id))
    }

    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn queue_stats(&self) -> Result<QueueStats> {
        self.queue().stats()
    }

    /// Install the tree the editor is currently showing. Titles and contents
    /// in it override canonical values until cleared.
    pub fn set_live_edits(&self, tree: Vec<HierarchicalItem>) {
        let mut live = self.inner.live.write().unwrap_or_else(PoisonError::into_inner);
        live.value = Arc::new(tree);
        live.version += 1;
    }

    pub fn clear_live_edits(&self) {
        self.set_live_edits(Vec::new());
    }

    /// The merged tree to render.
    ///
    /// Cached until the store, the live edits or the pending items change.
    #[must_use]
    pub fn tree(&self) -> Arc<Vec<HierarchicalItem>> {
        self.reconcile_pending()
    }

    /// Merge the store, live edits and pending items, then drop the pending
    /// items that found their canonical counterpart (and their queued
    /// creates). Returns the merged tree, which is cached.
    fn reconcile_pending(&self) -> Arc<Vec<HierarchicalItem>> {
        let key = self.merge_key();
        {
            let cached = self.lock_merged();
            if let Some(cached) = cached.as_ref().filter(|c| c.key == key) {
                return Arc::clone(&cached.tree);
            }
        }

        let canonical = self.inner.store.snapshot();
        let live = Arc::clone(&self.inner.live.read().unwrap_or_else(PoisonError::into_inner).value);
        let options = MergeOptions {
            heuristic_promotion: self.inner.config.reconcile.heuristic_promotion,
        };
        let outcome = {
            let pending = self.read_pending();
            merge_tree(&canonical, &live, &pending.value, options)
        };

        for promotion in &outcome.promoted {
            self.forget_promoted(&promotion.temp_id, &promotion.real_id);
        }

        let tree = Arc::new(outcome.tree);
        *self.lock_merged() = Some(CachedTree {
            key: self.merge_key(),
            tree: Arc::clone(&tree),
        });
        tree
    }

    fn merge_key(&self) -> (u64, u64, u64) {
        (
            self.inner.store.version(),
            self.inner.live.read().unwrap_or_else(PoisonError::into_inner).version,
            self.read_pending().version,
        )
    }

    /// Drop a pending item once its canonical item is in the store.
    fn forget_promoted(&self, temp_id: &str, real_id: &str) {
        self.with_pending(|pending| {
            pending.remove(temp_id);
            pending.reparent(temp_id, real_id);
        });
        self.lock_resolutions()
            .insert(temp_id.to_string(), real_id.to_string());

        // The item exists on the backend, so a create still queued for it
        // would duplicate it.
        let queue = self.queue();
        let result = queue
            .remove(&key_for(OperationType::Create, temp_id))
            .and_then(|_| queue.resolve_temp_id(temp_id, real_id));
        if let Err(e) = result {
            warn!(temp_id, real_id, error = %e, "failed to rewrite queue after promotion");
        }
        debug!(temp_id, real_id, "dropped promoted pending item");
    }

    /// Map a confirmed temp id to its backend id; other ids pass through.
    fn resolve_id(&self, id: &str) -> String {
        if is_temp_id(id) {
            if let Some(real) = self.lock_resolutions().get(id) {
                return real.clone();
            }
        }
        id.to_string()
    }

    /// Record a successful create: the canonical item goes into the store and
    /// every reference to the temp id is rewritten. Edits queued against the
    /// draft while the create was in flight are laid over the canonical item.
    ///
    /// Returns whether queued work (pending children or those edits) now
    /// waits on the backend id. Queue failures are logged, never returned:
    /// the item exists on the backend either way.
    fn confirm_create(&self, temp_id: &str, item: Item) -> bool {
        let real_id = item.id.clone();
        self.lock_resolutions()
            .insert(temp_id.to_string(), real_id.clone());

        let mut children = 0;
        self.with_pending(|pending| {
            children = pending.children_of(temp_id).len();
            if let Some(entry) = pending.get_mut(temp_id) {
                entry.resolved_id = Some(real_id.clone());
            }
            pending.reparent(temp_id, &real_id);
        });

        let follow_ups = self.rekey_queued(temp_id, &real_id).unwrap_or_else(|e| {
            warn!(temp_id, real_id = %real_id, error = %e, "failed to rewrite queue after create");
            Vec::new()
        });
        let mut items = vec![self.inner.store.get(&real_id).unwrap_or(item)];
        overlay_queued(&mut items, &follow_ups);
        self.inner.store.remove_permanently(&real_id);
        for item in items {
            self.inner.store.add_optimistic(item);
        }

        info!(temp_id, real_id = %real_id, follow_ups = follow_ups.len(), "create confirmed");
        children > 0 || !follow_ups.is_empty()
    }

    /// Point queued operations at `real_id`; returns the ones targeting it.
    fn rekey_queued(&self, temp_id: &str, real_id: &str) -> Result<Vec<PendingOperation>> {
        let queue = self.queue();
        queue.resolve_temp_id(temp_id, real_id)?;
        Ok(queue
            .get_all(Some(&self.inner.workspace_id))?
            .into_iter()
            .filter(|op| op.id == real_id)
            .collect())
    }

    /// Drop pending entries whose confirmed item is being removed.
    fn forget_pending_for(&self, real_id: &str) {
        self.with_pending(|pending| {
            let stale: Vec<String> = pending
                .iter()
                .filter(|p| p.resolved_id.as_deref() == Some(real_id))
                .map(|p| p.temp_id().to_string())
                .collect();
            for temp_id in stale {
                pending.remove(&temp_id);
            }
        });
    }

    /// Highest sibling index under `parent_id`, counting pending items.
    fn max_sibling(&self, parent_id: Option<&str>, exclude: Option<&str>) -> Option<i64> {
        let siblings = self.inner.store.siblings(parent_id);
        let canonical = max_sibling_index(siblings.iter().filter(|s| Some(s.id.as_str()) != exclude));
        let pending = self
            .read_pending()
            .value
            .iter()
            .filter(|p| p.data.parent_id.as_deref() == parent_id && Some(p.temp_id()) != exclude)
            .map(|p| p.item.item.order_index)
            .max();
        canonical.max(pending)
    }

    fn next_append_index(&self, parent_id: Option<&str>) -> i64 {
        append_index(self.max_sibling(parent_id, None))
    }

    /// Persist an operation for later replay.
    fn enqueue(&self, op: &PendingOperation) -> Result<SaveOutcome> {
        let outcome = self.queue().save(op)?;
        info!(key = %op.key(), ?outcome, "operation queued for sync");
        // New work during a drain gets one more pass
        self.inner.coordinator.request_follow_up();
        Ok(outcome)
    }

    fn queue(&self) -> MutexGuard<'_, OperationQueue> {
        self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_resolutions(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.inner
            .resolutions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_merged(&self) -> MutexGuard<'_, Option<CachedTree>> {
        self.inner.merged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_pending(&self) -> std::sync::RwLockReadGuard<'_, Versioned<PendingItems>> {
        self.inner.pending.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_pending<R>(&self, f: impl FnOnce(&mut PendingItems) -> R) -> R {
        let mut pending = self.inner.pending.write().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut pending.value);
        pending.version += 1;
        result
    }
}
