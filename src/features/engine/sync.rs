//! Refresh, queue drain and background sync tasks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::SyncEngine;
use crate::core::{is_temp_id, Item};
use crate::error::{Result, SyncError};
use crate::features::ordering::append_index;
use crate::features::sync::{
    key_for, order_creates, DrainReport, ExecutionResult, OperationType, PendingOperation,
};

impl SyncEngine {
    /// Load the workspace, then drain anything queued from an earlier session.
    ///
    /// A failed load caused by connectivity is logged and the drain is still
    /// attempted; it will stop early and leave the queue intact.
    ///
    /// # Errors
    ///
    /// Returns a non-transient load error, or an error from the queue.
    pub async fn start(&self) -> Result<DrainReport> {
        if let Err(e) = self.refresh().await {
            if !e.is_transient() {
                return Err(e);
            }
            warn!(error = %e, "initial load failed; working from the queue");
        }
        self.sync_now().await
    }

    /// Replace the store with the backend's items.
    ///
    /// Operations still waiting in the queue are re-applied on top so the
    /// refresh never undoes a local change that has not been sent yet.
    ///
    /// # Errors
    ///
    /// Returns the backend error, or an error reading the queue.
    pub async fn refresh(&self) -> Result<()> {
        let mut items = self.inner.service.fetch_items(&self.inner.workspace_id).await?;
        let queued = self.queued_operations()?;
        overlay_queued(&mut items, &queued);

        let count = items.len();
        self.inner.store.replace_all(items);
        self.reconcile_pending();
        debug!(count, queued = queued.len(), "store refreshed");
        Ok(())
    }

    /// Drain the offline queue now.
    ///
    /// If a drain is already running this returns an empty report and the
    /// running drain makes one more pass when it finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue itself cannot be read or written.
    /// Backend failures are reported per operation instead.
    pub async fn sync_now(&self) -> Result<DrainReport> {
        self.inner.coordinator.run(|| self.drain_pass()).await
    }

    /// Refresh after `delay` on a background task.
    pub fn schedule_resync(&self, delay: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = engine.refresh().await {
                warn!(error = %e, "scheduled resync failed");
            }
        })
    }

    /// Drain whenever connectivity goes from offline to online.
    ///
    /// The task runs until aborted through the returned handle.
    #[must_use]
    pub fn spawn_reconnect_listener(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let mut rx = self.inner.connectivity.subscribe();
        tokio::spawn(async move {
            let mut was_online = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    info!("connectivity restored; draining queue");
                    if let Err(e) = engine.sync_now().await {
                        warn!(error = %e, "drain after reconnect failed");
                    }
                }
                was_online = online;
            }
        })
    }

    /// Drain on a fixed interval while online.
    ///
    /// Returns `None` when `sync.drain_interval_secs` is zero.
    #[must_use]
    pub fn spawn_periodic_sync(&self) -> Option<JoinHandle<()>> {
        let secs = self.inner.config.sync.drain_interval_secs;
        if secs == 0 {
            return None;
        }
        let engine = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !engine.is_online() {
                    continue;
                }
                if let Err(e) = engine.sync_now().await {
                    warn!(error = %e, "periodic drain failed");
                }
            }
        }))
    }

    pub(super) fn resync_delay(&self) -> Duration {
        Duration::from_millis(self.inner.config.sync.resync_delay_ms)
    }

    /// Drain on a background task.
    pub(super) fn spawn_drain(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.sync_now().await {
                warn!(error = %e, "background drain failed");
            }
        });
    }

    /// One pass over the queue: creates parents-first, then everything else.
    async fn drain_pass(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        if !self.is_online() {
            debug!("offline; drain skipped");
            report.interrupted = true;
            return Ok(report);
        }

        let (creates, _): (Vec<_>, Vec<_>) = self
            .queued_operations()?
            .into_iter()
            .partition(|op| op.op_type == OperationType::Create);

        for op in order_creates(creates) {
            if !self.replay_create(op, &mut report).await? {
                return Ok(report);
            }
        }

        // Re-read: confirmed creates re-keyed everything that referenced them
        let rest: Vec<PendingOperation> = self
            .queued_operations()?
            .into_iter()
            .filter(|op| op.op_type != OperationType::Create)
            .collect();
        let (ready, waiting): (Vec<_>, Vec<_>) = rest
            .into_iter()
            .partition(|op| !is_temp_id(&op.id) && !op.parent_id().is_some_and(|p| is_temp_id(&p)));
        for op in waiting {
            report.add(outcome(&op, true, None, true));
        }

        if self.inner.config.sync.batch_updates && !ready.is_empty() {
            self.replay_batch(&ready, &mut report).await?;
        } else {
            for op in ready {
                if !self.replay_one(&op, &mut report).await? {
                    break;
                }
            }
        }

        if report.succeeded > 0 && report.all_succeeded() {
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "refresh after drain failed");
            }
        }
        Ok(report)
    }

    /// Replay one queued create. Returns false when the pass should stop.
    async fn replay_create(&self, op: PendingOperation, report: &mut DrainReport) -> Result<bool> {
        let key = op.key();
        let mut data = match op.new_item() {
            Ok(data) => data,
            Err(e) => {
                self.record_failure(&op, &e, report)?;
                return Ok(true);
            },
        };

        let mut detached_from = None;
        if let Some(parent) = data.parent_id.take() {
            let parent = self.resolve_id(&parent);
            if is_temp_id(&parent) {
                let parent_queued = self.queue().get(&key_for(OperationType::Create, &parent))?;
                if parent_queued.is_some() {
                    warn!(key = %key, parent = %parent, "parent not created yet; creating at the root for now");
                    detached_from = Some(parent);
                } else {
                    warn!(key = %key, parent = %parent, "parent was never created; creating at the root");
                }
                data.order_index = Some(self.next_append_index(None));
            } else {
                data.parent_id = Some(parent);
            }
        }

        match self.persist_create(&data).await {
            Ok(item) => {
                let real_id = item.id.clone();
                self.confirm_create(&op.id, item);
                self.queue().remove(&key)?;
                if let Some(parent) = detached_from {
                    self.reattach_later(&real_id, parent)?;
                }
                report.add(outcome(&op, true, None, false));
                Ok(true)
            },
            Err(e) if e.is_transient() => {
                self.queue().record_attempt(&key, Some(&e.to_string()))?;
                report.add(outcome(&op, false, Some(&e), false));
                report.interrupted = true;
                Ok(false)
            },
            Err(e) => {
                self.record_failure(&op, &e, report)?;
                Ok(true)
            },
        }
    }

    /// Queue a move of `id` back under a parent whose create is still queued.
    ///
    /// The move waits in the queue until the parent's create goes through
    /// and rewrites it to the backend id.
    fn reattach_later(&self, id: &str, parent: String) -> Result<()> {
        let index = append_index(self.max_sibling(Some(&parent), Some(id)));
        self.inner.store.modify(id, |item| {
            item.parent_id = Some(parent.clone());
            item.order_index = index;
        });
        self.enqueue(&PendingOperation::moved(id, &self.inner.workspace_id, Some(parent), index)?)?;
        Ok(())
    }

    /// Replay one non-create operation. Returns false when the pass should stop.
    async fn replay_one(&self, op: &PendingOperation, report: &mut DrainReport) -> Result<bool> {
        match self.send(op).await {
            Ok(()) => {
                self.queue().remove(&op.key())?;
                report.add(outcome(op, true, None, false));
                Ok(true)
            },
            Err(e) if e.is_not_found() => {
                debug!(key = %op.key(), "target already gone; dropping operation");
                self.queue().remove(&op.key())?;
                self.drop_locally(&op.id)?;
                report.add(outcome(op, true, None, false));
                Ok(true)
            },
            Err(e) if e.is_transient() => {
                self.queue().record_attempt(&op.key(), Some(&e.to_string()))?;
                report.add(outcome(op, false, Some(&e), false));
                report.interrupted = true;
                Ok(false)
            },
            Err(e) => {
                self.record_failure(op, &e, report)?;
                Ok(true)
            },
        }
    }

    async fn send(&self, op: &PendingOperation) -> Result<()> {
        let service = &self.inner.service;
        match op.op_type {
            OperationType::Update => {
                let saved = service.update(&op.id, &op.patch()?).await?;
                self.inner.store.modify(&op.id, |item| item.updated_at = saved.updated_at);
            },
            OperationType::Delete if op.delete_payload().permanent => {
                service.permanent_delete(&op.id).await?;
            },
            OperationType::Delete => service.delete(&op.id).await?,
            OperationType::Move | OperationType::UpdateOrder => {
                let target = op.move_target()?;
                let saved = self
                    .persist_order(&op.id, target.parent_id, target.order_index)
                    .await?;
                self.inner.store.modify(&op.id, |item| {
                    item.parent_id = saved.parent_id;
                    item.order_index = saved.order_index;
                });
            },
            OperationType::Create => {
                return Err(SyncError::InvalidInput(format!(
                    "create {} replayed as a plain operation",
                    op.id
                )));
            },
        }
        Ok(())
    }

    async fn replay_batch(&self, ops: &[PendingOperation], report: &mut DrainReport) -> Result<()> {
        match self.inner.service.sync_batch(ops).await {
            Ok(result) => {
                for op in ops {
                    let key = op.key();
                    if result.synced.contains(&key) {
                        self.queue().remove(&key)?;
                        report.add(outcome(op, true, None, false));
                    } else if result.failed.contains(&key) {
                        let e = SyncError::Backend("rejected in batch".to_string());
                        self.record_failure(op, &e, report)?;
                    } else {
                        report.add(outcome(op, true, None, true));
                    }
                }
                info!(synced = result.synced.len(), failed = result.failed.len(), "batch replayed");
            },
            Err(e) if e.is_transient() => {
                for op in ops {
                    self.queue().record_attempt(&op.key(), Some(&e.to_string()))?;
                }
                report.interrupted = true;
            },
            Err(e) => {
                for op in ops {
                    self.record_failure(op, &e, report)?;
                }
            },
        }
        Ok(())
    }

    /// Keep a rejected operation queued with its error for inspection.
    fn record_failure(
        &self,
        op: &PendingOperation,
        error: &SyncError,
        report: &mut DrainReport,
    ) -> Result<()> {
        warn!(key = %op.key(), kind = error.kind(), error = %error, "queued operation failed");
        self.queue().record_attempt(&op.key(), Some(&error.to_string()))?;
        report.add(outcome(op, false, Some(error), false));
        Ok(())
    }
}

fn outcome(
    op: &PendingOperation,
    success: bool,
    error: Option<&SyncError>,
    skipped: bool,
) -> ExecutionResult {
    ExecutionResult {
        key: op.key(),
        op_type: op.op_type,
        success,
        error: error.map(ToString::to_string),
        skipped,
    }
}

/// Re-apply unsent local changes on top of freshly fetched items.
pub(super) fn overlay_queued(items: &mut Vec<Item>, queued: &[PendingOperation]) {
    for op in queued {
        match op.op_type {
            OperationType::Create => {},
            OperationType::Update => {
                if let (Ok(patch), Some(item)) =
                    (op.patch(), items.iter_mut().find(|item| item.id == op.id))
                {
                    patch.apply_to(item);
                }
            },
            OperationType::Delete if op.delete_payload().permanent => {
                items.retain(|item| item.id != op.id);
            },
            OperationType::Delete => {
                if let Some(item) = items.iter_mut().find(|item| item.id == op.id) {
                    item.active = false;
                }
            },
            OperationType::Move | OperationType::UpdateOrder => {
                if let (Ok(target), Some(item)) =
                    (op.move_target(), items.iter_mut().find(|item| item.id == op.id))
                {
                    item.parent_id = target.parent_id;
                    item.order_index = target.order_index;
                }
            },
        }
    }
}
