//! Queue drain coordination.
//!
//! Only one drain runs at a time. A request that arrives while a drain is in
//! flight is remembered and served by one follow-up pass once the current one
//! finishes.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info};

use super::operation::{OperationType, PendingOperation};
use crate::error::Result;

/// Result of replaying one queued operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Queue key
    pub key: String,
    pub op_type: OperationType,
    pub success: bool,
    /// Error message if failed
    pub error: Option<String>,
    /// Left queued without being sent (e.g. waiting for a parent)
    pub skipped: bool,
}

/// Result of one or more drain passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Number of passes executed; 0 when another drain was already running.
    pub passes: usize,
    /// A transient failure cut a pass short.
    pub interrupted: bool,
    pub results: Vec<ExecutionResult>,
}

impl DrainReport {
    /// Add a result.
    pub fn add(&mut self, result: ExecutionResult) {
        if result.skipped {
            self.skipped += 1;
        } else if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    /// Fold the report of a later pass into this one.
    pub fn absorb(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.passes += other.passes;
        self.interrupted |= other.interrupted;
        self.results.extend(other.results);
    }

    /// Check if all attempted operations succeeded.
    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }

    /// Get total operations processed.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Single-flight guard for drains.
#[derive(Debug, Default)]
pub struct SyncCoordinator {
    is_syncing: AtomicBool,
    follow_up: AtomicBool,
}

/// Clears `is_syncing` even if the pass future is dropped or errors.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::Acquire)
    }

    /// Ask for another pass if a drain is running. Returns whether one was.
    pub fn request_follow_up(&self) -> bool {
        if self.is_syncing() {
            self.follow_up.store(true, Ordering::Release);
            return true;
        }
        false
    }

    fn try_acquire(&self) -> bool {
        self.is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Run `pass` unless a drain is already in flight.
    ///
    /// Requests that arrive during a pass are coalesced into a single
    /// follow-up pass; a request during the follow-up earns another one.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `pass`.
    pub async fn run<F, Fut>(&self, mut pass: F) -> Result<DrainReport>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<DrainReport>>,
    {
        if !self.try_acquire() {
            self.follow_up.store(true, Ordering::Release);
            debug!("drain already running; follow-up requested");
            return Ok(DrainReport::default());
        }

        let mut report = DrainReport::default();
        loop {
            let guard = SyncingGuard(&self.is_syncing);
            loop {
                let mut next = pass().await?;
                next.passes = 1;
                report.absorb(next);
                if !self.follow_up.swap(false, Ordering::AcqRel) {
                    break;
                }
                debug!("running follow-up drain");
            }
            drop(guard);

            // A request can land between the last check and the release
            if !self.follow_up.swap(false, Ordering::AcqRel) || !self.try_acquire() {
                break;
            }
            debug!("running follow-up drain");
        }

        if report.total() > 0 {
            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                passes = report.passes,
                "queue drained"
            );
        }
        Ok(report)
    }
}

/// Order creates so that parents come before their children.
///
/// A create whose parent is another queued create waits for it; everything
/// else keeps timestamp order. Creates caught in a parent cycle are appended
/// in timestamp order.
#[must_use]
pub fn order_creates(creates: Vec<PendingOperation>) -> Vec<PendingOperation> {
    let queued: HashSet<String> = creates.iter().map(|op| op.id.clone()).collect();
    let mut waiting: HashMap<String, Vec<usize>> = HashMap::new();
    let mut ready: Vec<usize> = Vec::new();

    for (i, op) in creates.iter().enumerate() {
        match op.parent_id() {
            Some(parent) if parent != op.id && queued.contains(&parent) => {
                waiting.entry(parent).or_default().push(i);
            },
            _ => ready.push(i),
        }
    }

    let mut placed = vec![false; creates.len()];
    let mut order = Vec::with_capacity(creates.len());
    let mut cursor = 0;
    while cursor < ready.len() {
        let i = ready[cursor];
        cursor += 1;
        placed[i] = true;
        order.push(i);
        if let Some(children) = waiting.remove(&creates[i].id) {
            ready.extend(children);
        }
    }
    order.extend((0..creates.len()).filter(|&i| !placed[i]));

    let mut slots: Vec<Option<PendingOperation>> = creates.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}
