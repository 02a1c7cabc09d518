//! Offline operation queue storage.
//!
//! One row per `(type, id)`. Enqueueing is idempotent: a later operation for the
//! same key replaces or merges into the earlier one, and operations on items
//! that were never created on the backend fold into their queued create.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::operation::{key_for, OperationType, PendingOperation};
use crate::core::is_temp_id;
use crate::error::{Result, SyncError};
use crate::storage::Database;

const SELECT_COLUMNS: &str = "SELECT op_type, entity_id, workspace_id, payload, created_at, \
                              attempts, last_error, last_attempt FROM pending_operations";

/// What `save` did with an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Stored under its own key, replacing any previous entry.
    Stored,
    /// Field-merged into an existing update for the same id.
    Merged,
    /// Folded into the queued create of a temp item.
    Folded,
    /// Deleting a never-created item cancelled its queued create.
    Cancelled,
}

/// Durable queue of operations waiting for the backend.
pub struct OperationQueue {
    db: Database,
}

impl OperationQueue {
    /// Open the queue at the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn new() -> Result<Self> {
        Ok(Self { db: Database::open()? })
    }

    /// Create a queue with an existing database connection.
    #[must_use]
    pub const fn with_database(db: Database) -> Self {
        Self { db }
    }

    /// Open an in-memory queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_database(Database::open_in_memory()?))
    }

    /// Persist an operation, applying the merge and fold rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails or a stored payload cannot
    /// be decoded.
    pub fn save(&self, op: &PendingOperation) -> Result<SaveOutcome> {
        if is_temp_id(&op.id) && op.op_type != OperationType::Create {
            if let Some(mut create) = self.get(&key_for(OperationType::Create, &op.id))? {
                return self.fold_into_create(&mut create, op);
            }
        }

        if op.op_type == OperationType::Update {
            if let Some(existing) = self.get(&op.key())? {
                let mut patch = existing.patch()?;
                patch.merge(op.patch()?);
                let mut merged = existing;
                merged.payload = serde_json::to_value(&patch)?;
                self.write(&merged)?;
                debug!(key = %merged.key(), "merged update into queued entry");
                return Ok(SaveOutcome::Merged);
            }
        }

        self.write(op)?;
        debug!(key = %op.key(), "queued operation");
        Ok(SaveOutcome::Stored)
    }

    fn fold_into_create(
        &self,
        create: &mut PendingOperation,
        op: &PendingOperation,
    ) -> Result<SaveOutcome> {
        match op.op_type {
            OperationType::Delete => {
                self.remove_entity(&op.id)?;
                debug!(id = %op.id, "cancelled queued create");
                return Ok(SaveOutcome::Cancelled);
            },
            OperationType::Update => {
                let mut data = create.new_item()?;
                op.patch()?.apply_to_new(&mut data);
                create.payload = serde_json::to_value(&data)?;
            },
            OperationType::Move | OperationType::UpdateOrder => {
                let target = op.move_target()?;
                let mut data = create.new_item()?;
                data.parent_id = target.parent_id;
                data.order_index = Some(target.order_index);
                create.payload = serde_json::to_value(&data)?;
            },
            OperationType::Create => {},
        }
        self.write(create)?;
        debug!(key = %create.key(), folded = %op.op_type, "folded into queued create");
        Ok(SaveOutcome::Folded)
    }

    fn write(&self, op: &PendingOperation) -> Result<()> {
        self.db
            .connection()
            .execute(
                r"INSERT OR REPLACE INTO pending_operations
                  (key, op_type, entity_id, workspace_id, payload, created_at,
                   attempts, last_error, last_attempt)
                  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    op.key(),
                    op.op_type.as_str(),
                    op.id,
                    op.workspace_id,
                    op.payload.to_string(),
                    op.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                    op.attempts,
                    op.last_error,
                    op.last_attempt.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| SyncError::Database(format!("Failed to save operation: {e}")))?;
        Ok(())
    }

    /// All queued operations, oldest first, optionally for one workspace.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_all(&self, workspace_id: Option<&str>) -> Result<Vec<PendingOperation>> {
        let conn = self.db.connection();
        let sql = format!(
            "{SELECT_COLUMNS} WHERE (?1 IS NULL OR workspace_id = ?1) ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([workspace_id], row_to_stored)
            .map_err(|e| SyncError::Database(format!("Failed to query operations: {e}")))?;

        let mut operations = Vec::new();
        for row in rows {
            operations.push(row.map_err(|e| SyncError::Database(e.to_string()))?.decode()?);
        }
        Ok(operations)
    }

    /// Look up an entry by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, key: &str) -> Result<Option<PendingOperation>> {
        let sql = format!("{SELECT_COLUMNS} WHERE key = ?1");
        let row = self
            .db
            .connection()
            .query_row(&sql, [key], row_to_stored)
            .optional()
            .map_err(|e| SyncError::Database(format!("Failed to query operation: {e}")))?;
        row.map(StoredRow::decode).transpose()
    }

    /// Remove an entry. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let rows = self
            .db
            .connection()
            .execute("DELETE FROM pending_operations WHERE key = ?1", [key])
            .map_err(|e| SyncError::Database(format!("Failed to remove operation: {e}")))?;
        Ok(rows > 0)
    }

    /// Remove every entry targeting an id. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_entity(&self, id: &str) -> Result<usize> {
        self.db
            .connection()
            .execute("DELETE FROM pending_operations WHERE entity_id = ?1", [id])
            .map_err(|e| SyncError::Database(format!("Failed to remove operations: {e}")))
    }

    /// Drop everything.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear(&self) -> Result<usize> {
        self.db
            .connection()
            .execute("DELETE FROM pending_operations", [])
            .map_err(|e| SyncError::Database(format!("Failed to clear queue: {e}")))
    }

    /// Increment the attempt count and record the error of a failed replay.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn record_attempt(&self, key: &str, error: Option<&str>) -> Result<()> {
        self.db
            .connection()
            .execute(
                r"UPDATE pending_operations SET
                  last_attempt = ?1,
                  last_error = ?2,
                  attempts = attempts + 1
                  WHERE key = ?3",
                params![Utc::now().to_rfc3339(), error, key],
            )
            .map_err(|e| SyncError::Database(format!("Failed to record attempt: {e}")))?;
        Ok(())
    }

    /// Rewrite references to a temp id once the backend assigned a real one.
    ///
    /// Entries targeting the temp id are re-keyed, and creates or moves that
    /// use it as their parent point at the real id. Returns the number of
    /// entries touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub fn resolve_temp_id(&self, temp_id: &str, real_id: &str) -> Result<usize> {
        let mut touched = 0;
        for mut op in self.get_all(None)? {
            let old_key = op.key();
            let mut changed = false;
            if op.id == temp_id && op.op_type != OperationType::Create {
                op.id = real_id.to_string();
                changed = true;
            }
            if op.parent_id().as_deref() == Some(temp_id) {
                if let Some(obj) = op.payload.as_object_mut() {
                    obj.insert(
                        "parent_id".to_string(),
                        serde_json::Value::String(real_id.to_string()),
                    );
                    changed = true;
                }
            }
            if changed {
                self.remove(&old_key)?;
                self.save(&op)?;
                touched += 1;
            }
        }
        if touched > 0 {
            debug!(temp_id, real_id, touched, "rewrote queued references");
        }
        Ok(touched)
    }

    /// Check if anything is queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn has_pending(&self) -> Result<bool> {
        Ok(self.stats()?.pending > 0)
    }

    /// Get queue statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self) -> Result<QueueStats> {
        let conn = self.db.connection();

        let (pending, failing): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(last_error) FROM pending_operations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| SyncError::Database(format!("Failed to count operations: {e}")))?;

        let oldest: Option<String> = conn
            .query_row(
                "SELECT created_at FROM pending_operations ORDER BY created_at ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| SyncError::Database(format!("Failed to get oldest pending: {e}")))?;

        Ok(QueueStats {
            pending,
            failing,
            oldest_pending: oldest.as_deref().and_then(parse_timestamp),
        })
    }
}

/// Queue statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of queued operations
    pub pending: i64,
    /// Queued operations whose last replay failed
    pub failing: i64,
    /// Oldest queued operation timestamp
    pub oldest_pending: Option<DateTime<Utc>>,
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

/// A row as stored, before the payload is decoded.
struct StoredRow {
    op_type: String,
    id: String,
    workspace_id: Option<String>,
    payload: String,
    created_at: String,
    attempts: u32,
    last_error: Option<String>,
    last_attempt: Option<String>,
}

impl StoredRow {
    fn decode(self) -> Result<PendingOperation> {
        Ok(PendingOperation {
            op_type: self.op_type.parse()?,
            id: self.id,
            workspace_id: self.workspace_id.unwrap_or_default(),
            payload: serde_json::from_str(&self.payload)?,
            timestamp: parse_timestamp(&self.created_at).unwrap_or_else(Utc::now),
            attempts: self.attempts,
            last_error: self.last_error,
            last_attempt: self.last_attempt.as_deref().and_then(parse_timestamp),
        })
    }
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        op_type: row.get(0)?,
        id: row.get(1)?,
        workspace_id: row.get(2)?,
        payload: row.get(3)?,
        created_at: row.get(4)?,
        attempts: row.get(5)?,
        last_error: row.get(6)?,
        last_attempt: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ItemPatch, ItemType, NewItem};

    fn create_test_queue() -> OperationQueue {
        OperationQueue::in_memory().unwrap()
    }

    fn title_patch(title: &str) -> ItemPatch {
        ItemPatch {
            title: Some(title.to_string()),
            ..ItemPatch::default()
        }
    }

    #[test]
    fn test_save_and_get() {
        let queue = create_test_queue();

        let op = PendingOperation::delete("abc", "ws", false).unwrap();
        assert_eq!(queue.save(&op).unwrap(), SaveOutcome::Stored);

        let loaded = queue.get("delete:abc").unwrap().unwrap();
        assert_eq!(loaded.op_type, OperationType::Delete);
        assert_eq!(loaded.workspace_id, "ws");
        assert_eq!(loaded.attempts, 0);
    }

    #[test]
    fn test_save_is_idempotent_per_key() {
        let queue = create_test_queue();

        let op = PendingOperation::update("abc", "ws", &title_patch("A")).unwrap();
        queue.save(&op).unwrap();
        queue.save(&op).unwrap();

        let all = queue.get_all(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].patch().unwrap(), title_patch("A"));
    }

    #[test]
    fn test_updates_merge_fields() {
        let queue = create_test_queue();

        queue
            .save(&PendingOperation::update("abc", "ws", &title_patch("A")).unwrap())
            .unwrap();
        let content = ItemPatch {
            content: Some("body".to_string()),
            ..ItemPatch::default()
        };
        let outcome = queue
            .save(&PendingOperation::update("abc", "ws", &content).unwrap())
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Merged);
        queue
            .save(&PendingOperation::update("abc", "ws", &title_patch("B")).unwrap())
            .unwrap();

        let patch = queue.get("update:abc").unwrap().unwrap().patch().unwrap();
        assert_eq!(patch.title.as_deref(), Some("B"));
        assert_eq!(patch.content.as_deref(), Some("body"));
    }

    #[test]
    fn test_update_on_temp_item_folds_into_create() {
        let queue = create_test_queue();

        let data = NewItem::new("ws", ItemType::Note, "Draft");
        queue
            .save(&PendingOperation::create("temp-1-aaa", &data).unwrap())
            .unwrap();

        let outcome = queue
            .save(&PendingOperation::update("temp-1-aaa", "ws", &title_patch("Final")).unwrap())
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Folded);

        let outcome = queue
            .save(&PendingOperation::moved("temp-1-aaa", "ws", Some("folder".to_string()), 7).unwrap())
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Folded);

        let all = queue.get_all(None).unwrap();
        assert_eq!(all.len(), 1);
        let folded = all[0].new_item().unwrap();
        assert_eq!(folded.title, "Final");
        assert_eq!(folded.parent_id.as_deref(), Some("folder"));
        assert_eq!(folded.order_index, Some(7));
    }

    #[test]
    fn test_delete_on_temp_item_cancels_create() {
        let queue = create_test_queue();

        let data = NewItem::new("ws", ItemType::Note, "Draft");
        queue
            .save(&PendingOperation::create("temp-1-aaa", &data).unwrap())
            .unwrap();

        let outcome = queue
            .save(&PendingOperation::delete("temp-1-aaa", "ws", false).unwrap())
            .unwrap();

        assert_eq!(outcome, SaveOutcome::Cancelled);
        assert!(!queue.has_pending().unwrap());
    }

    #[test]
    fn test_get_all_filters_by_workspace() {
        let queue = create_test_queue();

        queue
            .save(&PendingOperation::delete("a", "ws1", false).unwrap())
            .unwrap();
        queue
            .save(&PendingOperation::delete("b", "ws2", false).unwrap())
            .unwrap();

        assert_eq!(queue.get_all(None).unwrap().len(), 2);
        let ws1 = queue.get_all(Some("ws1")).unwrap();
        assert_eq!(ws1.len(), 1);
        assert_eq!(ws1[0].id, "a");
    }

    #[test]
    fn test_record_attempt() {
        let queue = create_test_queue();

        queue
            .save(&PendingOperation::delete("abc", "ws", false).unwrap())
            .unwrap();
        queue
            .record_attempt("delete:abc", Some("Connection error"))
            .unwrap();

        let loaded = queue.get("delete:abc").unwrap().unwrap();
        assert_eq!(loaded.attempts, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("Connection error"));
        assert!(loaded.last_attempt.is_some());

        let stats = queue.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failing, 1);
        assert!(stats.oldest_pending.is_some());
    }

    #[test]
    fn test_resolve_temp_id_rewrites_references() {
        let queue = create_test_queue();

        let child = NewItem::new("ws", ItemType::Note, "Child").with_parent(Some("temp-1-aaa".to_string()));
        queue
            .save(&PendingOperation::create("temp-2-bbb", &child).unwrap())
            .unwrap();
        queue
            .save(&PendingOperation::moved("real-9", "ws", Some("temp-1-aaa".to_string()), 3).unwrap())
            .unwrap();

        let touched = queue.resolve_temp_id("temp-1-aaa", "real-5").unwrap();
        assert_eq!(touched, 2);

        let create = queue.get("create:temp-2-bbb").unwrap().unwrap();
        assert_eq!(create.parent_id().as_deref(), Some("real-5"));
        let moved = queue.get("move:real-9").unwrap().unwrap();
        assert_eq!(moved.move_target().unwrap().parent_id.as_deref(), Some("real-5"));
    }

    #[test]
    fn test_remove_and_clear() {
        let queue = create_test_queue();

        queue
            .save(&PendingOperation::delete("a", "ws", false).unwrap())
            .unwrap();
        queue
            .save(&PendingOperation::delete("b", "ws", false).unwrap())
            .unwrap();

        assert!(queue.remove("delete:a").unwrap());
        assert!(!queue.remove("delete:a").unwrap());
        assert_eq!(queue.clear().unwrap(), 1);
        assert!(!queue.has_pending().unwrap());
    }

    #[test]
    fn test_queue_survives_reopen() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.db");

        {
            let queue = OperationQueue::with_database(Database::open_at(&path).unwrap());
            queue
                .save(&PendingOperation::delete("abc", "ws", false).unwrap())
                .unwrap();
        }

        let queue = OperationQueue::with_database(Database::open_at(&path).unwrap());
        assert!(queue.get("delete:abc").unwrap().is_some());
    }
}
