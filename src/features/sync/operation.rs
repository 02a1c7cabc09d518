//! Operation types for the offline queue.
//!
//! Defines the operations that can be queued and their payloads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{ItemPatch, NewItem};
use crate::error::{Result, SyncError};

/// Operation types that can be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Create an item that only exists locally under a temp id
    Create,
    /// Field update
    Update,
    /// Soft or permanent delete
    Delete,
    /// Reparent plus new order index
    Move,
    /// Order index change within the same parent
    UpdateOrder,
}

impl OperationType {
    /// Stable name used in queue keys and the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::UpdateOrder => "update_order",
        }
    }

    /// Get the display name for this operation type.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Move => "Move",
            Self::UpdateOrder => "Update Order",
        }
    }

    /// Whether replaying the operation twice leaves the same end state.
    #[must_use]
    pub const fn is_idempotent(&self) -> bool {
        !matches!(self, Self::Create)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for OperationType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "move" => Ok(Self::Move),
            "update_order" => Ok(Self::UpdateOrder),
            other => Err(SyncError::InvalidInput(format!(
                "Unknown operation type: {other}"
            ))),
        }
    }
}

/// Payload for delete operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePayload {
    /// Hard delete instead of deactivating.
    #[serde(default)]
    pub permanent: bool,
}

/// Payload for move and update-order operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovePayload {
    pub parent_id: Option<String>,
    pub order_index: i64,
}

/// A queued operation with metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Operation type
    pub op_type: OperationType,
    /// Target entity id (a temp id for creates)
    pub id: String,
    pub workspace_id: String,
    /// JSON payload
    pub payload: serde_json::Value,
    /// When the operation was first queued
    pub timestamp: DateTime<Utc>,
    /// Number of replay attempts
    pub attempts: u32,
    /// Last error message
    pub last_error: Option<String>,
    /// Last attempt timestamp
    pub last_attempt: Option<DateTime<Utc>>,
}

impl PendingOperation {
    /// Create a new operation with a raw payload.
    #[must_use]
    pub fn new(
        op_type: OperationType,
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            op_type,
            id: id.into(),
            workspace_id: workspace_id.into(),
            payload,
            timestamp: Utc::now(),
            attempts: 0,
            last_error: None,
            last_attempt: None,
        }
    }

    /// Create an item that exists locally as `temp_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn create(temp_id: &str, data: &NewItem) -> Result<Self> {
        Ok(Self::new(
            OperationType::Create,
            temp_id,
            data.workspace_id.clone(),
            serde_json::to_value(data)?,
        ))
    }

    /// Update fields of an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn update(id: &str, workspace_id: &str, patch: &ItemPatch) -> Result<Self> {
        Ok(Self::new(
            OperationType::Update,
            id,
            workspace_id,
            serde_json::to_value(patch)?,
        ))
    }

    /// Delete an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn delete(id: &str, workspace_id: &str, permanent: bool) -> Result<Self> {
        Ok(Self::new(
            OperationType::Delete,
            id,
            workspace_id,
            serde_json::to_value(DeletePayload { permanent })?,
        ))
    }

    /// Move an item under `parent_id` at `order_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn moved(
        id: &str,
        workspace_id: &str,
        parent_id: Option<String>,
        order_index: i64,
    ) -> Result<Self> {
        Ok(Self::new(
            OperationType::Move,
            id,
            workspace_id,
            serde_json::to_value(MovePayload {
                parent_id,
                order_index,
            })?,
        ))
    }

    /// Change an item's order index without reparenting.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn update_order(
        id: &str,
        workspace_id: &str,
        parent_id: Option<String>,
        order_index: i64,
    ) -> Result<Self> {
        let mut op = Self::moved(id, workspace_id, parent_id, order_index)?;
        op.op_type = OperationType::UpdateOrder;
        Ok(op)
    }

    /// Queue key: one entry per `(type, id)`.
    #[must_use]
    pub fn key(&self) -> String {
        key_for(self.op_type, &self.id)
    }

    /// Decode a create payload.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Parse` if the payload has the wrong shape.
    pub fn new_item(&self) -> Result<NewItem> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Decode an update payload.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Parse` if the payload has the wrong shape.
    pub fn patch(&self) -> Result<ItemPatch> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Decode a move or update-order payload.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Parse` if the payload has the wrong shape.
    pub fn move_target(&self) -> Result<MovePayload> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Decode a delete payload. Missing fields mean a soft delete.
    #[must_use]
    pub fn delete_payload(&self) -> DeletePayload {
        serde_json::from_value(self.payload.clone()).unwrap_or_default()
    }

    /// The parent this operation points at, if any.
    #[must_use]
    pub fn parent_id(&self) -> Option<String> {
        self.payload
            .get("parent_id")
            .and_then(serde_json::Value::as_str)
            .map(String::from)
    }
}

/// Build a queue key from its parts.
#[must_use]
pub fn key_for(op_type: OperationType, id: &str) -> String {
    format!("{}:{id}", op_type.as_str())
}
