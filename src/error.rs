//! Error types for treesync.
//!
//! Errors fall into the classes the engine reacts to differently: transient
//! network failures are queued, conflicts are retried, not-found is treated as a
//! terminal success and everything else rolls the optimistic mutation back.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by the sync engine and its collaborators.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The backend could not be reached (offline, timeout, connection reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The backend rejected a write because of a uniqueness or deadlock conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The entity no longer exists on the backend.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Terminal backend failure; never retried.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A retried operation kept failing.
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed.
        last: Box<SyncError>,
    },

    /// The caller asked for something that can never succeed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration could not be read or written.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether the failure is caused by connectivity and should fall back to
    /// the offline queue.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Whether the failure is an order-index conflict worth retrying.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether the entity is already gone on the backend.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Build an error from a backend status code and message.
    ///
    /// Mirrors the HTTP semantics most persistence services expose.
    #[must_use]
    pub fn from_status(status: u16, message: &str) -> Self {
        let lower = message.to_lowercase();
        match status {
            404 | 410 => Self::NotFound(message.to_string()),
            409 => Self::Conflict(message.to_string()),
            408 | 502..=504 => Self::Network(message.to_string()),
            0 => Self::Network(message.to_string()),
            _ if lower.contains("unique") || lower.contains("deadlock") => {
                Self::Conflict(message.to_string())
            },
            _ => Self::Backend(format!("{status}: {message}")),
        }
    }

    /// Short machine-readable class name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Backend(_) => "backend",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::InvalidInput(_) => "invalid_input",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Parse(_) => "parse",
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(SyncError::from_status(404, "gone").is_not_found());
        assert!(SyncError::from_status(409, "dup").is_conflict());
        assert!(SyncError::from_status(503, "unavailable").is_transient());
        assert!(SyncError::from_status(500, "duplicate key violates unique constraint").is_conflict());
        assert!(SyncError::from_status(500, "deadlock detected").is_conflict());
        assert!(matches!(
            SyncError::from_status(500, "boom"),
            SyncError::Backend(_)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::NotFound("item abc".to_string());
        assert_eq!(err.to_string(), "Not found: item abc");

        let err = SyncError::RetriesExhausted {
            attempts: 3,
            last: Box::new(SyncError::Conflict("order_index".to_string())),
        };
        assert_eq!(err.to_string(), "Gave up after 3 attempts: Conflict: order_index");
    }

    #[test]
    fn test_kind() {
        assert_eq!(SyncError::Network("x".to_string()).kind(), "network");
        assert_eq!(SyncError::Backend("x".to_string()).kind(), "backend");
    }
}
