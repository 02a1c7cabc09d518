//! JSON output formatting for treesync.

use serde::Serialize;
use serde_json::json;

use crate::core::HierarchicalItem;
use crate::error::SyncError;
use crate::features::sync::{DrainReport, PendingOperation, QueueStats};

/// Format a forest as JSON
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_tree_json(forest: &[HierarchicalItem], title: &str) -> Result<String, SyncError> {
    let total: usize = forest.iter().map(HierarchicalItem::len).sum();
    let output = json!({
        "title": title,
        "roots": forest.len(),
        "count": total,
        "items": forest
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format queued operations as JSON
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_operations_json(operations: &[PendingOperation]) -> Result<String, SyncError> {
    let items: Vec<_> = operations
        .iter()
        .map(|op| {
            json!({
                "key": op.key(),
                "operation": op,
            })
        })
        .collect();
    let output = json!({
        "count": operations.len(),
        "items": items
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format queue statistics as JSON
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_stats_json(stats: &QueueStats) -> Result<String, SyncError> {
    let output = json!({
        "pending": stats.pending,
        "failing": stats.failing,
        "oldest_pending": stats.oldest_pending.map(|t| t.to_rfc3339()),
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Format a drain report as JSON
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_report_json(report: &DrainReport) -> Result<String, SyncError> {
    to_json(report)
}

/// Generic JSON formatter for any serializable type
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, SyncError> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{build_hierarchy, Item, ItemType};

    #[test]
    fn test_format_tree_json_counts_nested_items() {
        let items = vec![
            Item::new("f", "ws", ItemType::Folder, "Folder"),
            Item::new("n", "ws", ItemType::Note, "Note").with_parent("f"),
        ];
        let forest = build_hierarchy(&items);

        let result = format_tree_json(&forest, "Workspace").unwrap();
        let value: serde_json::Value = serde_json::from_str(&result).unwrap();

        assert_eq!(value["roots"], 1);
        assert_eq!(value["count"], 2);
        assert_eq!(value["items"][0]["children"][0]["id"], "n");
    }

    #[test]
    fn test_format_operations_json_includes_keys() {
        let ops = vec![PendingOperation::delete("a", "ws", true).unwrap()];

        let result = format_operations_json(&ops).unwrap();

        assert!(result.contains("\"key\": \"delete:a\""));
        assert!(result.contains("\"permanent\": true"));
    }

    #[test]
    fn test_format_stats_json_empty_queue() {
        let stats = QueueStats {
            pending: 0,
            failing: 0,
            oldest_pending: None,
        };

        let result = format_stats_json(&stats).unwrap();

        assert!(result.contains("\"pending\": 0"));
        assert!(result.contains("\"oldest_pending\": null"));
    }
}
