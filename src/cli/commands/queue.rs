//! Queue inspection commands.

use colored::Colorize;

use crate::cli::args::{OutputFormat, QueueCommands};
use crate::error::SyncError;
use crate::features::sync::OperationQueue;
use crate::output::{format_operations, format_stats, to_json};

/// Execute queue subcommands against the on-disk queue.
///
/// # Errors
///
/// Returns an error if the queue database cannot be opened or queried.
pub fn queue(cmd: QueueCommands, format: OutputFormat) -> Result<String, SyncError> {
    let queue = OperationQueue::new()?;
    run(&queue, cmd, format)
}

fn run(queue: &OperationQueue, cmd: QueueCommands, format: OutputFormat) -> Result<String, SyncError> {
    match cmd {
        QueueCommands::Status => format_stats(&queue.stats()?, format),
        QueueCommands::List { workspace, limit } => {
            let mut operations = queue.get_all(workspace.as_deref())?;
            operations.truncate(limit);
            format_operations(&operations, format)
        },
        QueueCommands::Remove { key } => {
            let removed = queue.remove(&key)?;
            match format {
                OutputFormat::Json => to_json(&serde_json::json!({
                    "key": key,
                    "removed": removed,
                })),
                OutputFormat::Pretty if removed => Ok(format!("{} Removed {key}", "✓".green())),
                OutputFormat::Pretty => Err(SyncError::NotFound(format!("queued operation {key}"))),
            }
        },
        QueueCommands::Clear { force } => {
            let pending = queue.stats()?.pending;
            if pending > 0 && !force {
                return Err(SyncError::InvalidInput(format!(
                    "{pending} operations are waiting to sync; pass --force to discard them"
                )));
            }
            let cleared = queue.clear()?;
            match format {
                OutputFormat::Json => to_json(&serde_json::json!({ "cleared": cleared })),
                OutputFormat::Pretty => Ok(format!("{} Cleared {cleared} operations", "✓".green())),
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::sync::PendingOperation;

    fn create_test_queue() -> OperationQueue {
        let queue = OperationQueue::in_memory().unwrap();
        queue
            .save(&PendingOperation::delete("a", "ws-1", false).unwrap())
            .unwrap();
        queue
            .save(&PendingOperation::delete("b", "ws-2", true).unwrap())
            .unwrap();
        queue
    }

    #[test]
    fn test_list_filters_by_workspace() {
        let queue = create_test_queue();

        let output = run(
            &queue,
            QueueCommands::List {
                workspace: Some("ws-2".to_string()),
                limit: 10,
            },
            OutputFormat::Json,
        )
        .unwrap();

        assert!(output.contains("\"count\": 1"));
        assert!(output.contains("delete:b"));
    }

    #[test]
    fn test_remove_unknown_key_is_an_error_in_pretty_mode() {
        let queue = create_test_queue();

        let result = run(
            &queue,
            QueueCommands::Remove {
                key: "update:zzz".to_string(),
            },
            OutputFormat::Pretty,
        );

        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[test]
    fn test_clear_requires_force() {
        let queue = create_test_queue();

        assert!(run(&queue, QueueCommands::Clear { force: false }, OutputFormat::Pretty).is_err());
        let output = run(&queue, QueueCommands::Clear { force: true }, OutputFormat::Json).unwrap();

        assert!(output.contains("\"cleared\": 2"));
        assert!(!queue.has_pending().unwrap());
    }
}
