//! Scripted sync session against an in-memory backend.

use std::sync::Arc;

use colored::Colorize;

use crate::backend::{Connectivity, MemoryBackend};
use crate::cli::args::{DemoArgs, OutputFormat};
use crate::config::Config;
use crate::core::{ItemType, NewItem};
use crate::error::SyncError;
use crate::features::engine::SyncEngine;
use crate::features::sync::OperationQueue;
use crate::output::{format_report, format_tree, to_json};

/// Execute demo command
///
/// # Errors
///
/// Returns an error if the runtime cannot start or an engine operation fails.
pub fn demo(args: &DemoArgs, config: Config, format: OutputFormat) -> Result<String, SyncError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args, config, format))
}

async fn run(args: &DemoArgs, config: Config, format: OutputFormat) -> Result<String, SyncError> {
    let ws = args.workspace.as_str();
    let backend = Arc::new(MemoryBackend::new());
    let connectivity = Connectivity::new(false);
    let engine = SyncEngine::new(
        ws,
        backend.clone(),
        OperationQueue::in_memory()?,
        connectivity.clone(),
        config,
    );

    // Offline: everything lands in the queue
    let inbox = engine
        .add_item(NewItem::new(ws, ItemType::Folder, "Inbox"))
        .await?;
    let note = engine
        .add_item(
            NewItem::new(ws, ItemType::Note, "First note")
                .with_parent(Some(inbox.clone()))
                .with_content("Written offline"),
        )
        .await?;
    let offline_tree = engine.tree();
    let queued = engine.queued_operations()?.len();

    connectivity.set_online(true);
    let report = engine.sync_now().await?;

    // Online: move under contention, then delete the emptied folder
    let archive = engine
        .add_item(NewItem::new(ws, ItemType::Folder, "Archive"))
        .await?;
    backend.inject_order_conflicts(args.conflicts);
    engine.move_item(&note, Some(&archive)).await?;
    engine.delete_item(&inbox).await?;
    engine.refresh().await?;
    let final_tree = engine.tree();

    match format {
        OutputFormat::Json => to_json(&serde_json::json!({
            "workspace": ws,
            "queued_offline": queued,
            "offline_tree": *offline_tree,
            "drain": report,
            "tree": *final_tree,
            "backend_calls": backend.calls(),
        })),
        OutputFormat::Pretty => Ok([
            format_tree(&offline_tree, "Offline", format)?,
            format!("{} operations queued while offline", queued.to_string().yellow()),
            String::new(),
            format_report(&report, format)?,
            String::new(),
            format_tree(&final_tree, "After sync", format)?,
            format!("{} backend calls", backend.calls().len()),
        ]
        .join("\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::engine::test_support::fast_config;

    #[test]
    fn test_demo_session_converges() {
        let args = DemoArgs {
            workspace: "demo".to_string(),
            conflicts: 1,
        };

        let output = demo(&args, fast_config(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        assert_eq!(value["queued_offline"], 2);
        assert_eq!(value["drain"]["succeeded"], 2);
        let tree = value["tree"].as_array().unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0]["title"], "Archive");
        assert_eq!(tree[0]["children"][0]["title"], "First note");
    }
}
