//! Command implementations for treesync.
//!
//! Every command returns the text to print; `main` does the printing.

mod demo;
mod queue;

pub use demo::demo;
pub use queue::queue;

use std::path::Path;

use crate::cli::args::{ConfigCommands, OutputFormat, TreeArgs};
use crate::config::{Config, Paths};
use crate::core::{build_hierarchy, HierarchicalItem, Item};
use crate::error::SyncError;
use crate::output::{format_tree, to_json};

/// Execute tree command
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a JSON item array.
pub fn tree(args: &TreeArgs, format: OutputFormat) -> Result<String, SyncError> {
    let items = read_items(&args.file)?;
    let mut forest = build_hierarchy(&items);
    if args.active_only {
        forest = prune_inactive(forest);
    }
    let title = args
        .file
        .file_name()
        .map_or_else(|| "Items".to_string(), |name| name.to_string_lossy().into_owned());
    format_tree(&forest, &title, format)
}

fn read_items(path: &Path) -> Result<Vec<Item>, SyncError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        SyncError::InvalidInput(format!("Failed to read {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Drop inactive nodes together with their subtrees.
fn prune_inactive(forest: Vec<HierarchicalItem>) -> Vec<HierarchicalItem> {
    forest
        .into_iter()
        .filter(|node| node.item.active)
        .map(|mut node| {
            node.children = prune_inactive(std::mem::take(&mut node.children));
            node
        })
        .collect()
}

/// Execute config subcommands
///
/// # Errors
///
/// Returns an error if the home directory cannot be resolved or the config
/// file cannot be parsed.
pub fn config(cmd: &ConfigCommands, format: OutputFormat) -> Result<String, SyncError> {
    let paths = Paths::new()?;
    match cmd {
        ConfigCommands::Show => {
            let config = Config::load_from_path(&paths.config_file)?;
            match format {
                OutputFormat::Pretty => config.to_yaml(),
                OutputFormat::Json => to_json(&config),
            }
        },
        ConfigCommands::Path => match format {
            OutputFormat::Pretty => Ok(format!(
                "config:   {}\ndatabase: {}",
                paths.config_file.display(),
                paths.database.display()
            )),
            OutputFormat::Json => to_json(&serde_json::json!({
                "root": paths.root,
                "config": paths.config_file,
                "database": paths.database,
            })),
        },
    }
}
