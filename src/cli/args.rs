use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "treesync")]
#[command(about = "Inspect and exercise an optimistic tree sync engine")]
#[command(long_about = "treesync - optimistic sync for hierarchical workspaces

Inspect the offline operation queue, build trees from item dumps and run a
scripted sync session against an in-memory backend.

QUICK START:
  treesync queue status        Show what is waiting to be synced
  treesync queue list          List queued operations
  treesync tree items.json     Print the hierarchy of an item dump
  treesync demo                Run an offline/online session end to end

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

Set RUST_LOG=treesync=debug to see what the engine is doing.")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Use 'pretty' for human-readable colored output (default),
    /// or 'json' for machine-readable output suitable for scripting.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or edit the offline operation queue
    ///
    /// The queue lives in ~/.treesync/queue.db (or $TREESYNC_HOME/queue.db)
    /// and holds one entry per (operation, item) pair.
    ///
    /// # Examples
    ///
    ///   treesync queue status
    ///   treesync queue list --workspace ws-1
    ///   treesync queue remove update:item-42
    ///   treesync queue clear --force
    #[command(alias = "q")]
    Queue(QueueArgs),

    /// Print the hierarchy of a JSON item dump
    ///
    /// Reads an array of items (as returned by the backend) and prints the
    /// forest they form. Inactive items are shown unless --active-only is set.
    ///
    /// # Examples
    ///
    ///   treesync tree items.json
    ///   treesync tree items.json --active-only -o json
    Tree(TreeArgs),

    /// Show configuration
    Config(ConfigArgs),

    /// Run a scripted sync session against an in-memory backend
    ///
    /// Creates items while offline, reconnects and drains the queue, then
    /// moves and deletes items online. Uses a throwaway in-memory queue.
    Demo(DemoArgs),
}

#[derive(Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommands,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show queue counts and the oldest entry
    Status,

    /// List queued operations, oldest first
    List {
        /// Only show operations for this workspace
        #[arg(short, long)]
        workspace: Option<String>,

        /// Maximum number of operations to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Remove one queued operation by key (e.g. "delete:item-7")
    Remove {
        /// Queue key
        key: String,
    },

    /// Remove every queued operation
    Clear {
        /// Skip the confirmation check
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args)]
pub struct TreeArgs {
    /// JSON file containing an array of items
    pub file: PathBuf,

    /// Hide soft-deleted items and their descendants
    #[arg(long)]
    pub active_only: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as YAML
    Show,
    /// Print the configuration and database paths
    Path,
}

#[derive(Args)]
pub struct DemoArgs {
    /// Workspace id used for the session
    #[arg(short, long, default_value = "demo")]
    pub workspace: String,

    /// Order-index conflicts to inject into the first move
    #[arg(long, default_value = "1")]
    pub conflicts: u32,
}
