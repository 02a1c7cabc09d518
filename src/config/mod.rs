//! Configuration management for treesync.
//!
//! This module handles loading and saving configuration from `~/.treesync/`.

mod paths;
mod settings;

pub use paths::Paths;
pub use settings::{Config, GeneralConfig, ReconcileConfig, RetryConfig, SyncConfig};
