//! Output formatting for treesync.
//!
//! Every formatter has a pretty and a JSON flavour selected by [`OutputFormat`].

mod json;
mod pretty;

use crate::cli::args::OutputFormat;
use crate::core::HierarchicalItem;
use crate::error::SyncError;
use crate::features::sync::{DrainReport, PendingOperation, QueueStats};

pub use json::*;
pub use pretty::*;

/// Format a forest based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_tree(
    forest: &[HierarchicalItem],
    title: &str,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_tree_pretty(forest, title)),
        OutputFormat::Json => format_tree_json(forest, title),
    }
}

/// Format queued operations based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_operations(
    operations: &[PendingOperation],
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_operations_pretty(operations)),
        OutputFormat::Json => format_operations_json(operations),
    }
}

/// Format queue statistics based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_stats(stats: &QueueStats, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_stats_pretty(stats)),
        OutputFormat::Json => format_stats_json(stats),
    }
}

/// Format a drain report based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_report(report: &DrainReport, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_report_pretty(report)),
        OutputFormat::Json => format_report_json(report),
    }
}
