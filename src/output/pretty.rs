use chrono::Utc;
use colored::Colorize;

use crate::core::{HierarchicalItem, ItemType};
use crate::features::sync::{DrainReport, PendingOperation, QueueStats};

fn type_icon(item_type: ItemType) -> colored::ColoredString {
    match item_type {
        ItemType::Folder => "▸".blue(),
        ItemType::Note => "•".white(),
        ItemType::Video => "▶".red(),
        ItemType::Section => "§".magenta(),
        ItemType::Task => "☐".green(),
    }
}

fn push_node(output: &mut String, node: &HierarchicalItem, depth: usize) {
    let item = &node.item;
    let title = if item.active {
        item.title.bold().to_string()
    } else {
        item.title.strikethrough().dimmed().to_string()
    };

    let mut line = format!("{}{} {}", "  ".repeat(depth), type_icon(item.item_type), title);
    line.push_str(&format!("  {}", item.id.dimmed()));
    if item.completed == Some(true) {
        line.push_str(&format!("  {}", "done".green()));
    }
    output.push_str(&line);
    output.push('\n');

    for child in &node.children {
        push_node(output, child, depth + 1);
    }
}

/// Format a forest as an indented outline
pub fn format_tree_pretty(forest: &[HierarchicalItem], title: &str) -> String {
    let total: usize = forest.iter().map(HierarchicalItem::len).sum();
    if total == 0 {
        return format!("{title} (0 items)\n  No items");
    }

    let mut output = format!("{title} ({total} items)\n");
    output.push_str(&"─".repeat(60));
    output.push('\n');
    for node in forest {
        push_node(&mut output, node, 0);
    }
    output
}

/// Format queued operations as a table
pub fn format_operations_pretty(operations: &[PendingOperation]) -> String {
    if operations.is_empty() {
        return "Queue (0 operations)\n  Nothing waiting to sync".to_string();
    }

    let mut output = format!("Queue ({} operations)\n", operations.len());
    output.push_str(&"─".repeat(60));
    output.push('\n');

    for op in operations {
        let mut line = format!(
            "{} {}  {}",
            format!("{:<8}", op.op_type.display_name()).cyan(),
            op.id.bold(),
            op.workspace_id.dimmed()
        );
        if op.attempts > 0 {
            line.push_str(&format!("  {}", format!("{} attempts", op.attempts).yellow()));
        }
        if let Some(error) = &op.last_error {
            line.push_str(&format!("\n         {}", error.red()));
        }
        output.push_str(&line);
        output.push('\n');
    }

    output
}

/// Format queue statistics
pub fn format_stats_pretty(stats: &QueueStats) -> String {
    let mut lines = Vec::new();

    lines.push("Sync Queue Status".bold().to_string());
    lines.push("─".repeat(40));
    lines.push(format!(
        "  Pending:    {} {}",
        stats.pending,
        if stats.pending > 0 {
            "operations waiting".dimmed()
        } else {
            "".dimmed()
        }
    ));
    lines.push(format!(
        "  Failing:    {} {}",
        stats.failing,
        if stats.failing > 0 {
            "operations need attention".red()
        } else {
            "".normal()
        }
    ));

    if let Some(oldest) = stats.oldest_pending {
        let age = Utc::now().signed_duration_since(oldest);
        let age_str = if age.num_hours() > 0 {
            format!("{} hours ago", age.num_hours())
        } else if age.num_minutes() > 0 {
            format!("{} minutes ago", age.num_minutes())
        } else {
            "just now".to_string()
        };
        lines.push(format!("  Oldest:     {}", age_str.dimmed()));
    }

    lines.join("\n")
}

/// Format the outcome of a drain
pub fn format_report_pretty(report: &DrainReport) -> String {
    let mut lines = vec![format!(
        "Drain: {} succeeded, {} failed, {} skipped ({} passes)",
        report.succeeded.to_string().green(),
        report.failed.to_string().red(),
        report.skipped,
        report.passes
    )];
    if report.interrupted {
        lines.push("  Stopped early: backend unreachable".yellow().to_string());
    }
    for result in report.results.iter().filter(|r| !r.success && !r.skipped) {
        lines.push(format!(
            "  {} {}: {}",
            "✗".red(),
            result.key,
            result.error.as_deref().unwrap_or("unknown error")
        ));
    }
    lines.join("\n")
}
