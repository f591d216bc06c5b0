#![allow(dead_code)]

use colored::Colorize;
use orchestrator::{ExecuteSummary, UnitReport, UnitStatus};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{}/{}]", num, total).blue().bold(), msg);
}

// ============================================================================
// Deployment Formatting
// ============================================================================

/// Status symbol for a unit
pub fn status_icon(status: &UnitStatus) -> String {
    match status {
        UnitStatus::Completed => "✓".green().to_string(),
        UnitStatus::Failed { .. } => "✗".red().to_string(),
        UnitStatus::Skipped { .. } => "○".yellow().to_string(),
    }
}

/// Resource change counts, e.g. "3 created, 1 updated, 5 unchanged"
pub fn format_summary(summary: &ExecuteSummary) -> String {
    let mut parts = Vec::new();
    if summary.created > 0 {
        parts.push(format!("{} created", summary.created));
    }
    if summary.updated > 0 {
        parts.push(format!("{} updated", summary.updated));
    }
    if summary.unchanged > 0 {
        parts.push(format!("{} unchanged", summary.unchanged));
    }
    if summary.rolled_back > 0 {
        parts.push(format!("{} rolled back", summary.rolled_back));
    }
    if parts.is_empty() {
        "no resources".to_string()
    } else {
        parts.join(", ")
    }
}

/// Print one line per unit with its status and resource counts
pub fn unit_line(report: &UnitReport) {
    let wave = report
        .wave
        .map_or_else(|| "-".to_string(), |wave| wave.to_string());
    println!(
        "  {} {} {} {}",
        status_icon(&report.status),
        report.name.bold(),
        format!("(wave {wave}, {})", report.locality).dimmed(),
        format_summary(&report.summary)
    );
    match &report.status {
        UnitStatus::Failed { reason } => println!("      {}", reason.to_string().red()),
        UnitStatus::Skipped { cause } => println!("      {}", cause.to_string().dimmed()),
        UnitStatus::Completed => {}
    }
}

// ============================================================================
// Tests
// ============================================================================
