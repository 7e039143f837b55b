//! Operator-facing rendering: batch summaries and lock listings

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use chrono::SecondsFormat;
use colored::Colorize;

use herd::batch::{BatchSummary, OutcomeStatus};
use herd::lock::LockInfo;

/// How to summarize a finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BatchFormat {
    /// One line per item plus a counts footer
    Text,
    /// Tab-separated, for scripts; the default when writing to a file
    Tsv,
    /// No per-item output, just the exit code
    Suppress,
}

/// Write the batch summary in the selected format.
pub fn render_summary(
    summary: &BatchSummary,
    format: BatchFormat,
    color: bool,
    out: &mut dyn Write,
) -> Result<()> {
    match format {
        BatchFormat::Text => render_text(summary, color, out),
        BatchFormat::Tsv => render_tsv(summary, out),
        BatchFormat::Suppress => Ok(()),
    }
}

fn render_text(summary: &BatchSummary, color: bool, out: &mut dyn Write) -> Result<()> {
    for outcome in &summary.items {
        let status = outcome.status.as_str();
        let status = if color {
            match outcome.status {
                OutcomeStatus::Success => status.green().to_string(),
                OutcomeStatus::Skipped => status.yellow().to_string(),
                OutcomeStatus::Error => status.red().bold().to_string(),
            }
        } else {
            status.to_string()
        };
        // `status` may carry invisible color codes; pad the raw width
        writeln!(
            out,
            "  {status}{:width$}  {}  {}",
            "",
            outcome.item,
            outcome.message,
            width = 8usize.saturating_sub(outcome.status.as_str().len()),
        )?;
        if let Some(cause) = &outcome.cause {
            writeln!(out, "           cause: {cause}")?;
        }
    }
    writeln!(
        out,
        "Batch summary: {} succeeded, {} skipped, {} failed",
        summary.success_count(),
        summary.skipped_count(),
        summary.error_count()
    )?;
    if summary.interrupted {
        let note = "Batch interrupted: remaining items were never dispatched.";
        writeln!(out, "{}", if color { note.yellow().to_string() } else { note.to_string() })?;
    }
    Ok(())
}

fn render_tsv(summary: &BatchSummary, out: &mut dyn Write) -> Result<()> {
    for outcome in &summary.items {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            outcome.item.id,
            outcome.item.entity_type,
            outcome.status.as_str(),
            outcome.message,
            outcome.cause.as_deref().unwrap_or(""),
        )?;
    }
    Ok(())
}

/// Print lock records in a fixed layout: mode, owner, acquired-at, age,
/// resource path. Returns how many were printed.
pub fn render_lock_listing(
    locks: impl Iterator<Item = LockInfo>,
    out: &mut dyn Write,
) -> Result<usize> {
    let mut count = 0;
    for info in locks {
        writeln!(
            out,
            "{:<9} {:<32} {}  {:>8}  {}",
            info.mode,
            info.owner.to_string(),
            info.acquired_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            format_age(info.age()),
            info.resource.display(),
        )?;
        count += 1;
    }
    Ok(count)
}

/// Compact age rendering for lock listings: `42s`, `3m12s`, `2h05m`, `3d4h`.
pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else if secs < 86_400 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d{}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}
