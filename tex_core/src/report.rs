//! Report Module
//!
//! End-of-run summary for the terminal. A finished run shows its elapsed
//! time; a stopped run is marked as such.

use crate::dispatcher::RunSummary;
use crate::worker::RunStatus;
use console::style;
use std::time::Duration;

/// Headline for a run: `"Finished in 12.345s"` or `"(stopped)"`.
pub fn status_line(summary: &RunSummary) -> String {
    match summary.state {
        RunStatus::Finished => format!("Finished in {:.3}s", summary.elapsed.as_secs_f64()),
        RunStatus::Stopped => "(stopped)".to_string(),
        RunStatus::Running => "(running)".to_string(),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Body rows of the summary box, without colour.
pub fn summary_rows(summary: &RunSummary) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("📁 Textures:", format!("{}", summary.total)),
        (
            "🔄 Completed:",
            format!("{} / {}", summary.completed, summary.total),
        ),
        ("✅ Succeeded:", summary.succeeded.to_string()),
        ("❌ Failed:", summary.failed.to_string()),
        ("⏭️  Skipped:", summary.skipped.to_string()),
        ("⏱️  Total Time:", format_duration(summary.elapsed)),
    ];
    if summary.dropped_duplicates > 0 {
        rows.push(("🧹 Duplicates Dropped:", summary.dropped_duplicates.to_string()));
    }
    if summary.unresolved_groups > 0 {
        rows.push(("⚠️  Unranked Groups:", summary.unresolved_groups.to_string()));
    }
    rows
}

pub fn print_run_summary(summary: &RunSummary) {
    let headline = status_line(summary);
    let headline = match summary.state {
        RunStatus::Finished if summary.failed == 0 => style(headline).green().bold(),
        RunStatus::Finished => style(headline).yellow().bold(),
        _ => style(headline).red().bold(),
    };

    println!();
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║  📊 Texture Conversion Summary                       ║");
    println!("╠══════════════════════════════════════════════════════╣");
    for (label, value) in summary_rows(summary) {
        println!("║  {:<24}{:>26}  ║", label, value);
    }
    println!("╚══════════════════════════════════════════════════════╝");
    println!("{}", headline);
}
