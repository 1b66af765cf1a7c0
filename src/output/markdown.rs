//! Markdown summary generation
//!
//! This module renders a finished run's statistics as a human-readable
//! markdown report.

use crate::output::RunStats;
use crate::storage::{write_atomic, StorageResult};
use std::path::Path;

/// Writes the markdown summary of a run
///
/// # Arguments
///
/// * `stats` - Statistics of the finished run
/// * `config_hash` - Hash of the configuration the run used
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(StorageError)` - Failed to write summary
pub fn generate_markdown_summary(
    stats: &RunStats,
    config_hash: &str,
    output_path: &Path,
) -> StorageResult<()> {
    let markdown = format_markdown_summary(stats, config_hash);
    write_atomic(output_path, markdown.as_bytes())
}

/// Formats run statistics as markdown
pub fn format_markdown_summary(stats: &RunStats, config_hash: &str) -> String {
    let mut md = String::new();

    md.push_str("# Gleaner Run Summary\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Started**: {}\n", stats.started_at.to_rfc3339()));
    if let Some(finished) = &stats.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished.to_rfc3339()));
    }
    if let Some(duration) = stats.duration_seconds() {
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            duration,
            duration as f64 / 60.0
        ));
    }
    md.push_str(&format!("- **Status**: {}\n", stats.status()));
    md.push_str(&format!("- **Config Hash**: {}\n\n", config_hash));

    // Discovery
    if !stats.phases.is_empty() {
        md.push_str("## Discovery\n\n");
        md.push_str("| Phase | Discovered | Pages | Failed Pages | Aborted |\n");
        md.push_str("|-------|------------|-------|--------------|---------|\n");
        for (phase, phase_stats) in &stats.phases {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                phase,
                phase_stats.discovered,
                phase_stats.pages,
                phase_stats.failed_pages,
                if phase_stats.aborted { "yes" } else { "no" }
            ));
        }
        md.push_str(&format!(
            "\nTotal discovered: {}\n\n",
            stats.total_discovered()
        ));
    }

    // Harvest
    md.push_str("## Harvest\n\n");
    md.push_str(&format!("- **Batches**: {}\n", stats.batches));
    md.push_str(&format!(
        "- **Entities Processed**: {}\n",
        stats.entities_processed
    ));
    md.push_str(&format!("- **Entities Failed**: {}\n", stats.entities_failed));
    md.push_str(&format!(
        "- **Identities Accepted**: {}\n",
        stats.identities_accepted
    ));
    md.push_str(&format!(
        "- **Duplicates Filtered**: {}\n\n",
        stats.duplicates_filtered
    ));

    // Export
    md.push_str("## Export\n\n");
    md.push_str(&format!("- **Chunks Written**: {}\n", stats.chunks_written));
    md.push_str(&format!("- **Files Uploaded**: {}\n", stats.files_uploaded));
    md.push_str(&format!(
        "- **Entities Exported**: {}\n\n",
        stats.entities_exported
    ));

    // Recovery
    md.push_str("## Recovery\n\n");
    md.push_str("| Event | Count |\n");
    md.push_str("|-------|-------|\n");
    md.push_str(&format!("| Rotations | {} |\n", stats.recovery.rotations));
    md.push_str(&format!(
        "| Failed Rotations | {} |\n",
        stats.recovery.failed_rotations
    ));
    md.push_str(&format!("| Backoffs | {} |\n", stats.recovery.backoffs));
    md.push_str(&format!(
        "| Abandoned Operations | {} |\n",
        stats.recovery.abandoned
    ));

    md
}
