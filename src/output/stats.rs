//! Run statistics and persisted-state reporting
//!
//! `RunStats` is filled in by the orchestrator while it runs and printed at
//! the end. `PersistedState` is read straight from the data directory for
//! `--stats`, without starting a crawl.

use crate::export::ExporterState;
use crate::recovery::RecoveryStats;
use crate::state::Phase;
use crate::storage::{Checkpoint, CheckpointStore, DedupStats, DedupStore};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

/// Counters for one discovery phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseStats {
    /// Listing pages (or explored entities) fetched successfully
    pub pages: u64,
    /// Pages given up on
    pub failed_pages: u64,
    /// New entities accepted and queued
    pub discovered: u64,
    /// The phase stopped early because identity rotation was exhausted
    pub aborted: bool,
}

/// Statistics for a single crawl run
#[derive(Debug, Clone)]
pub struct RunStats {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub phases: BTreeMap<Phase, PhaseStats>,

    /// Batches handed to the harvester
    pub batches: u64,
    /// Entities harvested and marked processed
    pub entities_processed: u64,
    /// Entities whose harvest produced nothing usable
    pub entities_failed: u64,

    /// Identities admitted by the dedup store
    pub identities_accepted: u64,
    /// Harvested identities that were already seen
    pub duplicates_filtered: u64,

    pub chunks_written: u64,
    pub files_uploaded: u64,
    /// Entities listed in the metadata export
    pub entities_exported: u64,

    pub recovery: RecoveryStats,

    /// The run stopped because of a termination signal
    pub cancelled: bool,
    /// Every phase ran to completion
    pub completed: bool,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            phases: BTreeMap::new(),
            batches: 0,
            entities_processed: 0,
            entities_failed: 0,
            identities_accepted: 0,
            duplicates_filtered: 0,
            chunks_written: 0,
            files_uploaded: 0,
            entities_exported: 0,
            recovery: RecoveryStats::default(),
            cancelled: false,
            completed: false,
        }
    }

    pub fn phase_mut(&mut self, phase: Phase) -> &mut PhaseStats {
        self.phases.entry(phase).or_default()
    }

    pub fn total_discovered(&self) -> u64 {
        self.phases.values().map(|p| p.discovered).sum()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_seconds())
    }

    /// One word describing how the run ended
    pub fn status(&self) -> &'static str {
        if self.completed {
            "completed"
        } else if self.cancelled {
            "interrupted"
        } else {
            "incomplete"
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything `--stats` reports, read from the data directory
#[derive(Debug, Clone)]
pub struct PersistedState {
    pub dedup: DedupStats,
    pub exporter: Option<ExporterState>,
    pub checkpoint: Option<Checkpoint>,
}

/// Loads the persisted state without modifying it
///
/// Unreadable exporter or checkpoint files are logged and reported as absent.
pub fn load_persisted_state(data_dir: &Path, persist_interval: usize) -> PersistedState {
    let dedup = DedupStore::open(data_dir, persist_interval).stats();

    let exporter = ExporterState::load(data_dir).unwrap_or_else(|e| {
        tracing::error!("Failed to read exporter state: {}", e);
        None
    });

    let checkpoint = CheckpointStore::new(data_dir).load().unwrap_or_else(|e| {
        tracing::error!("Failed to read checkpoint: {}", e);
        None
    });

    PersistedState {
        dedup,
        exporter,
        checkpoint,
    }
}

/// Prints persisted state to stdout
pub fn print_persisted_state(state: &PersistedState) {
    println!("=== Gleaner State ===\n");

    println!("Dedup Store:");
    println!("  Entities discovered: {}", state.dedup.discovered);
    println!("  Entities processed: {}", state.dedup.processed);
    println!("  Identities seen: {}", state.dedup.identities);
    println!();

    println!("Exporter:");
    match &state.exporter {
        Some(exporter) => {
            println!("  Chunks written: {}", exporter.chunk_count);
            println!("  Identities exported: {}", exporter.total_exported);
            println!("  Files uploaded: {}", exporter.total_uploaded);
            println!("  Pending identities: {}", exporter.pending_users.len());
        }
        None => println!("  No exporter state"),
    }
    println!();

    println!("Checkpoint:");
    match &state.checkpoint {
        Some(cp) => {
            println!("  Phase: {}", cp.phase);
            println!("  Queued entities: {}", cp.queue.len());
            println!("  Completed terms: {}", cp.completed_terms.len());
            println!("  Entities to explore: {}", cp.explore_queue.len());
        }
        None => println!("  None (next run starts at phase init)"),
    }
}

/// Prints the statistics of a finished run to stdout
pub fn print_run_stats(stats: &RunStats) {
    println!("=== Run Statistics ===\n");

    println!("Status: {}", stats.status());
    if let Some(duration) = stats.duration_seconds() {
        println!("Duration: {}s", duration);
    }
    println!();

    if !stats.phases.is_empty() {
        println!("Discovery:");
        for (phase, phase_stats) in &stats.phases {
            println!(
                "  {}: {} discovered, {} pages, {} failed pages{}",
                phase,
                phase_stats.discovered,
                phase_stats.pages,
                phase_stats.failed_pages,
                if phase_stats.aborted { " (aborted)" } else { "" }
            );
        }
        println!();
    }

    println!("Harvest:");
    println!("  Batches: {}", stats.batches);
    println!("  Entities processed: {}", stats.entities_processed);
    println!("  Entities failed: {}", stats.entities_failed);
    println!("  Identities accepted: {}", stats.identities_accepted);
    println!("  Duplicates filtered: {}", stats.duplicates_filtered);
    println!();

    println!("Export:");
    println!("  Chunks written: {}", stats.chunks_written);
    println!("  Files uploaded: {}", stats.files_uploaded);
    println!("  Entities exported: {}", stats.entities_exported);
    println!();

    println!("Recovery:");
    println!("  Rotations: {}", stats.recovery.rotations);
    println!("  Failed rotations: {}", stats.recovery.failed_rotations);
    println!("  Backoffs: {}", stats.recovery.backoffs);
    println!("  Abandoned operations: {}", stats.recovery.abandoned);
}
