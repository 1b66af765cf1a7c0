//! Output module for run statistics and summaries
//!
//! This module handles:
//! - Recording run statistics while the orchestrator works
//! - Printing run statistics and persisted state to the console
//! - Generating markdown summaries of finished runs

mod markdown;
pub mod stats;

pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use stats::{
    load_persisted_state, print_persisted_state, print_run_stats, PersistedState, PhaseStats,
    RunStats,
};
