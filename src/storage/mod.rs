//! Storage module for persisting crawl state
//!
//! This module handles everything the crawler writes to disk to survive a
//! crash or a termination signal:
//! - Dedup sets for discovered/processed entities and seen identities
//! - The phase checkpoint with its pending queues
//! - The catalog of accepted entity metadata
//! - Atomic (temp file + rename) JSON and line-oriented file helpers

mod catalog;
mod checkpoint;
mod dedup;
mod files;

pub use catalog::{EntityCatalog, EntityRecord};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use dedup::{DedupStats, DedupStore};
pub use files::{
    append_line, quarantine, read_json, read_lines, set_aside, write_atomic, write_json,
    write_lines,
};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or writing state files
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed state file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
