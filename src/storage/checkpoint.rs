//! Phase checkpoint for resume support

use crate::state::Phase;
use crate::storage::files::{read_json, write_json};
use crate::storage::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Durable progress marker for a crawl run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Phase the run has reached
    #[serde(default)]
    pub phase: Phase,

    /// Entities of the current batch still waiting to be harvested
    #[serde(default)]
    pub queue: Vec<String>,

    /// Search terms whose pages were all consumed
    #[serde(default)]
    pub completed_terms: Vec<String>,

    /// Entities whose sidebars have not been explored yet
    #[serde(default)]
    pub explore_queue: Vec<String>,

    /// Hash of the configuration the checkpoint was written under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

impl Checkpoint {
    /// Moves the phase forward. Returns false (and changes nothing) if
    /// `phase` is behind the current phase.
    pub fn advance_to(&mut self, phase: Phase) -> bool {
        if phase < self.phase {
            return false;
        }
        self.phase = phase;
        true
    }

    pub fn is_term_completed(&self, term: &str) -> bool {
        self.completed_terms.iter().any(|t| t == term)
    }

    pub fn complete_term(&mut self, term: &str) {
        if !self.is_term_completed(term) {
            self.completed_terms.push(term.to_string());
        }
    }

    /// Removes an entity from the pending queue
    pub fn dequeue(&mut self, name: &str) {
        self.queue.retain(|n| !n.eq_ignore_ascii_case(name));
    }
}

/// Reads and writes the checkpoint file
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(CHECKPOINT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrites the checkpoint with `state`
    pub fn save(&self, state: &Checkpoint) -> StorageResult<()> {
        write_json(&self.path, state)?;
        tracing::debug!(
            "Checkpoint saved: phase {}, {} queued, {} terms done",
            state.phase,
            state.queue.len(),
            state.completed_terms.len()
        );
        Ok(())
    }

    /// Returns the last saved checkpoint, or None if there is none
    pub fn load(&self) -> StorageResult<Option<Checkpoint>> {
        let state = read_json::<Checkpoint>(&self.path)?;
        match &state {
            Some(cp) => tracing::info!(
                "Loaded checkpoint: phase {}, {} queued, {} terms done",
                cp.phase,
                cp.queue.len(),
                cp.completed_terms.len()
            ),
            None => tracing::info!("No checkpoint found, starting at phase init"),
        }
        Ok(state)
    }

    /// Removes the checkpoint after a fully successful run
    pub fn delete(&self) -> StorageResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Checkpoint deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}
