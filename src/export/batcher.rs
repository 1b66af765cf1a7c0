//! Export batcher: pending buffer, chunking and exporter state

use crate::config::ExportConfig;
use crate::export::chunk::{highest_chunk_ordinal, write_chunk, ChunkFiles};
use crate::export::sink::DeliverySink;
use crate::export::EXPORT_DIR;
use crate::storage::{read_json, set_aside, write_json, DedupStore, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const EXPORTER_STATE_FILE: &str = "exporter_state.json";

/// Persisted exporter counters and the not-yet-flushed buffer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExporterState {
    #[serde(default)]
    pub chunk_count: u32,
    #[serde(default)]
    pub total_exported: u64,
    #[serde(default)]
    pub total_uploaded: u64,
    #[serde(default)]
    pub pending_users: Vec<String>,
}

impl ExporterState {
    /// Reads the exporter state in `data_dir`, if any
    pub fn load(data_dir: &Path) -> StorageResult<Option<Self>> {
        read_json(&data_dir.join(EXPORTER_STATE_FILE))
    }

    fn resumed_from_disk(export_dir: &Path) -> Self {
        let chunk_count = highest_chunk_ordinal(export_dir);
        if chunk_count > 0 {
            tracing::warn!(
                "No exporter state, continuing after existing chunk {}",
                chunk_count
            );
        }
        Self {
            chunk_count,
            ..Default::default()
        }
    }
}

/// Accumulates admitted identities and writes them out in chunks
pub struct ExportBatcher {
    state_path: PathBuf,
    export_dir: PathBuf,
    chunk_size: usize,
    state: ExporterState,
    sink: Box<dyn DeliverySink>,
}

impl ExportBatcher {
    /// Opens the batcher in `data_dir`, restoring the pending buffer if a
    /// state file exists
    ///
    /// An unreadable state file is moved aside. Without a usable state the
    /// chunk counter resumes after the highest chunk already on disk.
    pub fn open(data_dir: &Path, config: &ExportConfig, sink: Box<dyn DeliverySink>) -> Self {
        let state_path = data_dir.join(EXPORTER_STATE_FILE);
        let export_dir = data_dir.join(EXPORT_DIR);

        let state = match ExporterState::load(data_dir) {
            Ok(Some(state)) => {
                tracing::info!(
                    "Loaded exporter state: {} chunks, {} exported, {} pending",
                    state.chunk_count,
                    state.total_exported,
                    state.pending_users.len()
                );
                state
            }
            Ok(None) => ExporterState::resumed_from_disk(&export_dir),
            Err(e) => {
                tracing::error!("Failed to load exporter state: {}", e);
                set_aside(&state_path);
                ExporterState::resumed_from_disk(&export_dir)
            }
        };

        Self {
            state_path,
            export_dir,
            chunk_size: config.chunk_size.max(1),
            state,
            sink,
        }
    }

    /// Makes sure every restored pending identity is in the seen set
    ///
    /// The exporter state can be newer than the last identity save, so a
    /// restored buffer may hold identities the dedup store forgot.
    pub fn reconcile(&self, dedup: &mut DedupStore) {
        let restored = dedup.filter_new(&self.state.pending_users);
        if !restored.is_empty() {
            tracing::info!(
                "Re-admitted {} pending identities into the dedup store",
                restored.len()
            );
        }
    }

    /// Admits `candidates` through the dedup store and buffers the new ones
    ///
    /// Returns how many were added; the rest were already seen.
    pub fn add_identities<S: AsRef<str>>(&mut self, dedup: &mut DedupStore, candidates: &[S]) -> usize {
        let admitted = dedup.filter_new(candidates.iter().map(|c| c.as_ref()));
        let added = admitted.len();
        if added > 0 {
            self.state.pending_users.extend(admitted);
            self.save_state();
        }
        added
    }

    pub fn pending_len(&self) -> usize {
        self.state.pending_users.len()
    }

    pub fn pending(&self) -> &[String] {
        &self.state.pending_users
    }

    pub fn state(&self) -> &ExporterState {
        &self.state
    }

    pub fn should_export(&self, threshold: usize) -> bool {
        !self.state.pending_users.is_empty() && self.state.pending_users.len() >= threshold
    }

    /// Flushes the pending buffer into chunk files
    ///
    /// Without `force`, nothing happens until the buffer reaches `threshold`.
    /// Identities are sorted and sliced into chunks of at most `chunk-size`.
    /// The buffer is cleared and the counters advanced only once every chunk
    /// of this call is on disk; a failure part way leaves state untouched so
    /// the next call rewrites the same ordinals. Files are handed to the
    /// delivery sink after the state is saved. Returns the number of chunks
    /// written.
    pub async fn export_chunks(&mut self, force: bool, threshold: usize) -> StorageResult<usize> {
        if self.state.pending_users.is_empty() {
            return Ok(0);
        }
        if !force && self.state.pending_users.len() < threshold {
            return Ok(0);
        }

        let mut identities = self.state.pending_users.clone();
        identities.sort();

        let mut written: Vec<ChunkFiles> = Vec::new();
        for (i, chunk) in identities.chunks(self.chunk_size).enumerate() {
            let ordinal = self.state.chunk_count + i as u32 + 1;
            let files = write_chunk(&self.export_dir, ordinal, chunk)?;
            tracing::info!(
                "Wrote chunk {} ({} identities) to {}",
                ordinal,
                chunk.len(),
                files.csv.display()
            );
            written.push(files);
        }

        self.state.chunk_count += written.len() as u32;
        self.state.total_exported += identities.len() as u64;
        self.state.pending_users.clear();
        self.write_state()?;

        if self.sink.is_enabled() {
            let paths: Vec<PathBuf> = written
                .iter()
                .flat_map(|files| files.paths().map(Path::to_path_buf))
                .collect();
            let uploaded = self.sink.upload_files(&paths).await;
            if uploaded < paths.len() {
                tracing::warn!("Uploaded {} of {} chunk files", uploaded, paths.len());
            }
            self.state.total_uploaded += uploaded as u64;
            self.save_state();
        }

        Ok(written.len())
    }

    fn write_state(&self) -> StorageResult<()> {
        write_json(&self.state_path, &self.state)
    }

    /// Persists the exporter state, logging failures
    pub fn save_state(&self) {
        if let Err(e) = self.write_state() {
            tracing::error!("Failed to save exporter state: {}", e);
        }
    }
}
