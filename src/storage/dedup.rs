//! Persistent set membership for entities and identities
//!
//! The dedup store is the single authority on which entities have been
//! discovered, queued or processed, and which identities have been admitted.
//! Callers never see the raw sets, only the admission methods below.

use crate::storage::files::{read_json, read_lines, set_aside, write_json, write_lines};
use crate::storage::StorageResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const ENTITIES_FILE: &str = "dedup_entities.json";
const IDENTITIES_FILE: &str = "dedup_identities.txt";

/// Identity saves happen this many times less often than entity saves
const IDENTITY_INTERVAL_FACTOR: usize = 10;

/// On-disk shape of the entity sets
#[derive(Debug, Default, Serialize, Deserialize)]
struct EntitySets {
    #[serde(default)]
    discovered: Vec<String>,
    #[serde(default)]
    processed: Vec<String>,
}

/// Snapshot of dedup set sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupStats {
    pub discovered: usize,
    pub processed: usize,
    pub queued: usize,
    pub identities: usize,
}

/// Persistent dedup sets
///
/// Entity names and identities are compared lower-cased. `processed` is kept
/// a subset of `discovered`, and `queued` is kept disjoint from `processed`.
pub struct DedupStore {
    entities_path: PathBuf,
    identities_path: PathBuf,

    discovered: HashSet<String>,
    processed: HashSet<String>,
    queued: HashSet<String>,
    seen_identities: HashSet<String>,

    persist_interval: usize,
    ops_since_save: usize,
    identity_ops_since_save: usize,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl DedupStore {
    /// Opens the store in `dir`, loading whatever state files exist
    ///
    /// Missing files mean a fresh run. Unreadable files are moved aside as
    /// `<name>.corrupt` and treated as empty.
    pub fn open(dir: &Path, persist_interval: usize) -> Self {
        let mut store = Self {
            entities_path: dir.join(ENTITIES_FILE),
            identities_path: dir.join(IDENTITIES_FILE),
            discovered: HashSet::new(),
            processed: HashSet::new(),
            queued: HashSet::new(),
            seen_identities: HashSet::new(),
            persist_interval: persist_interval.max(1),
            ops_since_save: 0,
            identity_ops_since_save: 0,
        };
        store.load();
        store
    }

    fn load(&mut self) {
        match read_json::<EntitySets>(&self.entities_path) {
            Ok(Some(sets)) => {
                self.discovered = sets.discovered.iter().map(|n| normalize(n)).collect();
                self.processed = sets.processed.iter().map(|n| normalize(n)).collect();
                // Older files may list processed entities that were never recorded as discovered
                self.discovered.extend(self.processed.iter().cloned());
                tracing::info!(
                    "Loaded dedup state: {} discovered, {} processed entities",
                    self.discovered.len(),
                    self.processed.len()
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Failed to load entity dedup state: {}", e);
                set_aside(&self.entities_path);
            }
        }

        match read_lines(&self.identities_path) {
            Ok(Some(lines)) => {
                self.seen_identities = lines.iter().map(|n| normalize(n)).collect();
                tracing::info!("Loaded dedup state: {} seen identities", self.seen_identities.len());
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Failed to load identity dedup state: {}", e);
                set_aside(&self.identities_path);
            }
        }
    }

    // ===== Entity Deduplication =====

    /// Records an entity as discovered. Returns true if it was new.
    pub fn mark_discovered(&mut self, name: &str) -> bool {
        let name = normalize(name);
        if !self.discovered.insert(name) {
            return false;
        }

        self.ops_since_save += 1;
        if self.ops_since_save >= self.persist_interval {
            self.save(false);
        }
        true
    }

    /// Replaces the transient queued set
    ///
    /// Names that are already processed are left out so the queue stays
    /// disjoint from `processed`.
    pub fn mark_queued<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.queued = names
            .into_iter()
            .map(|n| normalize(n.as_ref()))
            .filter(|n| !self.processed.contains(n))
            .collect();
    }

    /// Adds a single entity to the queued set. Returns true if it was added.
    pub fn add_queued(&mut self, name: &str) -> bool {
        let name = normalize(name);
        if self.processed.contains(&name) {
            return false;
        }
        self.queued.insert(name)
    }

    /// Empties the queued set
    pub fn clear_queue(&mut self) {
        self.queued.clear();
    }

    /// Records an entity as fully processed. Idempotent.
    pub fn mark_processed(&mut self, name: &str) {
        let name = normalize(name);
        self.queued.remove(&name);
        self.discovered.insert(name.clone());
        if !self.processed.insert(name) {
            return;
        }

        self.ops_since_save += 1;
        if self.ops_since_save >= self.persist_interval {
            self.save(false);
        }
    }

    pub fn is_discovered(&self, name: &str) -> bool {
        self.discovered.contains(&normalize(name))
    }

    pub fn is_processed(&self, name: &str) -> bool {
        self.processed.contains(&normalize(name))
    }

    pub fn is_queued(&self, name: &str) -> bool {
        self.queued.contains(&normalize(name))
    }

    /// True iff the entity is not discovered, not processed and not queued
    pub fn should_process(&self, name: &str) -> bool {
        let name = normalize(name);
        !self.discovered.contains(&name)
            && !self.processed.contains(&name)
            && !self.queued.contains(&name)
    }

    /// Returns the given names that are not yet processed, in order
    pub fn unprocessed<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        names
            .into_iter()
            .filter(|n| !self.is_processed(n))
            .cloned()
            .collect()
    }

    // ===== Identity Deduplication =====

    /// Admits identities that have never been seen before
    ///
    /// Comparison is case-insensitive. Candidates are examined in iteration
    /// order, so when two casings of the same identity arrive the first one
    /// wins. Returns the admitted identities in their original casing. This is
    /// the only way an identity enters the seen set.
    pub fn filter_new<I, S>(&mut self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut admitted = Vec::new();
        for candidate in candidates {
            let original = candidate.as_ref().trim();
            if original.is_empty() {
                continue;
            }
            if self.seen_identities.insert(original.to_lowercase()) {
                admitted.push(original.to_string());
            }
        }

        if !admitted.is_empty() {
            self.identity_ops_since_save += admitted.len();
            if self.identity_ops_since_save >= self.persist_interval * IDENTITY_INTERVAL_FACTOR {
                self.save(false);
            }
        }

        admitted
    }

    pub fn is_identity_seen(&self, identity: &str) -> bool {
        self.seen_identities.contains(&normalize(identity))
    }

    // ===== Persistence =====

    /// Persists the dedup sets
    ///
    /// Without `force`, each file is only written once its dirty-op counter
    /// has crossed its threshold. The identity file is always fully
    /// rewritten. Failures are logged and swallowed; the in-memory sets stay
    /// authoritative and the next save retries.
    pub fn save(&mut self, force: bool) {
        if force || self.ops_since_save >= self.persist_interval {
            match self.write_entities() {
                Ok(()) => self.ops_since_save = 0,
                Err(e) => tracing::error!("Failed to save entity dedup state: {}", e),
            }
        }

        if force || self.identity_ops_since_save >= self.persist_interval * IDENTITY_INTERVAL_FACTOR
        {
            match self.write_identities() {
                Ok(()) => {
                    self.identity_ops_since_save = 0;
                    tracing::debug!("Saved {} identities to disk", self.seen_identities.len());
                }
                Err(e) => tracing::error!("Failed to save identity dedup state: {}", e),
            }
        }
    }

    fn write_entities(&self) -> StorageResult<()> {
        let mut discovered: Vec<String> = self.discovered.iter().cloned().collect();
        let mut processed: Vec<String> = self.processed.iter().cloned().collect();
        discovered.sort();
        processed.sort();
        write_json(
            &self.entities_path,
            &EntitySets {
                discovered,
                processed,
            },
        )
    }

    fn write_identities(&self) -> StorageResult<()> {
        let mut identities: Vec<&String> = self.seen_identities.iter().collect();
        identities.sort();
        write_lines(&self.identities_path, identities)
    }

    /// Returns the current set sizes
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            discovered: self.discovered.len(),
            processed: self.processed.len(),
            queued: self.queued.len(),
            identities: self.seen_identities.len(),
        }
    }
}
