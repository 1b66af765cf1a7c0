//! Metadata of every accepted entity
//!
//! The catalog is an append-only JSON-lines file. Each accepted entity is
//! appended once, before it is marked discovered, so the catalog always
//! covers the discovered set on disk.

use crate::state::Entity;
use crate::storage::files::{append_line, read_lines};
use crate::storage::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const CATALOG_FILE: &str = "entity_catalog.jsonl";

/// One catalogued entity, in the exported field names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub subreddit_name: String,
    pub subscribers: u64,
    pub over18: bool,
}

impl From<&Entity> for EntityRecord {
    fn from(entity: &Entity) -> Self {
        Self {
            subreddit_name: entity.name.clone(),
            subscribers: entity.population,
            over18: entity.adult,
        }
    }
}

/// Persistent list of accepted entities
pub struct EntityCatalog {
    path: PathBuf,
    records: Vec<EntityRecord>,
    names: HashSet<String>,
}

impl EntityCatalog {
    /// Opens the catalog in `dir`
    ///
    /// Lines that do not parse (a torn final append) are skipped.
    pub fn open(dir: &Path) -> Self {
        let mut catalog = Self {
            path: dir.join(CATALOG_FILE),
            records: Vec::new(),
            names: HashSet::new(),
        };

        match read_lines(&catalog.path) {
            Ok(Some(lines)) => {
                let mut skipped = 0;
                for line in lines {
                    match serde_json::from_str::<EntityRecord>(&line) {
                        Ok(record) => {
                            if catalog.names.insert(record.subreddit_name.clone()) {
                                catalog.records.push(record);
                            }
                        }
                        Err(_) => skipped += 1,
                    }
                }
                if skipped > 0 {
                    tracing::warn!("Skipped {} unreadable catalog lines", skipped);
                }
                tracing::info!("Loaded entity catalog: {} entities", catalog.records.len());
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to load entity catalog: {}", e),
        }

        catalog
    }

    /// Records an entity. Returns true if it was not catalogued yet.
    pub fn record(&mut self, entity: &Entity) -> StorageResult<bool> {
        if self.names.contains(&entity.name) {
            return Ok(false);
        }

        let record = EntityRecord::from(entity);
        let line = serde_json::to_string(&record).map_err(|source| StorageError::Json {
            path: self.path.clone(),
            source,
        })?;
        append_line(&self.path, &line)?;

        self.names.insert(record.subreddit_name.clone());
        self.records.push(record);
        Ok(true)
    }

    /// Records ordered by subscribers, largest first, ties by name
    pub fn by_population(&self) -> Vec<&EntityRecord> {
        let mut sorted: Vec<&EntityRecord> = self.records.iter().collect();
        sorted.sort_by(|a, b| {
            b.subscribers
                .cmp(&a.subscribers)
                .then_with(|| a.subreddit_name.cmp(&b.subreddit_name))
        });
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Visibility;
    use tempfile::TempDir;

    #[test]
    fn test_record_is_idempotent_and_persisted() {
        let dir = TempDir::new().unwrap();
        let mut catalog = EntityCatalog::open(dir.path());

        let rust = Entity::new("Rust", 300, false, Visibility::Public);
        assert!(catalog.record(&rust).unwrap());
        assert!(!catalog.record(&rust).unwrap());
        assert!(catalog
            .record(&Entity::new("gonewild", 900, true, Visibility::Public))
            .unwrap());

        let reopened = EntityCatalog::open(dir.path());
        assert_eq!(reopened.by_population().len(), 2);
        assert_eq!(reopened.by_population()[0].subreddit_name, "gonewild");
        assert!(reopened.by_population()[0].over18);
    }

    #[test]
    fn test_torn_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CATALOG_FILE),
            "{\"subreddit_name\":\"rust\",\"subscribers\":5,\"over18\":false}\n{\"subreddit_na",
        )
        .unwrap();

        let catalog = EntityCatalog::open(dir.path());
        assert_eq!(catalog.by_population().len(), 1);
    }

    #[test]
    fn test_by_population_breaks_ties_by_name() {
        let dir = TempDir::new().unwrap();
        let mut catalog = EntityCatalog::open(dir.path());
        for (name, subs) in [("b", 10), ("a", 10), ("c", 50)] {
            catalog
                .record(&Entity::new(name, subs, false, Visibility::Public))
                .unwrap();
        }

        let order: Vec<&str> = catalog
            .by_population()
            .iter()
            .map(|r| r.subreddit_name.as_str())
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
