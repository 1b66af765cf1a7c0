//! Chunk file writers

use crate::storage::{write_atomic, write_json, StorageResult};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// The two files making up one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFiles {
    pub ordinal: u32,
    pub csv: PathBuf,
    pub json: PathBuf,
}

impl ChunkFiles {
    pub fn paths(&self) -> [&Path; 2] {
        [self.csv.as_path(), self.json.as_path()]
    }
}

#[derive(Serialize)]
struct ChunkDocument<'a> {
    users: &'a [String],
    count: usize,
}

/// File name without extension for chunk `ordinal`
pub fn chunk_file_stem(ordinal: u32) -> String {
    format!("users_chunk_{:04}", ordinal)
}

/// Writes both representations of a chunk
///
/// The tabular file has a `username` header and one identity per row; the
/// structured file is `{"users": [...], "count": n}`. Both hold the same
/// identities in the same order.
pub fn write_chunk(dir: &Path, ordinal: u32, identities: &[String]) -> StorageResult<ChunkFiles> {
    let stem = chunk_file_stem(ordinal);
    let csv = dir.join(format!("{}.csv", stem));
    let json = dir.join(format!("{}.json", stem));

    let mut table = String::with_capacity(identities.len() * 16 + 9);
    table.push_str("username\n");
    for identity in identities {
        table.push_str(identity);
        table.push('\n');
    }

    write_atomic(&csv, table.as_bytes())?;
    write_json(
        &json,
        &ChunkDocument {
            users: identities,
            count: identities.len(),
        },
    )?;

    Ok(ChunkFiles { ordinal, csv, json })
}

/// Highest chunk ordinal with a file in `dir`, 0 if there are none
///
/// Used when the exporter state is missing so new chunks never overwrite
/// files from an earlier run.
pub fn highest_chunk_ordinal(dir: &Path) -> u32 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let stem = Path::new(&name).file_stem()?.to_str()?.to_string();
            stem.strip_prefix("users_chunk_")?.parse::<u32>().ok()
        })
        .max()
        .unwrap_or(0)
}
