//! Entity metadata export

use crate::storage::{write_atomic, write_json, EntityRecord, StorageResult};
use std::path::{Path, PathBuf};

pub const ENTITIES_JSON_FILE: &str = "subreddits.json";
pub const ENTITIES_CSV_FILE: &str = "subreddits.csv";

/// Writes `records` to `subreddits.json` and `subreddits.csv` in `dir`
///
/// Both files are fully rewritten and list the records in the given order.
/// Returns the two paths.
pub fn write_entity_exports(dir: &Path, records: &[&EntityRecord]) -> StorageResult<[PathBuf; 2]> {
    let json = dir.join(ENTITIES_JSON_FILE);
    let csv = dir.join(ENTITIES_CSV_FILE);

    write_json(&json, &records)?;

    let mut table = String::from("subreddit_name,subscribers,over18\n");
    for record in records {
        table.push_str(&format!(
            "{},{},{}\n",
            record.subreddit_name, record.subscribers, record.over18
        ));
    }
    write_atomic(&csv, table.as_bytes())?;

    Ok([json, csv])
}
