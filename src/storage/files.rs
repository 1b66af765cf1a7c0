//! File helpers shared by every persisted component
//!
//! All writes go to a sibling temp file which is synced and then renamed over
//! the target, so a reader only ever sees the previous or the new contents.

use crate::storage::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replaces `path` with the bytes produced by `fill`
fn replace_with<F>(path: &Path, fill: F) -> StorageResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }

    let tmp = temp_path(path);
    let file = File::create(&tmp).map_err(io_err(&tmp))?;
    let mut writer = BufWriter::new(file);
    fill(&mut writer).map_err(io_err(&tmp))?;
    let file = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;

    fs::rename(&tmp, path).map_err(io_err(path))
}

/// Atomically writes raw bytes to `path`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    replace_with(path, |w| w.write_all(bytes))
}

/// Atomically writes `value` as pretty-printed JSON
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes)
}

/// Reads a JSON document, returning `None` if the file does not exist
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read(path).map_err(io_err(path))?;
    let value = serde_json::from_slice(&content).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

/// Atomically writes one entry per line (full rewrite, never append)
pub fn write_lines<I, S>(path: &Path, lines: I) -> StorageResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    replace_with(path, |w| {
        for line in lines {
            w.write_all(line.as_ref().as_bytes())?;
            w.write_all(b"\n")?;
        }
        Ok(())
    })
}

/// Reads non-empty trimmed lines, returning `None` if the file does not exist
pub fn read_lines(path: &Path) -> StorageResult<Option<Vec<String>>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path).map_err(io_err(path))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(io_err(path))?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    Ok(Some(lines))
}

/// Appends one line to `path`, creating the file if needed
///
/// The line is synced before returning. A crash mid-append can leave a torn
/// final line, which readers must tolerate.
pub fn append_line(path: &Path, line: &str) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err(path))?;
    file.write_all(line.as_bytes())
        .and_then(|_| file.write_all(b"\n"))
        .and_then(|_| file.sync_data())
        .map_err(io_err(path))
}

/// Moves an unreadable state file aside as `<name>.corrupt`
///
/// Keeps the bytes for inspection and stops the next save from overwriting
/// them. Returns the new path.
pub fn quarantine(path: &Path) -> StorageResult<PathBuf> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    let target = path.with_file_name(name);
    fs::rename(path, &target).map_err(io_err(path))?;
    Ok(target)
}

/// Quarantines a state file that failed to load, logging the outcome
pub fn set_aside(path: &Path) {
    match quarantine(path) {
        Ok(moved) => tracing::warn!(
            "Moved unreadable {} to {}",
            path.display(),
            moved.display()
        ),
        Err(e) => tracing::error!("Could not move unreadable state file aside: {}", e),
    }
}
