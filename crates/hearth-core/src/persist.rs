//! Atomic JSON persistence for the registry and PID table.
//!
//! Writes go through a temp file that is fsynced and then renamed over the
//! target, so readers only ever see the old or the new document. Whole-document
//! read-modify-write cycles are additionally serialized with an exclusive lock
//! on a sibling `.lock` file (see [`with_file_lock`]).

use crate::error::{HearthError, Result};
use fs2::FileExt;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(HearthError::persist(format!("read {}", path.display()), path, e)),
    };

    let data = serde_json::from_str(&contents)
        .map_err(|e| HearthError::persist(format!("parse {}", path.display()), path, e))?;

    Ok(Some(data))
}

/// Write data to a JSON file atomically.
///
/// 1. Serializes data to a temp file with a PID + counter suffix
/// 2. Calls fsync so the data reaches disk
/// 3. Atomically renames the temp file to the target
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                HearthError::persist(format!("create directory {}", parent.display()), parent, e)
            })?;
        }
    }

    let serialized = serde_json::to_string_pretty(data)
        .map_err(|e| HearthError::persist("serialize document", path, e))?;

    let temp_path = temp_path_for(path);
    let written = write_synced(&temp_path, serialized.as_bytes());
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(HearthError::persist(
            format!("write temp file {}", temp_path.display()),
            &temp_path,
            e,
        ));
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(HearthError::persist(
            format!("rename {} to {}", temp_path.display(), path.display()),
            path,
            e,
        ));
    }

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

/// Run `f` while holding an exclusive lock associated with `path`.
///
/// The lock lives in `<path>.lock` so the document itself can still be
/// replaced by rename while the lock is held.
pub fn with_file_lock<T>(path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let lock_path = lock_path_for(path);
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                HearthError::persist(format!("create directory {}", parent.display()), parent, e)
            })?;
        }
    }

    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| HearthError::persist("open lock file", &lock_path, e))?;

    lock_file
        .lock_exclusive()
        .map_err(|e| HearthError::persist("acquire lock", &lock_path, e))?;

    let result = f();

    if let Err(e) = FileExt::unlock(&lock_file) {
        debug!("Failed to release {}: {}", lock_path.display(), e);
    }
    result
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()
}

fn temp_path_for(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.{}.tmp", process::id(), n));
    path.with_file_name(name)
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}
