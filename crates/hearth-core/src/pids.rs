//! Persisted table of processes this controller launched itself.
//!
//! An entry with a PID here is *managed*; a running entry without one is
//! *external*. The table survives controller restarts (`running.json`) but
//! says nothing about whether the recorded processes are still alive; that
//! is decided by reconciliation.
//!
//! A launch that has not yet been seen running is also recorded, with its
//! wall-clock launch time, so a controller opened later can keep treating it
//! as starting instead of dropping the PID as stale.

use crate::error::Result;
use crate::lock;
use crate::persist::{atomic_read_json, atomic_write_json};
use crate::registry::EntryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const PIDS_VERSION: u32 = 1;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PidDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    pids: BTreeMap<EntryId, u32>,
    /// Launch times of starts not yet confirmed running.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    starting: BTreeMap<EntryId, DateTime<Utc>>,
}

/// Entry id → PID map, mirrored to disk on every change.
#[derive(Debug)]
pub struct RunningPidTable {
    path: PathBuf,
    doc: Mutex<PidDocument>,
}

impl RunningPidTable {
    /// Load the table from `path` (an absent file is an empty table).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc: PidDocument = atomic_read_json(&path)?.unwrap_or_default();
        debug!("Loaded {} recorded PIDs from {}", doc.pids.len(), path.display());
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &EntryId) -> Option<u32> {
        lock(&self.doc).pids.get(id).copied()
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        lock(&self.doc).pids.contains_key(id)
    }

    pub fn snapshot(&self) -> BTreeMap<EntryId, u32> {
        lock(&self.doc).pids.clone()
    }

    /// Unconfirmed starts and when they were launched.
    pub fn pending_starts(&self) -> BTreeMap<EntryId, DateTime<Utc>> {
        lock(&self.doc).starting.clone()
    }

    /// Record a freshly launched process as starting. Persisted before
    /// returning.
    pub fn record(&self, id: &EntryId, pid: u32) -> Result<()> {
        let now = Utc::now();
        self.update(|doc| {
            doc.pids.insert(id.clone(), pid);
            doc.starting.insert(id.clone(), now);
        })?;
        info!("Recorded PID {} for {}", pid, id);
        Ok(())
    }

    /// Forget an entry's PID. Returns the PID that was recorded, if any.
    pub fn remove(&self, id: &EntryId) -> Result<Option<u32>> {
        let mut removed = None;
        self.update(|doc| {
            removed = doc.pids.remove(id);
            doc.starting.remove(id);
        })?;
        Ok(removed)
    }

    /// Drop every record for which `keep` returns false, in one write.
    pub fn retain(&self, mut keep: impl FnMut(&EntryId, u32) -> bool) -> Result<Vec<EntryId>> {
        let mut dropped = Vec::new();
        self.update(|doc| {
            doc.pids.retain(|id, pid| {
                let kept = keep(id, *pid);
                if !kept {
                    dropped.push(id.clone());
                }
                kept
            });
            let pids = &doc.pids;
            doc.starting.retain(|id, _| pids.contains_key(id));
        })?;
        Ok(dropped)
    }

    /// Clear start markers for which `pending` returns false. PIDs are kept.
    pub fn settle_starts(&self, mut pending: impl FnMut(&EntryId) -> bool) -> Result<()> {
        self.update(|doc| doc.starting.retain(|id, _| pending(id)))
    }

    /// Apply `f` to a copy, persist the copy, then swap it in.
    ///
    /// A failed write leaves the in-memory table unchanged.
    fn update(&self, f: impl FnOnce(&mut PidDocument)) -> Result<()> {
        let mut guard = lock(&self.doc);
        let mut next = guard.clone();
        f(&mut next);
        if next == *guard {
            return Ok(());
        }
        next.version = PIDS_VERSION;
        atomic_write_json(&self.path, &next)?;
        *guard = next;
        Ok(())
    }
}
