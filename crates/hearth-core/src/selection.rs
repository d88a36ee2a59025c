//! Artifact selection state for the add-entry workflow.
//!
//! At most one add can be in progress. While a directory is being scanned, or
//! while an ambiguous scan waits for the user to pick an artifact, further
//! adds are rejected with `SelectionInProgress`.

use crate::backend::ServerSettings;
use crate::error::{HearthError, Result};
use crate::lock;
use crate::registry::ManagedEntry;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// A scan that found several artifacts and is waiting for a choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSelection {
    pub path: PathBuf,
    pub name: String,
    pub candidate_artifacts: Vec<String>,
    pub parsed_settings: ServerSettings,
}

/// Result of starting an add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The scan was unambiguous and the entry is registered.
    Added(ManagedEntry),
    /// The user must choose among the candidates.
    NeedsSelection(PendingSelection),
}

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Idle,
    Busy(PathBuf),
    Pending(PendingSelection),
}

impl Slot {
    fn path(&self) -> Option<&Path> {
        match self {
            Slot::Idle => None,
            Slot::Busy(path) => Some(path),
            Slot::Pending(pending) => Some(&pending.path),
        }
    }
}

/// Holder for the single in-progress add.
#[derive(Debug, Default)]
pub struct SelectionSlot {
    slot: Mutex<Slot>,
}

impl SelectionSlot {
    /// Claim the slot for scanning `path`.
    pub fn begin(&self, path: &Path) -> Result<SlotGuard<'_>> {
        let mut slot = lock(&self.slot);
        if let Some(active) = slot.path() {
            return Err(HearthError::SelectionInProgress {
                path: active.to_path_buf(),
            });
        }
        *slot = Slot::Busy(path.to_path_buf());
        Ok(SlotGuard {
            owner: self,
            restore: None,
        })
    }

    pub fn pending(&self) -> Option<PendingSelection> {
        match &*lock(&self.slot) {
            Slot::Pending(pending) => Some(pending.clone()),
            _ => None,
        }
    }

    /// Take the pending selection for committing `artifact`.
    ///
    /// The slot stays claimed until the returned guard is dropped. Choosing an
    /// artifact that was not offered fails with `CoreMissing` and leaves the
    /// selection pending.
    pub fn take_for(&self, artifact: &str) -> Result<(PendingSelection, SlotGuard<'_>)> {
        let mut slot = lock(&self.slot);
        let pending = match &*slot {
            Slot::Pending(pending) => pending.clone(),
            _ => {
                return Err(HearthError::Unknown {
                    entry_id: None,
                    raw: "no artifact selection is pending".to_string(),
                })
            }
        };
        if !pending.candidate_artifacts.iter().any(|a| a == artifact) {
            return Err(HearthError::CoreMissing {
                entry_id: None,
                artifact: artifact.to_string(),
            });
        }
        *slot = Slot::Busy(pending.path.clone());
        let guard = SlotGuard {
            owner: self,
            restore: Some(pending.clone()),
        };
        Ok((pending, guard))
    }

    /// Discard the pending selection, if any.
    pub fn cancel(&self) -> Option<PendingSelection> {
        let mut slot = lock(&self.slot);
        match std::mem::take(&mut *slot) {
            Slot::Pending(pending) => {
                debug!("Cancelled artifact selection for {}", pending.path.display());
                Some(pending)
            }
            other => {
                *slot = other;
                None
            }
        }
    }
}

/// Claim on the selection slot.
///
/// Dropping the guard releases the slot, unless it was [staged](Self::stage),
/// or it came from [`SelectionSlot::take_for`] and was not
/// [completed](Self::complete), in which case the selection is pending again.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    owner: &'a SelectionSlot,
    restore: Option<PendingSelection>,
}

impl SlotGuard<'_> {
    /// Park the slot in the pending state.
    pub fn stage(mut self, pending: PendingSelection) {
        self.restore = Some(pending);
    }

    /// The add finished; release the slot for good.
    pub fn complete(mut self) {
        self.restore = None;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slot = lock(&self.owner.slot);
        *slot = match self.restore.take() {
            Some(pending) => Slot::Pending(pending),
            None => Slot::Idle,
        };
    }
}
