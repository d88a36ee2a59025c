//! Maps backend failures and scan outcomes onto the closed [`ErrorKind`] set.

use crate::backend::{BackendError, ScanOutcome};
use crate::error::{ErrorKind, HearthError};
use crate::registry::EntryId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// An error reduced to its category and a displayable message.
///
/// This is what a runtime view carries, since [`HearthError`] is neither
/// `Clone` nor comparable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&HearthError> for ClassifiedError {
    fn from(err: &HearthError) -> Self {
        ClassifiedError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

/// The error a failed scan outcome stands for, if it is a failure at all.
pub fn scan_outcome(outcome: &ScanOutcome, path: &Path) -> Option<HearthError> {
    match outcome {
        ScanOutcome::NoConfig => Some(HearthError::NoConfig {
            path: path.to_path_buf(),
        }),
        ScanOutcome::NoArtifacts => Some(HearthError::NoArtifacts {
            path: path.to_path_buf(),
        }),
        ScanOutcome::Valid { .. } | ScanOutcome::NeedsSelection { .. } => None,
    }
}

/// A failed `launch` call.
pub fn launch_failure(entry_id: &EntryId, err: BackendError) -> HearthError {
    HearthError::LaunchFailed {
        entry_id: entry_id.clone(),
        message: err.to_string(),
    }
}

/// A failed `stop` call.
pub fn stop_failure(entry_id: &EntryId, err: BackendError) -> HearthError {
    HearthError::StopFailed {
        entry_id: entry_id.clone(),
        message: err.to_string(),
    }
}

/// A `scan` or `probe_status` call that raised instead of returning an outcome.
pub fn unexpected(entry_id: Option<&EntryId>, err: BackendError) -> HearthError {
    HearthError::Unknown {
        entry_id: entry_id.cloned(),
        raw: err.to_string(),
    }
}
