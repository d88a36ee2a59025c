//! Error types for Hearth.
//!
//! Every failure that leaves the core is one of the variants below. The set is
//! closed: collaborator failures are mapped onto it by [`crate::classify`]
//! before they are returned, and anything that fits nowhere else ends up in
//! [`HearthError::Unknown`] with the raw message preserved.

use crate::registry::EntryId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Hearth core.
#[derive(Debug, Error)]
pub enum HearthError {
    #[error("A server is already registered at {path:?}")]
    DuplicatePath { path: PathBuf },

    #[error("No server settings found in {path:?}")]
    NoConfig { path: PathBuf },

    #[error("No launchable artifacts found in {path:?}")]
    NoArtifacts { path: PathBuf },

    #[error("Core file '{artifact}' not found")]
    CoreMissing {
        entry_id: Option<EntryId>,
        artifact: String,
    },

    #[error("Another artifact selection is already in progress ({path:?})")]
    SelectionInProgress { path: PathBuf },

    #[error("Failed to start {entry_id}: {message}")]
    LaunchFailed { entry_id: EntryId, message: String },

    #[error("Failed to stop {entry_id}: {message}")]
    StopFailed { entry_id: EntryId, message: String },

    #[error("Persist failed: {message}")]
    PersistFailed {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<PersistSource>,
    },

    #[error("{raw}")]
    Unknown {
        entry_id: Option<EntryId>,
        raw: String,
    },
}

/// Underlying cause of a persistence failure.
#[derive(Debug, Error)]
pub enum PersistSource {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Hearth operations.
pub type Result<T> = std::result::Result<T, HearthError>;

/// Discriminant of [`HearthError`], for callers that only need the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DuplicatePath,
    NoConfig,
    NoArtifacts,
    CoreMissing,
    SelectionInProgress,
    LaunchFailed,
    StopFailed,
    PersistFailed,
    Unknown,
}

impl ErrorKind {
    /// Stable machine-readable code, suitable as a localisation key.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::DuplicatePath => "duplicate_path",
            ErrorKind::NoConfig => "no_config",
            ErrorKind::NoArtifacts => "no_artifacts",
            ErrorKind::CoreMissing => "core_missing",
            ErrorKind::SelectionInProgress => "selection_in_progress",
            ErrorKind::LaunchFailed => "launch_failed",
            ErrorKind::StopFailed => "stop_failed",
            ErrorKind::PersistFailed => "persist_failed",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl HearthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HearthError::DuplicatePath { .. } => ErrorKind::DuplicatePath,
            HearthError::NoConfig { .. } => ErrorKind::NoConfig,
            HearthError::NoArtifacts { .. } => ErrorKind::NoArtifacts,
            HearthError::CoreMissing { .. } => ErrorKind::CoreMissing,
            HearthError::SelectionInProgress { .. } => ErrorKind::SelectionInProgress,
            HearthError::LaunchFailed { .. } => ErrorKind::LaunchFailed,
            HearthError::StopFailed { .. } => ErrorKind::StopFailed,
            HearthError::PersistFailed { .. } => ErrorKind::PersistFailed,
            HearthError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// The entry this error concerns, when there is one.
    pub fn entry_id(&self) -> Option<&EntryId> {
        match self {
            HearthError::CoreMissing { entry_id, .. } | HearthError::Unknown { entry_id, .. } => {
                entry_id.as_ref()
            }
            HearthError::LaunchFailed { entry_id, .. } | HearthError::StopFailed { entry_id, .. } => {
                Some(entry_id)
            }
            _ => None,
        }
    }

    /// Build a persistence error with path context.
    pub fn persist(
        message: impl Into<String>,
        path: impl Into<PathBuf>,
        source: impl Into<PersistSource>,
    ) -> Self {
        HearthError::PersistFailed {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    pub fn entry_not_found(entry_id: &EntryId) -> Self {
        HearthError::Unknown {
            entry_id: Some(entry_id.clone()),
            raw: format!("entry not found: {}", entry_id),
        }
    }
}
