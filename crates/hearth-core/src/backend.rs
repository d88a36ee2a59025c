//! Collaborator seam between the core and the outside world.
//!
//! The core never touches directories or processes directly. Scanning a
//! server directory, probing whether its process is alive, and spawning or
//! killing it all go through [`ServerBackend`]. The bundled implementation is
//! [`crate::local::LocalBackend`]; tests use scripted fakes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Settings parsed from a server directory's configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    /// Message of the day shown to connecting players.
    pub announce_text: String,
    pub port: u16,
    pub max_peers: u32,
}

/// Result of scanning a server directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No (readable) configuration in the directory.
    NoConfig,
    /// Configuration present but nothing launchable.
    NoArtifacts,
    /// Exactly one launchable artifact.
    Valid {
        config: ServerSettings,
        artifacts: Vec<String>,
    },
    /// Several candidates; the user has to pick one.
    NeedsSelection {
        config: ServerSettings,
        artifacts: Vec<String>,
    },
}

impl ScanOutcome {
    /// Settings and artifact list, for the two successful outcomes.
    pub fn discovered(&self) -> Option<(&ServerSettings, &[String])> {
        match self {
            ScanOutcome::Valid { config, artifacts }
            | ScanOutcome::NeedsSelection { config, artifacts } => Some((config, artifacts)),
            ScanOutcome::NoConfig | ScanOutcome::NoArtifacts => None,
        }
    }
}

/// Liveness as reported by the status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Running,
    Stopped,
    Unknown,
}

/// Failure raised by a backend call.
///
/// These never leave the core as-is; see [`crate::classify`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Launch(String),

    #[error("{0}")]
    Stop(String),

    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        BackendError::Io {
            message: format!("{}: {}", message.into(), source),
            source,
        }
    }
}

/// External operations the core depends on.
#[async_trait::async_trait]
pub trait ServerBackend: Send + Sync + 'static {
    /// Inspect a server directory.
    async fn scan(&self, path: &Path) -> Result<ScanOutcome, BackendError>;

    /// Report whether the server rooted at `path` is live.
    async fn probe_status(&self, path: &Path) -> Result<ProbeStatus, BackendError>;

    /// Start `artifact` inside `path`, returning the new process id.
    async fn launch(&self, path: &Path, artifact: &str) -> Result<u32, BackendError>;

    /// Terminate a process previously returned by [`ServerBackend::launch`].
    async fn stop(&self, pid: u32) -> Result<(), BackendError>;
}
