//! Hearth Core - headless registry and lifecycle controller for game servers.
//!
//! This crate tracks a set of server directories, keeps a derived runtime view
//! of each one up to date, and starts or stops their processes. It has no UI;
//! front ends drive a [`Controller`] and render the snapshots it publishes.
//!
//! Everything that touches the filesystem layout of a server or spawns a
//! process sits behind the [`ServerBackend`] trait. [`LocalBackend`] is the
//! bundled implementation for Java servers, and [`Installer`] fetches a
//! server core from a GitHub release.
//!
//! # Example
//!
//! ```rust,ignore
//! use hearth_core::{Controller, ControllerConfig, LocalBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> hearth_core::Result<()> {
//!     let data_dir = std::path::Path::new("/var/lib/hearth");
//!     let config = ControllerConfig::load(data_dir)?;
//!     let backend = LocalBackend::new(config.launch.clone(), data_dir.join("logs"));
//!     let controller = Arc::new(Controller::open(data_dir, Arc::new(backend), config)?);
//!
//!     controller.reconcile().await?;
//!     for state in controller.entries() {
//!         println!("{} is {}", state.view.name, state.view.status);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod classify;
pub mod config;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod persist;
pub mod pids;
pub mod reconcile;
pub mod registry;
pub mod selection;
pub mod system;

#[cfg(feature = "installer")]
pub mod install;
#[cfg(feature = "local-backend")]
pub mod local;
#[cfg(feature = "local-backend")]
pub mod platform;

pub use backend::{BackendError, ProbeStatus, ScanOutcome, ServerBackend, ServerSettings};
pub use classify::ClassifiedError;
pub use config::{default_data_dir, ControllerConfig, InstallSettings, LaunchSettings};
pub use controller::{Controller, EntryState, ReconcilerHandle};
pub use error::{ErrorKind, HearthError, Result};
pub use lifecycle::{ActionKind, IgnoreReason, Ownership, ToggleOutcome};
pub use pids::RunningPidTable;
pub use reconcile::{EntryStatus, RuntimeView};
pub use registry::{EntryId, ManagedEntry, RegistryStore};
pub use selection::{AddOutcome, PendingSelection};
pub use system::{check_java, JavaCheckResult};

#[cfg(feature = "installer")]
pub use install::{InstallError, InstallOptions, InstallReport, Installer};
#[cfg(feature = "local-backend")]
pub use local::LocalBackend;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent before it
/// can panic, so the poison flag carries no information.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
