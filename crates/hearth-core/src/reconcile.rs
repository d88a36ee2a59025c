//! Reconciliation: folding registry entries and backend results into views.
//!
//! A tick scans and probes every registered entry concurrently, waits for the
//! whole batch, and only then derives the bookkeeping changes (loading flags
//! to clear, stale PIDs to drop). Everything in this module is free of shared
//! state; [`crate::controller::Controller`] owns the state and applies the
//! resulting [`TickPlan`].

use crate::backend::{BackendError, ProbeStatus, ServerBackend, ServerSettings};
use crate::classify::{self, ClassifiedError};
use crate::config::LaunchConfigDefaults;
use crate::error::HearthError;
use crate::lifecycle::{ActionKind, LoadingSet};
use crate::registry::{EntryId, ManagedEntry};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Status of an entry as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Running,
    Stopped,
    Unknown,
    Error,
}

impl From<ProbeStatus> for EntryStatus {
    fn from(status: ProbeStatus) -> Self {
        match status {
            ProbeStatus::Running => EntryStatus::Running,
            ProbeStatus::Stopped => EntryStatus::Stopped,
            ProbeStatus::Unknown => EntryStatus::Unknown,
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryStatus::Running => "running",
            EntryStatus::Stopped => "stopped",
            EntryStatus::Unknown => "unknown",
            EntryStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Derived, never-persisted view of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeView {
    pub id: EntryId,
    pub name: String,
    pub path: PathBuf,
    pub status: EntryStatus,
    pub artifact_name: String,
    pub settings: ServerSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<ClassifiedError>,
}

impl RuntimeView {
    fn from_entry(entry: &ManagedEntry, artifact: String) -> Self {
        RuntimeView {
            id: entry.id.clone(),
            name: entry.name.clone(),
            path: entry.path.clone(),
            status: EntryStatus::Unknown,
            artifact_name: artifact,
            settings: ServerSettings::default(),
            error_message: None,
        }
    }

    fn fail(mut self, err: &HearthError) -> Self {
        self.status = EntryStatus::Error;
        self.settings = ServerSettings::default();
        self.error_message = Some(ClassifiedError::from(err));
        self
    }
}

/// The artifact an entry launches; entries saved without one use `core.jar`.
pub fn effective_artifact(entry: &ManagedEntry) -> String {
    if entry.artifact_name.is_empty() {
        LaunchConfigDefaults::DEFAULT_ARTIFACT.to_string()
    } else {
        entry.artifact_name.clone()
    }
}

/// Await a backend call, bounded by `timeout` when one is configured.
pub(crate) async fn bounded<T>(
    timeout: Option<Duration>,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(BackendError::Timeout(limit))),
        None => call.await,
    }
}

/// Scan and probe a single entry.
///
/// Artifact resolution comes before the liveness check: an entry whose scan
/// fails, or whose artifact is missing, is never probed.
pub async fn view_entry(
    backend: &dyn ServerBackend,
    entry: &ManagedEntry,
    timeout: Option<Duration>,
) -> RuntimeView {
    let artifact = effective_artifact(entry);
    let view = RuntimeView::from_entry(entry, artifact.clone());

    let outcome = match bounded(timeout, backend.scan(&entry.path)).await {
        Ok(outcome) => outcome,
        Err(e) => return view.fail(&classify::unexpected(Some(&entry.id), e)),
    };
    if let Some(err) = classify::scan_outcome(&outcome, &entry.path) {
        return view.fail(&err);
    }

    let Some((config, artifacts)) = outcome.discovered() else {
        return view;
    };

    if !artifacts.contains(&artifact) {
        return view.fail(&HearthError::CoreMissing {
            entry_id: Some(entry.id.clone()),
            artifact,
        });
    }

    match bounded(timeout, backend.probe_status(&entry.path)).await {
        Ok(status) => RuntimeView {
            status: status.into(),
            settings: config.clone(),
            ..view
        },
        Err(e) => view.fail(&classify::unexpected(Some(&entry.id), e)),
    }
}

/// Batched scan + probe. Results come back in `entries` order.
pub async fn scan_and_probe(
    backend: &dyn ServerBackend,
    entries: &[ManagedEntry],
    timeout: Option<Duration>,
) -> Vec<RuntimeView> {
    join_all(
        entries
            .iter()
            .map(|entry| view_entry(backend, entry, timeout)),
    )
    .await
}

/// Bookkeeping changes derived from one tick's views.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TickPlan {
    /// Starts confirmed by a `running` observation.
    pub confirmed_starts: Vec<EntryId>,
    /// Starts that never reached `running` within the grace period.
    pub expired_starts: Vec<EntryId>,
    /// Loading flags whose entry has left the registry.
    pub orphaned_loading: Vec<EntryId>,
    /// PIDs to forget: exited processes and entries no longer registered.
    pub stale_pids: Vec<EntryId>,
}

impl TickPlan {
    pub fn is_empty(&self) -> bool {
        self.confirmed_starts.is_empty()
            && self.expired_starts.is_empty()
            && self.orphaned_loading.is_empty()
            && self.stale_pids.is_empty()
    }
}

/// Work out which loading flags and PIDs a tick retires.
///
/// `registered` is the registry's id set as of planning time, which may be
/// newer than the entry list the views were computed from.
pub fn plan_tick(
    views: &[RuntimeView],
    registered: &HashSet<EntryId>,
    pids: &BTreeMap<EntryId, u32>,
    loading: &LoadingSet,
    now: Instant,
    start_grace: Duration,
) -> TickPlan {
    let mut plan = TickPlan::default();

    for id in loading.ids() {
        if !registered.contains(id) {
            plan.orphaned_loading.push(id.clone());
        }
    }

    let mut still_loading: HashSet<&EntryId> = HashSet::new();
    for view in views {
        let Some(action) = loading.get(&view.id) else {
            continue;
        };
        match action.kind {
            ActionKind::Start if view.status == EntryStatus::Running => {
                plan.confirmed_starts.push(view.id.clone());
            }
            ActionKind::Start if now.saturating_duration_since(action.since) >= start_grace => {
                plan.expired_starts.push(view.id.clone());
            }
            _ => {
                still_loading.insert(&view.id);
            }
        }
    }

    let mut stale = BTreeSet::new();
    for view in views {
        let exited = matches!(view.status, EntryStatus::Stopped | EntryStatus::Error);
        if exited && pids.contains_key(&view.id) && !still_loading.contains(&view.id) {
            stale.insert(view.id.clone());
        }
    }
    for id in pids.keys() {
        if !registered.contains(id) {
            stale.insert(id.clone());
        }
    }
    plan.stale_pids = stale.into_iter().collect();

    if !plan.is_empty() {
        debug!("Tick plan: {:?}", plan);
    }
    plan
}
