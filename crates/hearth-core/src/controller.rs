//! The controller: shared state plus the operations that mutate it.
//!
//! A [`Controller`] owns the registry, the PID table, the loading set, the
//! pending selection and the published runtime views. Front ends hold it in
//! an `Arc`, call its async operations, and watch [`Controller::subscribe`]
//! for new snapshots. The periodic loop is started with
//! [`Controller::spawn_reconciler`].

use crate::backend::{ScanOutcome, ServerBackend};
use crate::classify;
use crate::config::{ControllerConfig, PathsConfig};
use crate::error::{HearthError, Result};
use crate::lifecycle::{
    toggle_intent, ActionKind, IgnoreReason, LoadingSet, Ownership, ToggleIntent, ToggleOutcome,
};
use crate::lock;
use crate::pids::RunningPidTable;
use crate::reconcile::{
    bounded, effective_artifact, plan_tick, scan_and_probe, EntryStatus, RuntimeView,
};
use crate::registry::{normalize_path, EntryId, ManagedEntry, RegistryStore};
use crate::selection::{AddOutcome, PendingSelection, SelectionSlot};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// A runtime view together with this controller's bookkeeping for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryState {
    #[serde(flatten)]
    pub view: RuntimeView,
    pub ownership: Ownership,
    /// The lifecycle action in flight, if any.
    pub loading: Option<ActionKind>,
}

/// Process-lifecycle controller for registered servers.
pub struct Controller {
    registry: RegistryStore,
    pids: RunningPidTable,
    backend: Arc<dyn ServerBackend>,
    config: ControllerConfig,
    loading: Mutex<LoadingSet>,
    selection: SelectionSlot,
    /// Held for the duration of a tick so ticks never overlap.
    tick_guard: tokio::sync::Mutex<()>,
    views_tx: watch::Sender<Vec<RuntimeView>>,
}

impl Controller {
    pub fn new(
        registry: RegistryStore,
        pids: RunningPidTable,
        backend: Arc<dyn ServerBackend>,
        config: ControllerConfig,
    ) -> Self {
        let (views_tx, _) = watch::channel(Vec::new());
        let loading = restore_starts(&pids, config.start_grace());
        Self {
            registry,
            pids,
            backend,
            config,
            loading: Mutex::new(loading),
            selection: SelectionSlot::default(),
            tick_guard: tokio::sync::Mutex::new(()),
            views_tx,
        }
    }

    /// Open the registry and PID table stored under `data_dir`.
    pub fn open(
        data_dir: &Path,
        backend: Arc<dyn ServerBackend>,
        config: ControllerConfig,
    ) -> Result<Self> {
        let registry = RegistryStore::new(data_dir.join(PathsConfig::REGISTRY_FILENAME));
        let pids = RunningPidTable::load(data_dir.join(PathsConfig::PIDS_FILENAME))?;
        info!("Opened controller state in {}", data_dir.display());
        Ok(Self::new(registry, pids, backend, config))
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Vec<RuntimeView>> {
        self.views_tx.subscribe()
    }

    /// The last published snapshot.
    pub fn views(&self) -> Vec<RuntimeView> {
        self.views_tx.borrow().clone()
    }

    pub fn running_pids(&self) -> BTreeMap<EntryId, u32> {
        self.pids.snapshot()
    }

    pub fn is_loading(&self, id: &EntryId) -> bool {
        lock(&self.loading).contains(id)
    }

    /// Snapshot views joined with ownership and loading state.
    pub fn entries(&self) -> Vec<EntryState> {
        let views = self.views();
        let pids = self.pids.snapshot();
        let loading = lock(&self.loading);
        views
            .into_iter()
            .map(|view| EntryState {
                ownership: Ownership::of(view.status, pids.get(&view.id).copied()),
                loading: loading.get(&view.id).map(|a| a.kind),
                view,
            })
            .collect()
    }

    pub fn entry_state(&self, id: &EntryId) -> Option<EntryState> {
        self.entries().into_iter().find(|e| &e.view.id == id)
    }

    // ========================================
    // Reconciliation
    // ========================================

    /// Run one reconciliation tick.
    ///
    /// Returns whether a new snapshot was published. Fails only when the
    /// registry itself cannot be read; per-entry backend failures become
    /// `error` views instead.
    pub async fn reconcile(&self) -> Result<bool> {
        let _tick = self.tick_guard.lock().await;

        let entries = self.registry.list()?;
        let views = scan_and_probe(
            self.backend.as_ref(),
            &entries,
            self.config.collaborator_timeout(),
        )
        .await;

        // The registry may have changed while the batch was in flight.
        let registered: HashSet<EntryId> = match self.registry.list() {
            Ok(current) => current.into_iter().map(|e| e.id).collect(),
            Err(e) => {
                warn!("Re-reading registry after tick failed: {}", e);
                entries.iter().map(|e| e.id.clone()).collect()
            }
        };

        self.apply_tick(&views, &registered);

        let published = self.views_tx.send_if_modified(|current| {
            if *current == views {
                false
            } else {
                *current = views;
                true
            }
        });
        debug!(
            "Reconciled {} entries (published: {})",
            entries.len(),
            published
        );
        Ok(published)
    }

    fn apply_tick(&self, views: &[RuntimeView], registered: &HashSet<EntryId>) {
        let mut loading = lock(&self.loading);
        let plan = plan_tick(
            views,
            registered,
            &self.pids.snapshot(),
            &loading,
            Instant::now(),
            self.config.start_grace(),
        );

        for id in &plan.confirmed_starts {
            loading.finish(id);
            info!("{} confirmed running", id);
        }
        for id in &plan.expired_starts {
            loading.finish(id);
            warn!(
                "{} did not reach running within {:?}; giving up on the start",
                id,
                self.config.start_grace()
            );
        }
        for id in &plan.orphaned_loading {
            loading.finish(id);
        }
        if let Err(e) = self.pids.settle_starts(|id| loading.contains(id)) {
            warn!("Failed to clear settled starts, retrying next tick: {}", e);
        }

        if !plan.stale_pids.is_empty() {
            let stale: HashSet<&EntryId> = plan.stale_pids.iter().collect();
            match self.pids.retain(|id, _| !stale.contains(id)) {
                Ok(dropped) => {
                    for id in dropped {
                        info!("Dropped stale PID for {}", id);
                    }
                }
                Err(e) => warn!("Failed to drop stale PIDs, retrying next tick: {}", e),
            }
        }
    }

    /// Start the periodic loop. The first tick runs immediately.
    pub fn spawn_reconciler(self: &Arc<Self>) -> ReconcilerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let controller = Arc::clone(self);
        let period = self.config.poll_interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Reconciliation loop started (every {:?})", period);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Reconciliation loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = controller.reconcile().await {
                            error!("Reconciliation tick failed: {}", e);
                        }
                    }
                }
            }
        });

        ReconcilerHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    async fn reconcile_logged(&self) {
        if let Err(e) = self.reconcile().await {
            warn!("Follow-up reconciliation failed: {}", e);
        }
    }

    // ========================================
    // Add / selection workflow
    // ========================================

    /// Scan `path` and register it, or stage a selection if it is ambiguous.
    pub async fn begin_add(&self, path: &Path, name: &str) -> Result<AddOutcome> {
        let path = normalize_path(path);
        if self.registry.contains_path(&path)? {
            return Err(HearthError::DuplicatePath { path });
        }
        let guard = self.selection.begin(&path)?;

        let outcome = bounded(
            self.config.collaborator_timeout(),
            self.backend.scan(&path),
        )
        .await
        .map_err(|e| classify::unexpected(None, e))?;

        match outcome {
            ScanOutcome::Valid { artifacts, .. } => {
                let Some(artifact) = artifacts.first() else {
                    return Err(HearthError::NoArtifacts { path });
                };
                let entry = self.registry.add(name, &path, artifact)?;
                guard.complete();
                self.reconcile_logged().await;
                Ok(AddOutcome::Added(entry))
            }
            ScanOutcome::NeedsSelection { config, artifacts } => {
                let pending = PendingSelection {
                    path: path.clone(),
                    name: name.to_string(),
                    candidate_artifacts: artifacts,
                    parsed_settings: config,
                };
                info!(
                    "{} has {} candidate artifacts; waiting for a choice",
                    path.display(),
                    pending.candidate_artifacts.len()
                );
                guard.stage(pending.clone());
                Ok(AddOutcome::NeedsSelection(pending))
            }
            ScanOutcome::NoConfig => Err(rejected(HearthError::NoConfig { path })),
            ScanOutcome::NoArtifacts => Err(rejected(HearthError::NoArtifacts { path })),
        }
    }

    pub fn pending_selection(&self) -> Option<PendingSelection> {
        self.selection.pending()
    }

    /// Resolve the pending selection by committing `artifact`.
    ///
    /// If the commit fails the selection stays pending so it can be retried
    /// or cancelled.
    pub async fn select_artifact(&self, artifact: &str) -> Result<ManagedEntry> {
        let (pending, guard) = self.selection.take_for(artifact)?;
        let entry = self.registry.add(&pending.name, &pending.path, artifact)?;
        guard.complete();
        self.reconcile_logged().await;
        Ok(entry)
    }

    /// Drop the pending selection without side effects.
    pub fn cancel_selection(&self) -> Option<PendingSelection> {
        self.selection.cancel()
    }

    /// Candidate artifacts currently present in an entry's directory.
    pub async fn reselect(&self, id: &EntryId) -> Result<Vec<String>> {
        let entry = self.entry(id)?;
        let outcome = bounded(
            self.config.collaborator_timeout(),
            self.backend.scan(&entry.path),
        )
        .await
        .map_err(|e| classify::unexpected(Some(id), e))?;

        if let Some(err) = classify::scan_outcome(&outcome, &entry.path) {
            return Err(err);
        }
        Ok(outcome
            .discovered()
            .map(|(_, artifacts)| artifacts.to_vec())
            .unwrap_or_default())
    }

    /// Point an existing entry at a different artifact.
    pub async fn change_artifact(&self, id: &EntryId, artifact: &str) -> Result<ManagedEntry> {
        let candidates = self.reselect(id).await?;
        if !candidates.iter().any(|a| a == artifact) {
            return Err(HearthError::CoreMissing {
                entry_id: Some(id.clone()),
                artifact: artifact.to_string(),
            });
        }
        let entry = self.registry.update_artifact(id, artifact)?;
        self.reconcile_logged().await;
        Ok(entry)
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Start or stop an entry depending on its state.
    ///
    /// Stopping is two-phase: a managed, running entry yields
    /// [`ToggleOutcome::ConfirmStop`] and nothing happens until the caller
    /// invokes [`Controller::stop`].
    pub async fn toggle(&self, id: &EntryId) -> Result<ToggleOutcome> {
        let view = self.current_view(id).await?;
        let intent = toggle_intent(view.status, self.pids.get(id), self.is_loading(id));
        debug!("toggle({}) with status {} -> {:?}", id, view.status, intent);

        match intent {
            ToggleIntent::Ignore(reason) => Ok(ToggleOutcome::Ignored { reason }),
            ToggleIntent::ConfirmStop { pid } => Ok(ToggleOutcome::ConfirmStop { pid }),
            ToggleIntent::Start => match self.try_start(id).await? {
                Some(pid) => Ok(ToggleOutcome::Started { pid }),
                None => Ok(ToggleOutcome::Ignored {
                    reason: IgnoreReason::Loading,
                }),
            },
        }
    }

    /// Launch an entry's artifact.
    ///
    /// The loading flag stays set after a successful launch until a tick
    /// observes the entry running. Refused while a recorded process is in an
    /// unknown state.
    pub async fn start(&self, id: &EntryId) -> Result<u32> {
        let view = self.current_view(id).await?;
        if view.status == EntryStatus::Unknown && !self.is_loading(id) {
            if let Some(pid) = self.pids.get(id) {
                return Err(HearthError::LaunchFailed {
                    entry_id: id.clone(),
                    message: format!("PID {} is still recorded and its state is unknown", pid),
                });
            }
        }
        self.try_start(id).await?.ok_or_else(|| HearthError::LaunchFailed {
            entry_id: id.clone(),
            message: "another lifecycle action is in progress".to_string(),
        })
    }

    async fn try_start(&self, id: &EntryId) -> Result<Option<u32>> {
        let entry = self.entry(id)?;
        if !lock(&self.loading).try_begin(id, ActionKind::Start, Instant::now()) {
            return Ok(None);
        }

        let artifact = effective_artifact(&entry);
        info!("Starting {} ({}) with {}", entry.name, id, artifact);

        let pid = match self.backend.launch(&entry.path, &artifact).await {
            Ok(pid) => pid,
            Err(e) => {
                lock(&self.loading).finish(id);
                let err = classify::launch_failure(id, e);
                warn!("{}", err);
                return Err(err);
            }
        };

        if let Err(e) = self.pids.record(id, pid) {
            lock(&self.loading).finish(id);
            error!(
                "Launched {} as PID {} but could not record it; it will show as external: {}",
                id, pid, e
            );
            return Err(e);
        }
        Ok(Some(pid))
    }

    /// Stop a managed, running entry. This is the confirmation step of a toggle.
    pub async fn stop(&self, id: &EntryId) -> Result<()> {
        let view = self.current_view(id).await?;
        let pid = match (view.status, self.pids.get(id)) {
            (EntryStatus::Running, Some(pid)) => pid,
            (EntryStatus::Running, None) => {
                return Err(HearthError::StopFailed {
                    entry_id: id.clone(),
                    message: "process was not started by this controller".to_string(),
                })
            }
            (status, _) => {
                return Err(HearthError::StopFailed {
                    entry_id: id.clone(),
                    message: format!("entry is {}, not running", status),
                })
            }
        };

        if !lock(&self.loading).try_begin(id, ActionKind::Stop, Instant::now()) {
            return Err(HearthError::StopFailed {
                entry_id: id.clone(),
                message: "another lifecycle action is in progress".to_string(),
            });
        }

        info!("Stopping {} (PID {})", id, pid);
        let result = self.backend.stop(pid).await;
        lock(&self.loading).finish(id);

        if let Err(e) = result {
            let err = classify::stop_failure(id, e);
            warn!("{}", err);
            return Err(err);
        }

        let removed = self.pids.remove(id);
        self.reconcile_logged().await;
        removed.map(|_| ())
    }

    /// Unregister an entry. A running process is left alone.
    pub async fn delete(&self, id: &EntryId) -> Result<ManagedEntry> {
        let removed = self
            .registry
            .remove(id)?
            .ok_or_else(|| HearthError::entry_not_found(id))?;
        self.reconcile_logged().await;
        Ok(removed)
    }

    fn entry(&self, id: &EntryId) -> Result<ManagedEntry> {
        self.registry
            .get(id)?
            .ok_or_else(|| HearthError::entry_not_found(id))
    }

    /// The entry's published view, reconciling first if it has none yet.
    async fn current_view(&self, id: &EntryId) -> Result<RuntimeView> {
        let find = |views: &[RuntimeView]| views.iter().find(|v| &v.id == id).cloned();
        let cached = find(self.views_tx.borrow().as_slice());
        if let Some(view) = cached {
            return Ok(view);
        }
        self.entry(id)?;
        self.reconcile().await?;
        let found = find(self.views_tx.borrow().as_slice());
        found.ok_or_else(|| HearthError::entry_not_found(id))
    }
}

fn rejected(err: HearthError) -> HearthError {
    info!("Not adding server: {}", err);
    err
}

/// Rebuild loading flags for starts a previous controller left unconfirmed.
///
/// Each keeps the time left in its grace period; starts already past it are
/// not restored and their PIDs go through the usual stale check.
fn restore_starts(pids: &RunningPidTable, start_grace: Duration) -> LoadingSet {
    let mut loading = LoadingSet::default();
    let now = Instant::now();
    for (id, launched_at) in pids.pending_starts() {
        let elapsed = (Utc::now() - launched_at).to_std().unwrap_or_default();
        if elapsed >= start_grace {
            continue;
        }
        if let Some(since) = now.checked_sub(elapsed) {
            loading.try_begin(&id, ActionKind::Start, since);
            debug!("Restored unconfirmed start of {} ({:?} ago)", id, elapsed);
        }
    }
    loading
}

/// Handle to the running reconciliation loop. Dropping it stops the loop.
pub struct ReconcilerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl ReconcilerHandle {
    /// Ask the loop to stop after the current tick, if one is running.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
