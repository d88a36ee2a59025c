//! Integration tests for the Controller public interface.
//!
//! A scripted in-memory backend stands in for real server directories and
//! processes, so every scenario runs without Java or a filesystem layout.

use hearth_core::{
    AddOutcome, BackendError, Controller, ControllerConfig, EntryId, EntryStatus, ErrorKind,
    IgnoreReason, Ownership, ProbeStatus, ScanOutcome, ServerBackend, ServerSettings,
    ToggleOutcome,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct FakeState {
    scans: HashMap<PathBuf, ScanOutcome>,
    statuses: HashMap<PathBuf, ProbeStatus>,
    scan_delay: Option<Duration>,
    launch_error: Option<String>,
    stop_error: Option<String>,
    next_pid: u32,
    launched: HashMap<u32, PathBuf>,
    launches: Vec<(PathBuf, String)>,
    stops: Vec<u32>,
    scan_count: usize,
    probe_count: usize,
}

/// Backend whose answers are set by the test.
///
/// Unscripted directories scan as `NoConfig` and probe as `stopped`.
#[derive(Default)]
struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    fn with<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    fn serve(&self, path: &str, artifacts: &[&str]) {
        let artifacts: Vec<String> = artifacts.iter().map(|s| s.to_string()).collect();
        let outcome = if artifacts.len() == 1 {
            ScanOutcome::Valid {
                config: settings(),
                artifacts,
            }
        } else {
            ScanOutcome::NeedsSelection {
                config: settings(),
                artifacts,
            }
        };
        self.with(|s| s.scans.insert(PathBuf::from(path), outcome));
    }

    fn set_status(&self, path: &str, status: ProbeStatus) {
        self.with(|s| s.statuses.insert(PathBuf::from(path), status));
    }

    fn scan_count(&self) -> usize {
        self.with(|s| s.scan_count)
    }

    fn probe_count(&self) -> usize {
        self.with(|s| s.probe_count)
    }

    fn launches(&self) -> Vec<(PathBuf, String)> {
        self.with(|s| s.launches.clone())
    }

    fn stops(&self) -> Vec<u32> {
        self.with(|s| s.stops.clone())
    }
}

#[async_trait::async_trait]
impl ServerBackend for FakeBackend {
    async fn scan(&self, path: &Path) -> Result<ScanOutcome, BackendError> {
        let (outcome, delay) = self.with(|s| {
            s.scan_count += 1;
            let outcome = s.scans.get(path).cloned().unwrap_or(ScanOutcome::NoConfig);
            (outcome, s.scan_delay)
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(outcome)
    }

    async fn probe_status(&self, path: &Path) -> Result<ProbeStatus, BackendError> {
        Ok(self.with(|s| {
            s.probe_count += 1;
            s.statuses.get(path).copied().unwrap_or(ProbeStatus::Stopped)
        }))
    }

    async fn launch(&self, path: &Path, artifact: &str) -> Result<u32, BackendError> {
        self.with(|s| {
            if let Some(message) = &s.launch_error {
                return Err(BackendError::Launch(message.clone()));
            }
            s.next_pid += 1;
            let pid = 4000 + s.next_pid;
            s.launched.insert(pid, path.to_path_buf());
            s.launches.push((path.to_path_buf(), artifact.to_string()));
            Ok(pid)
        })
    }

    async fn stop(&self, pid: u32) -> Result<(), BackendError> {
        self.with(|s| {
            if let Some(message) = &s.stop_error {
                return Err(BackendError::Stop(message.clone()));
            }
            s.stops.push(pid);
            if let Some(path) = s.launched.get(&pid).cloned() {
                s.statuses.insert(path, ProbeStatus::Stopped);
            }
            Ok(())
        })
    }
}

fn settings() -> ServerSettings {
    ServerSettings {
        announce_text: "Lumi".into(),
        port: 19132,
        max_peers: 20,
    }
}

struct Harness {
    dir: TempDir,
    backend: Arc<FakeBackend>,
    controller: Arc<Controller>,
}

fn harness() -> Harness {
    harness_with(ControllerConfig::default())
}

fn harness_with(config: ControllerConfig) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let backend = Arc::new(FakeBackend::default());
    let controller = Arc::new(Controller::open(dir.path(), backend.clone(), config).unwrap());
    Harness {
        dir,
        backend,
        controller,
    }
}

/// Register `path` with `artifact` directly through the store.
fn register(h: &Harness, path: &str, artifact: &str) -> EntryId {
    h.controller
        .registry()
        .add("", Path::new(path), artifact)
        .unwrap()
        .id
}

fn status_of(h: &Harness, id: &EntryId) -> EntryStatus {
    h.controller.entry_state(id).unwrap().view.status
}

#[tokio::test]
async fn test_external_process_is_never_touched() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    h.backend.set_status("/srv/a", ProbeStatus::Running);
    let id = register(&h, "/srv/a", "a.jar");

    h.controller.reconcile().await.unwrap();
    let state = h.controller.entry_state(&id).unwrap();
    assert_eq!(state.view.status, EntryStatus::Running);
    assert_eq!(state.ownership, Ownership::External);

    let outcome = h.controller.toggle(&id).await.unwrap();
    assert_eq!(
        outcome,
        ToggleOutcome::Ignored {
            reason: IgnoreReason::External
        }
    );
    let err = h.controller.stop(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StopFailed);

    assert!(h.backend.launches().is_empty());
    assert!(h.backend.stops().is_empty());
}

#[tokio::test]
async fn test_missing_artifact_reports_core_missing_without_probing() {
    let h = harness();
    h.backend.serve("/srv/a", &["y.jar"]);
    h.backend.set_status("/srv/a", ProbeStatus::Running);
    let id = register(&h, "/srv/a", "x.jar");

    h.controller.reconcile().await.unwrap();
    let view = h.controller.entry_state(&id).unwrap().view;
    assert_eq!(view.status, EntryStatus::Error);
    let error = view.error_message.unwrap();
    assert_eq!(error.kind, ErrorKind::CoreMissing);
    assert!(error.message.contains("x.jar"));
    assert_eq!(h.backend.probe_count(), 0);

    let outcome = h.controller.toggle(&id).await.unwrap();
    assert_eq!(
        outcome,
        ToggleOutcome::Ignored {
            reason: IgnoreReason::Error
        }
    );
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    register(&h, "/srv/a", "a.jar");

    let mut rx = h.controller.subscribe();
    assert!(h.controller.reconcile().await.unwrap());
    assert!(rx.has_changed().unwrap());
    rx.borrow_and_update();

    assert!(!h.controller.reconcile().await.unwrap());
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test]
async fn test_full_toggle_cycle() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    let id = register(&h, "/srv/a", "a.jar");
    h.controller.reconcile().await.unwrap();
    assert_eq!(status_of(&h, &id), EntryStatus::Stopped);

    let ToggleOutcome::Started { pid } = h.controller.toggle(&id).await.unwrap() else {
        panic!("expected a start");
    };
    assert!(h.controller.is_loading(&id));
    assert_eq!(h.controller.running_pids().get(&id), Some(&pid));
    assert_eq!(
        h.backend.launches(),
        vec![(PathBuf::from("/srv/a"), "a.jar".to_string())]
    );

    // A second toggle while the start is unconfirmed does nothing.
    assert_eq!(
        h.controller.toggle(&id).await.unwrap(),
        ToggleOutcome::Ignored {
            reason: IgnoreReason::Loading
        }
    );

    // The tick that still sees `stopped` keeps both the flag and the PID.
    h.controller.reconcile().await.unwrap();
    assert!(h.controller.is_loading(&id));
    assert!(h.controller.running_pids().contains_key(&id));

    h.backend.set_status("/srv/a", ProbeStatus::Running);
    h.controller.reconcile().await.unwrap();
    assert!(!h.controller.is_loading(&id));
    assert_eq!(
        h.controller.entry_state(&id).unwrap().ownership,
        Ownership::Managed { pid }
    );

    assert_eq!(
        h.controller.toggle(&id).await.unwrap(),
        ToggleOutcome::ConfirmStop { pid }
    );
    assert!(h.backend.stops().is_empty());

    h.controller.stop(&id).await.unwrap();
    assert_eq!(h.backend.stops(), vec![pid]);
    assert!(!h.controller.is_loading(&id));
    assert!(h.controller.running_pids().is_empty());
    assert_eq!(status_of(&h, &id), EntryStatus::Stopped);
}

#[tokio::test]
async fn test_launch_failure_clears_loading() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    h.backend
        .with(|s| s.launch_error = Some("java: not found".into()));
    let id = register(&h, "/srv/a", "a.jar");

    let err = h.controller.start(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LaunchFailed);
    assert!(err.to_string().contains("java: not found"));
    assert!(!h.controller.is_loading(&id));
    assert!(h.controller.running_pids().is_empty());
}

#[tokio::test]
async fn test_stop_failure_keeps_pid() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    let id = register(&h, "/srv/a", "a.jar");

    let pid = h.controller.start(&id).await.unwrap();
    h.backend.set_status("/srv/a", ProbeStatus::Running);
    h.controller.reconcile().await.unwrap();

    h.backend.with(|s| s.stop_error = Some("EPERM".into()));
    let err = h.controller.stop(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StopFailed);
    assert!(!h.controller.is_loading(&id));
    assert_eq!(h.controller.running_pids().get(&id), Some(&pid));
}

#[tokio::test]
async fn test_stale_pid_dropped_when_process_exits() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    let id = register(&h, "/srv/a", "a.jar");

    h.controller.start(&id).await.unwrap();
    h.backend.set_status("/srv/a", ProbeStatus::Running);
    h.controller.reconcile().await.unwrap();
    assert!(h.controller.running_pids().contains_key(&id));

    // The server shuts itself down.
    h.backend.set_status("/srv/a", ProbeStatus::Stopped);
    h.controller.reconcile().await.unwrap();
    assert!(h.controller.running_pids().is_empty());

    let raw = std::fs::read_to_string(h.dir.path().join("running.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(doc["pids"].as_object().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_start_expires_after_grace() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    let id = register(&h, "/srv/a", "a.jar");

    h.controller.start(&id).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    h.controller.reconcile().await.unwrap();
    assert!(h.controller.is_loading(&id));

    tokio::time::advance(Duration::from_secs(31)).await;
    h.controller.reconcile().await.unwrap();
    assert!(!h.controller.is_loading(&id));
    assert!(h.controller.running_pids().is_empty());

    // The entry can be started again.
    assert!(matches!(
        h.controller.toggle(&id).await.unwrap(),
        ToggleOutcome::Started { .. }
    ));
}

#[tokio::test]
async fn test_pids_survive_restart() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    h.backend.set_status("/srv/a", ProbeStatus::Running);
    let id = register(&h, "/srv/a", "a.jar");
    let pid = h.controller.start(&id).await.unwrap();

    let reopened = Controller::open(
        h.dir.path(),
        h.backend.clone(),
        ControllerConfig::default(),
    )
    .unwrap();
    reopened.reconcile().await.unwrap();

    let state = reopened.entry_state(&id).unwrap();
    assert_eq!(state.ownership, Ownership::Managed { pid });
    assert_eq!(
        reopened.toggle(&id).await.unwrap(),
        ToggleOutcome::ConfirmStop { pid }
    );
}

fn reopen(h: &Harness) -> Controller {
    Controller::open(h.dir.path(), h.backend.clone(), ControllerConfig::default()).unwrap()
}

#[tokio::test]
async fn test_unconfirmed_start_survives_restart() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    let id = register(&h, "/srv/a", "a.jar");

    // Launched, but the server has not taken its lock yet.
    let pid = h.controller.start(&id).await.unwrap();

    let second = reopen(&h);
    assert!(second.is_loading(&id));
    second.reconcile().await.unwrap();
    assert_eq!(second.running_pids().get(&id), Some(&pid));
    assert_eq!(
        second.toggle(&id).await.unwrap(),
        ToggleOutcome::Ignored {
            reason: IgnoreReason::Loading
        }
    );

    h.backend.set_status("/srv/a", ProbeStatus::Running);
    let third = reopen(&h);
    third.reconcile().await.unwrap();
    assert!(!third.is_loading(&id));
    assert_eq!(
        third.entry_state(&id).unwrap().ownership,
        Ownership::Managed { pid }
    );

    // Once confirmed, the start marker is gone from disk.
    let raw = std::fs::read_to_string(h.dir.path().join("running.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(doc.get("starting").is_none());
    assert!(!reopen(&h).is_loading(&id));
}

#[tokio::test]
async fn test_start_older_than_grace_is_not_restored() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    let id = register(&h, "/srv/a", "a.jar");

    let doc = serde_json::json!({
        "version": 1,
        "pids": { (id.as_str()): 4001 },
        "starting": { (id.as_str()): "2020-01-01T00:00:00Z" },
    });
    std::fs::write(h.dir.path().join("running.json"), doc.to_string()).unwrap();

    let reopened = reopen(&h);
    assert!(!reopened.is_loading(&id));
    reopened.reconcile().await.unwrap();
    assert!(reopened.running_pids().is_empty());
}

#[tokio::test]
async fn test_recorded_pid_in_unknown_state_is_not_started_again() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    let id = register(&h, "/srv/a", "a.jar");

    let pid = h.controller.start(&id).await.unwrap();
    h.backend.set_status("/srv/a", ProbeStatus::Running);
    h.controller.reconcile().await.unwrap();

    // The lock file disappears while the process may still be up.
    h.backend.set_status("/srv/a", ProbeStatus::Unknown);
    h.controller.reconcile().await.unwrap();
    assert_eq!(status_of(&h, &id), EntryStatus::Unknown);
    assert_eq!(h.controller.running_pids().get(&id), Some(&pid));

    assert_eq!(
        h.controller.toggle(&id).await.unwrap(),
        ToggleOutcome::Ignored {
            reason: IgnoreReason::Unconfirmed
        }
    );
    let err = h.controller.start(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LaunchFailed);
    assert_eq!(h.backend.launches().len(), 1);
    assert_eq!(h.controller.running_pids().get(&id), Some(&pid));
}

#[tokio::test]
async fn test_delete_leaves_process_running_and_forgets_pid() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar"]);
    let id = register(&h, "/srv/a", "a.jar");
    h.controller.start(&id).await.unwrap();
    h.backend.set_status("/srv/a", ProbeStatus::Running);
    h.controller.reconcile().await.unwrap();

    let removed = h.controller.delete(&id).await.unwrap();
    assert_eq!(removed.id, id);
    assert!(h.controller.entry_state(&id).is_none());
    assert!(h.controller.running_pids().is_empty());
    assert!(h.backend.stops().is_empty());

    let err = h.controller.delete(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unknown);
}

#[tokio::test]
async fn test_unknown_entry() {
    let h = harness();
    let ghost = EntryId::from("ghost");

    let err = h.controller.toggle(&ghost).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert!(err.to_string().contains("entry not found"));
    assert_eq!(
        h.controller.start(&ghost).await.unwrap_err().kind(),
        ErrorKind::Unknown
    );
}

#[tokio::test]
async fn test_add_single_artifact() {
    let h = harness();
    h.backend.serve("/srv/a", &["core.jar"]);

    let outcome = h
        .controller
        .begin_add(Path::new("/srv/a"), "Main")
        .await
        .unwrap();
    let AddOutcome::Added(entry) = outcome else {
        panic!("expected the entry to be added");
    };
    assert_eq!(entry.name, "Main");
    assert_eq!(entry.artifact_name, "core.jar");

    // The add reconciles, so the entry shows up straight away.
    let view = h.controller.entry_state(&entry.id).unwrap().view;
    assert_eq!(view.settings, settings());
}

#[tokio::test]
async fn test_duplicate_path_rejected_before_scanning() {
    let h = harness();
    h.backend.serve("/srv/a", &["core.jar"]);
    register(&h, "/srv/a", "core.jar");
    let scans = h.backend.scan_count();

    let err = h
        .controller
        .begin_add(Path::new("/srv/a/"), "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicatePath);
    assert_eq!(h.backend.scan_count(), scans);
    assert_eq!(h.controller.registry().list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_add_failures_release_the_slot() {
    let h = harness();
    h.backend.with(|s| {
        s.scans.insert(PathBuf::from("/srv/empty"), ScanOutcome::NoArtifacts)
    });

    let err = h
        .controller
        .begin_add(Path::new("/srv/missing"), "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoConfig);

    let err = h
        .controller
        .begin_add(Path::new("/srv/empty"), "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoArtifacts);

    assert!(h.controller.registry().list().unwrap().is_empty());
    assert!(h.controller.pending_selection().is_none());
}

#[tokio::test]
async fn test_ambiguous_add_needs_selection() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar", "b.jar"]);
    h.backend.serve("/srv/b", &["core.jar"]);

    let outcome = h
        .controller
        .begin_add(Path::new("/srv/a"), "Main")
        .await
        .unwrap();
    let AddOutcome::NeedsSelection(pending) = outcome else {
        panic!("expected a pending selection");
    };
    assert_eq!(pending.candidate_artifacts, vec!["a.jar", "b.jar"]);
    assert_eq!(pending.parsed_settings, settings());
    assert!(h.controller.registry().list().unwrap().is_empty());

    // Only one add at a time.
    let err = h
        .controller
        .begin_add(Path::new("/srv/b"), "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SelectionInProgress);

    // An artifact that was not offered is rejected and the choice stays open.
    let err = h.controller.select_artifact("c.jar").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CoreMissing);
    assert!(h.controller.pending_selection().is_some());

    let entry = h.controller.select_artifact("b.jar").await.unwrap();
    assert_eq!(entry.artifact_name, "b.jar");
    assert_eq!(entry.name, "Main");
    assert!(h.controller.pending_selection().is_none());
    assert_eq!(h.controller.registry().list().unwrap(), vec![entry]);
}

#[tokio::test]
async fn test_cancel_selection_has_no_side_effects() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar", "b.jar"]);

    h.controller
        .begin_add(Path::new("/srv/a"), "")
        .await
        .unwrap();
    let cancelled = h.controller.cancel_selection().unwrap();
    assert_eq!(cancelled.path, PathBuf::from("/srv/a"));

    assert!(h.controller.registry().list().unwrap().is_empty());
    assert!(!h.dir.path().join("servers.json").exists());
    assert!(h.controller.select_artifact("a.jar").await.is_err());

    // A new add can start.
    assert!(h
        .controller
        .begin_add(Path::new("/srv/a"), "")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_change_artifact() {
    let h = harness();
    h.backend.serve("/srv/a", &["a.jar", "b.jar"]);
    let id = register(&h, "/srv/a", "a.jar");

    assert_eq!(
        h.controller.reselect(&id).await.unwrap(),
        vec!["a.jar", "b.jar"]
    );

    let err = h
        .controller
        .change_artifact(&id, "c.jar")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CoreMissing);

    let entry = h.controller.change_artifact(&id, "b.jar").await.unwrap();
    assert_eq!(entry.artifact_name, "b.jar");
    assert_eq!(h.controller.entry_state(&id).unwrap().view.artifact_name, "b.jar");
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_times_out() {
    let h = harness_with(ControllerConfig {
        collaborator_timeout_ms: Some(100),
        ..Default::default()
    });
    h.backend.serve("/srv/a", &["a.jar"]);
    h.backend
        .with(|s| s.scan_delay = Some(Duration::from_secs(5)));
    let id = register(&h, "/srv/a", "a.jar");

    h.controller.reconcile().await.unwrap();
    let view = h.controller.entry_state(&id).unwrap().view;
    assert_eq!(view.status, EntryStatus::Error);
    assert_eq!(view.error_message.unwrap().kind, ErrorKind::Unknown);
}

#[tokio::test(start_paused = true)]
async fn test_reconciler_publishes_and_shuts_down() {
    let h = harness_with(ControllerConfig {
        poll_interval_ms: 1_000,
        ..Default::default()
    });
    h.backend.serve("/srv/a", &["a.jar"]);
    let id = register(&h, "/srv/a", "a.jar");

    let mut rx = h.controller.subscribe();
    let handle = h.controller.spawn_reconciler();

    // Startup tick.
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update()[0].status, EntryStatus::Stopped);

    // A later timer tick picks up the external start.
    h.backend.set_status("/srv/a", ProbeStatus::Running);
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update()[0].id, id);
    assert_eq!(status_of(&h, &id), EntryStatus::Running);

    handle.stop().await;
}
