//! Filesystem- and process-backed [`ServerBackend`] for Java servers.
//!
//! A server directory holds one or more `.jar` artifacts and a
//! `settings.yml`. While a server runs it holds an exclusive lock on
//! `players/LOCK`, which is how liveness is probed.

use crate::backend::{BackendError, ProbeStatus, ScanOutcome, ServerBackend, ServerSettings};
use crate::config::{LaunchConfigDefaults, LaunchSettings};
use crate::platform;
use fs2::FileExt;
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(windows)]
use std::os::windows::process::CommandExt;

#[derive(Debug, Deserialize)]
struct SettingsFile {
    general: GeneralSection,
}

#[derive(Debug, Deserialize)]
struct GeneralSection {
    motd: String,
    #[serde(rename = "server-port")]
    server_port: u16,
    #[serde(rename = "max-players")]
    max_players: u32,
}

impl From<GeneralSection> for ServerSettings {
    fn from(general: GeneralSection) -> Self {
        ServerSettings {
            announce_text: general.motd,
            port: general.server_port,
            max_peers: general.max_players,
        }
    }
}

/// Runs servers as local child processes.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    settings: LaunchSettings,
    logs_dir: PathBuf,
}

impl LocalBackend {
    /// Create a backend that writes launch logs into `logs_dir`.
    pub fn new(settings: LaunchSettings, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            logs_dir: logs_dir.into(),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    fn log_path(&self, server_dir: &Path) -> PathBuf {
        let stem: String = server_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "server".to_string())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        self.logs_dir.join(format!("{}-{}.log", stem, stamp))
    }

    /// Spawn `java <jvm args> -jar <artifact> nogui` in `path`.
    ///
    /// Blocking; a detached thread waits on the child so a server that exits
    /// on its own does not linger as a zombie.
    fn spawn_server(&self, path: &Path, artifact: &str) -> Result<u32, BackendError> {
        if !path.join(artifact).is_file() {
            return Err(BackendError::Launch(format!(
                "Core file not found: {}",
                artifact
            )));
        }

        fs::create_dir_all(&self.logs_dir).map_err(|e| {
            BackendError::io(
                format!("Failed to create {}", self.logs_dir.display()),
                e,
            )
        })?;
        let log_path = self.log_path(path);
        let log = File::create(&log_path)
            .map_err(|e| BackendError::io(format!("Failed to create {}", log_path.display()), e))?;
        let log_err = log
            .try_clone()
            .map_err(|e| BackendError::io("Failed to clone log handle", e))?;

        let mut cmd = Command::new(&self.settings.java_bin);
        cmd.args(&self.settings.jvm_args)
            .arg("-jar")
            .arg(artifact)
            .arg("nogui")
            .current_dir(path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        // Own process group, so a Ctrl-C in our terminal does not reach the server.
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
        }

        let mut child = cmd.spawn().map_err(|e| {
            BackendError::Launch(format!(
                "Failed to start {}: {}",
                self.settings.java_bin, e
            ))
        })?;
        let pid = child.id();
        info!(
            "Launched {} in {} as PID {} (log: {})",
            artifact,
            path.display(),
            pid,
            log_path.display()
        );

        let waiter = std::thread::Builder::new()
            .name(format!("hearth-wait-{}", pid))
            .spawn(move || match child.wait() {
                Ok(status) => debug!("PID {} exited: {}", pid, status),
                Err(e) => debug!("Waiting on PID {} failed: {}", pid, e),
            });
        if let Err(e) = waiter {
            warn!("Could not watch PID {} for exit: {}", pid, e);
        }
        Ok(pid)
    }
}

/// Inspect a server directory.
pub fn scan_dir(path: &Path) -> Result<ScanOutcome, BackendError> {
    if !path.is_dir() {
        return Ok(ScanOutcome::NoConfig);
    }

    let mut artifacts = Vec::new();
    let entries = fs::read_dir(path)
        .map_err(|e| BackendError::io(format!("Failed to read {}", path.display()), e))?;
    for entry in entries.flatten() {
        let p = entry.path();
        if !p.is_file() {
            continue;
        }
        let is_jar = p
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jar"));
        if let (true, Some(name)) = (is_jar, p.file_name().and_then(|n| n.to_str())) {
            artifacts.push(name.to_string());
        }
    }
    if artifacts.is_empty() {
        return Ok(ScanOutcome::NoArtifacts);
    }
    artifacts.sort();

    let settings_path = path.join(LaunchConfigDefaults::SETTINGS_FILENAME);
    if !settings_path.is_file() {
        return Ok(ScanOutcome::NoConfig);
    }
    let content = fs::read_to_string(&settings_path)
        .map_err(|e| BackendError::io(format!("Failed to read {}", settings_path.display()), e))?;
    let parsed: SettingsFile = serde_yaml::from_str(&content).map_err(|e| {
        BackendError::Other(format!(
            "Failed to parse {}: {}",
            settings_path.display(),
            e
        ))
    })?;
    let config = ServerSettings::from(parsed.general);

    debug!("Scanned {}: {:?}", path.display(), artifacts);
    if artifacts.len() == 1 {
        Ok(ScanOutcome::Valid { config, artifacts })
    } else {
        Ok(ScanOutcome::NeedsSelection { config, artifacts })
    }
}

/// Probe the server's lock file.
pub fn probe_dir(path: &Path) -> ProbeStatus {
    let lock_path = LaunchConfigDefaults::LOCK_FILE
        .iter()
        .fold(path.to_path_buf(), |p, part| p.join(part));
    if !lock_path.exists() {
        return ProbeStatus::Unknown;
    }

    let file = match OpenOptions::new().write(true).open(&lock_path) {
        Ok(file) => file,
        Err(e) => {
            debug!("Cannot open {}: {}", lock_path.display(), e);
            return ProbeStatus::Unknown;
        }
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            ProbeStatus::Stopped
        }
        Err(_) => ProbeStatus::Running,
    }
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, BackendError> + Send + 'static,
) -> Result<T, BackendError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackendError::Other(format!("Background task failed: {}", e)))?
}

#[async_trait::async_trait]
impl ServerBackend for LocalBackend {
    async fn scan(&self, path: &Path) -> Result<ScanOutcome, BackendError> {
        let path = path.to_path_buf();
        blocking(move || scan_dir(&path)).await
    }

    async fn probe_status(&self, path: &Path) -> Result<ProbeStatus, BackendError> {
        let path = path.to_path_buf();
        blocking(move || Ok(probe_dir(&path))).await
    }

    async fn launch(&self, path: &Path, artifact: &str) -> Result<u32, BackendError> {
        let backend = self.clone();
        let path = path.to_path_buf();
        let artifact = artifact.to_string();
        blocking(move || backend.spawn_server(&path, &artifact)).await
    }

    async fn stop(&self, pid: u32) -> Result<(), BackendError> {
        let grace_ms = self.settings.stop_grace_ms;
        blocking(move || platform::terminate_process(pid, grace_ms)).await
    }
}
