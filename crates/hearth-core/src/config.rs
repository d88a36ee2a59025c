//! Centralized configuration for Hearth.
//!
//! Constants live in the `*Config` structs below. Tunables that a user may
//! override are collected in [`ControllerConfig`], which can be loaded from
//! `hearth.json` in the data directory.

use crate::error::Result;
use crate::persist::atomic_read_json;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "Hearth";
    pub const DATA_DIR_NAME: &'static str = "hearth";
    pub const DEFAULT_ENTRY_NAME: &'static str = "New server";
}

/// Reconciliation loop timing.
pub struct ReconcileConfig;

impl ReconcileConfig {
    pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
    /// How long a start may stay unconfirmed before its loading flag is dropped.
    pub const START_GRACE: Duration = Duration::from_secs(60);
}

/// File and directory names under the data directory.
pub struct PathsConfig;

impl PathsConfig {
    pub const REGISTRY_FILENAME: &'static str = "servers.json";
    pub const PIDS_FILENAME: &'static str = "running.json";
    pub const CONFIG_FILENAME: &'static str = "hearth.json";
    pub const LOGS_DIR_NAME: &'static str = "logs";
}

/// Defaults for the local Java launcher.
pub struct LaunchConfigDefaults;

impl LaunchConfigDefaults {
    pub const JAVA_BIN: &'static str = "java";
    pub const JVM_ARGS: [&'static str; 2] = ["-Xmx2G", "-Xms2G"];
    pub const DEFAULT_ARTIFACT: &'static str = "core.jar";
    pub const SETTINGS_FILENAME: &'static str = "settings.yml";
    pub const LOCK_FILE: [&'static str; 2] = ["players", "LOCK"];
    pub const STOP_GRACE: Duration = Duration::from_secs(2);
    pub const REQUIRED_JAVA_MAJOR: u32 = 21;
}

/// Server installer defaults.
pub struct InstallConfig;

impl InstallConfig {
    pub const GITHUB_API_BASE: &'static str = "https://api.github.com";
    pub const USER_AGENT: &'static str = "Hearth/0.1";
    pub const API_TIMEOUT: Duration = Duration::from_secs(10);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CORE_ASSET_PREFIX: &'static str = "Lumi";
    pub const CORE_ASSET_SUFFIX: &'static str = ".jar";
    pub const MEMORY_GB: u32 = 4;
}

/// Runtime tunables for the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Interval between timer-driven reconciliation ticks, in milliseconds.
    pub poll_interval_ms: u64,
    /// Per-call timeout for backend calls made during a tick. `None` waits forever.
    pub collaborator_timeout_ms: Option<u64>,
    /// Grace period before an unconfirmed start is abandoned, in milliseconds.
    pub start_grace_ms: u64,
    /// Local launcher settings.
    pub launch: LaunchSettings,
    /// Installer settings.
    pub install: InstallSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: ReconcileConfig::POLL_INTERVAL.as_millis() as u64,
            collaborator_timeout_ms: None,
            start_grace_ms: ReconcileConfig::START_GRACE.as_millis() as u64,
            launch: LaunchSettings::default(),
            install: InstallSettings::default(),
        }
    }
}

impl ControllerConfig {
    /// Load `hearth.json` from `data_dir`, falling back to defaults when absent.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(PathsConfig::CONFIG_FILENAME);
        Ok(atomic_read_json(&path)?.unwrap_or_default())
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero period would panic in tokio::time::interval.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn collaborator_timeout(&self) -> Option<Duration> {
        self.collaborator_timeout_ms.map(Duration::from_millis)
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }
}

/// How the local backend starts and stops Java servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    pub java_bin: String,
    pub jvm_args: Vec<String>,
    pub stop_grace_ms: u64,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            java_bin: LaunchConfigDefaults::JAVA_BIN.to_string(),
            jvm_args: LaunchConfigDefaults::JVM_ARGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            stop_grace_ms: LaunchConfigDefaults::STOP_GRACE.as_millis() as u64,
        }
    }
}

/// Where `hearth install` fetches server cores from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallSettings {
    /// GitHub repository (`owner/name`) whose latest release holds the core.
    pub repo: Option<String>,
    pub api_base: String,
    pub memory_gb: u32,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            repo: None,
            api_base: InstallConfig::GITHUB_API_BASE.to_string(),
            memory_gb: InstallConfig::MEMORY_GB,
        }
    }
}

/// Default data directory (`<platform data dir>/hearth`).
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(AppConfig::DATA_DIR_NAME))
}
