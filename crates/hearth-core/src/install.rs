//! Installing a server core from a GitHub repository's latest release.
//!
//! The installer looks up the latest release, picks its `Lumi*.jar` asset,
//! streams it into the target directory and writes start scripts next to it.
//! The server generates its own `settings.yml` on first run, so a fresh
//! install is registered after it has been started once.

use crate::config::InstallConfig;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Failure while installing a server core.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Invalid repository '{0}', expected owner/name")]
    InvalidRepo(String),

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} failed: HTTP {status}")]
    Http { url: String, status: u16 },

    #[error("Release {tag} of {repo} has no Lumi*.jar asset")]
    NoCoreAsset { repo: String, tag: String },

    #[error("Download of {url} ended after {received} of {expected} bytes")]
    Incomplete {
        url: String,
        received: u64,
        expected: u64,
    },

    #[error("{path:?} already exists; pass --force to replace it")]
    AlreadyInstalled { path: PathBuf },

    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },
}

impl InstallError {
    fn network(message: impl Into<String>, source: reqwest::Error) -> Self {
        InstallError::Network {
            message: format!("{}: {}", message.into(), source),
            source,
        }
    }

    fn io(message: impl Into<String>, source: io::Error) -> Self {
        InstallError::Io {
            message: format!("{}: {}", message.into(), source),
            source,
        }
    }
}

pub type InstallResult<T> = std::result::Result<T, InstallError>;

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

/// The parts of a GitHub release the installer reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// The server core among a release's assets: the first `Lumi*.jar`.
pub fn pick_core_asset(release: &Release) -> Option<&ReleaseAsset> {
    release.assets.iter().find(|asset| {
        asset.name.starts_with(InstallConfig::CORE_ASSET_PREFIX)
            && asset.name.ends_with(InstallConfig::CORE_ASSET_SUFFIX)
    })
}

/// Check that `repo` has the `owner/name` shape.
pub fn validate_repo(repo: &str) -> InstallResult<()> {
    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    match repo.split_once('/') {
        Some((owner, name)) if valid_part(owner) && valid_part(name) => Ok(()),
        _ => Err(InstallError::InvalidRepo(repo.to_string())),
    }
}

/// Which shell a start script targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Unix,
    Windows,
}

impl ScriptKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ScriptKind::Unix => "start.sh",
            ScriptKind::Windows => "start.cmd",
        }
    }
}

/// Render a start script that runs `core_name` with `memory_gb` of heap.
pub fn start_script(kind: ScriptKind, java_bin: &str, memory_gb: u32, core_name: &str) -> String {
    let command = format!(
        "{} -Xmx{m}G -Xms{m}G -jar {} nogui",
        java_bin,
        core_name,
        m = memory_gb
    );
    match kind {
        ScriptKind::Unix => format!("#!/bin/sh\ncd \"$(dirname \"$0\")\"\nexec {}\n", command),
        ScriptKind::Windows => format!("@echo off\r\ncd /d \"%~dp0\"\r\n{}\r\npause\r\n", command),
    }
}

/// What to install and how.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// GitHub repository in `owner/name` form.
    pub repo: String,
    /// File name the core is saved under.
    pub core_name: String,
    /// Heap size written into the start scripts.
    pub memory_gb: u32,
    /// Java executable written into the start scripts.
    pub java_bin: String,
    /// Replace an existing core and start scripts.
    pub force: bool,
}

/// Outcome of a successful install.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallReport {
    pub dir: PathBuf,
    pub release_tag: String,
    pub asset_name: String,
    pub core_path: PathBuf,
    pub bytes: u64,
    /// Start scripts written by this install. Existing ones are kept unless forced.
    pub scripts: Vec<PathBuf>,
}

/// Downloads server cores from GitHub releases.
#[derive(Debug, Clone)]
pub struct Installer {
    client: Client,
    api_base: String,
}

impl Installer {
    /// Installer talking to the public GitHub API.
    pub fn new() -> InstallResult<Self> {
        Self::with_api_base(InstallConfig::GITHUB_API_BASE)
    }

    /// Installer talking to another GitHub-compatible API root.
    pub fn with_api_base(api_base: impl Into<String>) -> InstallResult<Self> {
        let client = Client::builder()
            .connect_timeout(InstallConfig::CONNECT_TIMEOUT)
            .user_agent(InstallConfig::USER_AGENT)
            .build()
            .map_err(|e| InstallError::network("Failed to create HTTP client", e))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the latest release of `repo`.
    pub async fn latest_release(&self, repo: &str) -> InstallResult<Release> {
        validate_repo(repo)?;
        let url = format!("{}/repos/{}/releases/latest", self.api_base, repo);
        debug!("Fetching {}", url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .timeout(InstallConfig::API_TIMEOUT)
            .send()
            .await
            .map_err(|e| InstallError::network(format!("GET {} failed", url), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InstallError::Http {
                url,
                status: status.as_u16(),
            });
        }
        response
            .json::<Release>()
            .await
            .map_err(|e| InstallError::network(format!("Invalid release data from {}", url), e))
    }

    /// Stream `url` into `dest`, reporting `(received, total)` as chunks arrive.
    ///
    /// The body goes to `<dest>.part` first and is renamed into place only
    /// once it is complete.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        mut progress: impl FnMut(u64, Option<u64>),
    ) -> InstallResult<u64> {
        let part_path = part_path(dest);
        let result = self.download_to(url, &part_path, &mut progress).await;

        let received = match result {
            Ok(received) => received,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part_path).await {
                    if rm.kind() != io::ErrorKind::NotFound {
                        warn!("Failed to remove {}: {}", part_path.display(), rm);
                    }
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&part_path, dest).await.map_err(|e| {
            InstallError::io(format!("Failed to move download to {}", dest.display()), e)
        })?;
        Ok(received)
    }

    async fn download_to(
        &self,
        url: &str,
        part_path: &Path,
        progress: &mut impl FnMut(u64, Option<u64>),
    ) -> InstallResult<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InstallError::network(format!("Download of {} failed", url), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InstallError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(part_path).await.map_err(|e| {
            InstallError::io(format!("Failed to create {}", part_path.display()), e)
        })?;

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| InstallError::network(format!("Download of {} broke off", url), e))?;
            file.write_all(&chunk).await.map_err(|e| {
                InstallError::io(format!("Failed to write {}", part_path.display()), e)
            })?;
            received += chunk.len() as u64;
            progress(received, total);
        }
        file.flush().await.map_err(|e| {
            InstallError::io(format!("Failed to write {}", part_path.display()), e)
        })?;

        if let Some(expected) = total {
            if received != expected {
                return Err(InstallError::Incomplete {
                    url: url.to_string(),
                    received,
                    expected,
                });
            }
        }
        Ok(received)
    }

    /// Download the latest core into `dir` and write start scripts.
    pub async fn install(
        &self,
        dir: &Path,
        options: &InstallOptions,
        progress: impl FnMut(u64, Option<u64>),
    ) -> InstallResult<InstallReport> {
        validate_repo(&options.repo)?;
        let core_path = dir.join(&options.core_name);
        if core_path.exists() && !options.force {
            return Err(InstallError::AlreadyInstalled { path: core_path });
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| InstallError::io(format!("Failed to create {}", dir.display()), e))?;

        let release = self.latest_release(&options.repo).await?;
        let asset = pick_core_asset(&release).ok_or_else(|| InstallError::NoCoreAsset {
            repo: options.repo.clone(),
            tag: release.tag_name.clone(),
        })?;
        info!(
            "Installing {} from {} {} into {}",
            asset.name,
            options.repo,
            release.tag_name,
            dir.display()
        );

        let bytes = self
            .download(&asset.download_url, &core_path, progress)
            .await?;
        let scripts = write_start_scripts(dir, options).await?;

        info!("Installed {} ({} bytes)", core_path.display(), bytes);
        Ok(InstallReport {
            dir: dir.to_path_buf(),
            release_tag: release.tag_name.clone(),
            asset_name: asset.name.clone(),
            core_path,
            bytes,
            scripts,
        })
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

async fn write_start_scripts(dir: &Path, options: &InstallOptions) -> InstallResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    for kind in [ScriptKind::Unix, ScriptKind::Windows] {
        let path = dir.join(kind.file_name());
        if path.exists() && !options.force {
            debug!("Keeping existing {}", path.display());
            continue;
        }
        let body = start_script(kind, &options.java_bin, options.memory_gb, &options.core_name);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| InstallError::io(format!("Failed to write {}", path.display()), e))?;

        #[cfg(unix)]
        if kind == ScriptKind::Unix {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| {
                    InstallError::io(format!("Failed to mark {} executable", path.display()), e)
                })?;
        }
        written.push(path);
    }
    Ok(written)
}
