//! Subcommand implementations.

use crate::render;
use crate::resolve::resolve_id;
use anyhow::{bail, Context, Result};
use hearth_core::config::LaunchConfigDefaults;
use hearth_core::{
    check_java, AddOutcome, Controller, ControllerConfig, EntryId, EntryStatus, IgnoreReason,
    InstallOptions, Installer, Ownership, ToggleOutcome,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Ask a question on the terminal and return the answer line.
async fn prompt(question: String) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{}", question)?;
        stdout.flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        Ok(answer)
    })
    .await
    .context("Prompt task failed")?
}

async fn confirm(question: String) -> Result<bool> {
    let answer = prompt(format!("{} [y/N] ", question)).await?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn lookup(controller: &Controller, query: &str) -> Result<EntryId> {
    resolve_id(&controller.registry().list()?, query)
}

pub async fn list(controller: &Controller, json: bool) -> Result<()> {
    controller.reconcile().await?;
    let states = controller.entries();
    if json {
        println!("{}", serde_json::to_string_pretty(&states)?);
    } else {
        print!("{}", render::entries_table(&states));
    }
    Ok(())
}

pub async fn add(
    controller: &Controller,
    path: &Path,
    name: &str,
    artifact: Option<&str>,
) -> Result<()> {
    let path = std::path::absolute(path)
        .with_context(|| format!("Invalid path {}", path.display()))?;

    let pending = match controller.begin_add(&path, name).await? {
        AddOutcome::Added(entry) => {
            if let Some(wanted) = artifact.filter(|a| *a != entry.artifact_name) {
                println!(
                    "Note: {} only contains {}; ignoring --artifact {}",
                    entry.path.display(),
                    entry.artifact_name,
                    wanted
                );
            }
            println!("Added {} ({}) using {}", entry.name, entry.id, entry.artifact_name);
            return Ok(());
        }
        AddOutcome::NeedsSelection(pending) => pending,
    };

    let chosen = match artifact {
        Some(artifact) => Some(artifact.to_string()),
        None => {
            let answer = prompt(format!(
                "{}Number or file name (empty to cancel): ",
                render::candidates(&pending)
            ))
            .await?;
            render::pick(&pending.candidate_artifacts, &answer).map(str::to_string)
        }
    };

    let Some(chosen) = chosen else {
        controller.cancel_selection();
        println!("Cancelled; nothing was added.");
        return Ok(());
    };

    match controller.select_artifact(&chosen).await {
        Ok(entry) => {
            println!("Added {} ({}) using {}", entry.name, entry.id, entry.artifact_name);
            Ok(())
        }
        Err(e) => {
            controller.cancel_selection();
            Err(e.into())
        }
    }
}

pub async fn remove(controller: &Controller, query: &str) -> Result<()> {
    let id = lookup(controller, query)?;
    let removed = controller.delete(&id).await?;
    println!("Removed {} ({})", removed.name, removed.id);
    Ok(())
}

async fn confirm_and_stop(controller: &Controller, id: &EntryId, pid: u32, yes: bool) -> Result<()> {
    let name = controller
        .entry_state(id)
        .map(|s| s.view.name)
        .unwrap_or_else(|| id.to_string());
    if !yes && !confirm(format!("Stop {} (PID {})?", name, pid)).await? {
        println!("Left {} running.", name);
        return Ok(());
    }
    controller.stop(id).await?;
    println!("Stopped {}.", name);
    Ok(())
}

pub async fn toggle(controller: &Controller, query: &str, yes: bool) -> Result<()> {
    let id = lookup(controller, query)?;
    controller.reconcile().await?;

    match controller.toggle(&id).await? {
        ToggleOutcome::Started { pid } => {
            println!("Starting {} (PID {}).", id, pid);
            Ok(())
        }
        ToggleOutcome::ConfirmStop { pid } => confirm_and_stop(controller, &id, pid, yes).await,
        ToggleOutcome::Ignored { reason } => {
            let why = match reason {
                IgnoreReason::Loading => "a start or stop is already in progress",
                IgnoreReason::Error => "the server is misconfigured; see `hearth list`",
                IgnoreReason::External => "it was started outside hearth and is left alone",
                IgnoreReason::Unconfirmed => {
                    "a process hearth started is still recorded but its state is unknown"
                }
            };
            println!("Nothing to do: {}.", why);
            Ok(())
        }
    }
}

pub async fn start(controller: &Controller, query: &str) -> Result<()> {
    let id = lookup(controller, query)?;
    controller.reconcile().await?;

    if let Some(state) = controller.entry_state(&id) {
        match state.view.status {
            EntryStatus::Running => bail!("{} is already running", state.view.name),
            EntryStatus::Error => {
                let reason = state
                    .view
                    .error_message
                    .map(|e| e.message)
                    .unwrap_or_default();
                bail!("{} cannot start: {}", state.view.name, reason)
            }
            EntryStatus::Stopped | EntryStatus::Unknown => {}
        }
    }

    let pid = controller.start(&id).await?;
    info!("Launch of {} returned PID {}", id, pid);
    println!("Starting {} (PID {}).", id, pid);
    Ok(())
}

pub async fn stop(controller: &Controller, query: &str, yes: bool) -> Result<()> {
    let id = lookup(controller, query)?;
    controller.reconcile().await?;

    match controller.entry_state(&id).map(|s| s.ownership) {
        Some(Ownership::Managed { pid }) => confirm_and_stop(controller, &id, pid, yes).await,
        Some(Ownership::External) => bail!("{} was started outside hearth; not stopping it", id),
        _ => bail!("{} is not running", id),
    }
}

pub async fn set_artifact(controller: &Controller, query: &str, artifact: Option<&str>) -> Result<()> {
    let id = lookup(controller, query)?;

    let chosen = match artifact {
        Some(artifact) => artifact.to_string(),
        None => {
            let candidates = controller.reselect(&id).await?;
            let mut question = String::from("Available jars:\n");
            for (i, c) in candidates.iter().enumerate() {
                question.push_str(&format!("  {}) {}\n", i + 1, c));
            }
            question.push_str("Number or file name (empty to cancel): ");
            let answer = prompt(question).await?;
            match render::pick(&candidates, &answer) {
                Some(chosen) => chosen.to_string(),
                None => {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
        }
    };

    let entry = controller.change_artifact(&id, &chosen).await?;
    println!("{} now launches {}", entry.name, entry.artifact_name);
    Ok(())
}

pub async fn watch(controller: &Arc<Controller>, json: bool) -> Result<()> {
    let mut rx = controller.subscribe();
    let handle = controller.spawn_reconciler();
    println!(
        "Watching every {:?}; press Ctrl-C to stop.",
        controller.config().poll_interval()
    );

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                rx.borrow_and_update();
                let states = controller.entries();
                if json {
                    println!("{}", serde_json::to_string(&states)?);
                } else {
                    print!("{}", render::entries_table(&states));
                    println!();
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received");
                break;
            }
        }
    }

    handle.stop().await;
    Ok(())
}

pub fn doctor(config: &ControllerConfig) -> Result<()> {
    let required = LaunchConfigDefaults::REQUIRED_JAVA_MAJOR;
    let result = check_java(&config.launch.java_bin, required);

    match (&result.version, result.compatible) {
        (Some(version), true) => println!("Java {} found ({}): OK", version, config.launch.java_bin),
        (Some(version), false) => println!(
            "Java {} found ({}), but version {} or newer is required",
            version, config.launch.java_bin, required
        ),
        (None, _) => println!(
            "Java not found: `{} -version` did not report a version. Install Java {} or newer.",
            config.launch.java_bin, required
        ),
    }

    if !result.compatible {
        bail!("Java check failed");
    }
    Ok(())
}

/// Arguments of `hearth install`.
pub struct InstallRequest {
    pub dir: PathBuf,
    pub repo: Option<String>,
    pub memory_gb: Option<u32>,
    pub core_name: String,
    pub force: bool,
}

pub async fn install(config: &ControllerConfig, request: InstallRequest) -> Result<()> {
    let Some(repo) = request.repo.or_else(|| config.install.repo.clone()) else {
        bail!("No repository to install from; pass --repo owner/name or set install.repo in hearth.json");
    };
    let dir = std::path::absolute(&request.dir)
        .with_context(|| format!("Invalid path {}", request.dir.display()))?;
    let options = InstallOptions {
        repo,
        core_name: request.core_name,
        memory_gb: request.memory_gb.unwrap_or(config.install.memory_gb),
        java_bin: config.launch.java_bin.clone(),
        force: request.force,
    };

    let installer = Installer::with_api_base(config.install.api_base.clone())?;
    let mut last_percent = None;
    let report = installer
        .install(&dir, &options, |received, total| {
            let Some(total) = total.filter(|t| *t > 0) else {
                return;
            };
            let percent = received * 100 / total;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                eprint!("\rDownloading... {:>3}%", percent);
            }
        })
        .await?;
    if last_percent.is_some() {
        eprintln!();
    }

    println!(
        "Installed {} {} as {} ({} bytes)",
        report.asset_name,
        report.release_tag,
        report.core_path.display(),
        report.bytes
    );
    for script in &report.scripts {
        println!("Wrote {}", script.display());
    }
    println!(
        "Start the server once to generate {}, then run `hearth add {}`.",
        LaunchConfigDefaults::SETTINGS_FILENAME,
        dir.display()
    );
    Ok(())
}
