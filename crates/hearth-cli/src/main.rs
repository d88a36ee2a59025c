//! Hearth - command-line front end for managing local game servers.
//!
//! Every invocation opens the controller state in the data directory, runs
//! one command against it, and exits. `watch` keeps the reconciliation loop
//! running until Ctrl-C.

mod commands;
mod render;
mod resolve;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hearth_core::config::PathsConfig;
use hearth_core::{default_data_dir, Controller, ControllerConfig, LocalBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "hearth")]
#[command(about = "Register, start and stop local game servers")]
struct Args {
    /// Directory holding servers.json, running.json and launch logs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Override the reconciliation interval used by `watch`
    #[arg(long, global = true)]
    poll_interval_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show every registered server and its status
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Register a server directory
    Add {
        path: PathBuf,
        /// Display name (defaults to the directory name)
        #[arg(long, default_value = "")]
        name: String,
        /// Artifact to use when the directory holds several
        #[arg(long)]
        artifact: Option<String>,
    },
    /// Unregister a server. A running process is left alone.
    Remove { id: String },
    /// Start a stopped server, or stop one this tool started
    Toggle {
        id: String,
        /// Do not ask before stopping
        #[arg(short, long)]
        yes: bool,
    },
    /// Start a server
    Start { id: String },
    /// Stop a server this tool started
    Stop {
        id: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Choose which artifact a server launches
    SetArtifact {
        id: String,
        /// Artifact file name; prompts with the candidates when omitted
        artifact: Option<String>,
    },
    /// Keep reconciling and print every change until Ctrl-C
    Watch {
        #[arg(long)]
        json: bool,
    },
    /// Check the Java installation
    Doctor,
    /// Download the latest server core from GitHub into a directory
    Install {
        dir: PathBuf,
        /// GitHub repository (owner/name); defaults to `install.repo` in hearth.json
        #[arg(long)]
        repo: Option<String>,
        /// Heap size in GB written into the start scripts
        #[arg(long)]
        memory_gb: Option<u32>,
        /// File name to save the core under
        #[arg(long, default_value = "core.jar")]
        core_name: String,
        /// Replace an existing core and start scripts
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => default_data_dir().context("Could not determine a data directory; pass --data-dir")?,
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;
    debug!("Data directory: {}", data_dir.display());

    let mut config = ControllerConfig::load(&data_dir)?;
    if let Some(secs) = args.poll_interval_secs {
        config.poll_interval_ms = secs.saturating_mul(1000);
    }

    match args.command {
        Command::Doctor => return commands::doctor(&config),
        Command::Install {
            dir,
            repo,
            memory_gb,
            core_name,
            force,
        } => {
            let request = commands::InstallRequest {
                dir,
                repo,
                memory_gb,
                core_name,
                force,
            };
            return commands::install(&config, request).await;
        }
        _ => {}
    }

    let backend = LocalBackend::new(config.launch.clone(), data_dir.join(PathsConfig::LOGS_DIR_NAME));
    let controller = Arc::new(Controller::open(&data_dir, Arc::new(backend), config)?);

    match args.command {
        Command::List { json } => commands::list(&controller, json).await,
        Command::Add {
            path,
            name,
            artifact,
        } => commands::add(&controller, &path, &name, artifact.as_deref()).await,
        Command::Remove { id } => commands::remove(&controller, &id).await,
        Command::Toggle { id, yes } => commands::toggle(&controller, &id, yes).await,
        Command::Start { id } => commands::start(&controller, &id).await,
        Command::Stop { id, yes } => commands::stop(&controller, &id, yes).await,
        Command::SetArtifact { id, artifact } => {
            commands::set_artifact(&controller, &id, artifact.as_deref()).await
        }
        Command::Watch { json } => commands::watch(&controller, json).await,
        Command::Doctor => commands::doctor(controller.config()),
        Command::Install { .. } => unreachable!("handled before the controller is opened"),
    }
}
