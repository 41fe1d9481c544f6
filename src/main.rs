//! hdlsync
//!
//! Keeps a directory of PSHDL sources in sync with a remote compiler
//! workspace.
//!
//! # Commands
//!
//! - `sync` - resume the workspace named by the marker file (or create one) and watch
//! - `open` - bind a directory to an existing workspace, download it and watch
//! - `new` - create a workspace and watch
//! - `stream` - follow compiler events and download selected output
//! - `fetch-sim` - download generated simulation code for a module
//! - `info` - print the files, modules and problems of a workspace

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use hdlsync::api::{ApiClient, SimCodeType, Workspace};
use hdlsync::config::{Config, DeletePolicy};
use hdlsync::sync::{SyncEngine, SyncState, WorkspaceMarker};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Sync a local directory with a PSHDL compiler workspace.
#[derive(Parser)]
#[command(name = "hdlsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the PSHDL REST API
    #[arg(global = true, long, env = "HDLSYNC_API_URL")]
    api_url: Option<String>,

    /// Configuration file (default: ~/.config/hdlsync/config.toml)
    #[arg(global = true, long)]
    config: Option<PathBuf>,

    /// More output (-v debug, -vv trace)
    #[arg(global = true, short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only print warnings and errors
    #[arg(global = true, short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Delete remote files when their local copy is removed
    #[arg(global = true, long)]
    propagate_deletes: bool,

    /// Skip validation after each upload
    #[arg(global = true, long)]
    no_validate: bool,

    #[command(flatten)]
    artifacts: ArtifactArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ArtifactArgs {
    /// Download generated VHDL
    #[arg(global = true, long)]
    vhdl: bool,

    /// Download generated C simulation code
    #[arg(global = true, long)]
    csim: bool,

    /// Download any other compiler output
    #[arg(global = true, long)]
    other: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resume the workspace in DIR (or create one), download it and watch
    Sync {
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Workspace id, overriding the marker file
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Download an existing workspace into DIR and watch it
    Open {
        id: String,

        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Create a new workspace for DIR and watch it
    New {
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Display name for the workspace
        #[arg(long)]
        name: Option<String>,

        /// Contact address for the workspace
        #[arg(long)]
        email: Option<String>,
    },

    /// Follow compiler events for the workspace in DIR
    Stream {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Download generated simulation code for a module
    FetchSim {
        /// Fully qualified module name
        #[arg(short, long)]
        module: String,

        /// Target language (c, go)
        #[arg(short, long, default_value = "c")]
        lang: SimCodeType,

        /// Drop the generated directory structure
        #[arg(long)]
        base: bool,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Workspace id (default: the marker in the current directory)
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Show files, modules and problems of a workspace
    Info {
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Workspace id, overriding the marker file
        #[arg(short, long)]
        workspace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hdlsync={},warn", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    if let Some(url) = &cli.api_url {
        config.api.base_url = url.clone();
    }
    if cli.propagate_deletes {
        config.sync.delete_policy = DeletePolicy::Propagate;
    }
    if cli.no_validate {
        config.sync.validate_after_upload = false;
    }
    config.artifacts.vhdl |= cli.artifacts.vhdl;
    config.artifacts.csim |= cli.artifacts.csim;
    config.artifacts.other |= cli.artifacts.other;

    Ok(config)
}

/// Cancelled on the first Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    token
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;
    let show_progress = !cli.quiet && std::io::stderr().is_terminal();

    if let Commands::New { name, email, .. } = &cli.command {
        if let Some(name) = name {
            config.api.name = name.clone();
        }
        if let Some(email) = email {
            config.api.email = email.clone();
        }
    }

    let api = Arc::new(ApiClient::from_config(&config.api).context("setting up API client")?);
    let engine_for = |dir: &Path| -> Result<SyncEngine<ApiClient>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating directory {}", dir.display()))?;
        Ok(SyncEngine::new(Arc::clone(&api), dir, config.clone()).with_progress(show_progress))
    };

    match cli.command {
        Commands::Sync { dir, workspace } => {
            let mut engine = engine_for(&dir)?;
            let id = engine.resume_or_create(workspace.as_deref()).await?;
            if matches!(engine.state(), SyncState::Opened { .. }) {
                engine.initial_sync().await?;
            }
            println!("Workspace {} bound to {}", id.cyan(), dir.display());
            engine.watch_all(shutdown_on_ctrl_c()).await?;
        }
        Commands::Open { id, dir } => {
            let mut engine = engine_for(&dir)?;
            engine
                .open(&id)
                .await
                .with_context(|| format!("opening workspace {}", id))?;
            engine.initial_sync().await?;
            println!("All files downloaded, watching {}", dir.display());
            engine.watch_all(shutdown_on_ctrl_c()).await?;
        }
        Commands::New { dir, .. } => {
            let mut engine = engine_for(&dir)?;
            let id = engine.create().await.context("creating workspace")?;
            println!("Workspace {} created", id.cyan());
            engine.watch_all(shutdown_on_ctrl_c()).await?;
        }
        Commands::Stream { dir } => {
            let id = marker_id(&dir, &config, None)?;
            if config.artifacts.is_empty() {
                warn!("no output selected (--vhdl, --csim, --other); events will only be logged");
            }
            let mut engine = engine_for(&dir)?;
            engine.open(&id).await?;
            engine.stream_events(shutdown_on_ctrl_c()).await?;
        }
        Commands::FetchSim {
            module,
            lang,
            base,
            dir,
            workspace,
        } => {
            let id = marker_id(Path::new("."), &config, workspace)?;
            let mut engine = engine_for(Path::new("."))?;
            engine.attach(&id).await?;
            let report = engine
                .fetch_sim_code(lang, &module, &dir, base)
                .await
                .with_context(|| format!("fetching {} simulation code for {}", lang.as_str(), module))?;
            info!("{} files ({} bytes) written to {}", report.files, report.bytes, dir.display());
        }
        Commands::Info { dir, workspace } => {
            let id = marker_id(&dir, &config, workspace)?;
            let mut engine = engine_for(&dir)?;
            engine.attach(&id).await?;
            print_workspace(engine.workspace());
        }
    }

    Ok(())
}

/// Workspace id from `explicit`, or from the marker in `dir`.
fn marker_id(dir: &Path, config: &Config, explicit: Option<String>) -> Result<String> {
    if let Some(id) = explicit {
        return Ok(id);
    }
    let marker = WorkspaceMarker::new(dir, &config.sync.marker);
    match marker.read()? {
        Some(id) => Ok(id),
        None => bail!(
            "no workspace marker at {}; run `hdlsync new` or `hdlsync open` first",
            marker.path().display()
        ),
    }
}

fn format_millis(millis: i64) -> String {
    if millis <= 0 {
        return "never".to_string();
    }
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_workspace(workspace: &Workspace) {
    println!("{} {}", "Workspace".bold(), workspace.id.cyan());
    println!(
        "  validated: {}  last validation: {}",
        workspace.validated,
        format_millis(workspace.last_validation)
    );

    for file in &workspace.files {
        println!();
        println!(
            "{}  {}",
            file.record.rel_path.bold(),
            format_millis(file.record.last_modified).dimmed()
        );
        for module in &file.module_infos {
            print!("{}", module);
        }
        for problem in &file.info.problems {
            let line = format!("  {}", problem);
            match problem.severity.as_str() {
                "ERROR" => println!("{}", line.red()),
                "WARNING" => println!("{}", line.yellow()),
                _ => println!("{}", line),
            }
        }
    }

    let problems = workspace.problem_count();
    if problems > 0 {
        println!();
        println!("{} problems", problems.to_string().yellow());
    }
}
