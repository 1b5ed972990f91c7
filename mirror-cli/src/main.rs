use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use tree_mirror::{MirrorEngine, RunStatus, SyncPlan, SyncReport};

mod config;
mod logging;

use config::{MirrorConfig, Overrides};

#[derive(Parser)]
#[command(name = "tree-mirror")]
#[command(about = "Mirror a remote cloud storage tree into a document store")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct TargetArgs {
    /// rclone remote name
    #[arg(long)]
    profile: Option<String>,

    /// Path inside the remote to mirror
    #[arg(long)]
    root: Option<String>,

    /// Document store base URL
    #[arg(long)]
    store_url: Option<String>,

    /// Destination folder id the remote root is mirrored into
    #[arg(long)]
    root_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the remote tree into the destination
    Run {
        #[command(flatten)]
        target: TargetArgs,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what a run would create and transfer without writing anything
    Plan {
        #[command(flatten)]
        target: TargetArgs,
        /// Print the full plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the remote tree
    List {
        #[command(flatten)]
        target: TargetArgs,
        /// Only list folders
        #[arg(long)]
        dirs_only: bool,
        #[arg(long)]
        json: bool,
    },
    /// Check that the document store is reachable
    Health {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// Validate the configuration file
    Validate,
    /// Show the effective configuration
    Show,
    /// Write a configuration file with default values
    Generate {
        /// Output file (prints to stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl TargetArgs {
    fn overrides(&self, log_level: Option<&String>) -> Overrides {
        Overrides {
            profile: self.profile.clone(),
            root_path: self.root.clone(),
            store_url: self.store_url.clone(),
            root_parent_id: self.root_id.clone(),
            log_level: log_level.cloned(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let log_level = cli.log_level.as_ref();

    match &cli.command {
        Commands::Run { target, json } => {
            let (config, _guard) = prepare(config_path, target, log_level).await?;
            run_mirror(&config, *json).await
        }
        Commands::Plan { target, json } => {
            let (config, _guard) = prepare(config_path, target, log_level).await?;
            plan_mirror(&config, *json).await
        }
        Commands::List { target, dirs_only, json } => {
            let (config, _guard) = prepare(config_path, target, log_level).await?;
            list_remote(&config, *dirs_only, *json).await
        }
        Commands::Health { target } => {
            let (config, _guard) = prepare(config_path, target, log_level).await?;
            check_health(&config).await
        }
        Commands::Config { action } => match action {
            ConfigActions::Validate => validate_config(config_path).await,
            ConfigActions::Show => show_config(config_path).await,
            ConfigActions::Generate { output } => generate_config(output.as_ref()).await,
        },
    }
}

/// Resolve the effective configuration and start logging
async fn prepare(
    config_path: Option<&Path>,
    target: &TargetArgs,
    log_level: Option<&String>,
) -> Result<(MirrorConfig, Option<WorkerGuard>)> {
    let mut config = MirrorConfig::resolve(config_path).await?;
    config.apply_overrides(&target.overrides(log_level));
    config.validate()?;

    let guard = logging::init_logging(&config.logging)?;
    Ok((config, guard))
}

fn build_engine(config: &MirrorConfig) -> Result<MirrorEngine> {
    let source = Arc::new(config.build_source());
    let store = Arc::new(config.build_store()?);
    Ok(MirrorEngine::new(source, store, config.to_engine_options())?)
}

async fn run_mirror(config: &MirrorConfig, json: bool) -> Result<()> {
    let ctx = config.remote_context()?;
    let root_parent_id = config.root_parent_id()?;
    let engine = build_engine(config)?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight transfers");
            signal_token.cancel();
        }
    });

    let report = engine.run(&ctx, root_parent_id, &cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.success {
        anyhow::bail!("{}", report.message);
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    let status = match report.status {
        RunStatus::NothingToSync => "nothing to sync",
        RunStatus::Completed => "completed",
        RunStatus::CompletedWithFailures => "completed with failures",
        RunStatus::Aborted => "aborted",
        RunStatus::Cancelled => "cancelled",
    };

    println!("Status: {}", status);
    println!("{}", report.message);
    println!("Folders created: {}", report.folders_created);
    println!("Files processed: {}", report.files_processed);
    println!("Files failed: {}", report.files_failed);

    if let Some(transfer) = &report.transfer {
        if transfer.cancelled_count > 0 {
            println!("Files cancelled: {}", transfer.cancelled_count);
        }
        println!("Bytes transferred: {}", transfer.bytes_transferred);
        for failure in &transfer.last_errors {
            println!("  ✗ {}: {}", failure.path, failure.cause);
        }
    }

    for failure in &report.folder_failures {
        println!("  ✗ {}/: {}", failure.path, failure.cause);
    }

    println!("{}", report.metrics.summary());
}

async fn plan_mirror(config: &MirrorConfig, json: bool) -> Result<()> {
    let ctx = config.remote_context()?;
    let root_parent_id = config.root_parent_id()?;
    let engine = build_engine(config)?;

    let plan = engine.preview(&ctx, root_parent_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn print_plan(plan: &SyncPlan) {
    let summary = plan.summary();
    println!("Remote: {}", plan.diagnostics.remote_root);
    println!(
        "Folders to create: {} ({} already mirrored)",
        summary.folders_to_create, summary.folders_matched
    );
    println!(
        "Files to sync: {} ({} bytes, {} root files already mirrored)",
        summary.files_to_sync, summary.bytes_to_transfer, summary.root_files_matched
    );

    for folder in &plan.folders_to_create {
        println!("  + {}/", folder);
    }
    for file in &plan.files_to_sync {
        println!("  + {} ({} bytes)", file.path, file.size);
    }

    for candidate in &plan.diagnostics.renamed_candidates {
        println!(
            "  ? '{}' may be a renamed copy of '{}'",
            candidate.destination_name, candidate.remote_name
        );
    }
}

async fn list_remote(config: &MirrorConfig, dirs_only: bool, json: bool) -> Result<()> {
    let ctx = config.remote_context()?;
    let engine = build_engine(config)?;

    let entries = engine.list(&ctx, dirs_only).await?;
    info!(remote = %ctx.remote_target(), entries = entries.len(), "Listed remote");

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            if entry.is_dir {
                println!("{}/", entry.path);
            } else {
                println!("{:>12}  {}", entry.size, entry.path);
            }
        }
    }
    Ok(())
}

async fn check_health(config: &MirrorConfig) -> Result<()> {
    let client = config.build_store()?;
    info!("Checking document store health at {}", client.base_url());

    match client.health_check().await {
        Ok(health) => {
            println!("✓ Document store is healthy: {}", health.message);
            Ok(())
        }
        Err(e) => {
            println!("✗ Document store health check failed: {}", e);
            Err(e.into())
        }
    }
}

async fn validate_config(config_path: Option<&Path>) -> Result<()> {
    let config = MirrorConfig::resolve(config_path).await?;

    match config.validate() {
        Ok(()) => {
            println!("✓ Configuration is valid");
            println!("Store URL: {}", config.store.url);
            if !config.remote.profile.is_empty() {
                println!("Remote: {}:{}", config.remote.profile, config.remote.root_path);
            }
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed: {}", e);
            Err(e)
        }
    }
}

async fn show_config(config_path: Option<&Path>) -> Result<()> {
    let config = MirrorConfig::resolve(config_path).await?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn generate_config(output_path: Option<&PathBuf>) -> Result<()> {
    let config = MirrorConfig::default();

    if let Some(path) = output_path {
        config.save(path).await?;
        println!("Configuration generated at {}", path.display());
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
