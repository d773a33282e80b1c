//! changegate - change submission CLI
//!
//! Operates on a JSON world snapshot (projects, commits, changes, accounts).
//!
//! ## Commands
//!
//! - `preview`: show the branch tips a submit would produce, or write them
//!   as a tar / tgz archive
//! - `submit`: integrate a change and everything that must go with it
//! - `show`: list branches and changes in the snapshot

use anyhow::{Context, Result};
use changegate_core::metrics::METRICS;
use changegate_core::{init_tracing, LogEventSink, Preview, SubmitConfig, SubmitEngine};
use changegate_state::{Account, AccountId, BranchKey, ChangeId, CommitId, MemoryWorld};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "changegate")]
#[command(author = "Stevedores Org")]
#[command(version = changegate_core::VERSION)]
#[command(about = "Submit reviewed changes into their destination branches", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    /// World snapshot to operate on
    #[arg(long, global = true, env = "CHANGEGATE_STATE", default_value = "changegate.json")]
    state: PathBuf,

    /// Submission policy (TOML); environment overrides still apply
    #[arg(long, global = true, env = "CHANGEGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what submitting a change would do, without changing anything
    Preview {
        /// Change to submit
        change: u32,

        /// Account acting as submitter
        #[arg(long = "as")]
        actor: u32,

        /// Archive format (tar, tgz) instead of a tip listing
        #[arg(short, long)]
        format: Option<String>,

        /// Archive output path (default: change-<id>.<format>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Submit a change, all-or-nothing
    Submit {
        /// Change to submit
        change: u32,

        /// Account acting as submitter
        #[arg(long = "as")]
        actor: u32,
    },

    /// List branches and changes
    Show,
}

#[derive(Serialize)]
struct TipsOutput {
    change: u32,
    tips: BTreeMap<String, String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Preview {
            change,
            actor,
            format,
            output,
        } => {
            cmd_preview(
                &cli.state,
                config,
                change,
                actor,
                format.as_deref(),
                output.as_deref(),
                cli.json,
            )
            .await
        }
        Commands::Submit { change, actor } => {
            cmd_submit(&cli.state, config, change, actor, cli.json).await
        }
        Commands::Show => cmd_show(&cli.state).await,
    };

    METRICS.flush();
    result
}

fn load_config(path: Option<&Path>) -> Result<SubmitConfig> {
    match path {
        Some(path) => SubmitConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => SubmitConfig::from_env().context("Invalid CHANGEGATE_* environment"),
    }
}

async fn load_world(path: &Path) -> Result<MemoryWorld> {
    MemoryWorld::load(path)
        .await
        .with_context(|| format!("Failed to load state {}", path.display()))
}

fn engine_for(world: &MemoryWorld, config: SubmitConfig) -> SubmitEngine {
    SubmitEngine::new(
        world.repos.clone(),
        world.changes.clone(),
        world.visibility.clone(),
        Arc::new(LogEventSink),
        config,
    )
}

fn actor_of(world: &MemoryWorld, id: u32) -> Result<Account> {
    world
        .account(AccountId(id))
        .cloned()
        .with_context(|| format!("Unknown account: {id}"))
}

fn print_tips(change: u32, tips: &BTreeMap<BranchKey, CommitId>, json: bool) -> Result<()> {
    if json {
        let output = TipsOutput {
            change,
            tips: tips
                .iter()
                .map(|(branch, tip)| (branch.to_string(), tip.to_string()))
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    if tips.is_empty() {
        println!("No branch would move.");
    }
    for (branch, tip) in tips {
        println!("{:<40} {}", branch.to_string(), tip);
    }
    Ok(())
}

/// Preview a submission
async fn cmd_preview(
    state: &Path,
    config: SubmitConfig,
    change: u32,
    actor: u32,
    format: Option<&str>,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let world = load_world(state).await?;
    let actor = actor_of(&world, actor)?;
    let engine = engine_for(&world, config);

    match engine.preview_as(ChangeId(change), &actor, format).await? {
        Preview::Tips(tips) => print_tips(change, &tips, json),
        Preview::Archive(archive) => {
            let path = output
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(format!("change-{change}.{}", archive.format)));
            tokio::fs::write(&path, &archive.bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Wrote {} ({}, {} bytes)",
                path.display(),
                archive.content_type(),
                archive.bytes.len()
            );
            Ok(())
        }
    }
}

/// Submit a change and save the resulting state
async fn cmd_submit(
    state: &Path,
    config: SubmitConfig,
    change: u32,
    actor: u32,
    json: bool,
) -> Result<()> {
    let world = load_world(state).await?;
    let actor = actor_of(&world, actor)?;
    let engine = engine_for(&world, config);

    let outcome = engine.submit(ChangeId(change), &actor).await?;
    world
        .save(state)
        .await
        .with_context(|| format!("Failed to save state {}", state.display()))?;

    info!(
        submission_id = %outcome.submission_id,
        merged = outcome.merged.len(),
        "submission saved"
    );
    if !json {
        let merged: Vec<String> = outcome.merged.iter().map(ToString::to_string).collect();
        println!("Submitted changes {}", merged.join(", "));
    }
    print_tips(change, &outcome.tips, json)
}

/// List branches and changes
async fn cmd_show(state: &Path) -> Result<()> {
    let world = load_world(state).await?;
    let snapshot = world.snapshot();

    for project in &snapshot.projects {
        println!("{}", project.name);
        for (branch, tip) in &project.branches {
            println!("  {:<32} {}", branch, tip.short());
        }
    }
    if !snapshot.changes.is_empty() {
        println!();
    }
    for change in &snapshot.changes {
        let commit = change
            .current_commit()
            .map(|c| c.short().to_string())
            .unwrap_or_default();
        println!(
            "{:>5}  {:<9} {:<40} {} {}",
            change.id,
            change.status.to_string(),
            change.dest.to_string(),
            commit,
            change.topic.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
