//! Pull-request review bot.
//!
//! Reads the CI event (or an explicit `--pr`), rebuilds the review state from
//! the pull request's comments, and works through the pending tasks. The
//! summary is printed to stdout as JSON; the exit status tells CI whether the
//! merge gate passed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use reviewer::exit_codes;
use reviewer::io::config::{
    DEFAULT_CONFIG_PATH, ReviewerConfig, Secrets, load_config, write_config,
};
use reviewer::logging;
use reviewer::run::{Collaborators, load_state, resolve_context, review_pull_request};

#[derive(Parser)]
#[command(
    name = "reviewer",
    version,
    about = "Pull-request review bot that keeps its state in PR comments"
)]
struct Cli {
    /// Reviewer configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Repository as `owner/name`; defaults to `GITHUB_REPOSITORY`.
    #[arg(long, global = true)]
    repo: Option<String>,
    /// Pull request number; overrides the CI event.
    #[arg(long, global = true)]
    pr: Option<u64>,
    /// Debug logging for the reviewer (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Write the default configuration to `--config`.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Detect pending tasks and execute them.
    Run,
    /// Print the pending tasks without executing anything.
    Detect,
    /// Print the review state reconstructed from the comments.
    State,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    if let Command::Init { force } = cli.command {
        cmd_init(&cli.config, force)?;
        return Ok(exit_codes::OK);
    }
    let config = load_config(&cli.config)?;
    let Some(ctx) = resolve_context(cli.repo.as_deref(), cli.pr)? else {
        info!("event does not concern a pull request; nothing to do");
        return Ok(exit_codes::OK);
    };
    let secrets = Secrets::from_env()?;
    let collaborators = Collaborators::connect(&config, &secrets, ctx.repo.clone())?;

    match cli.command {
        Command::Run => {
            let report = review_pull_request(&config, &collaborators, &ctx, false).await?;
            print_json(&report)?;
            Ok(report.exit_code())
        }
        Command::Detect => {
            let report = review_pull_request(&config, &collaborators, &ctx, true).await?;
            print_json(&report.tasks)?;
            Ok(exit_codes::OK)
        }
        Command::State => {
            let state = load_state(&config, &collaborators, &ctx).await?;
            print_json(&state)?;
            Ok(exit_codes::OK)
        }
        Command::Init { .. } => Ok(exit_codes::OK),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &ReviewerConfig::default())?;
    info!(path = %path.display(), "wrote default configuration");
    Ok(())
}

/// Print `value` to stdout as pretty JSON.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{payload}");
    Ok(())
}
