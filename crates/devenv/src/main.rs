//! devenv CLI - back up and restore jj workspaces across machines
//!
//! This is the main entry point for the devenv command-line interface.

mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use devenv_core::{ConfigLoader, DevenvConfig, Progress, StepTracker};
use std::future::Future;
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands};
use commands::Context;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let overrides = cli.overrides();
    let file = ConfigLoader::load(cli.config.as_deref())?;
    let config = DevenvConfig::resolve(file, overrides)?;
    debug!("Resolved configuration: {:?}", config);

    let step = StepTracker::new();
    let budget = config.timeout;
    let ctx = Context::new(config, step.clone());

    // Dropping the command future kills any jj child still running
    let command = async {
        match cli.command {
            Commands::Manifest(args) => commands::manifest::run(args, &ctx).await,
            Commands::Backup(args) => commands::backup::run(args, &ctx).await,
            Commands::Restore(args) => commands::restore::run(args, &ctx).await,
            Commands::ListBackups(args) => commands::list_backups::run(args, &ctx).await,
        }
    };

    run_with_budget(budget, &step, command).await
}

/// Run `command` under the global budget
///
/// On expiry the command is dropped, whatever finished is printed and the
/// timeout error names the step that was still in flight.
async fn run_with_budget<F>(budget: Duration, step: &StepTracker, command: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(budget, command).await {
        Ok(result) => result,
        Err(_) => {
            print_progress(&step.progress());
            Err(devenv_core::Error::timeout(budget.as_secs(), step.current()).into())
        }
    }
}

fn print_progress(progress: &Progress) {
    output::header("Progress Before Timeout");
    if progress.is_empty() {
        output::info("Nothing finished before the timeout");
        return;
    }
    for scope in &progress.completed {
        output::success(scope);
    }
    for scope in &progress.failed {
        output::warning(scope);
    }
}

/// Default log level for the verbosity flags
fn log_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        // Styled output already narrates progress
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize tracing with appropriate verbosity; `RUST_LOG` wins when set
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(verbose, quiet)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
