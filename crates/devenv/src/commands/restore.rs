//! Restore command
//!
//! Connects the CLI restore UI to the devenv-backup restore orchestrator.

use anyhow::{Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Args;
use devenv_backup::restore::WorkspaceOutcome;
use devenv_backup::{
    parse_sessions_after, Manifest, RestoreOptions, RestoreOrchestrator, RestoreReport,
    WorkspaceAction,
};
use devenv_core::validate_safe_name;
use std::io::Read;

use super::list_backups::print_backups;
use super::Context;
use crate::cli::{SessionDirArgs, TargetArgs};
use crate::output;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Backup to restore; lists available backups when omitted
    #[arg(long)]
    pub name: Option<String>,

    /// Only restore sessions modified on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub sessions_after: Option<String>,

    /// Restore repositories from a local manifest instead ("-" reads stdin)
    #[arg(long, conflicts_with = "name")]
    pub manifest_file: Option<Utf8PathBuf>,

    /// Directory the manifest is restored under [default: $HOME]
    #[arg(long)]
    pub root: Option<Utf8PathBuf>,

    /// Overwrite existing files (default: skip them)
    #[arg(long)]
    pub force: bool,

    /// Show what would be restored without changing anything
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub sessions: SessionDirArgs,
}

pub async fn run(args: RestoreArgs, ctx: &Context) -> Result<()> {
    if let Some(path) = &args.manifest_file {
        let manifest = load_manifest(path)?;
        return restore(&args, ctx, &manifest, None).await;
    }

    let engine = ctx.sync_engine().await?;
    let Some(name) = args.name.as_deref() else {
        let backups = engine.list_backups().await?;
        print_backups(&ctx.config.machine, &backups);
        if !backups.is_empty() {
            output::info("Use --name to select a backup to restore");
        }
        return Ok(());
    };
    validate_safe_name(name, "backup name")?;

    let spinner = output::spinner(&format!("Downloading manifest for '{}'...", name));
    let result = engine.download(name).await;
    spinner.finish_and_clear();
    let backup = result.with_context(|| format!("Failed to download backup '{}'", name))?;

    if !backup.missing_files.is_empty() {
        output::warning(&format!(
            "{} captured file(s) are missing from the backup and will fail to restore",
            backup.missing_files.len()
        ));
    }

    restore(&args, ctx, &backup.manifest, Some((engine, name))).await
}

async fn restore(
    args: &RestoreArgs,
    ctx: &Context,
    manifest: &Manifest,
    remote: Option<(devenv_backup::SyncEngine, &str)>,
) -> Result<()> {
    output::header("Restore Workspaces");
    output::kv("Machine", &manifest.machine);
    output::kv(
        "Captured",
        &manifest.captured_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    output::kv("Source root", &manifest.root_dir);
    output::kv("Target root", ctx.config.root_dir.as_str());
    output::kv(
        "Repositories",
        &format!(
            "{} ({} workspaces)",
            manifest.repositories.len(),
            manifest.workspace_count()
        ),
    );
    output::kv(
        "Files",
        &format!(
            "{} ({})",
            manifest.files().len(),
            output::format_bytes(manifest.files_size())
        ),
    );
    if remote.is_none() {
        output::info("Local manifest: captured files and sessions are not restored");
    }
    if args.dry_run {
        output::warning("DRY RUN MODE - nothing will be changed");
    }

    if let Some(instructions) = &manifest.agent_instructions {
        output::header("Agent Instructions");
        for line in instructions.lines() {
            eprintln!("  {}", line);
        }
    }

    let sessions_after = args
        .sessions_after
        .as_deref()
        .map(parse_sessions_after)
        .transpose()?;

    let options = RestoreOptions::new(ctx.config.root_dir.clone())
        .force(args.force)
        .dry_run(args.dry_run)
        .workers(ctx.config.workers)
        .sessions_after(sessions_after)
        .mirrors(if remote.is_some() { ctx.mirrors()? } else { Vec::new() });

    let mut orchestrator = RestoreOrchestrator::new(ctx.vcs(), options, ctx.step.clone());
    if let Some((engine, name)) = remote {
        orchestrator = orchestrator.with_remote(engine, name);
    }

    let spinner = output::spinner("Restoring...");
    let result = orchestrator.run(manifest).await;
    spinner.finish_and_clear();
    let report = result.context("Restore aborted")?;

    print_report(&report);

    if let Some(partial) = report.partial_error() {
        return Err(devenv_core::Error::from(partial).into());
    }

    if report.dry_run {
        output::success("Dry run complete");
        output::info("Remove --dry-run to perform the restore");
    } else {
        output::success(&format!(
            "Restore completed in {:.1}s",
            report.duration.as_secs_f64()
        ));
    }
    Ok(())
}

fn load_manifest(path: &Utf8Path) -> Result<Manifest> {
    let json = if path.as_str() == "-" {
        let mut json = String::new();
        std::io::stdin()
            .read_to_string(&mut json)
            .context("Failed to read manifest from stdin")?;
        json
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?
    };
    Ok(Manifest::from_json(&json)?)
}

fn action_label(action: WorkspaceAction, dry_run: bool) -> &'static str {
    match (action, dry_run) {
        (WorkspaceAction::Created, _) => "created",
        (WorkspaceAction::CheckedOut, _) => "checked out",
        (WorkspaceAction::Unchanged, _) => "already up to date",
        (WorkspaceAction::Planned, true) => "would restore",
        (WorkspaceAction::Planned, false) => "planned",
    }
}

fn workspace_line(ws: &WorkspaceOutcome, dry_run: bool) -> String {
    format!(
        "{:<16} {}  {}  ({})",
        ws.workspace,
        output::short_id(&ws.change_id),
        action_label(ws.action, dry_run),
        ws.path
    )
}

fn print_report(report: &RestoreReport) {
    output::header("Restore Summary");

    for repo in &report.repositories {
        let label = match (repo.cloned, report.dry_run) {
            (true, true) => format!("{} (would clone)", repo.name),
            (true, false) => format!("{} (cloned)", repo.name),
            (false, _) => repo.name.clone(),
        };
        if repo.workspaces.is_empty() {
            output::warning(&label);
        } else {
            output::success(&label);
        }
        for ws in &repo.workspaces {
            output::item(&workspace_line(ws, report.dry_run));
        }
    }

    let verb = if report.dry_run { "To restore" } else { "Restored" };
    output::kv(
        "Files",
        &format!(
            "{} {}, {} unchanged, {} skipped",
            report.files.restored.len(),
            verb.to_lowercase(),
            report.files.unchanged.len(),
            report.files.skipped.len()
        ),
    );
    output::kv(
        "Symlinks",
        &format!(
            "{} {}, {} unchanged, {} skipped",
            report.symlinks.restored.len(),
            verb.to_lowercase(),
            report.symlinks.unchanged.len(),
            report.symlinks.skipped.len()
        ),
    );
    let skipped = report.files.skipped.len() + report.symlinks.skipped.len();
    if skipped > 0 {
        output::info(&format!("{} existing path(s) left untouched; use --force to overwrite", skipped));
    }

    for mirror in &report.sessions {
        output::kv(
            &format!("{} sessions", mirror.kind),
            &format!(
                "{} {}, {} older than --sessions-after, {} existing",
                mirror.transferred.len(),
                verb.to_lowercase(),
                mirror.skipped_by_date,
                mirror.skipped_existing.len()
            ),
        );
        for key in &mirror.skipped_unsafe {
            output::warning(&format!("Skipped unsafe session path {}", key));
        }
    }

    if !report.uncommitted.is_empty() {
        output::header("Uncommitted At Backup Time");
        for change in &report.uncommitted {
            let description = change.description.lines().next().unwrap_or_default();
            output::item(&format!(
                "{}/{} {} {}",
                change.repository,
                change.workspace,
                output::short_id(&change.change_id),
                description
            ));
        }
    }
}
