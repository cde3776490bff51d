//! Backup command

use anyhow::{bail, Context as _, Result};
use camino::Utf8PathBuf;
use clap::Args;
use devenv_backup::{UploadOptions, UploadReport};
use devenv_core::{default_backup_name, validate_safe_name};

use super::manifest::capture;
use super::Context;
use crate::cli::{SessionDirArgs, TargetArgs};
use crate::output;

#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Backup name [default: today's date, YYYY-MM-DD]
    #[arg(long)]
    pub name: Option<String>,

    /// Freeform instructions shown to whoever restores this backup
    #[arg(long)]
    pub agent_instructions: Option<String>,

    /// Show what would be uploaded without uploading
    #[arg(long)]
    pub dry_run: bool,

    /// Only record repositories and workspaces
    #[arg(long)]
    pub no_include_files: bool,

    /// Root directory for discovery [default: $HOME]
    #[arg(long)]
    pub root: Option<Utf8PathBuf>,

    #[command(flatten)]
    pub sessions: SessionDirArgs,
}

impl BackupArgs {
    pub fn include_files(&self) -> bool {
        !self.no_include_files
    }
}

pub async fn run(args: BackupArgs, ctx: &Context) -> Result<()> {
    output::header("Backup Workspaces");

    let name = args.name.clone().unwrap_or_else(default_backup_name);
    validate_safe_name(&name, "backup name")?;
    let location = ctx.location()?;

    output::kv("Machine", &ctx.config.machine);
    output::kv("Root", ctx.config.root_dir.as_str());
    output::kv("Destination", &location.to_string());
    output::kv("Name", &name);
    if args.dry_run {
        output::warning("DRY RUN MODE - nothing will be uploaded");
    }

    let engine = ctx.sync_engine().await?;
    let manifest = capture(ctx, args.include_files(), args.agent_instructions.clone()).await?;
    output::success(&format!(
        "Captured {} repositories, {} workspaces, {} files",
        manifest.repositories.len(),
        manifest.workspace_count(),
        manifest.files().len()
    ));
    for repo in manifest.repositories.iter().filter(|r| !r.is_healthy()) {
        output::warning(&format!(
            "{}: {}",
            repo.name,
            repo.error.as_deref().unwrap_or_default()
        ));
    }

    let steps = manifest.preparation_steps();
    if !steps.is_empty() {
        output::warning(&format!(
            "{} change(s) are not on the remote trunk; restoring them needs them pushed:",
            manifest.uncommitted.len()
        ));
        for step in &steps {
            output::item(&format!("{}: {}", step.scope(), step));
        }
    }

    let options = UploadOptions {
        name: name.clone(),
        root: Utf8PathBuf::from(&manifest.root_dir),
        dry_run: args.dry_run,
        mirrors: ctx.mirrors()?,
    };

    let spinner = output::spinner(if args.dry_run {
        "Comparing with the remote..."
    } else {
        "Uploading..."
    });
    let result = engine.upload(&manifest, &options).await;
    spinner.finish_and_clear();
    let report = result.with_context(|| format!("Backup '{}' failed", name))?;

    print_report(&report);

    if !report.is_complete() {
        bail!(
            "Backup '{}' is incomplete; re-run to upload what is missing",
            report.name
        );
    }

    if report.dry_run {
        output::success("Dry run complete");
        output::info("Remove --dry-run to upload");
    } else {
        output::success(&format!("Backup '{}' written to {}", report.name, report.manifest_key));
    }
    Ok(())
}

fn print_report(report: &UploadReport) {
    output::header("Upload Summary");
    let verb = if report.dry_run { "To upload" } else { "Uploaded" };
    output::kv(&format!("{} files", verb), &report.uploaded.len().to_string());
    output::kv("Unchanged files", &report.skipped.len().to_string());
    if report.dry_run {
        for path in &report.uploaded {
            output::item(path);
        }
    }

    for mirror in &report.sessions {
        output::kv(
            &format!("{} sessions", mirror.kind),
            &format!(
                "{} {}, {} unchanged",
                mirror.transferred.len(),
                if report.dry_run { "to upload" } else { "uploaded" },
                mirror.unchanged
            ),
        );
        for (path, error) in &mirror.failed {
            output::error(&format!("{} session {}: {}", mirror.kind, path, error));
        }
    }

    for (path, error) in &report.failed {
        output::error(&format!("{}: {}", path, error));
    }
    if !report.failed.is_empty() {
        output::warning("Manifest not written; this backup stays incomplete until every file uploads");
    }
}
