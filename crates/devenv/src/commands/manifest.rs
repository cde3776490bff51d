//! Manifest command

use anyhow::{Context as _, Result};
use camino::Utf8PathBuf;
use clap::Args;
use devenv_backup::{Manifest, ManifestBuilder};

use super::Context;
use crate::output;

#[derive(Args, Debug)]
pub struct ManifestArgs {
    /// Root directory for discovery [default: $HOME]
    #[arg(long)]
    pub root: Option<Utf8PathBuf>,

    /// Record loose files and symlinks (default)
    #[arg(long, overrides_with = "no_include_files")]
    pub include_files: bool,

    /// Only record repositories and workspaces
    #[arg(long, overrides_with = "include_files")]
    pub no_include_files: bool,

    /// Print a readable overview with preparation steps instead of JSON
    #[arg(long)]
    pub summary: bool,
}

impl ManifestArgs {
    pub fn include_files(&self) -> bool {
        !self.no_include_files
    }
}

pub async fn run(args: ManifestArgs, ctx: &Context) -> Result<()> {
    let manifest = capture(ctx, args.include_files(), None).await?;

    if args.summary {
        for line in summary_lines(&manifest) {
            println!("{}", line);
        }
    } else {
        println!("{}", manifest.to_json()?);
    }
    Ok(())
}

/// Build the manifest for the configured root behind a spinner
pub(super) async fn capture(
    ctx: &Context,
    include_files: bool,
    agent_instructions: Option<String>,
) -> Result<Manifest> {
    let spinner = output::spinner(&format!("Scanning {}...", ctx.config.root_dir));
    let result = ManifestBuilder::from_config(ctx.vcs(), &ctx.config)
        .include_files(include_files)
        .agent_instructions(agent_instructions)
        .with_step(ctx.step.clone())
        .build()
        .await;
    spinner.finish_and_clear();

    result.with_context(|| format!("Failed to capture {}", ctx.config.root_dir))
}

/// Human-readable overview of a manifest
pub fn summary_lines(manifest: &Manifest) -> Vec<String> {
    let mut lines = vec![
        format!("Machine:  {} ({})", manifest.machine, manifest.hostname),
        format!("Root:     {}", manifest.root_dir),
        format!(
            "Captured: {}",
            manifest.captured_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!("Version:  {}", manifest.version),
        String::new(),
        format!(
            "Repositories ({}, {} workspaces):",
            manifest.repositories.len(),
            manifest.workspace_count()
        ),
    ];

    for repo in &manifest.repositories {
        lines.push(format!("  {}  {}  [{}]", repo.name, repo.path, repo.remote_url));
        if let Some(error) = &repo.error {
            lines.push(format!("    ! {}", error));
        }
        for ws in &repo.workspaces {
            let mut line = format!("    {:<16} {}", ws.name, output::short_id(&ws.change_id));
            if ws.is_uncommitted {
                line.push_str("  (uncommitted)");
            }
            if let Some(first) = ws.description.lines().next().filter(|l| !l.is_empty()) {
                line.push_str("  ");
                line.push_str(first);
            }
            lines.push(line);
        }
    }

    if manifest.version.sections().files {
        lines.push(String::new());
        lines.push(format!(
            "Files: {} ({}), symlinks: {}",
            manifest.files().len(),
            output::format_bytes(manifest.files_size()),
            manifest.symlinks().len()
        ));
    }

    let steps = manifest.preparation_steps();
    if !steps.is_empty() {
        lines.push(String::new());
        lines.push(format!(
            "Not on trunk yet ({} changes). Before backing up, consider:",
            manifest.uncommitted.len()
        ));
        for step in steps {
            lines.push(format!("  {:<24} {}", step.scope(), step));
        }
    }

    if let Some(instructions) = &manifest.agent_instructions {
        lines.push(String::new());
        lines.push("Agent instructions:".to_string());
        lines.extend(instructions.lines().map(|l| format!("  {}", l)));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use devenv_backup::{ManifestVersion, RepositoryEntry, UncommittedChange, WorkspaceEntry};
    use std::collections::BTreeMap;

    fn manifest() -> Manifest {
        let mut manifest = Manifest::new(ManifestVersion::V3, "laptop", "laptop.local", "/home/dev");
        manifest.repositories.push(RepositoryEntry {
            name: "repoB".into(),
            path: "code/repoB".into(),
            remote_url: "git@github.com:dev/repoB.git".into(),
            remotes: BTreeMap::new(),
            workspaces: vec![WorkspaceEntry {
                name: "feature".into(),
                path: "code/repoB-feature".into(),
                change_id: "bbb2zzzzzzzzzzzzzzzz".into(),
                commit_id: "c0ffee".into(),
                description: "WIP\n\nlonger body".into(),
                bookmark: None,
                is_uncommitted: true,
            }],
            error: None,
        });
        manifest.uncommitted.push(UncommittedChange {
            repository: "repoB".into(),
            workspace: "feature".into(),
            change_id: "bbb2zzzzzzzzzzzzzzzz".into(),
            commit_id: "c0ffee".into(),
            description: "WIP".into(),
            bookmark: None,
        });
        manifest
    }

    #[test]
    fn test_summary_marks_uncommitted_and_lists_steps() {
        let lines = summary_lines(&manifest());

        let ws = lines
            .iter()
            .find(|l| l.contains("feature") && l.contains("bbb2zzzzzzzz"))
            .unwrap();
        assert!(ws.contains("(uncommitted)"));
        assert!(ws.ends_with("WIP"));

        assert!(lines.iter().any(|l| l.starts_with("Not on trunk yet (1 changes)")));
        assert!(lines
            .iter()
            .any(|l| l.contains("repoB/feature") && l.contains("jj git push")));
    }

    #[test]
    fn test_summary_without_uncommitted_has_no_steps() {
        let mut manifest = manifest();
        manifest.uncommitted.clear();
        manifest.repositories[0].workspaces[0].is_uncommitted = false;

        let lines = summary_lines(&manifest);
        assert!(!lines.iter().any(|l| l.contains("Not on trunk")));
        assert!(lines.iter().any(|l| l.starts_with("Files: 0")));
    }
}
