//! Captured files and symlinks

use super::validation::{PlannedFile, PlannedSymlink};
use crate::manifest::sha256_hex;
use crate::sync::{SyncEngine, TransferFailure};
use camino::Utf8Path;
use devenv_core::{RestoreFailure, RestoreStage, Result, StepTracker};
use futures::stream::{self, StreamExt};
use std::io;
use tracing::{debug, info, warn};

/// What happened to the files and links of one restore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryReport {
    /// Written (or, in a dry run, that would be)
    pub restored: Vec<String>,
    /// Already identical on disk
    pub unchanged: Vec<String>,
    /// Present with different content and `force` not given
    pub skipped: Vec<String>,
}

enum FileOutcome {
    Restored,
    Unchanged,
    Skipped,
}

pub(super) struct FileRestorer<'a> {
    pub engine: &'a SyncEngine,
    pub name: &'a str,
    pub force: bool,
    pub dry_run: bool,
    pub concurrency: usize,
    pub step: &'a StepTracker,
}

impl FileRestorer<'_> {
    /// Download and write every planned file, verifying its hash first
    ///
    /// Per-file problems are collected; an authentication failure aborts.
    pub async fn restore(&self, files: &[PlannedFile]) -> Result<(EntryReport, Vec<RestoreFailure>)> {
        let results: Vec<(&PlannedFile, std::result::Result<FileOutcome, TransferFailure>)> =
            stream::iter(files)
                .map(|file| async move { (file, self.restore_one(file).await) })
                .buffer_unordered(self.concurrency.max(1))
                .collect()
                .await;

        let mut report = EntryReport::default();
        let mut failures = Vec::new();
        for (file, result) in results {
            let path = file.entry.path.clone();
            match result {
                Ok(FileOutcome::Restored) => report.restored.push(path),
                Ok(FileOutcome::Unchanged) => report.unchanged.push(path),
                Ok(FileOutcome::Skipped) => report.skipped.push(path),
                Err(TransferFailure::Store(e)) if e.is_auth() => return Err(e.into()),
                Err(failure) => {
                    warn!("Failed to restore {}: {}", path, failure);
                    failures.push(RestoreFailure::general(
                        RestoreStage::Files,
                        format!("{}: {}", path, failure),
                    ));
                }
            }
        }
        report.restored.sort();
        report.unchanged.sort();
        report.skipped.sort();
        Ok((report, failures))
    }

    async fn restore_one(&self, file: &PlannedFile) -> std::result::Result<FileOutcome, TransferFailure> {
        if let Ok(existing) = tokio::fs::read(&file.target).await {
            if sha256_hex(&existing) == file.entry.content_hash {
                debug!("{} is already up to date", file.target);
                return Ok(FileOutcome::Unchanged);
            }
            if !self.force {
                info!("Skipping existing {} (use --force to overwrite)", file.entry.path);
                return Ok(FileOutcome::Skipped);
            }
        }
        if self.dry_run {
            info!("Would restore {}", file.entry.path);
            return Ok(FileOutcome::Restored);
        }

        self.step.set(format!("restoring {}", file.entry.path));
        let data = self
            .engine
            .fetch_file(self.name, &file.entry)
            .await
            .map_err(TransferFailure::Store)?
            .ok_or_else(|| TransferFailure::Local("object missing from backup".to_string()))?;
        if sha256_hex(&data) != file.entry.content_hash {
            return Err(TransferFailure::Local(
                "downloaded content does not match the recorded hash".to_string(),
            ));
        }

        if let Some(parent) = file.target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferFailure::Local(format!("cannot create {}: {}", parent, e)))?;
        }
        tokio::fs::write(&file.target, &data)
            .await
            .map_err(|e| TransferFailure::Local(format!("cannot write {}: {}", file.target, e)))?;
        debug!("Restored {} ({} bytes)", file.target, data.len());
        Ok(FileOutcome::Restored)
    }
}

/// Recreate recorded symlinks with relative targets
///
/// Existing links are always replaced; other entries at a link path are only
/// replaced with `force`.
pub(super) async fn restore_symlinks(
    symlinks: &[PlannedSymlink],
    force: bool,
    dry_run: bool,
) -> (EntryReport, Vec<RestoreFailure>) {
    let mut report = EntryReport::default();
    let mut failures = Vec::new();

    for link in symlinks {
        match restore_symlink(link, force, dry_run).await {
            Ok(FileOutcome::Restored) => report.restored.push(link.path.clone()),
            Ok(FileOutcome::Unchanged) => report.unchanged.push(link.path.clone()),
            Ok(FileOutcome::Skipped) => {
                info!("Skipping {}: a non-link entry exists (use --force)", link.path);
                report.skipped.push(link.path.clone());
            }
            Err(e) => {
                warn!("Failed to create symlink {}: {}", link.path, e);
                failures.push(RestoreFailure::general(
                    RestoreStage::Symlinks,
                    format!("{}: {}", link.path, e),
                ));
            }
        }
    }
    (report, failures)
}

async fn restore_symlink(link: &PlannedSymlink, force: bool, dry_run: bool) -> io::Result<FileOutcome> {
    if let Ok(meta) = tokio::fs::symlink_metadata(&link.link).await {
        if meta.file_type().is_symlink() {
            let current = tokio::fs::read_link(&link.link).await?;
            if current == link.target.as_std_path() {
                return Ok(FileOutcome::Unchanged);
            }
            if !dry_run {
                tokio::fs::remove_file(&link.link).await?;
            }
        } else if !force {
            return Ok(FileOutcome::Skipped);
        } else if !dry_run {
            if meta.is_dir() {
                tokio::fs::remove_dir_all(&link.link).await?;
            } else {
                tokio::fs::remove_file(&link.link).await?;
            }
        }
    }

    if dry_run {
        info!("Would link {} -> {}", link.path, link.target);
        return Ok(FileOutcome::Restored);
    }
    if let Some(parent) = link.link.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    create_symlink(&link.target, &link.link).await?;
    debug!("Linked {} -> {}", link.link, link.target);
    Ok(FileOutcome::Restored)
}

#[cfg(unix)]
async fn create_symlink(target: &Utf8Path, link: &Utf8Path) -> io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn create_symlink(_target: &Utf8Path, link: &Utf8Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot create symlink {} on this platform", link),
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::fs;
    use tempfile::TempDir;

    fn root() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    fn planned(root: &Utf8Path, path: &str, target: &str) -> PlannedSymlink {
        let link = root.join(path);
        PlannedSymlink {
            path: path.to_string(),
            target: devenv_core::paths::relative_link_target(&link, &root.join(target)),
            link,
        }
    }

    #[tokio::test]
    async fn test_symlinks_are_relative_and_replace_links() {
        let (_dir, root) = root();
        fs::create_dir_all(root.join("code/app")).unwrap();
        fs::write(root.join("code/app/run.sh"), "#!/bin/sh").unwrap();
        fs::create_dir_all(root.join("bin")).unwrap();
        std::os::unix::fs::symlink("/somewhere/else", root.join("bin/run")).unwrap();

        let links = vec![planned(&root, "bin/run", "code/app/run.sh")];
        let (report, failures) = restore_symlinks(&links, false, false).await;
        assert!(failures.is_empty());
        assert_eq!(report.restored, vec!["bin/run"]);
        assert_eq!(
            fs::read_link(root.join("bin/run")).unwrap(),
            std::path::PathBuf::from("../code/app/run.sh")
        );
        assert_eq!(fs::read_to_string(root.join("bin/run")).unwrap(), "#!/bin/sh");

        let (report, _) = restore_symlinks(&links, false, false).await;
        assert_eq!(report.unchanged, vec!["bin/run"]);
    }

    #[tokio::test]
    async fn test_regular_file_needs_force() {
        let (_dir, root) = root();
        fs::write(root.join("target.txt"), "t").unwrap();
        fs::write(root.join("link.txt"), "not a link").unwrap();
        let links = vec![planned(&root, "link.txt", "target.txt")];

        let (report, failures) = restore_symlinks(&links, false, false).await;
        assert!(failures.is_empty());
        assert_eq!(report.skipped, vec!["link.txt"]);
        assert!(!fs::symlink_metadata(root.join("link.txt")).unwrap().file_type().is_symlink());

        let (report, _) = restore_symlinks(&links, true, false).await;
        assert_eq!(report.restored, vec!["link.txt"]);
        assert!(fs::symlink_metadata(root.join("link.txt")).unwrap().file_type().is_symlink());
    }

    #[tokio::test]
    async fn test_dry_run_creates_no_links() {
        let (_dir, root) = root();
        let links = vec![planned(&root, "bin/tool", "tool")];
        let (report, failures) = restore_symlinks(&links, false, true).await;
        assert!(failures.is_empty());
        assert_eq!(report.restored, vec!["bin/tool"]);
        assert!(!root.join("bin").exists());
    }
}
