//! Restore system
//!
//! Restores a manifest in five stages:
//!
//! 1. validate the manifest and resolve every path under the root
//! 2. clone repositories one at a time, fanning out their workspaces in parallel
//! 3. write captured files, verified against their recorded hashes
//! 4. recreate symlinks
//! 5. pull the session mirrors
//!
//! Failures scoped to a repository, workspace, file or mirror are collected
//! and reported at the end; only validation and authentication failures abort.

use crate::manifest::{Manifest, UncommittedChange};
use crate::sessions::{MirrorReport, SessionRestoreOptions};
use crate::sync::SyncEngine;
use crate::vcs::Vcs;
use camino::Utf8PathBuf;
use devenv_core::{PartialRestoreError, RestoreFailure, RestoreStage, Result, StepTracker};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

mod entries;
mod repositories;
pub mod validation;

pub use entries::EntryReport;
pub use validation::{plan_restore, validate_root, RestoreOptions, RestorePlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceAction {
    /// Workspace was added and checked out
    Created,
    CheckedOut,
    /// Already on the recorded change
    Unchanged,
    /// Dry run: would be created or checked out
    Planned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceOutcome {
    pub repository: String,
    pub workspace: String,
    pub path: Utf8PathBuf,
    pub change_id: String,
    pub action: WorkspaceAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOutcome {
    pub name: String,
    /// Cloned by this run (or, in a dry run, would be)
    pub cloned: bool,
    pub workspaces: Vec<WorkspaceOutcome>,
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub dry_run: bool,
    pub repositories: Vec<RepositoryOutcome>,
    pub files: EntryReport,
    pub symlinks: EntryReport,
    pub sessions: Vec<MirrorReport>,
    /// Reminder of the changes that were uncommitted at backup time
    pub uncommitted: Vec<UncommittedChange>,
    pub failures: Vec<RestoreFailure>,
    pub duration: Duration,
}

impl RestoreReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Aggregate error when anything failed
    pub fn partial_error(&self) -> Option<PartialRestoreError> {
        (!self.failures.is_empty()).then(|| PartialRestoreError::new(self.failures.clone()))
    }

    /// Workspace outcome by `repo/workspace`
    pub fn workspace(&self, repository: &str, workspace: &str) -> Option<&WorkspaceOutcome> {
        self.repositories
            .iter()
            .filter(|r| r.name == repository)
            .flat_map(|r| &r.workspaces)
            .find(|w| w.workspace == workspace)
    }
}

/// Backup name and engine for the object-store backed stages
struct RemoteSource {
    engine: SyncEngine,
    name: String,
}

pub struct RestoreOrchestrator {
    vcs: Arc<dyn Vcs>,
    options: RestoreOptions,
    step: StepTracker,
    remote: Option<RemoteSource>,
}

impl RestoreOrchestrator {
    pub fn new(vcs: Arc<dyn Vcs>, options: RestoreOptions, step: StepTracker) -> Self {
        Self {
            vcs,
            options,
            step,
            remote: None,
        }
    }

    /// Restore files and sessions from backup `name` through `engine`
    ///
    /// Without a remote only repositories, workspaces and symlinks are restored.
    pub fn with_remote(mut self, engine: SyncEngine, name: impl Into<String>) -> Self {
        self.remote = Some(RemoteSource {
            engine,
            name: name.into(),
        });
        self
    }

    pub async fn run(&self, manifest: &Manifest) -> Result<RestoreReport> {
        let start = Instant::now();
        let dry_run = self.options.dry_run;
        let mut report = RestoreReport {
            dry_run,
            repositories: Vec::new(),
            files: EntryReport::default(),
            symlinks: EntryReport::default(),
            sessions: Vec::new(),
            uncommitted: manifest.uncommitted.clone(),
            failures: Vec::new(),
            duration: Duration::ZERO,
        };

        info!("Stage 1/5: Validating manifest");
        self.step.set("validating manifest");
        validate_root(&self.options.root, dry_run)?;
        let plan = plan_restore(manifest, &self.options.root)?;
        info!(
            "Restoring {} repositories ({} workspaces) from {} captured at {}",
            manifest.repositories.len(),
            manifest.workspace_count(),
            manifest.machine,
            manifest.captured_at
        );

        info!("Stage 2/5: Restoring repositories and workspaces");
        let restorer = repositories::RepositoryRestorer {
            vcs: self.vcs.as_ref(),
            dry_run,
            workers: self.options.workers,
            step: &self.step,
        };
        for repo in &plan.repositories {
            let (outcome, failures) = restorer.restore(repo).await;
            if failures.is_empty() {
                self.step.complete(format!("repository {}", outcome.name));
            }
            for failure in &failures {
                self.step.fail(failure.to_string());
            }
            report.repositories.push(outcome);
            report.failures.extend(failures);
        }

        info!("Stage 3/5: Restoring files");
        match &self.remote {
            Some(remote) if !plan.files.is_empty() => {
                let restorer = entries::FileRestorer {
                    engine: &remote.engine,
                    name: &remote.name,
                    force: self.options.force,
                    dry_run,
                    concurrency: crate::sync::MAX_CONCURRENT_OPS,
                    step: &self.step,
                };
                let (files, failures) = restorer.restore(&plan.files).await?;
                self.step
                    .complete(format!("files ({} restored)", files.restored.len()));
                for failure in &failures {
                    self.step.fail(failure.to_string());
                }
                report.files = files;
                report.failures.extend(failures);
            }
            Some(_) => info!("No captured files in this backup"),
            None if !plan.files.is_empty() => {
                info!("Skipping {} captured files (local manifest)", plan.files.len())
            }
            None => {}
        }

        info!("Stage 4/5: Restoring symlinks");
        self.step.set("restoring symlinks");
        let (symlinks, failures) =
            entries::restore_symlinks(&plan.symlinks, self.options.force, dry_run).await;
        self.step
            .complete(format!("symlinks ({} restored)", symlinks.restored.len()));
        report.symlinks = symlinks;
        report.failures.extend(failures);

        info!("Stage 5/5: Restoring session data");
        match &self.remote {
            Some(remote) if !self.options.mirrors.is_empty() => {
                let options = SessionRestoreOptions {
                    after: self.options.sessions_after,
                    force: self.options.force,
                    dry_run,
                };
                for (kind, result) in remote
                    .engine
                    .restore_sessions(&self.options.mirrors, &options)
                    .await
                {
                    match result {
                        Ok(mirror) => {
                            self.step.complete(format!("{} sessions", kind));
                            report.failures.extend(mirror.failed.iter().map(|(path, e)| {
                                RestoreFailure::general(
                                    RestoreStage::Sessions,
                                    format!("{} {}: {}", kind, path, e),
                                )
                            }));
                            report.sessions.push(mirror);
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => report.failures.push(RestoreFailure::general(
                            RestoreStage::Sessions,
                            format!("{}: {}", kind, e),
                        )),
                    }
                }
            }
            _ => info!("Session restore skipped"),
        }

        if !report.uncommitted.is_empty() {
            warn!(
                "{} changes were uncommitted at backup time and may not exist remotely",
                report.uncommitted.len()
            );
        }

        report.duration = start.elapsed();
        info!(
            "Restore complete: {} repositories, {} files, {} symlinks, {} failures in {:?}",
            report.repositories.len(),
            report.files.restored.len(),
            report.symlinks.restored.len(),
            report.failures.len(),
            report.duration
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestVersion, RepositoryEntry, WorkspaceEntry, DEFAULT_WORKSPACE};
    use crate::vcs::{FakeChange, FakeRemote, FakeVcs};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    const URL_A: &str = "https://github.com/dev/repoA.git";
    const URL_B: &str = "https://github.com/dev/repoB.git";

    fn workspace(name: &str, path: &str, change_id: &str) -> WorkspaceEntry {
        WorkspaceEntry {
            name: name.into(),
            path: path.into(),
            change_id: change_id.into(),
            commit_id: format!("{}0c0ffee", change_id),
            description: String::new(),
            bookmark: None,
            is_uncommitted: false,
        }
    }

    fn repository(name: &str, url: &str, workspaces: Vec<WorkspaceEntry>) -> RepositoryEntry {
        RepositoryEntry {
            name: name.into(),
            path: name.into(),
            remote_url: url.into(),
            remotes: BTreeMap::from([("origin".to_string(), url.to_string())]),
            workspaces,
            error: None,
        }
    }

    fn scenario() -> (TempDir, Utf8PathBuf, Manifest, Arc<FakeVcs>) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let mut manifest = Manifest::new(ManifestVersion::V1, "laptop", "laptop", root.as_str());
        manifest.repositories = vec![
            repository("repoA", URL_A, vec![workspace(DEFAULT_WORKSPACE, "repoA", "aaa1")]),
            repository(
                "repoB",
                URL_B,
                vec![
                    workspace(DEFAULT_WORKSPACE, "repoB", "bbb1"),
                    workspace("feature", "repoB-feature", "bbb2"),
                ],
            ),
        ];

        let vcs = Arc::new(FakeVcs::new());
        vcs.publish(
            URL_A,
            FakeRemote::new().with_change(FakeChange::new("aaa1").pushed(), true),
        );
        vcs.publish(
            URL_B,
            FakeRemote::new()
                .with_change(FakeChange::new("bbb1").pushed(), true)
                .with_change(
                    FakeChange::new("bbb2").described("WIP").with_parent("bbb1").pushed(),
                    false,
                ),
        );
        (dir, root, manifest, vcs)
    }

    fn orchestrator(vcs: &Arc<FakeVcs>, root: &Utf8PathBuf, dry_run: bool) -> RestoreOrchestrator {
        let options = RestoreOptions::new(root.clone()).workers(2).dry_run(dry_run);
        RestoreOrchestrator::new(vcs.clone(), options, StepTracker::new())
    }

    #[tokio::test]
    async fn test_restore_scenario_on_clean_machine() {
        let (_dir, root, manifest, vcs) = scenario();
        let report = orchestrator(&vcs, &root, false).run(&manifest).await.unwrap();

        assert!(report.is_success(), "failures: {:?}", report.failures);
        assert_eq!(vcs.head(&root.join("repoA")).as_deref(), Some("aaa1"));
        assert_eq!(vcs.head(&root.join("repoB")).as_deref(), Some("bbb1"));
        assert_eq!(vcs.head(&root.join("repoB-feature")).as_deref(), Some("bbb2"));
        assert_eq!(
            report.workspace("repoB", "feature").unwrap().action,
            WorkspaceAction::Created
        );
    }

    #[tokio::test]
    async fn test_restore_is_idempotent() {
        let (_dir, root, manifest, vcs) = scenario();
        orchestrator(&vcs, &root, false).run(&manifest).await.unwrap();
        vcs.clear_calls();

        let report = orchestrator(&vcs, &root, false).run(&manifest).await.unwrap();
        assert!(report.is_success());
        assert!(vcs.calls().is_empty(), "unexpected calls: {:?}", vcs.calls());
        assert!(report
            .repositories
            .iter()
            .flat_map(|r| &r.workspaces)
            .all(|w| w.action == WorkspaceAction::Unchanged));
    }

    #[tokio::test]
    async fn test_unclonable_repository_is_contained() {
        let (_dir, root, manifest, vcs) = scenario();
        vcs.fail_clone(URL_A);

        let report = orchestrator(&vcs, &root, false).run(&manifest).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].repository.as_deref(), Some("repoA"));
        assert_eq!(report.failures[0].stage, RestoreStage::Clone);
        assert_eq!(vcs.head(&root.join("repoB-feature")).as_deref(), Some("bbb2"));
        assert!(report.partial_error().is_some());
    }

    #[tokio::test]
    async fn test_progress_recorded_per_repository() {
        let (_dir, root, manifest, vcs) = scenario();
        vcs.fail_clone(URL_A);
        let step = StepTracker::new();
        let options = RestoreOptions::new(root.clone()).workers(2);

        RestoreOrchestrator::new(vcs.clone(), options, step.clone())
            .run(&manifest)
            .await
            .unwrap();
        let progress = step.progress();
        assert!(progress.completed.contains(&"repository repoB".to_string()));
        assert_eq!(progress.failed.len(), 1);
        assert!(progress.failed[0].starts_with("repoA [clone]"));
    }

    #[tokio::test]
    async fn test_missing_change_fails_only_that_workspace() {
        let (_dir, root, mut manifest, vcs) = scenario();
        manifest.repositories[1].workspaces[1].change_id = "gone".into();

        let report = orchestrator(&vcs, &root, false).run(&manifest).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].scope(), "repoB/feature");
        assert_eq!(report.failures[0].stage, RestoreStage::Checkout);
        assert_eq!(vcs.head(&root.join("repoA")).as_deref(), Some("aaa1"));
        assert_eq!(vcs.head(&root.join("repoB")).as_deref(), Some("bbb1"));
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let (_dir, root, manifest, vcs) = scenario();
        let report = orchestrator(&vcs, &root, true).run(&manifest).await.unwrap();

        assert!(report.is_success());
        assert!(vcs.calls().is_empty());
        assert!(!root.join("repoA").exists());
        assert!(report
            .repositories
            .iter()
            .flat_map(|r| &r.workspaces)
            .all(|w| w.action == WorkspaceAction::Planned));
    }

    fn with_notes(mut manifest: Manifest) -> Manifest {
        manifest.version = ManifestVersion::V2;
        manifest.files = Some(vec![crate::manifest::CapturedFile {
            path: "notes.md".into(),
            size: 5,
            content_hash: crate::manifest::sha256_hex(b"notes"),
        }]);
        manifest
    }

    fn remote_store() -> (Arc<devenv_storage::MemoryStore>, SyncEngine) {
        let store = Arc::new(devenv_storage::MemoryStore::new());
        store.insert("backups/laptop/2026-10-16/files/notes.md", "notes");
        let layout = devenv_storage::BackupLayout::from_prefix("backups/", "laptop", None);
        (store.clone(), SyncEngine::new(store, layout))
    }

    #[tokio::test]
    async fn test_access_denied_on_files_aborts_restore() {
        let (_dir, root, manifest, vcs) = scenario();
        let manifest = with_notes(manifest);
        let (store, engine) = remote_store();
        store.fail_gets_matching(
            "files/",
            devenv_storage::StoreError::auth("get", "notes.md", "AccessDenied"),
        );

        let err = orchestrator(&vcs, &root, false)
            .with_remote(engine, "2026-10-16")
            .run(&manifest)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!root.join("notes.md").exists());
    }

    #[tokio::test]
    async fn test_other_file_failures_are_collected() {
        let (_dir, root, manifest, vcs) = scenario();
        let manifest = with_notes(manifest);
        let (store, engine) = remote_store();
        store.fail_gets_matching(
            "files/",
            devenv_storage::StoreError::other("get", "notes.md", "InternalError"),
        );

        let report = orchestrator(&vcs, &root, false)
            .with_remote(engine, "2026-10-16")
            .run(&manifest)
            .await
            .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, RestoreStage::Files);
        assert_eq!(vcs.head(&root.join("repoB-feature")).as_deref(), Some("bbb2"));
    }

    #[tokio::test]
    async fn test_dry_run_leaves_stale_workspace_alone() {
        let (_dir, root, manifest, vcs) = scenario();
        orchestrator(&vcs, &root, false).run(&manifest).await.unwrap();
        vcs.set_head(&root.join("repoB"), "feature", "bbb1");
        vcs.mark_stale(root.join("repoB-feature"));
        vcs.clear_calls();

        let report = orchestrator(&vcs, &root, true).run(&manifest).await.unwrap();
        assert!(report.is_success(), "failures: {:?}", report.failures);
        assert!(vcs.calls().is_empty(), "unexpected calls: {:?}", vcs.calls());
        assert_eq!(
            report.workspace("repoB", "feature").unwrap().action,
            WorkspaceAction::Planned
        );
        assert_eq!(
            report.workspace("repoB", "default").unwrap().action,
            WorkspaceAction::Unchanged
        );
    }

    #[tokio::test]
    async fn test_stale_workspace_refreshed_before_checkout() {
        let (_dir, root, manifest, vcs) = scenario();
        orchestrator(&vcs, &root, false).run(&manifest).await.unwrap();
        vcs.set_head(&root.join("repoB"), "feature", "bbb1");
        vcs.mark_stale(root.join("repoB-feature"));
        vcs.clear_calls();

        let report = orchestrator(&vcs, &root, false).run(&manifest).await.unwrap();
        assert!(report.is_success(), "failures: {:?}", report.failures);
        assert_eq!(vcs.calls()[0], format!("refresh {}", root.join("repoB-feature")));
        assert_eq!(vcs.head(&root.join("repoB-feature")).as_deref(), Some("bbb2"));
    }

    #[tokio::test]
    async fn test_unsafe_manifest_aborts_before_side_effects() {
        let (_dir, root, mut manifest, vcs) = scenario();
        manifest.repositories[1].workspaces[1].path = "../outside".into();

        let err = orchestrator(&vcs, &root, false).run(&manifest).await.unwrap_err();
        assert!(matches!(err, devenv_core::Error::Validation { .. }));
        assert!(vcs.calls().is_empty());
    }
}
