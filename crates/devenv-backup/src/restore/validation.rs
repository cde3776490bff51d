//! Pre-flight validation for restore operations
//!
//! Every path a manifest names is resolved against the restore root here,
//! before the first clone, write or link happens.

use crate::manifest::{CapturedFile, Manifest};
use crate::sessions::SessionMirror;
use crate::vcs::{is_supported_remote_url, Remotes};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use devenv_core::paths::{relative_link_target, resolve_under_root};
use devenv_core::{default_workers, Error, Result};
use std::fs;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Directory manifest paths are relative to
    pub root: Utf8PathBuf,
    /// Overwrite existing captured files and non-link entries at symlink paths
    pub force: bool,
    pub dry_run: bool,
    /// Concurrent workspace operations within one repository
    pub workers: usize,
    /// Only restore session objects modified on or after this instant
    pub sessions_after: Option<DateTime<Utc>>,
    pub mirrors: Vec<SessionMirror>,
}

impl RestoreOptions {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            force: false,
            dry_run: false,
            workers: default_workers(),
            sessions_after: None,
            mirrors: Vec::new(),
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn sessions_after(mut self, after: Option<DateTime<Utc>>) -> Self {
        self.sessions_after = after;
        self
    }

    pub fn mirrors(mut self, mirrors: Vec<SessionMirror>) -> Self {
        self.mirrors = mirrors;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWorkspace {
    pub name: String,
    pub path: Utf8PathBuf,
    pub change_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRepository {
    pub name: String,
    pub path: Utf8PathBuf,
    /// Remotes with supported URL schemes only
    pub remotes: Remotes,
    pub default: Option<PlannedWorkspace>,
    pub secondary: Vec<PlannedWorkspace>,
    /// Error recorded when the repository was captured
    pub capture_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub entry: CapturedFile,
    pub target: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSymlink {
    /// Root-relative path of the link, as recorded
    pub path: String,
    pub link: Utf8PathBuf,
    /// Link text, relative to the link's parent directory
    pub target: Utf8PathBuf,
}

/// A manifest with every path resolved under the restore root
#[derive(Debug, Clone, Default)]
pub struct RestorePlan {
    pub repositories: Vec<PlannedRepository>,
    pub files: Vec<PlannedFile>,
    pub symlinks: Vec<PlannedSymlink>,
}

/// Validate `manifest` and resolve it against `root`
///
/// Fails with a validation error on the first unsafe or malformed entry.
pub fn plan_restore(manifest: &Manifest, root: &Utf8Path) -> Result<RestorePlan> {
    manifest.validate()?;
    let resolve = |rel: &str| {
        resolve_under_root(root, rel)
            .map_err(|e| Error::validation(format!("refusing to restore '{}': {}", rel, e)))
    };

    let mut plan = RestorePlan::default();
    for repo in &manifest.repositories {
        let mut remotes: Remotes = repo
            .remotes
            .iter()
            .filter(|(_, url)| is_supported_remote_url(url))
            .map(|(name, url)| (name.clone(), url.clone()))
            .collect();
        if remotes.is_empty() && is_supported_remote_url(&repo.remote_url) {
            remotes.insert("origin".to_string(), repo.remote_url.clone());
        }

        let mut default = None;
        let mut secondary = Vec::new();
        for ws in &repo.workspaces {
            let planned = PlannedWorkspace {
                name: ws.name.clone(),
                path: resolve(&ws.path)?,
                change_id: ws.change_id.clone(),
            };
            if ws.name == crate::manifest::DEFAULT_WORKSPACE {
                default = Some(planned);
            } else {
                secondary.push(planned);
            }
        }

        plan.repositories.push(PlannedRepository {
            name: repo.name.clone(),
            path: resolve(&repo.path)?,
            remotes,
            default,
            secondary,
            capture_error: repo.error.clone(),
        });
    }

    for file in manifest.files() {
        plan.files.push(PlannedFile {
            entry: file.clone(),
            target: resolve(&file.path)?,
        });
    }

    for link in manifest.symlinks() {
        let link_path = resolve(&link.path)?;
        let target = resolve(&link.target)?;
        plan.symlinks.push(PlannedSymlink {
            path: link.path.clone(),
            target: relative_link_target(&link_path, &target),
            link: link_path,
        });
    }

    debug!(
        "Planned {} repositories, {} files, {} symlinks",
        plan.repositories.len(),
        plan.files.len(),
        plan.symlinks.len()
    );
    Ok(plan)
}

/// The restore root must exist as a writable directory
///
/// A dry run only requires that it exists.
pub fn validate_root(root: &Utf8Path, dry_run: bool) -> Result<()> {
    if !root.is_dir() {
        return Err(Error::invalid_config(format!(
            "restore root {} does not exist or is not a directory",
            root
        )));
    }
    if dry_run {
        return Ok(());
    }

    let probe = root.join(".devenv-restore-write-test");
    fs::write(&probe, b"test").map_err(|e| {
        Error::invalid_config(format!("restore root {} is not writable: {}", root, e))
    })?;
    if let Err(e) = fs::remove_file(&probe) {
        warn!("Could not remove {}: {}", probe, e);
    }
    info!("Restore root {} is writable", root);
    Ok(())
}
