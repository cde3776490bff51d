//! Manifest assembly
//!
//! Discovery and file hashing are blocking filesystem work and run on the
//! blocking pool; VCS queries run on the runtime through the enumerator.

use crate::discovery::discover_repositories;
use crate::enumerator::WorkspaceEnumerator;
use crate::files::discover_files;
use crate::manifest::{Manifest, ManifestVersion};
use crate::vcs::Vcs;
use camino::{Utf8Path, Utf8PathBuf};
use devenv_core::naming::local_hostname;
use devenv_core::{default_workers, DevenvConfig, Error, Result, StepTracker};
use std::sync::Arc;
use tracing::info;

pub struct ManifestBuilder {
    vcs: Arc<dyn Vcs>,
    root: Utf8PathBuf,
    machine: String,
    include_files: bool,
    agent_instructions: Option<String>,
    workers: usize,
    step: StepTracker,
}

impl ManifestBuilder {
    pub fn new(vcs: Arc<dyn Vcs>, root: impl Into<Utf8PathBuf>, machine: impl Into<String>) -> Self {
        Self {
            vcs,
            root: root.into(),
            machine: machine.into(),
            include_files: true,
            agent_instructions: None,
            workers: default_workers(),
            step: StepTracker::new(),
        }
    }

    /// Builder rooted and named from a resolved configuration
    pub fn from_config(vcs: Arc<dyn Vcs>, config: &DevenvConfig) -> Self {
        Self::new(vcs, config.root_dir.clone(), config.machine.clone()).with_workers(config.workers)
    }

    pub fn include_files(mut self, include: bool) -> Self {
        self.include_files = include;
        self
    }

    pub fn agent_instructions(mut self, instructions: Option<String>) -> Self {
        self.agent_instructions = instructions.filter(|text| !text.trim().is_empty());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_step(mut self, step: StepTracker) -> Self {
        self.step = step;
        self
    }

    /// Snapshot the root into a manifest
    ///
    /// Reads only, apart from refreshing stale workspaces.
    pub async fn build(&self) -> Result<Manifest> {
        let root = canonical_root(&self.root).await?;
        self.step.set(format!("discovering repositories under {}", root));

        let walk_root = root.clone();
        let repos = tokio::task::spawn_blocking(move || discover_repositories(&walk_root))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        info!("Found {} repositories under {}", repos.len(), root);

        let enumeration = WorkspaceEnumerator::new(self.vcs.clone(), root.clone())
            .with_workers(self.workers)
            .with_step(self.step.clone())
            .enumerate(&repos)
            .await?;

        let version = if self.include_files {
            ManifestVersion::LATEST
        } else {
            ManifestVersion::V1
        };
        let mut manifest = Manifest::new(version, self.machine.clone(), local_hostname(), root.as_str());
        manifest.agent_instructions = self.agent_instructions.clone();
        manifest.repositories = enumeration.repositories;
        manifest.uncommitted = enumeration.uncommitted;

        if self.include_files {
            self.step.set("capturing files and symlinks");
            let files_root = root.clone();
            let (files, symlinks) =
                tokio::task::spawn_blocking(move || discover_files(&files_root, &repos))
                    .await
                    .map_err(|e| Error::Io(std::io::Error::other(e)))??;
            manifest.files = Some(files);
            manifest.symlinks = Some(symlinks);
        }

        manifest.normalize();
        manifest.validate()?;
        Ok(manifest)
    }
}

/// Snapshot `root_dir` for the local machine
pub async fn build_manifest(vcs: Arc<dyn Vcs>, root_dir: &Utf8Path, include_files: bool) -> Result<Manifest> {
    ManifestBuilder::new(vcs, root_dir, devenv_core::default_machine_name())
        .include_files(include_files)
        .build()
        .await
}

async fn canonical_root(root: &Utf8Path) -> Result<Utf8PathBuf> {
    let canonical = tokio::fs::canonicalize(root).await.map_err(|e| {
        Error::invalid_config(format!("root directory {} is not accessible: {}", root, e))
    })?;
    Utf8PathBuf::from_path_buf(canonical)
        .map_err(|p| Error::invalid_path(p.display().to_string(), "path is not valid UTF-8"))
}
