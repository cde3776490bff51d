//! CLI command implementations

pub mod backup;
pub mod list_backups;
pub mod manifest;
pub mod restore;

use anyhow::{Context as _, Result};
use devenv_backup::{JjCli, SessionMirror, SyncEngine, Vcs};
use devenv_core::{DevenvConfig, StepTracker};
use devenv_storage::{open_store, BackupLayout, BackupLocation};
use std::sync::Arc;

/// Resolved configuration and the step tracker shared by one command
pub struct Context {
    pub config: DevenvConfig,
    pub step: StepTracker,
}

impl Context {
    pub fn new(config: DevenvConfig, step: StepTracker) -> Self {
        Self { config, step }
    }

    pub fn vcs(&self) -> Arc<dyn Vcs> {
        Arc::new(JjCli::new())
    }

    /// Parsed backup base; fails when none is configured
    pub fn location(&self) -> Result<BackupLocation> {
        let base = self.config.require_base()?;
        Ok(BackupLocation::parse(base)?)
    }

    /// Connect to the configured base, namespaced by machine and user
    pub async fn sync_engine(&self) -> Result<SyncEngine> {
        let location = self.location()?;
        let layout = BackupLayout::new(
            &location,
            self.config.machine.clone(),
            self.config.user.as_deref(),
        );

        self.step.set(format!("connecting to {}", location));
        let store = open_store(&location, &self.config.retry)
            .await
            .with_context(|| format!("Failed to open backup location {}", location))?;

        Ok(SyncEngine::new(store, layout).with_step(self.step.clone()))
    }

    /// Claude Code and OpenCode mirrors at the configured local directories
    pub fn mirrors(&self) -> Result<Vec<SessionMirror>> {
        Ok(vec![
            SessionMirror::claude(self.config.claude_dir.clone())?,
            SessionMirror::opencode(self.config.opencode_dir.clone())?,
        ])
    }
}
