//! Clone and workspace fan-out for one repository

use super::validation::{PlannedRepository, PlannedWorkspace};
use super::{RepositoryOutcome, WorkspaceAction, WorkspaceOutcome};
use crate::vcs::{Vcs, VcsError, VcsResult};
use devenv_core::{RestoreFailure, RestoreStage, StepTracker};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub(super) struct RepositoryRestorer<'a> {
    pub vcs: &'a dyn Vcs,
    pub dry_run: bool,
    pub workers: usize,
    pub step: &'a StepTracker,
}

impl RepositoryRestorer<'_> {
    /// Clone if needed, then restore the default and secondary workspaces
    ///
    /// Failures are scoped to this repository (or one of its workspaces) and
    /// returned alongside whatever did succeed.
    pub async fn restore(&self, repo: &PlannedRepository) -> (RepositoryOutcome, Vec<RestoreFailure>) {
        let mut outcome = RepositoryOutcome {
            name: repo.name.clone(),
            cloned: false,
            workspaces: Vec::new(),
        };
        let mut failures = Vec::new();

        let Some(default) = &repo.default else {
            let reason = repo
                .capture_error
                .as_deref()
                .unwrap_or("no default workspace recorded");
            failures.push(RestoreFailure::repository(
                &repo.name,
                RestoreStage::Validate,
                format!("cannot restore: {}", reason),
            ));
            return (outcome, failures);
        };
        if let Some(error) = &repo.capture_error {
            warn!(
                "[{}] was captured with an error ({}); restoring what was recorded",
                repo.name, error
            );
        }

        let exists = self.vcs.workspace_exists(&repo.path).await;
        if exists {
            info!("[{}] already present at {}", repo.name, repo.path);
        } else if repo.remotes.is_empty() {
            failures.push(RestoreFailure::repository(
                &repo.name,
                RestoreStage::Clone,
                "no remotes with supported URL schemes",
            ));
            return (outcome, failures);
        } else if self.dry_run {
            info!("[{}] would clone into {}", repo.name, repo.path);
            outcome.cloned = true;
            outcome.workspaces = std::iter::once(default)
                .chain(&repo.secondary)
                .map(|ws| planned(&repo.name, ws, WorkspaceAction::Planned))
                .collect();
            return (outcome, failures);
        } else {
            self.step.set(format!("cloning {} into {}", repo.name, repo.path));
            info!("[{}] cloning into {}", repo.name, repo.path);
            if let Some(parent) = repo.path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    failures.push(RestoreFailure::repository(
                        &repo.name,
                        RestoreStage::Clone,
                        format!("cannot create {}: {}", parent, e),
                    ));
                    return (outcome, failures);
                }
            }
            if let Err(e) = self.vcs.clone_repo(&repo.remotes, &repo.path).await {
                warn!("[{}] clone failed: {}", repo.name, e);
                failures.push(RestoreFailure::repository(
                    &repo.name,
                    RestoreStage::Clone,
                    e.to_string(),
                ));
                return (outcome, failures);
            }
            outcome.cloned = true;
        }

        match self.sync_workspace(&repo.name, default).await {
            Ok(action) => outcome.workspaces.push(planned(&repo.name, default, action)),
            Err(e) => failures.push(RestoreFailure::workspace(
                &repo.name,
                &default.name,
                RestoreStage::Checkout,
                e.to_string(),
            )),
        }

        let semaphore = Arc::new(Semaphore::new(self.workers.max(1)));
        let mut pending = FuturesUnordered::new();
        for ws in &repo.secondary {
            let sem = semaphore.clone();
            pending.push(async move {
                let _permit = sem.acquire().await.ok();
                (ws, self.restore_secondary(repo, ws).await)
            });
        }

        while let Some((ws, result)) = pending.next().await {
            match result {
                Ok(action) => outcome.workspaces.push(planned(&repo.name, ws, action)),
                Err(failure) => failures.push(failure),
            }
        }
        outcome.workspaces.sort_by(|a, b| a.workspace.cmp(&b.workspace));

        (outcome, failures)
    }

    async fn restore_secondary(
        &self,
        repo: &PlannedRepository,
        ws: &PlannedWorkspace,
    ) -> Result<WorkspaceAction, RestoreFailure> {
        let failure = |stage, e: &dyn std::fmt::Display| {
            RestoreFailure::workspace(&repo.name, &ws.name, stage, e.to_string())
        };

        if self.vcs.workspace_exists(&ws.path).await {
            return self
                .sync_workspace(&repo.name, ws)
                .await
                .map_err(|e| failure(RestoreStage::Checkout, &e));
        }

        if self.dry_run {
            info!("[{}/{}] would create workspace at {}", repo.name, ws.name, ws.path);
            return Ok(WorkspaceAction::Planned);
        }

        self.step
            .set(format!("creating workspace {}/{} at {}", repo.name, ws.name, ws.path));
        info!("[{}/{}] creating workspace at {}", repo.name, ws.name, ws.path);
        if let Some(parent) = ws.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failure(RestoreStage::Workspace, &e))?;
        }
        self.vcs
            .add_workspace(&repo.path, &ws.path, &ws.name)
            .await
            .map_err(|e| failure(RestoreStage::Workspace, &e))?;

        self.sync_workspace(&repo.name, ws)
            .await
            .map_err(|e| failure(RestoreStage::Checkout, &e))?;
        Ok(WorkspaceAction::Created)
    }

    /// Put `ws` on its recorded change unless it already is
    async fn sync_workspace(&self, repo: &str, ws: &PlannedWorkspace) -> VcsResult<WorkspaceAction> {
        let label = format!("{}/{}", repo, ws.name);
        let current = match self.vcs.current_change(&ws.path).await {
            Err(VcsError::Stale { .. }) if self.dry_run => {
                info!("[{}] is stale; would refresh and check out {}", label, short(&ws.change_id));
                return Ok(WorkspaceAction::Planned);
            }
            Err(VcsError::Stale { .. }) => {
                debug!("Refreshing stale workspace {}", ws.path);
                self.vcs.refresh_if_stale(&ws.path).await?;
                self.vcs.current_change(&ws.path).await?
            }
            other => other?,
        };
        if current.change_id == ws.change_id {
            debug!("[{}] already on {}", label, short(&ws.change_id));
            return Ok(WorkspaceAction::Unchanged);
        }
        if self.dry_run {
            info!(
                "[{}] would check out {} (currently {})",
                label,
                short(&ws.change_id),
                short(&current.change_id)
            );
            return Ok(WorkspaceAction::Planned);
        }

        if self.vcs.has_divergent(&ws.path).await.unwrap_or(false) {
            warn!("[{}] has divergent changes; manual resolution may be needed", label);
        }

        self.step.set(format!("checking out {} in {}", short(&ws.change_id), label));
        self.vcs.checkout(&ws.path, &ws.change_id).await?;
        info!("[{}] checked out {}", label, short(&ws.change_id));

        if self.vcs.has_divergent(&ws.path).await.unwrap_or(false) {
            warn!("[{}] divergent changes detected after checkout", label);
        }
        Ok(WorkspaceAction::CheckedOut)
    }
}

fn planned(repository: &str, ws: &PlannedWorkspace, action: WorkspaceAction) -> WorkspaceOutcome {
    WorkspaceOutcome {
        repository: repository.to_string(),
        workspace: ws.name.clone(),
        path: ws.path.clone(),
        change_id: ws.change_id.clone(),
        action,
    }
}

fn short(change_id: &str) -> &str {
    change_id.get(..8).unwrap_or(change_id)
}
