//! Workspace enumeration
//!
//! Turns discovered repositories into manifest entries by asking the VCS
//! for remotes, checked-out changes and unpushed work. Stale workspaces are
//! refreshed and read again; a repository that still cannot be read is kept
//! in the output with an error marker so the manifest never claims more
//! than it captured.

use crate::discovery::DiscoveredRepo;
use crate::manifest::{RepositoryEntry, UncommittedChange, WorkspaceEntry, DEFAULT_WORKSPACE};
use crate::vcs::{is_supported_remote_url, primary_remote, ChangeInfo, Remotes, Vcs, VcsError, VcsResult};
use camino::{Utf8Path, Utf8PathBuf};
use devenv_core::paths::to_key_path;
use devenv_core::{Error, Result, StepTracker};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Repositories and outstanding work found on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    pub repositories: Vec<RepositoryEntry>,
    pub uncommitted: Vec<UncommittedChange>,
}

pub struct WorkspaceEnumerator {
    vcs: Arc<dyn Vcs>,
    root: Utf8PathBuf,
    workers: usize,
    step: StepTracker,
}

/// Scan result for one repository before naming
struct RepoScan {
    entry: RepositoryEntry,
    uncommitted: Vec<UncommittedChange>,
}

impl WorkspaceEnumerator {
    pub fn new(vcs: Arc<dyn Vcs>, root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            vcs,
            root: root.into(),
            workers: 4,
            step: StepTracker::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_step(mut self, step: StepTracker) -> Self {
        self.step = step;
        self
    }

    /// Enumerate every repository, in `repos` order, `workers` at a time
    pub async fn enumerate(&self, repos: &[DiscoveredRepo]) -> Result<Enumeration> {
        self.step
            .set(format!("enumerating {} repositories", repos.len()));
        info!("Enumerating {} repositories under {}", repos.len(), self.root);

        let scans: Vec<VcsResult<Option<RepoScan>>> = stream::iter(repos)
            .map(|repo| self.scan_repo(repo))
            .buffered(self.workers)
            .collect()
            .await;

        let mut names: BTreeSet<String> = BTreeSet::new();
        let mut enumeration = Enumeration::default();
        for scan in scans {
            let Some(mut scan) = scan.map_err(|e| match e {
                VcsError::ToolMissing => Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    e.to_string(),
                )),
                other => Error::unreachable("workspace enumeration", other.to_string(), false),
            })?
            else {
                continue;
            };

            let name = unique_name(&mut names, &scan.entry);
            scan.entry.name = name.clone();
            for change in &mut scan.uncommitted {
                change.repository = name.clone();
            }
            enumeration.repositories.push(scan.entry);
            enumeration.uncommitted.extend(scan.uncommitted);
        }

        Ok(enumeration)
    }

    /// `Ok(None)` for repositories skipped by policy; `Err` only for a missing tool
    async fn scan_repo(&self, repo: &DiscoveredRepo) -> VcsResult<Option<RepoScan>> {
        let path = &repo.path;
        debug!("Scanning repository at {}", path);

        let remotes = match self.read(path, || self.vcs.remotes(path)).await {
            Ok(remotes) => remotes,
            Err(VcsError::ToolMissing) => return Err(VcsError::ToolMissing),
            Err(e) => {
                warn!("Cannot read remotes of {}: {}", path, e);
                return Ok(Some(self.scan_for(repo, Remotes::new(), Some(e.to_string()))));
            }
        };
        if remotes.is_empty() {
            warn!("Skipping {}: no git remotes", path);
            return Ok(None);
        }
        let remotes: Remotes = remotes
            .into_iter()
            .filter(|(_, url)| is_supported_remote_url(url))
            .collect();
        if remotes.is_empty() {
            warn!("Skipping {}: no remotes with supported URL schemes", path);
            return Ok(None);
        }

        let default = match self.read_workspace(path, DEFAULT_WORKSPACE.to_string()).await {
            Ok(ws) => ws,
            Err(VcsError::ToolMissing) => return Err(VcsError::ToolMissing),
            Err(e) => {
                warn!("Cannot read default workspace of {}: {}", path, e);
                return Ok(Some(self.scan_for(repo, remotes, Some(e.to_string()))));
            }
        };

        let mut scan = self.scan_for(repo, remotes, None);
        let mut changes: Vec<(WorkspaceEntry, Utf8PathBuf, ChangeInfo)> = vec![default];
        let mut errors = Vec::new();

        for ws_path in &repo.workspaces {
            let name = match self.read(ws_path, || self.vcs.workspace_name(ws_path)).await {
                Ok(name) => name,
                Err(e) => {
                    warn!("Cannot name workspace at {}: {}", ws_path, e);
                    errors.push(format!("{}: {}", ws_path, e));
                    continue;
                }
            };
            if name == DEFAULT_WORKSPACE || changes.iter().any(|(ws, _, _)| ws.name == name) {
                continue;
            }
            match self.read_workspace(ws_path, name).await {
                Ok(ws) => changes.push(ws),
                Err(e) => {
                    warn!("Cannot read workspace at {}: {}", ws_path, e);
                    errors.push(format!("{}: {}", ws_path, e));
                }
            }
        }

        if let Ok(registered) = self.read(path, || self.vcs.list_workspaces(path)).await {
            for name in registered {
                if !changes.iter().any(|(ws, _, _)| ws.name == name) {
                    debug!("Workspace {} of {} is not under {}", name, path, self.root);
                }
            }
        }

        // Uncommitted: every non-trunk head with content, plus unpushed ancestors
        let mut seen = BTreeSet::new();
        for (ws, ws_path, change) in &mut changes {
            let ws_path = ws_path.as_path();
            let change = &*change;
            let on_trunk = self
                .read(ws_path, || self.vcs.is_ancestor_of_trunk(ws_path, &change.change_id))
                .await
                .unwrap_or_else(|e| {
                    warn!("Cannot check trunk ancestry in {}: {}", ws_path, e);
                    false
                });
            ws.is_uncommitted = !on_trunk && change.has_content();
            if ws.is_uncommitted && seen.insert(change.change_id.clone()) {
                scan.uncommitted.push(uncommitted(&ws.name, change));
            }
        }

        for (ws, ws_path, _) in &changes {
            let unpushed = match self.read(ws_path, || self.vcs.unpushed_changes(ws_path)).await {
                Ok(unpushed) => unpushed,
                Err(e) => {
                    warn!("Cannot list unpushed changes in {}: {}", ws_path, e);
                    continue;
                }
            };
            for change in unpushed {
                if !change.has_content() || seen.contains(&change.change_id) {
                    continue;
                }
                // Unknown ancestry is kept out of the preparation steps
                let on_trunk = self
                    .read(ws_path, || self.vcs.is_ancestor_of_trunk(ws_path, &change.change_id))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(
                            "Cannot check trunk ancestry of {} in {}: {}; leaving it unlisted",
                            change.change_id, ws_path, e
                        );
                        true
                    });
                if on_trunk {
                    continue;
                }
                seen.insert(change.change_id.clone());
                scan.uncommitted.push(uncommitted(&ws.name, &change));
            }
        }

        scan.entry.workspaces = changes.into_iter().map(|(ws, _, _)| ws).collect();
        if !errors.is_empty() {
            scan.entry.error = Some(format!("unreadable workspaces: {}", errors.join("; ")));
        }
        Ok(Some(scan))
    }

    async fn read_workspace(
        &self,
        ws_path: &Utf8Path,
        name: String,
    ) -> VcsResult<(WorkspaceEntry, Utf8PathBuf, ChangeInfo)> {
        let change = self.read(ws_path, || self.vcs.current_change(ws_path)).await?;
        let entry = WorkspaceEntry {
            name,
            path: self.relative(ws_path),
            change_id: change.change_id.clone(),
            commit_id: change.commit_id.clone(),
            description: change.description.clone(),
            bookmark: change.bookmark.clone(),
            is_uncommitted: false,
        };
        Ok((entry, ws_path.to_path_buf(), change))
    }

    /// Run a read, refreshing the workspace and retrying once when it is stale
    async fn read<T, F, Fut>(&self, ws_path: &Utf8Path, op: F) -> VcsResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = VcsResult<T>>,
    {
        match op().await {
            Err(VcsError::Stale { .. }) => {
                self.step.set(format!("refreshing stale workspace {}", ws_path));
                if self.vcs.refresh_if_stale(ws_path).await? {
                    warn!("Divergent changes in {} after refreshing", ws_path);
                }
                op().await.map_err(|e| match e {
                    VcsError::Stale { path, message } => VcsError::command_failed(
                        "workspace update-stale",
                        path,
                        format!("still stale after refresh: {}", message),
                    ),
                    other => other,
                })
            }
            other => other,
        }
    }

    fn relative(&self, path: &Utf8Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if !rel.as_str().is_empty() => to_key_path(rel),
            Ok(_) => ".".to_string(),
            Err(_) => path.to_string(),
        }
    }

    fn scan_for(&self, repo: &DiscoveredRepo, remotes: Remotes, error: Option<String>) -> RepoScan {
        let remote_url = primary_remote(&remotes)
            .map(|(_, url)| url.to_string())
            .unwrap_or_default();
        RepoScan {
            entry: RepositoryEntry {
                name: String::new(),
                path: self.relative(&repo.path),
                remote_url,
                remotes,
                workspaces: Vec::new(),
                error,
            },
            uncommitted: Vec::new(),
        }
    }
}

fn uncommitted(workspace: &str, change: &ChangeInfo) -> UncommittedChange {
    UncommittedChange {
        repository: String::new(),
        workspace: workspace.to_string(),
        change_id: change.change_id.clone(),
        commit_id: change.commit_id.clone(),
        description: change.description.clone(),
        bookmark: change.bookmark.clone(),
    }
}

/// Repository name from its clone URL, else its directory
pub fn repository_name(entry: &RepositoryEntry) -> String {
    let from_url = entry
        .remote_url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .map(|segment| segment.trim_end_matches(".git"))
        .filter(|segment| !segment.is_empty());
    match from_url {
        Some(name) => name.to_string(),
        None => Utf8Path::new(&entry.path)
            .file_name()
            .unwrap_or("repository")
            .to_string(),
    }
}

/// Base name, then `-1`, `-2`, ... until unused
fn unique_name(taken: &mut BTreeSet<String>, entry: &RepositoryEntry) -> String {
    let base = repository_name(entry);
    let mut name = base.clone();
    let mut counter = 1;
    while taken.contains(&name) {
        name = format!("{}-{}", base, counter);
        counter += 1;
    }
    taken.insert(name.clone());
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::{FakeChange, FakeVcs};

    const URL_A: &str = "https://github.com/dev/repoA.git";
    const URL_B: &str = "git@github.com:dev/repoB.git";

    fn repo(path: &str, workspaces: &[&str]) -> DiscoveredRepo {
        DiscoveredRepo {
            path: path.into(),
            store: format!("{}/.jj/repo", path).into(),
            workspaces: workspaces.iter().map(|w| Utf8PathBuf::from(*w)).collect(),
        }
    }

    fn scenario() -> (Arc<FakeVcs>, Vec<DiscoveredRepo>) {
        let vcs = Arc::new(FakeVcs::new());
        let a = Utf8Path::new("/home/dev/repoA");
        vcs.add_repo(a, &[("origin", URL_A)]);
        vcs.add_change(a, FakeChange::new("aaa1").modified().described("Release"), true);
        vcs.set_head(a, DEFAULT_WORKSPACE, "aaa1");

        let b = Utf8Path::new("/home/dev/repoB");
        vcs.add_repo(b, &[("origin", URL_B)]);
        vcs.add_change(b, FakeChange::new("bbb0"), true);
        vcs.add_change(b, FakeChange::new("bbb1").with_parent("bbb0"), false);
        vcs.add_change(b, FakeChange::new("bbb2").modified().described("WIP").with_parent("bbb0"), false);
        vcs.set_head(b, DEFAULT_WORKSPACE, "bbb1");
        vcs.add_workspace_at(b, "/home/dev/repoB-feature", "feature", "bbb2");

        let repos = vec![
            repo("/home/dev/repoA", &[]),
            repo("/home/dev/repoB", &["/home/dev/repoB-feature"]),
        ];
        (vcs, repos)
    }

    #[tokio::test]
    async fn test_scenario_uncommitted_flags() {
        let (vcs, repos) = scenario();
        let enumeration = WorkspaceEnumerator::new(vcs.clone(), "/home/dev")
            .enumerate(&repos)
            .await
            .unwrap();

        let a = &enumeration.repositories[0];
        assert_eq!(a.name, "repoA");
        assert_eq!(a.path, "repoA");
        assert_eq!(a.workspaces[0].change_id, "aaa1");
        assert!(!a.workspaces[0].is_uncommitted);

        let b = &enumeration.repositories[1];
        let default = b.default_workspace().unwrap();
        assert_eq!(default.change_id, "bbb1");
        assert!(!default.is_uncommitted, "empty undescribed head is not work");
        let feature = b.workspaces.iter().find(|w| w.name == "feature").unwrap();
        assert_eq!(feature.path, "repoB-feature");
        assert!(feature.is_uncommitted);

        assert_eq!(enumeration.uncommitted.len(), 1);
        assert_eq!(enumeration.uncommitted[0].repository, "repoB");
        assert_eq!(enumeration.uncommitted[0].change_id, "bbb2");

        // Reads only
        assert!(vcs.calls().is_empty());
    }

    #[tokio::test]
    async fn test_trunk_changes_never_uncommitted() {
        let vcs = Arc::new(FakeVcs::new());
        let r = Utf8Path::new("/w/r");
        vcs.add_repo(r, &[("origin", URL_A)]);
        vcs.add_change(r, FakeChange::new("t1").modified().described("merged"), true);
        vcs.add_change(r, FakeChange::new("t2").modified().with_parent("t1"), true);
        vcs.set_head(r, DEFAULT_WORKSPACE, "t2");

        let enumeration = WorkspaceEnumerator::new(vcs, "/w")
            .enumerate(&[repo("/w/r", &[])])
            .await
            .unwrap();
        assert!(enumeration.uncommitted.is_empty());
        assert!(!enumeration.repositories[0].workspaces[0].is_uncommitted);
    }

    #[tokio::test]
    async fn test_unpushed_ancestors_recorded() {
        let vcs = Arc::new(FakeVcs::new());
        let r = Utf8Path::new("/w/r");
        vcs.add_repo(r, &[("origin", URL_A)]);
        vcs.add_change(r, FakeChange::new("base"), true);
        vcs.add_change(r, FakeChange::new("mid").modified().with_parent("base"), false);
        vcs.add_change(r, FakeChange::new("top").with_parent("mid"), false);
        vcs.set_head(r, DEFAULT_WORKSPACE, "top");

        let enumeration = WorkspaceEnumerator::new(vcs, "/w")
            .enumerate(&[repo("/w/r", &[])])
            .await
            .unwrap();
        let ids: Vec<&str> = enumeration.uncommitted.iter().map(|c| c.change_id.as_str()).collect();
        assert_eq!(ids, vec!["mid"]);
        assert!(!enumeration.repositories[0].workspaces[0].is_uncommitted);
    }

    #[tokio::test]
    async fn test_failed_ancestry_check_keeps_enumerating() {
        let vcs = Arc::new(FakeVcs::new());
        let r = Utf8Path::new("/w/r");
        vcs.add_repo(r, &[("origin", URL_A)]);
        vcs.add_change(r, FakeChange::new("base"), true);
        vcs.add_change(r, FakeChange::new("low").modified().with_parent("base"), false);
        vcs.add_change(r, FakeChange::new("mid").modified().with_parent("low"), false);
        vcs.add_change(r, FakeChange::new("top").described("WIP").with_parent("mid"), false);
        vcs.set_head(r, DEFAULT_WORKSPACE, "top");
        vcs.fail_ancestry_check("mid");

        let enumeration = WorkspaceEnumerator::new(vcs, "/w")
            .enumerate(&[repo("/w/r", &[])])
            .await
            .unwrap();
        let ids: Vec<&str> = enumeration.uncommitted.iter().map(|c| c.change_id.as_str()).collect();
        assert_eq!(ids, vec!["top", "low"]);
        assert!(enumeration.repositories[0].error.is_none());
        assert!(enumeration.repositories[0].workspaces[0].is_uncommitted);
    }

    #[tokio::test]
    async fn test_stale_workspace_refreshed() {
        let (vcs, repos) = scenario();
        vcs.mark_stale("/home/dev/repoB-feature");

        let enumeration = WorkspaceEnumerator::new(vcs.clone(), "/home/dev")
            .enumerate(&repos)
            .await
            .unwrap();
        let b = &enumeration.repositories[1];
        assert!(b.error.is_none());
        assert_eq!(b.workspaces.len(), 2);
        assert_eq!(vcs.calls(), vec!["refresh /home/dev/repoB-feature".to_string()]);
    }

    #[tokio::test]
    async fn test_unreadable_repository_marked() {
        let (vcs, mut repos) = scenario();
        repos.push(repo("/home/dev/ghost", &[]));

        let enumeration = WorkspaceEnumerator::new(vcs, "/home/dev")
            .enumerate(&repos)
            .await
            .unwrap();
        assert_eq!(enumeration.repositories.len(), 3);
        let ghost = &enumeration.repositories[2];
        assert_eq!(ghost.name, "ghost");
        assert!(ghost.error.is_some());
        assert!(ghost.workspaces.is_empty());
    }

    #[tokio::test]
    async fn test_skips_unsupported_remotes_and_dedups_names() {
        let vcs = Arc::new(FakeVcs::new());
        for (path, url) in [
            ("/w/one/tool", "https://github.com/a/tool.git"),
            ("/w/two/tool", "https://gitlab.com/b/tool"),
            ("/w/local", "file:///srv/git/local.git"),
        ] {
            let p = Utf8Path::new(path);
            vcs.add_repo(p, &[("origin", url)]);
            vcs.add_change(p, FakeChange::new("x"), true);
            vcs.set_head(p, DEFAULT_WORKSPACE, "x");
        }

        let enumeration = WorkspaceEnumerator::new(vcs, "/w")
            .with_workers(2)
            .enumerate(&[repo("/w/local", &[]), repo("/w/one/tool", &[]), repo("/w/two/tool", &[])])
            .await
            .unwrap();
        let names: Vec<&str> = enumeration.repositories.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["tool", "tool-1"]);
    }
}
