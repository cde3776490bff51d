//! In-memory [`Vcs`] used by tests and dry runs

use super::{primary_remote, ChangeInfo, Remotes, Vcs, VcsError, VcsResult, DEFAULT_WORKSPACE};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A change in the fake history graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeChange {
    pub change_id: String,
    pub commit_id: String,
    pub description: String,
    pub is_empty: bool,
    pub bookmark: Option<String>,
    pub parent: Option<String>,
    /// Reachable from a remote bookmark
    pub pushed: bool,
}

impl FakeChange {
    /// Empty, undescribed change
    pub fn new(change_id: impl Into<String>) -> Self {
        let change_id = change_id.into();
        Self {
            commit_id: format!("{}0c0ffee", change_id),
            change_id,
            description: String::new(),
            is_empty: true,
            bookmark: None,
            parent: None,
            pushed: false,
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the change as carrying file modifications
    pub fn modified(mut self) -> Self {
        self.is_empty = false;
        self
    }

    pub fn with_bookmark(mut self, bookmark: impl Into<String>) -> Self {
        self.bookmark = Some(bookmark.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn pushed(mut self) -> Self {
        self.pushed = true;
        self
    }

    fn info(&self) -> ChangeInfo {
        ChangeInfo {
            change_id: self.change_id.clone(),
            commit_id: self.commit_id.clone(),
            description: self.description.clone(),
            is_empty: self.is_empty,
            bookmark: self.bookmark.clone(),
        }
    }
}

/// Contents a remote URL serves to `clone_repo`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeRemote {
    pub changes: BTreeMap<String, FakeChange>,
    pub trunk: BTreeSet<String>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_change(mut self, change: FakeChange, on_trunk: bool) -> Self {
        if on_trunk {
            self.trunk.insert(change.change_id.clone());
        }
        self.changes.insert(change.change_id.clone(), change);
        self
    }
}

#[derive(Debug, Clone, Default)]
struct FakeRepo {
    remotes: Remotes,
    changes: BTreeMap<String, FakeChange>,
    trunk: BTreeSet<String>,
    /// workspace name -> (path, checked-out change)
    workspaces: BTreeMap<String, (Utf8PathBuf, Option<String>)>,
}

#[derive(Debug, Default)]
struct State {
    repos: BTreeMap<Utf8PathBuf, FakeRepo>,
    /// workspace path -> (repository path, workspace name)
    workspaces: BTreeMap<Utf8PathBuf, (Utf8PathBuf, String)>,
    published: BTreeMap<String, FakeRemote>,
    stale: BTreeSet<Utf8PathBuf>,
    divergent: BTreeSet<Utf8PathBuf>,
    failing_clones: BTreeSet<String>,
    failing_ancestry: BTreeSet<String>,
    clone_delays: BTreeMap<String, Duration>,
    calls: Vec<String>,
    next_id: u64,
}

impl State {
    fn locate(&self, path: &Utf8Path) -> VcsResult<(&FakeRepo, &str)> {
        let (repo_path, name) = self
            .workspaces
            .get(path)
            .ok_or_else(|| VcsError::command_failed("workspace root", path.as_str(), "There is no jj repo in \".\""))?;
        let repo = self
            .repos
            .get(repo_path)
            .ok_or_else(|| VcsError::command_failed("workspace root", path.as_str(), "repository store is missing"))?;
        Ok((repo, name.as_str()))
    }

    fn locate_mut(&mut self, path: &Utf8Path) -> VcsResult<(&mut FakeRepo, String)> {
        let (repo_path, name) = self
            .workspaces
            .get(path)
            .cloned()
            .ok_or_else(|| VcsError::command_failed("workspace root", path.as_str(), "There is no jj repo in \".\""))?;
        let repo = self
            .repos
            .get_mut(&repo_path)
            .ok_or_else(|| VcsError::command_failed("workspace root", path.as_str(), "repository store is missing"))?;
        Ok((repo, name))
    }

    fn fresh_change(&mut self) -> FakeChange {
        self.next_id += 1;
        FakeChange::new(format!("fresh{:04}", self.next_id))
    }
}

/// Scripted repository graph standing in for `jj`
///
/// Repositories are registered by primary path; workspaces by their own
/// path. `clone_repo` serves whatever was [`publish`](FakeVcs::publish)ed for
/// the clone URL and lays down a minimal `.jj` tree on disk so discovery can
/// find the result. Only mutating calls are recorded in [`calls`](FakeVcs::calls).
#[derive(Debug, Default)]
pub struct FakeVcs {
    state: Mutex<State>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a repository whose default workspace lives at `path`
    pub fn add_repo(&self, path: impl Into<Utf8PathBuf>, remotes: &[(&str, &str)]) {
        let path = path.into();
        let mut state = self.lock();
        let repo = FakeRepo {
            remotes: remotes
                .iter()
                .map(|(name, url)| (name.to_string(), url.to_string()))
                .collect(),
            workspaces: BTreeMap::from([(DEFAULT_WORKSPACE.to_string(), (path.clone(), None))]),
            ..FakeRepo::default()
        };
        state.repos.insert(path.clone(), repo);
        state
            .workspaces
            .insert(path.clone(), (path, DEFAULT_WORKSPACE.to_string()));
    }

    /// Add `change` to the repository's history, optionally as part of trunk
    pub fn add_change(&self, repo: &Utf8Path, change: FakeChange, on_trunk: bool) {
        let mut state = self.lock();
        if let Some(repo) = state.repos.get_mut(repo) {
            if on_trunk {
                repo.trunk.insert(change.change_id.clone());
            }
            repo.changes.insert(change.change_id.clone(), change);
        }
    }

    /// Point workspace `name` of `repo` at `change_id`
    pub fn set_head(&self, repo: &Utf8Path, name: &str, change_id: &str) {
        let mut state = self.lock();
        if let Some(ws) = state.repos.get_mut(repo).and_then(|r| r.workspaces.get_mut(name)) {
            ws.1 = Some(change_id.to_string());
        }
    }

    /// Register an extra workspace of `repo` at `path`, checked out at `change_id`
    pub fn add_workspace_at(&self, repo: &Utf8Path, path: impl Into<Utf8PathBuf>, name: &str, change_id: &str) {
        let path = path.into();
        let mut state = self.lock();
        if let Some(r) = state.repos.get_mut(repo) {
            r.workspaces
                .insert(name.to_string(), (path.clone(), Some(change_id.to_string())));
            state
                .workspaces
                .insert(path, (repo.to_path_buf(), name.to_string()));
        }
    }

    pub fn mark_stale(&self, workspace: impl Into<Utf8PathBuf>) {
        self.lock().stale.insert(workspace.into());
    }

    pub fn mark_divergent(&self, workspace: impl Into<Utf8PathBuf>) {
        self.lock().divergent.insert(workspace.into());
    }

    /// Make every clone from `url` fail
    pub fn fail_clone(&self, url: impl Into<String>) {
        self.lock().failing_clones.insert(url.into());
    }

    /// Make clones from `url` take `delay` before they complete
    pub fn delay_clone(&self, url: impl Into<String>, delay: Duration) {
        self.lock().clone_delays.insert(url.into(), delay);
    }

    /// Make trunk-ancestry checks of `change_id` fail
    pub fn fail_ancestry_check(&self, change_id: impl Into<String>) {
        self.lock().failing_ancestry.insert(change_id.into());
    }

    /// Serve `remote` for clones of `url`
    pub fn publish(&self, url: impl Into<String>, remote: FakeRemote) {
        self.lock().published.insert(url.into(), remote);
    }

    /// Full history of `repo`, as if every change had been pushed
    pub fn remote_snapshot(&self, repo: &Utf8Path) -> FakeRemote {
        let state = self.lock();
        state
            .repos
            .get(repo)
            .map(|r| FakeRemote {
                changes: r.changes.clone(),
                trunk: r.trunk.clone(),
            })
            .unwrap_or_default()
    }

    /// Change checked out in the workspace at `path`
    pub fn head(&self, path: &Utf8Path) -> Option<String> {
        let state = self.lock();
        let (repo, name) = state.locate(path).ok()?;
        repo.workspaces.get(name).and_then(|(_, head)| head.clone())
    }

    /// Names of workspaces registered for the repository at `repo`
    pub fn workspace_names(&self, repo: &Utf8Path) -> Vec<String> {
        self.lock()
            .repos
            .get(repo)
            .map(|r| r.workspaces.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Mutating calls in the order they happened
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn remotes(&self, repo: &Utf8Path) -> VcsResult<Remotes> {
        let state = self.lock();
        let (repo, _) = state.locate(repo)?;
        Ok(repo.remotes.clone())
    }

    async fn list_workspaces(&self, repo: &Utf8Path) -> VcsResult<Vec<String>> {
        let state = self.lock();
        let (repo, _) = state.locate(repo)?;
        Ok(repo.workspaces.keys().cloned().collect())
    }

    async fn workspace_name(&self, workspace: &Utf8Path) -> VcsResult<String> {
        let state = self.lock();
        let (_, name) = state.locate(workspace)?;
        Ok(name.to_string())
    }

    async fn current_change(&self, workspace: &Utf8Path) -> VcsResult<ChangeInfo> {
        let state = self.lock();
        if state.stale.contains(workspace) {
            return Err(VcsError::Stale {
                path: workspace.to_string(),
                message: "The working copy is stale (not updated since operation 1234abcd)".into(),
            });
        }
        let (repo, name) = state.locate(workspace)?;
        let head = repo
            .workspaces
            .get(name)
            .and_then(|(_, head)| head.as_deref())
            .ok_or_else(|| VcsError::Parse(format!("workspace {} has no working-copy change", name)))?;
        repo.changes
            .get(head)
            .map(FakeChange::info)
            .ok_or_else(|| VcsError::Parse(format!("unknown change {}", head)))
    }

    async fn refresh_if_stale(&self, workspace: &Utf8Path) -> VcsResult<bool> {
        let mut state = self.lock();
        state.calls.push(format!("refresh {}", workspace));
        state.stale.remove(workspace);
        Ok(state.divergent.contains(workspace))
    }

    async fn is_ancestor_of_trunk(&self, workspace: &Utf8Path, change_id: &str) -> VcsResult<bool> {
        let state = self.lock();
        if state.failing_ancestry.contains(change_id) {
            return Err(VcsError::command_failed(
                format!("log -r '{} & ::trunk()'", change_id),
                workspace.as_str(),
                "Error: Revision `trunk()` doesn't exist",
            ));
        }
        let (repo, _) = state.locate(workspace)?;
        Ok(repo.trunk.contains(change_id))
    }

    async fn unpushed_changes(&self, workspace: &Utf8Path) -> VcsResult<Vec<ChangeInfo>> {
        let state = self.lock();
        let (repo, name) = state.locate(workspace)?;
        let mut next = repo.workspaces.get(name).and_then(|(_, head)| head.clone());
        let mut unpushed = Vec::new();
        while let Some(id) = next {
            let Some(change) = repo.changes.get(&id) else {
                break;
            };
            if change.pushed || repo.trunk.contains(&id) {
                break;
            }
            unpushed.push(change.info());
            next = change.parent.clone();
        }
        Ok(unpushed)
    }

    async fn workspace_exists(&self, path: &Utf8Path) -> bool {
        self.lock().workspaces.contains_key(path)
    }

    async fn clone_repo(&self, remotes: &Remotes, dest: &Utf8Path) -> VcsResult<()> {
        let (_, url) = primary_remote(remotes)
            .ok_or_else(|| VcsError::Parse("repository has no remotes".to_string()))?;
        let url = url.to_string();
        let delay = self.lock().clone_delays.get(&url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let remote = {
            let mut state = self.lock();
            state.calls.push(format!("clone {} {}", url, dest));
            if state.failing_clones.contains(&url) {
                return Err(VcsError::command_failed(
                    format!("git clone --colocate {} {}", url, dest),
                    dest.as_str(),
                    "Error: could not read from remote repository",
                ));
            }
            if state.repos.contains_key(dest) {
                return Err(VcsError::command_failed(
                    "git clone",
                    dest.as_str(),
                    "Destination path exists and is not an empty directory",
                ));
            }
            state.published.get(&url).cloned().ok_or_else(|| {
                VcsError::command_failed("git clone", dest.as_str(), format!("repository {} not found", url))
            })?
        };

        tokio::fs::create_dir_all(dest.join(".jj").join("repo")).await?;

        let mut state = self.lock();
        let mut working_copy = state.fresh_change();
        working_copy.parent = remote.trunk.iter().next().cloned();
        let mut changes = remote.changes;
        let head = working_copy.change_id.clone();
        changes.insert(head.clone(), working_copy);

        state.repos.insert(
            dest.to_path_buf(),
            FakeRepo {
                remotes: remotes.clone(),
                changes,
                trunk: remote.trunk,
                workspaces: BTreeMap::from([(
                    DEFAULT_WORKSPACE.to_string(),
                    (dest.to_path_buf(), Some(head)),
                )]),
            },
        );
        state
            .workspaces
            .insert(dest.to_path_buf(), (dest.to_path_buf(), DEFAULT_WORKSPACE.to_string()));
        Ok(())
    }

    async fn add_workspace(&self, repo: &Utf8Path, path: &Utf8Path, name: &str) -> VcsResult<()> {
        {
            let mut state = self.lock();
            state.calls.push(format!("add_workspace {} {}", path, name));
            let (r, _) = state.locate(repo)?;
            if r.workspaces.contains_key(name) {
                return Err(VcsError::command_failed(
                    format!("workspace add --name {}", name),
                    repo.as_str(),
                    format!("Workspace named '{}' already exists", name),
                ));
            }
        }

        let store = repo.join(".jj").join("repo");
        tokio::fs::create_dir_all(path.join(".jj")).await?;
        tokio::fs::write(path.join(".jj").join("repo"), store.as_str()).await?;

        let mut state = self.lock();
        let working_copy = state.fresh_change();
        let head = working_copy.change_id.clone();
        let (r, _) = state.locate_mut(repo)?;
        let repo_path = r
            .workspaces
            .get(DEFAULT_WORKSPACE)
            .map(|(p, _)| p.clone())
            .unwrap_or_else(|| repo.to_path_buf());
        r.changes.insert(head.clone(), working_copy);
        r.workspaces
            .insert(name.to_string(), (path.to_path_buf(), Some(head)));
        state
            .workspaces
            .insert(path.to_path_buf(), (repo_path, name.to_string()));
        Ok(())
    }

    async fn checkout(&self, workspace: &Utf8Path, change_id: &str) -> VcsResult<()> {
        let mut state = self.lock();
        state.calls.push(format!("checkout {} {}", workspace, change_id));
        let (repo, name) = state.locate_mut(workspace)?;
        if !repo.changes.contains_key(change_id) {
            return Err(VcsError::command_failed(
                format!("edit {}", change_id),
                workspace.as_str(),
                format!("Revision `{}` doesn't exist", change_id),
            ));
        }
        if let Some(ws) = repo.workspaces.get_mut(&name) {
            ws.1 = Some(change_id.to_string());
        }
        Ok(())
    }

    async fn has_divergent(&self, workspace: &Utf8Path) -> VcsResult<bool> {
        Ok(self.lock().divergent.contains(workspace))
    }
}
