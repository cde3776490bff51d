//! Version-control seam
//!
//! Everything the engine needs from the workspace-capable VCS goes through
//! [`Vcs`]. [`JjCli`] drives the `jj` binary; [`FakeVcs`] keeps a scripted
//! repository graph in memory so the engine can be exercised without it.

mod fake;
mod jj;

pub use fake::{FakeChange, FakeRemote, FakeVcs};
pub use jj::{is_supported_remote_url, JjCli, ALLOWED_URL_SCHEMES};
pub use crate::manifest::DEFAULT_WORKSPACE;

use async_trait::async_trait;
use camino::Utf8Path;
use std::collections::BTreeMap;
use thiserror::Error;

pub type VcsResult<T> = std::result::Result<T, VcsError>;

/// Remote name to URL
pub type Remotes = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VcsError {
    /// The working copy lags the operation log and must be refreshed first
    #[error("Workspace at {path} is stale: {message}")]
    Stale { path: String, message: String },

    #[error("`jj {command}` failed in {path}: {stderr}")]
    CommandFailed {
        command: String,
        path: String,
        stderr: String,
    },

    #[error("`jj {command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("Unexpected jj output: {0}")]
    Parse(String),

    #[error("jj is not installed or not on PATH")]
    ToolMissing,

    #[error("Unsupported remote URL scheme: {0}")]
    UnsupportedUrl(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl VcsError {
    pub fn command_failed(
        command: impl Into<String>,
        path: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            path: path.into(),
            stderr: stderr.into(),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

impl From<std::io::Error> for VcsError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// State of a workspace's checked-out change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeInfo {
    pub change_id: String,
    pub commit_id: String,
    /// First line of the description
    pub description: String,
    /// No file modifications relative to the parent
    pub is_empty: bool,
    pub bookmark: Option<String>,
}

impl ChangeInfo {
    pub fn is_described(&self) -> bool {
        !self.description.trim().is_empty()
    }

    /// Carries user work: modified files or a description
    pub fn has_content(&self) -> bool {
        !self.is_empty || self.is_described()
    }
}

/// Narrow interface to a workspace-capable version-control tool
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Remotes of the repository at `repo`
    async fn remotes(&self, repo: &Utf8Path) -> VcsResult<Remotes>;

    /// Names of all workspaces registered with the repository
    async fn list_workspaces(&self, repo: &Utf8Path) -> VcsResult<Vec<String>>;

    /// Name of the workspace rooted at `workspace`
    async fn workspace_name(&self, workspace: &Utf8Path) -> VcsResult<String>;

    /// Change currently checked out in `workspace`; [`VcsError::Stale`] when a refresh is needed
    async fn current_change(&self, workspace: &Utf8Path) -> VcsResult<ChangeInfo>;

    /// Bring a stale workspace up to date; returns whether divergent changes remain
    async fn refresh_if_stale(&self, workspace: &Utf8Path) -> VcsResult<bool>;

    /// Whether `change_id` is an ancestor of, or equal to, the remote trunk
    async fn is_ancestor_of_trunk(&self, workspace: &Utf8Path, change_id: &str) -> VcsResult<bool>;

    /// Changes between the remote bookmarks and the working copy
    async fn unpushed_changes(&self, workspace: &Utf8Path) -> VcsResult<Vec<ChangeInfo>>;

    /// Whether a workspace (or primary clone) already exists at `path`
    async fn workspace_exists(&self, path: &Utf8Path) -> bool;

    /// Clone from `origin` (else the first remote) into `dest`, then add the other remotes
    async fn clone_repo(&self, remotes: &Remotes, dest: &Utf8Path) -> VcsResult<()>;

    /// Create workspace `name` at `path`, run from the repository at `repo`
    async fn add_workspace(&self, repo: &Utf8Path, path: &Utf8Path, name: &str) -> VcsResult<()>;

    /// Make `change_id` the working-copy change of `workspace` and verify it took
    async fn checkout(&self, workspace: &Utf8Path, change_id: &str) -> VcsResult<()>;

    async fn has_divergent(&self, workspace: &Utf8Path) -> VcsResult<bool>;
}

/// The remote to clone from: `origin` when present, else the first by name
pub fn primary_remote(remotes: &Remotes) -> Option<(&str, &str)> {
    remotes
        .get_key_value("origin")
        .or_else(|| remotes.iter().next())
        .map(|(name, url)| (name.as_str(), url.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_remote_prefers_origin() {
        let mut remotes = Remotes::new();
        remotes.insert("upstream".into(), "https://example.com/up.git".into());
        assert_eq!(primary_remote(&remotes), Some(("upstream", "https://example.com/up.git")));

        remotes.insert("origin".into(), "git@example.com:me/fork.git".into());
        assert_eq!(primary_remote(&remotes), Some(("origin", "git@example.com:me/fork.git")));

        assert_eq!(primary_remote(&Remotes::new()), None);
    }

    #[test]
    fn test_change_content() {
        let change = ChangeInfo {
            change_id: "abc".into(),
            commit_id: "def".into(),
            description: String::new(),
            is_empty: true,
            bookmark: None,
        };
        assert!(!change.has_content());
        assert!(ChangeInfo { description: "WIP".into(), ..change.clone() }.has_content());
        assert!(ChangeInfo { is_empty: false, ..change }.has_content());
    }
}
