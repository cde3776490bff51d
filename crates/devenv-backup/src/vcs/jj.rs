//! `jj` subprocess driver

use super::{primary_remote, ChangeInfo, Remotes, Vcs, VcsError, VcsResult, DEFAULT_WORKSPACE};
use async_trait::async_trait;
use camino::Utf8Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Remote URL prefixes accepted for cloning
pub const ALLOWED_URL_SCHEMES: &[&str] = &["https://", "http://", "git@", "ssh://", "git://"];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// One line per change: change id, commit id, empty flag, first description line
const CHANGE_TEMPLATE: &str = r#"change_id ++ "\t" ++ commit_id ++ "\t" ++ if(empty, "1", "0") ++ "\t" ++ description.first_line() ++ "\n""#;

pub fn is_supported_remote_url(url: &str) -> bool {
    ALLOWED_URL_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

/// Drives `jj --no-pager` through tokio subprocesses
///
/// Child processes are killed when their future is dropped, so the global
/// command timeout terminates in-flight calls.
#[derive(Debug, Clone)]
pub struct JjCli {
    program: String,
    timeout: Duration,
    clone_timeout: Duration,
}

impl Default for JjCli {
    fn default() -> Self {
        Self::new()
    }
}

impl JjCli {
    pub fn new() -> Self {
        Self {
            program: "jj".to_string(),
            timeout: DEFAULT_TIMEOUT,
            clone_timeout: CLONE_TIMEOUT,
        }
    }

    /// Use a different `jj` binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeouts(mut self, timeout: Duration, clone_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.clone_timeout = clone_timeout;
        self
    }

    /// Run jj in `cwd`, returning stdout on success
    async fn run(&self, args: &[&str], cwd: &Utf8Path, timeout: Duration) -> VcsResult<String> {
        let command = args.join(" ");
        debug!("Running: jj {} (in {})", command, cwd);

        let child = Command::new(&self.program)
            .arg("--no-pager")
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VcsError::ToolMissing)
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(VcsError::Timeout {
                    command,
                    seconds: timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.to_lowercase().contains("stale") {
            return Err(VcsError::Stale {
                path: cwd.to_string(),
                message: stderr,
            });
        }
        Err(VcsError::command_failed(command, cwd.as_str(), stderr))
    }

    async fn bookmark_lines(&self, workspace: &Utf8Path) -> Vec<String> {
        match self.run(&["bookmark", "list"], workspace, self.timeout).await {
            Ok(stdout) => stdout
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                debug!("bookmark list failed in {}: {}", workspace, e);
                Vec::new()
            }
        }
    }
}

/// Parse one `CHANGE_TEMPLATE` line
pub(crate) fn parse_change_line(line: &str) -> VcsResult<ChangeInfo> {
    let mut fields = line.splitn(4, '\t');
    let change_id = fields.next().unwrap_or_default().trim();
    let commit_id = fields.next().unwrap_or_default().trim();
    let empty_flag = fields.next();
    let description = fields.next().unwrap_or_default().trim();

    if change_id.is_empty() || commit_id.is_empty() || empty_flag.is_none() {
        return Err(VcsError::Parse(format!(
            "expected change_id, commit_id and empty flag, got {:?}",
            line
        )));
    }

    Ok(ChangeInfo {
        change_id: change_id.to_string(),
        commit_id: commit_id.to_string(),
        description: description.to_string(),
        is_empty: empty_flag == Some("1"),
        bookmark: None,
    })
}

/// `name[@remote]: change_id commit_id description` → (local name, change id)
pub(crate) fn parse_bookmark_line(line: &str) -> Option<(String, String)> {
    let (name_part, rest) = line.split_once(':')?;
    let name = name_part.split('@').next()?.trim();
    let change_id = rest.split_whitespace().next()?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), change_id.to_string()))
}

/// Bookmark pointing exactly at `change_id`
pub(crate) fn bookmark_for(lines: &[String], change_id: &str) -> Option<String> {
    lines.iter().find_map(|line| match parse_bookmark_line(line) {
        Some((name, id)) if id == change_id => Some(name),
        _ => None,
    })
}

/// Bookmark for an unpushed change, only when it is not already synced with its remote
pub(crate) fn unsynced_bookmark_for(lines: &[String], change_id: &str) -> Option<String> {
    let line = lines
        .iter()
        .find(|line| parse_bookmark_line(line).is_some_and(|(_, id)| id == change_id))?;
    if !line.contains('@') || line.contains("ahead by") {
        parse_bookmark_line(line).map(|(name, _)| name)
    } else {
        None
    }
}

#[async_trait]
impl Vcs for JjCli {
    async fn remotes(&self, repo: &Utf8Path) -> VcsResult<Remotes> {
        let stdout = self.run(&["git", "remote", "list"], repo, self.timeout).await?;
        Ok(stdout
            .lines()
            .filter_map(|line| {
                let (name, url) = line.trim().split_once(char::is_whitespace)?;
                Some((name.to_string(), url.trim().to_string()))
            })
            .collect())
    }

    async fn list_workspaces(&self, repo: &Utf8Path) -> VcsResult<Vec<String>> {
        let stdout = self
            .run(&["workspace", "list", "-T", r#"name ++ "\n""#], repo, self.timeout)
            .await?;
        let names: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            Ok(vec![DEFAULT_WORKSPACE.to_string()])
        } else {
            Ok(names)
        }
    }

    async fn workspace_name(&self, workspace: &Utf8Path) -> VcsResult<String> {
        let stdout = self
            .run(
                &["log", "-r", "@", "--ignore-working-copy", "-T", "working_copies", "--no-graph"],
                workspace,
                self.timeout,
            )
            .await?;
        let name = stdout.trim().trim_end_matches('@').trim();
        if name.is_empty() {
            return Err(VcsError::Parse(format!("no working copy name for {}", workspace)));
        }
        Ok(name.to_string())
    }

    async fn current_change(&self, workspace: &Utf8Path) -> VcsResult<ChangeInfo> {
        let stdout = self
            .run(&["log", "-r", "@", "--no-graph", "-T", CHANGE_TEMPLATE], workspace, self.timeout)
            .await?;
        let line = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| VcsError::Parse(format!("empty jj log output for {}", workspace)))?;

        let mut change = parse_change_line(line)?;
        let bookmarks = self.bookmark_lines(workspace).await;
        change.bookmark = bookmark_for(&bookmarks, &change.change_id);
        Ok(change)
    }

    async fn refresh_if_stale(&self, workspace: &Utf8Path) -> VcsResult<bool> {
        info!("Updating stale workspace {}", workspace);
        match self.run(&["workspace", "update-stale"], workspace, self.timeout).await {
            Ok(_) => {}
            Err(VcsError::Stale { message, .. }) => {
                return Err(VcsError::command_failed(
                    "workspace update-stale",
                    workspace.as_str(),
                    message,
                ))
            }
            Err(e) => return Err(e),
        }

        let divergent = self.has_divergent(workspace).await.unwrap_or(false);
        if divergent {
            warn!(
                "Divergent changes detected in {} after updating stale workspace",
                workspace
            );
        }
        Ok(divergent)
    }

    async fn is_ancestor_of_trunk(&self, workspace: &Utf8Path, change_id: &str) -> VcsResult<bool> {
        let revset = format!("{} & ::trunk()", change_id);
        let stdout = self
            .run(
                &["log", "-r", &revset, "--no-graph", "-T", r#"change_id ++ "\n""#],
                workspace,
                self.timeout,
            )
            .await?;
        Ok(!stdout.trim().is_empty())
    }

    async fn unpushed_changes(&self, workspace: &Utf8Path) -> VcsResult<Vec<ChangeInfo>> {
        let stdout = self
            .run(
                &["log", "-r", "remote_bookmarks()..@", "--no-graph", "-T", CHANGE_TEMPLATE],
                workspace,
                self.timeout,
            )
            .await?;
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        let bookmarks = self.bookmark_lines(workspace).await;
        stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let mut change = parse_change_line(line)?;
                change.bookmark = unsynced_bookmark_for(&bookmarks, &change.change_id);
                Ok(change)
            })
            .collect()
    }

    async fn workspace_exists(&self, path: &Utf8Path) -> bool {
        tokio::fs::metadata(path.join(".jj"))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn clone_repo(&self, remotes: &Remotes, dest: &Utf8Path) -> VcsResult<()> {
        let (clone_remote, clone_url) = primary_remote(remotes)
            .ok_or_else(|| VcsError::Parse("repository has no remotes".to_string()))?;
        if !is_supported_remote_url(clone_url) {
            return Err(VcsError::UnsupportedUrl(clone_url.to_string()));
        }

        let parent = dest
            .parent()
            .ok_or_else(|| VcsError::Parse(format!("clone destination has no parent: {}", dest)))?;
        tokio::fs::create_dir_all(parent).await?;

        info!("Cloning {} into {}", clone_url, dest);
        if let Err(e) = self
            .run(
                &["git", "clone", "--colocate", clone_url, dest.as_str()],
                parent,
                self.clone_timeout,
            )
            .await
        {
            if tokio::fs::metadata(dest).await.is_ok() {
                if let Err(cleanup) = tokio::fs::remove_dir_all(dest).await {
                    warn!("Failed to remove partial clone at {}: {}", dest, cleanup);
                }
            }
            return Err(e);
        }

        // `jj git clone` names the cloned remote "origin"
        for (name, url) in remotes {
            if name == "origin" || (clone_remote != "origin" && name == clone_remote) {
                continue;
            }
            if !is_supported_remote_url(url) {
                warn!("Not adding remote {} with unsupported URL {}", name, url);
                continue;
            }
            if let Err(e) = self
                .run(&["git", "remote", "add", name, url], dest, self.timeout)
                .await
            {
                warn!("Failed to add remote {} to {}: {}", name, dest, e);
            }
        }
        Ok(())
    }

    async fn add_workspace(&self, repo: &Utf8Path, path: &Utf8Path, name: &str) -> VcsResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.run(
            &["workspace", "add", "--colocate", path.as_str(), "--name", name],
            repo,
            self.timeout,
        )
        .await
        .map(|_| ())
    }

    async fn checkout(&self, workspace: &Utf8Path, change_id: &str) -> VcsResult<()> {
        self.run(&["edit", change_id], workspace, self.timeout).await?;

        let current = self.current_change(workspace).await?;
        if current.change_id != change_id {
            return Err(VcsError::command_failed(
                format!("edit {}", change_id),
                workspace.as_str(),
                format!("workspace is on {} after edit", current.change_id),
            ));
        }
        Ok(())
    }

    async fn has_divergent(&self, workspace: &Utf8Path) -> VcsResult<bool> {
        let stdout = self.run(&["log", "-r", "@"], workspace, self.timeout).await?;
        Ok(stdout.to_lowercase().contains("divergent"))
    }
}
