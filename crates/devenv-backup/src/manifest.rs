//! Backup manifest format
//!
//! One manifest describes one named snapshot of a machine: every repository
//! with its workspaces, the changes that still need pushing, and (depending
//! on the schema version) captured loose files and symlinks.

use chrono::{DateTime, Utc};
use devenv_core::paths::validate_relative_path;
use devenv_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Name of the default workspace every repository has
pub const DEFAULT_WORKSPACE: &str = "default";

/// Manifest schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum ManifestVersion {
    /// Repositories and workspaces only
    V1,
    /// Adds captured files
    V2,
    /// Adds symlinks
    V3,
}

/// Optional sections a schema version carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections {
    pub files: bool,
    pub symlinks: bool,
}

const VERSION_TABLE: &[(u32, ManifestVersion, Sections)] = &[
    (1, ManifestVersion::V1, Sections { files: false, symlinks: false }),
    (2, ManifestVersion::V2, Sections { files: true, symlinks: false }),
    (3, ManifestVersion::V3, Sections { files: true, symlinks: true }),
];

impl ManifestVersion {
    pub const LATEST: ManifestVersion = ManifestVersion::V3;

    pub fn from_number(number: u32) -> Option<Self> {
        VERSION_TABLE
            .iter()
            .find(|(n, _, _)| *n == number)
            .map(|(_, version, _)| *version)
    }

    pub fn number(self) -> u32 {
        self.entry().0
    }

    pub fn sections(self) -> Sections {
        self.entry().2
    }

    fn entry(self) -> &'static (u32, ManifestVersion, Sections) {
        // Every variant has a row
        VERSION_TABLE
            .iter()
            .find(|(_, version, _)| *version == self)
            .unwrap_or(&VERSION_TABLE[0])
    }
}

impl From<ManifestVersion> for u32 {
    fn from(version: ManifestVersion) -> Self {
        version.number()
    }
}

impl TryFrom<u32> for ManifestVersion {
    type Error = String;

    fn try_from(number: u32) -> std::result::Result<Self, Self::Error> {
        Self::from_number(number).ok_or_else(|| format!("unsupported manifest version {}", number))
    }
}

impl fmt::Display for ManifestVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Root document for one backup snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: ManifestVersion,

    /// Machine the backup is namespaced under
    pub machine: String,

    /// Raw hostname of the originating host
    pub hostname: String,

    pub captured_at: DateTime<Utc>,

    /// Root every recorded path is relative to, as it was on the source machine
    pub root_dir: String,

    /// Tool and version that wrote the manifest
    pub created_by: String,

    /// Free text shown to the operator before restoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_instructions: Option<String>,

    pub repositories: Vec<RepositoryEntry>,

    /// Work that is not on the remote trunk yet
    #[serde(default)]
    pub uncommitted: Vec<UncommittedChange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<CapturedFile>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlinks: Option<Vec<SymlinkEntry>>,
}

/// One version-controlled repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    /// Unique name derived from the clone URL
    pub name: String,

    /// Clone location relative to the root
    pub path: String,

    /// URL the repository is re-cloned from
    pub remote_url: String,

    #[serde(default)]
    pub remotes: BTreeMap<String, String>,

    #[serde(default)]
    pub workspaces: Vec<WorkspaceEntry>,

    /// Set when the repository could not be read during enumeration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepositoryEntry {
    pub fn default_workspace(&self) -> Option<&WorkspaceEntry> {
        self.workspaces.iter().find(|ws| ws.name == DEFAULT_WORKSPACE)
    }

    /// Workspaces other than `default`
    pub fn secondary_workspaces(&self) -> impl Iterator<Item = &WorkspaceEntry> {
        self.workspaces.iter().filter(|ws| ws.name != DEFAULT_WORKSPACE)
    }

    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }
}

/// One working-copy view into a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub name: String,

    /// Directory relative to the root
    pub path: String,

    pub change_id: String,

    #[serde(default)]
    pub commit_id: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,

    /// Not on trunk and carries modifications or a description
    #[serde(default)]
    pub is_uncommitted: bool,
}

/// Loose file captured outside version control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFile {
    /// Path relative to the root
    pub path: String,
    pub size: u64,
    /// Lowercase hex SHA-256 of the content
    pub content_hash: String,
}

/// Symlink recreated on restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkEntry {
    /// Link location relative to the root
    pub path: String,
    /// Link target relative to the root
    pub target: String,
}

/// A change that is not yet part of the remote trunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedChange {
    pub repository: String,
    pub workspace: String,
    pub change_id: String,
    #[serde(default)]
    pub commit_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,
}

/// Suggested action before backing up, derived from uncommitted changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparationStep {
    Describe {
        repository: String,
        workspace: String,
        change_id: String,
    },
    Bookmark {
        repository: String,
        workspace: String,
        change_id: String,
    },
    Push {
        repository: String,
        workspace: String,
        change_id: String,
        bookmark: Option<String>,
    },
}

impl PreparationStep {
    pub fn change_id(&self) -> &str {
        match self {
            Self::Describe { change_id, .. }
            | Self::Bookmark { change_id, .. }
            | Self::Push { change_id, .. } => change_id,
        }
    }

    pub fn scope(&self) -> String {
        match self {
            Self::Describe { repository, workspace, .. }
            | Self::Bookmark { repository, workspace, .. }
            | Self::Push { repository, workspace, .. } => format!("{}/{}", repository, workspace),
        }
    }
}

impl fmt::Display for PreparationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Describe { change_id, .. } => {
                write!(f, "jj describe -r {} -m \"<message>\"", change_id)
            }
            Self::Bookmark { change_id, .. } => {
                write!(f, "jj bookmark create <name> -r {}", change_id)
            }
            Self::Push {
                bookmark: Some(bookmark),
                ..
            } => write!(f, "jj git push -b {}", bookmark),
            Self::Push { change_id, .. } => write!(f, "jj git push -c {}", change_id),
        }
    }
}

impl Manifest {
    /// Empty manifest stamped with the current time
    pub fn new(
        version: ManifestVersion,
        machine: impl Into<String>,
        hostname: impl Into<String>,
        root_dir: impl Into<String>,
    ) -> Self {
        let sections = version.sections();
        Self {
            version,
            machine: machine.into(),
            hostname: hostname.into(),
            captured_at: Utc::now(),
            root_dir: root_dir.into(),
            created_by: format!("devenv v{}", env!("CARGO_PKG_VERSION")),
            agent_instructions: None,
            repositories: Vec::new(),
            uncommitted: Vec::new(),
            files: sections.files.then(Vec::new),
            symlinks: sections.symlinks.then(Vec::new),
        }
    }

    /// Pretty JSON in canonical order
    pub fn to_json(&self) -> Result<String> {
        let mut canonical = self.clone();
        canonical.normalize();
        Ok(serde_json::to_string_pretty(&canonical)?)
    }

    /// Parse and validate a downloaded manifest
    ///
    /// The version is read first and decides which optional sections are
    /// honoured; sections a version does not define are dropped.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::validation(format!("manifest is not valid JSON: {}", e)))?;

        let number = value
            .get("version")
            .ok_or_else(|| Error::validation("missing required field 'version'"))?
            .as_u64()
            .ok_or_else(|| Error::validation("'version' must be a positive integer"))?;
        let version = u32::try_from(number)
            .ok()
            .and_then(ManifestVersion::from_number)
            .ok_or_else(|| Error::validation(format!("unsupported manifest version {}", number)))?;

        let mut manifest: Manifest =
            serde_json::from_value(value).map_err(|e| Error::validation(e.to_string()))?;

        let sections = version.sections();
        if !sections.files {
            manifest.files = None;
        }
        if !sections.symlinks {
            manifest.symlinks = None;
        }

        manifest.validate()?;
        Ok(manifest)
    }

    /// Sort every collection so unchanged state serialises identically
    pub fn normalize(&mut self) {
        self.repositories.sort_by(|a, b| a.name.cmp(&b.name));
        for repo in &mut self.repositories {
            repo.workspaces.sort_by(|a, b| {
                (a.name != DEFAULT_WORKSPACE, &a.name).cmp(&(b.name != DEFAULT_WORKSPACE, &b.name))
            });
        }
        self.uncommitted.sort_by(|a, b| {
            (&a.repository, &a.workspace, &a.change_id).cmp(&(&b.repository, &b.workspace, &b.change_id))
        });
        if let Some(files) = &mut self.files {
            files.sort_by(|a, b| a.path.cmp(&b.path));
        }
        if let Some(symlinks) = &mut self.symlinks {
            symlinks.sort_by(|a, b| a.path.cmp(&b.path));
        }
    }

    /// Structural checks run before any restore side effect
    pub fn validate(&self) -> Result<()> {
        if self.machine.trim().is_empty() {
            return Err(Error::validation("machine must not be empty"));
        }
        if self.root_dir.trim().is_empty() {
            return Err(Error::validation("root_dir must not be empty"));
        }

        let sections = self.version.sections();
        if self.files.is_some() && !sections.files {
            return Err(Error::validation(format!(
                "version {} manifests cannot carry files",
                self.version
            )));
        }
        if self.symlinks.is_some() && !sections.symlinks {
            return Err(Error::validation(format!(
                "version {} manifests cannot carry symlinks",
                self.version
            )));
        }

        let mut names = BTreeSet::new();
        let mut workspace_paths = BTreeSet::new();
        for repo in &self.repositories {
            if repo.name.trim().is_empty() {
                return Err(Error::validation("repository name must not be empty"));
            }
            if !names.insert(repo.name.as_str()) {
                return Err(Error::validation(format!("duplicate repository '{}'", repo.name)));
            }
            check_path(&repo.path, &format!("repository '{}'", repo.name))?;

            if repo.error.is_some() {
                continue;
            }
            if repo.remote_url.trim().is_empty() {
                return Err(Error::validation(format!(
                    "repository '{}' has no remote URL",
                    repo.name
                )));
            }

            let defaults = repo
                .workspaces
                .iter()
                .filter(|ws| ws.name == DEFAULT_WORKSPACE)
                .count();
            if defaults != 1 {
                return Err(Error::validation(format!(
                    "repository '{}' must have exactly one default workspace, found {}",
                    repo.name, defaults
                )));
            }

            let mut ws_names = BTreeSet::new();
            for ws in &repo.workspaces {
                let scope = format!("{}/{}", repo.name, ws.name);
                if ws.name.trim().is_empty() {
                    return Err(Error::validation(format!(
                        "repository '{}' has a workspace without a name",
                        repo.name
                    )));
                }
                if !ws_names.insert(ws.name.as_str()) {
                    return Err(Error::validation(format!("duplicate workspace {}", scope)));
                }
                if ws.change_id.trim().is_empty() {
                    return Err(Error::validation(format!("workspace {} has no change_id", scope)));
                }
                check_path(&ws.path, &format!("workspace {}", scope))?;
                if !workspace_paths.insert(ws.path.as_str()) {
                    return Err(Error::validation(format!(
                        "workspace path '{}' is used more than once",
                        ws.path
                    )));
                }
            }
        }

        for file in self.files.iter().flatten() {
            check_path(&file.path, "file")?;
            if !is_sha256_hex(&file.content_hash) {
                return Err(Error::validation(format!(
                    "file '{}' has an invalid content_hash",
                    file.path
                )));
            }
        }

        for link in self.symlinks.iter().flatten() {
            check_path(&link.path, "symlink")?;
            check_path(&link.target, &format!("symlink '{}' target", link.path))?;
        }

        Ok(())
    }

    /// Describe, bookmark and push suggestions for uncommitted work
    ///
    /// Built only from `uncommitted`, which never holds trunk ancestors.
    pub fn preparation_steps(&self) -> Vec<PreparationStep> {
        let mut steps = Vec::new();
        for change in &self.uncommitted {
            let repository = change.repository.clone();
            let workspace = change.workspace.clone();
            let change_id = change.change_id.clone();
            if change.description.trim().is_empty() {
                steps.push(PreparationStep::Describe {
                    repository: repository.clone(),
                    workspace: workspace.clone(),
                    change_id: change_id.clone(),
                });
            }
            if change.bookmark.is_none() {
                steps.push(PreparationStep::Bookmark {
                    repository: repository.clone(),
                    workspace: workspace.clone(),
                    change_id: change_id.clone(),
                });
            }
            steps.push(PreparationStep::Push {
                repository,
                workspace,
                change_id,
                bookmark: change.bookmark.clone(),
            });
        }
        steps
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryEntry> {
        self.repositories.iter().find(|r| r.name == name)
    }

    pub fn workspace_count(&self) -> usize {
        self.repositories.iter().map(|r| r.workspaces.len()).sum()
    }

    pub fn files(&self) -> &[CapturedFile] {
        self.files.as_deref().unwrap_or_default()
    }

    pub fn symlinks(&self) -> &[SymlinkEntry] {
        self.symlinks.as_deref().unwrap_or_default()
    }

    /// Total size of captured files
    pub fn files_size(&self) -> u64 {
        self.files().iter().map(|f| f.size).sum()
    }
}

fn check_path(path: &str, what: &str) -> Result<()> {
    validate_relative_path(path)
        .map(|_| ())
        .map_err(|e| Error::validation(format!("{} path '{}': {}", what, path, e)))
}

fn is_sha256_hex(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Lowercase hex SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
