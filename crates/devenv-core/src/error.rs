//! Error types for devenv-core

use std::fmt;
use thiserror::Error;

/// Result type alias using devenv-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the enumerator, sync engine and restore orchestrator
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing manifest content
    #[error("Invalid manifest: {message}")]
    Validation { message: String },

    /// Workspace lags its backing store and refreshing it failed
    #[error("Workspace at {path} is stale and could not be refreshed: {message}")]
    StaleWorkspace { path: String, message: String },

    /// Object storage or a version-control remote could not be reached
    #[error("Remote unreachable during {operation}: {message}")]
    UnreachableRemote {
        operation: String,
        message: String,
        /// Whether the failure was classified as transient (and already retried)
        transient: bool,
    },

    /// One or more repositories/workspaces failed to restore
    #[error(transparent)]
    PartialRestore(#[from] PartialRestoreError),

    /// The global operation budget ran out
    #[error("Operation timed out after {seconds}s while {step}")]
    TimeoutExceeded { seconds: u64, step: String },

    /// Machine or backup name failed validation
    #[error("Invalid {field}: {reason}")]
    InvalidName { field: String, reason: String },

    /// A path escaped its root or was otherwise unsafe
    #[error("Unsafe path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Explicitly requested configuration file does not exist
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration values are inconsistent
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a manifest validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a stale workspace error
    pub fn stale_workspace(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StaleWorkspace {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unreachable remote error
    pub fn unreachable(
        operation: impl Into<String>,
        message: impl Into<String>,
        transient: bool,
    ) -> Self {
        Self::UnreachableRemote {
            operation: operation.into(),
            message: message.into(),
            transient,
        }
    }

    /// Create a timeout error naming the step that was in flight
    pub fn timeout(seconds: u64, step: impl Into<String>) -> Self {
        Self::TimeoutExceeded {
            seconds,
            step: step.into(),
        }
    }

    /// Create an invalid name error
    pub fn invalid_name(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsafe path error
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole command
    ///
    /// Validation and authentication failures mean continuing would operate on
    /// untrusted state. Everything else is scoped to one repository or workspace.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Validation { .. } | Self::InvalidPath { .. } | Self::TimeoutExceeded { .. } => {
                true
            }
            Self::UnreachableRemote { transient, .. } => !transient,
            _ => false,
        }
    }
}

/// Stage of the restore state machine a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestoreStage {
    Validate,
    Clone,
    Checkout,
    Workspace,
    Files,
    Symlinks,
    Sessions,
}

impl RestoreStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Clone => "clone",
            Self::Checkout => "checkout",
            Self::Workspace => "workspace",
            Self::Files => "files",
            Self::Symlinks => "symlinks",
            Self::Sessions => "sessions",
        }
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failure recorded during restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    /// Repository the failure belongs to, if any
    pub repository: Option<String>,
    /// Workspace the failure belongs to, if any
    pub workspace: Option<String>,
    pub stage: RestoreStage,
    pub message: String,
}

impl RestoreFailure {
    pub fn repository(
        repository: impl Into<String>,
        stage: RestoreStage,
        message: impl Into<String>,
    ) -> Self {
        Self {
            repository: Some(repository.into()),
            workspace: None,
            stage,
            message: message.into(),
        }
    }

    pub fn workspace(
        repository: impl Into<String>,
        workspace: impl Into<String>,
        stage: RestoreStage,
        message: impl Into<String>,
    ) -> Self {
        Self {
            repository: Some(repository.into()),
            workspace: Some(workspace.into()),
            stage,
            message: message.into(),
        }
    }

    /// Failure not tied to a repository (files, symlinks, sessions)
    pub fn general(stage: RestoreStage, message: impl Into<String>) -> Self {
        Self {
            repository: None,
            workspace: None,
            stage,
            message: message.into(),
        }
    }

    /// `repo/workspace` label used in reports
    pub fn scope(&self) -> String {
        match (&self.repository, &self.workspace) {
            (Some(repo), Some(ws)) => format!("{}/{}", repo, ws),
            (Some(repo), None) => repo.clone(),
            (None, _) => self.stage.as_str().to_string(),
        }
    }
}

impl fmt::Display for RestoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.scope(), self.stage, self.message)
    }
}

/// Aggregate of every failure encountered during one restore run
#[derive(Error, Debug, Clone, Default, PartialEq, Eq)]
#[error("{} restore failure(s):{}", .failures.len(), render_failures(.failures))]
pub struct PartialRestoreError {
    pub failures: Vec<RestoreFailure>,
}

impl PartialRestoreError {
    pub fn new(failures: Vec<RestoreFailure>) -> Self {
        Self { failures }
    }

    /// Failures grouped under a repository name
    pub fn for_repository<'a>(&'a self, repository: &'a str) -> impl Iterator<Item = &'a RestoreFailure> {
        self.failures
            .iter()
            .filter(move |f| f.repository.as_deref() == Some(repository))
    }
}

fn render_failures(failures: &[RestoreFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("\n  - {}", f))
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_restore_renders_every_failure() {
        let err = PartialRestoreError::new(vec![
            RestoreFailure::repository("repoA", RestoreStage::Clone, "network down"),
            RestoreFailure::workspace("repoB", "feature", RestoreStage::Checkout, "unknown change"),
        ]);

        let rendered = err.to_string();
        assert!(rendered.starts_with("2 restore failure(s):"));
        assert!(rendered.contains("repoA [clone]: network down"));
        assert!(rendered.contains("repoB/feature [checkout]: unknown change"));
    }

    #[test]
    fn test_for_repository_filters() {
        let err = PartialRestoreError::new(vec![
            RestoreFailure::repository("repoA", RestoreStage::Clone, "x"),
            RestoreFailure::general(RestoreStage::Files, "y"),
        ]);
        assert_eq!(err.for_repository("repoA").count(), 1);
        assert_eq!(err.for_repository("repoB").count(), 0);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::validation("bad").is_fatal());
        assert!(Error::unreachable("put", "AccessDenied", false).is_fatal());
        assert!(!Error::unreachable("put", "SlowDown", true).is_fatal());
        assert!(!Error::stale_workspace("/w", "x").is_fatal());
    }
}
