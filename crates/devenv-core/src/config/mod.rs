//! Configuration loading and management
//!
//! Values are layered, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. YAML config file (`--config`, `$DEVENV_CONFIG`, or the platform config dir)
//! 3. Environment variables (`DEVENV_*`, resolved by the CLI)
//! 4. Command-line flags

mod loader;

pub use loader::{default_config_path, ConfigLoader, CONFIG_ENV_VAR};

use crate::error::{Error, Result};
use crate::naming::{default_machine_name, validate_machine_name, validate_safe_name};
use crate::types::RetryPolicy;
use crate::utils::{default_workers, get_home_dir};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default global operation budget
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Claude Code data directory, relative to home
pub const DEFAULT_CLAUDE_DIR: &str = ".dotfiles/.claude";

/// OpenCode storage directory, relative to home
pub const DEFAULT_OPENCODE_DIR: &str = ".local/share/opencode/storage";

/// On-disk `devenv.yaml`; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigFile {
    /// Backup base URI (`s3://bucket/prefix/` or `file:///dir`)
    pub base: Option<String>,
    pub machine: Option<String>,
    pub user: Option<String>,
    /// Root the manifest is relative to; `~` expands to home
    pub root_dir: Option<Utf8PathBuf>,
    pub timeout_secs: Option<u64>,
    pub workers: Option<usize>,
    pub claude_dir: Option<Utf8PathBuf>,
    pub opencode_dir: Option<Utf8PathBuf>,
    pub retry: Option<RetryPolicy>,
}

/// Values supplied by flags or environment variables
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base: Option<String>,
    pub machine: Option<String>,
    pub user: Option<String>,
    pub root_dir: Option<Utf8PathBuf>,
    pub timeout_secs: Option<u64>,
    pub claude_dir: Option<Utf8PathBuf>,
    pub opencode_dir: Option<Utf8PathBuf>,
}

/// Resolved configuration threaded through every component of one command
#[derive(Debug, Clone, PartialEq)]
pub struct DevenvConfig {
    pub machine: String,
    pub base: Option<String>,
    pub user: Option<String>,
    pub root_dir: Utf8PathBuf,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub workers: usize,
    pub claude_dir: Utf8PathBuf,
    pub opencode_dir: Utf8PathBuf,
}

impl DevenvConfig {
    /// Defaults rooted at `root_dir` for `machine`, without consulting the environment
    pub fn for_machine(machine: impl Into<String>, root_dir: impl Into<Utf8PathBuf>) -> Self {
        let root_dir = root_dir.into();
        Self {
            machine: machine.into(),
            base: None,
            user: None,
            claude_dir: root_dir.join(DEFAULT_CLAUDE_DIR),
            opencode_dir: root_dir.join(DEFAULT_OPENCODE_DIR),
            root_dir,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            workers: default_workers(),
        }
    }

    /// Merge defaults, a config file and overrides, then validate
    pub fn resolve(file: ConfigFile, overrides: ConfigOverrides) -> Result<Self> {
        let home = get_home_dir()?;
        Self::resolve_with_home(file, overrides, &home)
    }

    /// [`resolve`](Self::resolve) with an explicit home directory
    pub fn resolve_with_home(
        file: ConfigFile,
        overrides: ConfigOverrides,
        home: &Utf8Path,
    ) -> Result<Self> {
        let machine = overrides
            .machine
            .or(file.machine)
            .unwrap_or_else(default_machine_name);

        let root_dir = overrides
            .root_dir
            .or(file.root_dir)
            .map(|p| expand_home(&p, home))
            .unwrap_or_else(|| home.to_owned());

        let claude_dir = overrides
            .claude_dir
            .or(file.claude_dir)
            .map(|p| expand_home(&p, home))
            .unwrap_or_else(|| home.join(DEFAULT_CLAUDE_DIR));

        let opencode_dir = overrides
            .opencode_dir
            .or(file.opencode_dir)
            .map(|p| expand_home(&p, home))
            .unwrap_or_else(|| home.join(DEFAULT_OPENCODE_DIR));

        let timeout_secs = overrides
            .timeout_secs
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let config = Self {
            machine,
            base: overrides.base.or(file.base).filter(|b| !b.trim().is_empty()),
            user: overrides.user.or(file.user).filter(|u| !u.trim().is_empty()),
            root_dir,
            timeout: Duration::from_secs(timeout_secs),
            retry: file.retry.unwrap_or_default(),
            workers: file.workers.unwrap_or_else(default_workers),
            claude_dir,
            opencode_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check names and numeric bounds
    pub fn validate(&self) -> Result<()> {
        validate_machine_name(&self.machine)?;
        if let Some(user) = &self.user {
            validate_safe_name(user, "user")?;
        }
        if self.timeout.is_zero() {
            return Err(Error::invalid_config("timeout must be greater than zero"));
        }
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::invalid_config("retry max-attempts must be at least 1"));
        }
        Ok(())
    }

    /// The backup base, or an error naming how to supply it
    pub fn require_base(&self) -> Result<&str> {
        self.base.as_deref().ok_or_else(|| {
            Error::invalid_config("no backup base configured (use --base or DEVENV_BASE)")
        })
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Expand a leading `~` against `home`
pub fn expand_home(path: &Utf8Path, home: &Utf8Path) -> Utf8PathBuf {
    match path.as_str().strip_prefix('~') {
        Some("") => home.to_owned(),
        Some(rest) if rest.starts_with('/') => home.join(rest.trim_start_matches('/')),
        _ => path.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> Utf8PathBuf {
        Utf8PathBuf::from("/home/dev")
    }

    #[test]
    fn test_defaults() {
        let overrides = ConfigOverrides {
            machine: Some("laptop".into()),
            ..Default::default()
        };
        let config =
            DevenvConfig::resolve_with_home(ConfigFile::default(), overrides, &home()).unwrap();

        assert_eq!(config.machine, "laptop");
        assert_eq!(config.root_dir, home());
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.claude_dir, Utf8PathBuf::from("/home/dev/.dotfiles/.claude"));
        assert_eq!(
            config.opencode_dir,
            Utf8PathBuf::from("/home/dev/.local/share/opencode/storage")
        );
        assert!(config.base.is_none());
        assert!((1..=4).contains(&config.workers));
    }

    #[test]
    fn test_overrides_beat_file() {
        let file = ConfigFile {
            base: Some("s3://from-file/".into()),
            machine: Some("file-machine".into()),
            timeout_secs: Some(30),
            root_dir: Some("~/work".into()),
            ..Default::default()
        };
        let overrides = ConfigOverrides {
            base: Some("s3://from-flag/".into()),
            timeout_secs: Some(10),
            ..Default::default()
        };
        let config = DevenvConfig::resolve_with_home(file, overrides, &home()).unwrap();

        assert_eq!(config.base.as_deref(), Some("s3://from-flag/"));
        assert_eq!(config.machine, "file-machine");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.root_dir, Utf8PathBuf::from("/home/dev/work"));
    }

    #[test]
    fn test_rejects_reserved_machine() {
        let overrides = ConfigOverrides {
            machine: Some("claude-code".into()),
            ..Default::default()
        };
        let err = DevenvConfig::resolve_with_home(ConfigFile::default(), overrides, &home())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let overrides = ConfigOverrides {
            machine: Some("laptop".into()),
            timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(
            DevenvConfig::resolve_with_home(ConfigFile::default(), overrides, &home()).is_err()
        );
    }

    #[test]
    fn test_require_base() {
        let config = DevenvConfig::for_machine("laptop", "/home/dev");
        assert!(config.require_base().is_err());
        let config = config.with_base("file:///tmp/backups");
        assert_eq!(config.require_base().unwrap(), "file:///tmp/backups");
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home(Utf8Path::new("~"), &home()), home());
        assert_eq!(
            expand_home(Utf8Path::new("~/notes"), &home()),
            Utf8PathBuf::from("/home/dev/notes")
        );
        assert_eq!(expand_home(Utf8Path::new("/abs"), &home()), Utf8PathBuf::from("/abs"));
        assert_eq!(expand_home(Utf8Path::new("~other"), &home()), Utf8PathBuf::from("~other"));
    }
}
