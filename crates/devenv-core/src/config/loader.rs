//! Configuration file lookup and parsing

use super::ConfigFile;
use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use std::fs;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DEVENV_CONFIG";

const CONFIG_FILE_NAME: &str = "devenv.yaml";

/// `<platform config dir>/devenv/devenv.yaml`, when the platform has one
pub fn default_config_path() -> Option<Utf8PathBuf> {
    let dirs = ProjectDirs::from("", "", "devenv")?;
    Utf8PathBuf::from_path_buf(dirs.config_dir().join(CONFIG_FILE_NAME)).ok()
}

/// Locates and parses `devenv.yaml`
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the config file from `--config`, `$DEVENV_CONFIG`, or the default location
    ///
    /// An explicitly named file must exist. A missing default file yields an
    /// empty [`ConfigFile`].
    pub fn load(explicit: Option<&Utf8Path>) -> Result<ConfigFile> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Self::load_file(Utf8Path::new(&path));
            }
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load_file(&path),
            _ => {
                tracing::debug!("No config file found, using defaults");
                Ok(ConfigFile::default())
            }
        }
    }

    /// Load a specific config file
    pub fn load_file(path: &Utf8Path) -> Result<ConfigFile> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::config_not_found(path.as_str())
            } else {
                Error::Io(e)
            }
        })?;
        tracing::debug!("Loaded config from {}", path);
        Self::parse(&content, path.as_str())
    }

    /// Parse YAML content; `source` names the origin in error messages
    pub fn parse(content: &str, source: &str) -> Result<ConfigFile> {
        if content.trim().is_empty() {
            return Ok(ConfigFile::default());
        }
        serde_yaml_ng::from_str(content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", source, e)))
    }
}
