//! Shared utility functions for devenv crates

use crate::error::{Error, Result};
use camino::Utf8PathBuf;

/// Get the user's home directory
///
/// Prefers the HOME environment variable over `dirs::home_dir()`, which reads
/// the passwd entry and ignores overrides used by tests and containers.
pub fn get_home_dir() -> Result<Utf8PathBuf> {
    let home = match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => std::path::PathBuf::from(home),
        _ => dirs::home_dir()
            .ok_or_else(|| Error::invalid_config("Could not determine home directory"))?,
    };

    Utf8PathBuf::try_from(home)
        .map_err(|e| Error::invalid_config(format!("Home directory is not valid UTF-8: {}", e)))
}

/// Number of parallel workspace workers: available cores capped at 4
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, 4)
}

/// Today's date as a backup name (`YYYY-MM-DD`, local time)
pub fn default_backup_name() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_get_home_dir_prefers_env() {
        let original = std::env::var("HOME").ok();
        std::env::set_var("HOME", "/tmp/devenv-home");

        let home = get_home_dir().unwrap();
        assert_eq!(home, Utf8PathBuf::from("/tmp/devenv-home"));

        match original {
            Some(value) => std::env::set_var("HOME", value),
            None => std::env::remove_var("HOME"),
        }
    }

    #[test]
    fn test_default_workers_is_bounded() {
        let workers = default_workers();
        assert!((1..=4).contains(&workers));
    }

    #[test]
    fn test_default_backup_name_format() {
        let name = default_backup_name();
        assert_eq!(name.len(), 10);
        assert!(chrono::NaiveDate::parse_from_str(&name, "%Y-%m-%d").is_ok());
    }
}
