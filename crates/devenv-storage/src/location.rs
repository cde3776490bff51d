//! Backup base parsing and key layout
//!
//! ```text
//! {prefix}{user/}{machine}/{name}/manifest.json
//! {prefix}{user/}{machine}/{name}/files/<root-relative path>
//! {prefix}{user/}claude-code/{machine}/...
//! {prefix}{user/}opencode/{machine}/...
//! ```

use crate::error::{StoreError, StoreResult};
use camino::Utf8PathBuf;
use std::fmt;
use url::Url;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FILES_DIR: &str = "files";
pub const CLAUDE_MIRROR: &str = "claude-code";
pub const OPENCODE_MIRROR: &str = "opencode";

/// Where backups live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupLocation {
    /// `s3://bucket/prefix/?region=..&endpoint=..`
    S3 {
        bucket: String,
        /// Empty or ending in `/`
        prefix: String,
        region: Option<String>,
        /// Custom endpoint for S3-compatible services (MinIO, R2)
        endpoint: Option<String>,
    },
    /// `file:///abs/dir`
    Filesystem { root: Utf8PathBuf },
}

impl BackupLocation {
    pub fn parse(uri: &str) -> StoreResult<Self> {
        let url = Url::parse(uri.trim()).map_err(|e| StoreError::invalid_location(uri, e.to_string()))?;

        match url.scheme() {
            "s3" => {
                let bucket = url.host_str().unwrap_or_default().to_string();
                if bucket.is_empty() {
                    return Err(StoreError::invalid_location(uri, "bucket name is empty"));
                }

                let mut region = None;
                let mut endpoint = None;
                for (key, value) in url.query_pairs() {
                    match key.as_ref() {
                        "region" => region = Some(value.into_owned()),
                        "endpoint" => endpoint = Some(value.into_owned()),
                        other => {
                            return Err(StoreError::invalid_location(
                                uri,
                                format!("unknown parameter '{}'", other),
                            ))
                        }
                    }
                }

                Ok(Self::S3 {
                    bucket,
                    prefix: normalize_prefix(url.path()),
                    region,
                    endpoint,
                })
            }
            "file" => {
                let path = url.to_file_path().map_err(|_| {
                    StoreError::invalid_location(uri, "file URIs must be absolute local paths")
                })?;
                let root = Utf8PathBuf::from_path_buf(path)
                    .map_err(|_| StoreError::invalid_location(uri, "path is not valid UTF-8"))?;
                Ok(Self::Filesystem { root })
            }
            other => Err(StoreError::invalid_location(
                uri,
                format!("unsupported scheme '{}' (expected s3:// or file://)", other),
            )),
        }
    }

    /// Key prefix inside the store; filesystem stores are rooted at the directory itself
    pub fn prefix(&self) -> &str {
        match self {
            Self::S3 { prefix, .. } => prefix,
            Self::Filesystem { .. } => "",
        }
    }

    /// Human-readable URI for a key, used in messages
    pub fn display_key(&self, key: &str) -> String {
        match self {
            Self::S3 { bucket, .. } => format!("s3://{}/{}", bucket, key),
            Self::Filesystem { root } => root.join(key).to_string(),
        }
    }
}

impl fmt::Display for BackupLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 { bucket, prefix, .. } => write!(f, "s3://{}/{}", bucket, prefix),
            Self::Filesystem { root } => write!(f, "file://{}", root),
        }
    }
}

fn normalize_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Key naming for one machine under one base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupLayout {
    base: String,
    machine: String,
}

impl BackupLayout {
    pub fn new(location: &BackupLocation, machine: impl Into<String>, user: Option<&str>) -> Self {
        Self::from_prefix(location.prefix(), machine, user)
    }

    pub fn from_prefix(prefix: &str, machine: impl Into<String>, user: Option<&str>) -> Self {
        let base = match user {
            Some(user) => format!("{}{}/", prefix, user),
            None => prefix.to_string(),
        };
        Self {
            base,
            machine: machine.into(),
        }
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    /// `{base}{machine}/`; its child prefixes are the backup names
    pub fn machine_prefix(&self) -> String {
        format!("{}{}/", self.base, self.machine)
    }

    pub fn backup_prefix(&self, name: &str) -> String {
        format!("{}{}/", self.machine_prefix(), name)
    }

    pub fn manifest_key(&self, name: &str) -> String {
        format!("{}{}", self.backup_prefix(name), MANIFEST_FILE)
    }

    pub fn files_prefix(&self, name: &str) -> String {
        format!("{}{}/", self.backup_prefix(name), FILES_DIR)
    }

    /// Key of a captured file; `rel` is a `/`-separated root-relative path
    pub fn file_key(&self, name: &str, rel: &str) -> String {
        format!("{}{}", self.files_prefix(name), rel.trim_start_matches('/'))
    }

    pub fn claude_prefix(&self) -> String {
        format!("{}{}/{}/", self.base, CLAUDE_MIRROR, self.machine)
    }

    pub fn opencode_prefix(&self) -> String {
        format!("{}{}/{}/", self.base, OPENCODE_MIRROR, self.machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3() {
        let location = BackupLocation::parse("s3://team-backups/devenv").unwrap();
        assert_eq!(
            location,
            BackupLocation::S3 {
                bucket: "team-backups".into(),
                prefix: "devenv/".into(),
                region: None,
                endpoint: None,
            }
        );
        assert_eq!(location.to_string(), "s3://team-backups/devenv/");
    }

    #[test]
    fn test_parse_s3_without_prefix_and_with_params() {
        let location =
            BackupLocation::parse("s3://bucket/?region=eu-west-1&endpoint=http://localhost:9000")
                .unwrap();
        match location {
            BackupLocation::S3 {
                prefix,
                region,
                endpoint,
                ..
            } => {
                assert_eq!(prefix, "");
                assert_eq!(region.as_deref(), Some("eu-west-1"));
                assert_eq!(endpoint.as_deref(), Some("http://localhost:9000"));
            }
            other => panic!("unexpected location {:?}", other),
        }
    }

    #[test]
    fn test_parse_file() {
        let location = BackupLocation::parse("file:///var/backups/devenv").unwrap();
        assert_eq!(
            location,
            BackupLocation::Filesystem {
                root: Utf8PathBuf::from("/var/backups/devenv")
            }
        );
        assert_eq!(location.prefix(), "");
    }

    #[test]
    fn test_parse_rejects_bad_uris() {
        assert!(BackupLocation::parse("gs://bucket/x").is_err());
        assert!(BackupLocation::parse("s3:///prefix").is_err());
        assert!(BackupLocation::parse("not a uri").is_err());
        assert!(BackupLocation::parse("s3://bucket/?colour=blue").is_err());
    }

    #[test]
    fn test_layout_keys() {
        let location = BackupLocation::parse("s3://b/devenv/").unwrap();
        let layout = BackupLayout::new(&location, "laptop", None);

        assert_eq!(layout.machine_prefix(), "devenv/laptop/");
        assert_eq!(layout.manifest_key("2026-01-02"), "devenv/laptop/2026-01-02/manifest.json");
        assert_eq!(
            layout.file_key("2026-01-02", "pivot/notes.md"),
            "devenv/laptop/2026-01-02/files/pivot/notes.md"
        );
        assert_eq!(layout.claude_prefix(), "devenv/claude-code/laptop/");
        assert_eq!(layout.opencode_prefix(), "devenv/opencode/laptop/");
    }

    #[test]
    fn test_layout_with_user() {
        let layout = BackupLayout::from_prefix("", "laptop", Some("alice"));
        assert_eq!(layout.manifest_key("n"), "alice/laptop/n/manifest.json");
        assert_eq!(layout.claude_prefix(), "alice/claude-code/laptop/");
    }
}
