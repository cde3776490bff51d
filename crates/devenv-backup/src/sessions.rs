//! Claude Code and OpenCode session mirrors
//!
//! Unlike named backups these are continuously overwritten mirrors, one per
//! machine, under `{base}claude-code/{machine}/` and `{base}opencode/{machine}/`.

use crate::filters::SessionFilter;
use crate::sync::TransferFailure;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDate, Utc};
use devenv_core::paths::{to_key_path, validate_relative_path};
use devenv_core::{Error, Result, StepTracker};
use devenv_storage::{BackupLayout, ObjectMeta, ObjectStore, StoreError};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Claude,
    OpenCode,
}

impl SessionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Claude => "Claude Code",
            Self::OpenCode => "OpenCode",
        }
    }

    /// Mirror prefix for this kind under `layout`
    pub fn prefix(&self, layout: &BackupLayout) -> String {
        match self {
            Self::Claude => layout.claude_prefix(),
            Self::OpenCode => layout.opencode_prefix(),
        }
    }

    fn filter(&self) -> Result<SessionFilter> {
        match self {
            Self::Claude => SessionFilter::claude(),
            Self::OpenCode => SessionFilter::opencode(),
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Restore-side filters
#[derive(Debug, Clone, Default)]
pub struct SessionRestoreOptions {
    /// Skip objects last modified before this instant
    pub after: Option<DateTime<Utc>>,
    /// Overwrite files that already exist locally
    pub force: bool,
    pub dry_run: bool,
}

/// Outcome of one mirror pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorReport {
    pub kind: SessionKind,
    pub dry_run: bool,
    /// Uploaded or downloaded (or, in a dry run, that would be)
    pub transferred: Vec<String>,
    /// Already up to date remotely
    pub unchanged: usize,
    pub skipped_by_date: usize,
    pub skipped_existing: Vec<String>,
    pub skipped_unsafe: Vec<String>,
    /// (relative path, error)
    pub failed: Vec<(String, String)>,
}

impl MirrorReport {
    fn new(kind: SessionKind, dry_run: bool) -> Self {
        Self {
            kind,
            dry_run,
            transferred: Vec::new(),
            unchanged: 0,
            skipped_by_date: 0,
            skipped_existing: Vec::new(),
            skipped_unsafe: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

struct LocalFile {
    rel: String,
    path: Utf8PathBuf,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// One local session directory and its remote mirror
#[derive(Debug, Clone)]
pub struct SessionMirror {
    kind: SessionKind,
    local_dir: Utf8PathBuf,
    filter: SessionFilter,
}

impl SessionMirror {
    pub fn new(kind: SessionKind, local_dir: impl Into<Utf8PathBuf>) -> Result<Self> {
        Ok(Self {
            kind,
            local_dir: local_dir.into(),
            filter: kind.filter()?,
        })
    }

    pub fn claude(local_dir: impl Into<Utf8PathBuf>) -> Result<Self> {
        Self::new(SessionKind::Claude, local_dir)
    }

    pub fn opencode(local_dir: impl Into<Utf8PathBuf>) -> Result<Self> {
        Self::new(SessionKind::OpenCode, local_dir)
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn local_dir(&self) -> &Utf8Path {
        &self.local_dir
    }

    /// Push new or newer local files to `prefix`
    ///
    /// A file is skipped when the remote copy has the same size and is not
    /// older than the local modification time.
    pub async fn upload(
        &self,
        store: &dyn ObjectStore,
        prefix: &str,
        dry_run: bool,
        concurrency: usize,
        step: &StepTracker,
    ) -> Result<MirrorReport> {
        let mut report = MirrorReport::new(self.kind, dry_run);
        if !tokio::fs::try_exists(&self.local_dir).await.unwrap_or(false) {
            debug!("{} directory {} does not exist", self.kind, self.local_dir);
            return Ok(report);
        }

        step.set(format!("scanning {} sessions", self.kind));
        let dir = self.local_dir.clone();
        let filter = self.filter.clone();
        let local = tokio::task::spawn_blocking(move || scan_local(&dir, &filter))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        if local.is_empty() {
            return Ok(report);
        }

        step.set(format!("listing {} mirror", self.kind));
        let remote: BTreeMap<String, ObjectMeta> = store
            .list(prefix)
            .await?
            .into_iter()
            .map(|meta| (meta.key.clone(), meta))
            .collect();

        let pending: Vec<&LocalFile> = local
            .iter()
            .filter(|file| {
                let key = format!("{}{}", prefix, file.rel);
                match remote.get(&key) {
                    Some(meta) => !is_up_to_date(meta, file),
                    None => true,
                }
            })
            .collect();
        report.unchanged = local.len() - pending.len();

        if dry_run {
            report.transferred = pending.iter().map(|f| f.rel.clone()).collect();
            info!(
                "Would upload {} {} files to {}",
                report.transferred.len(),
                self.kind,
                prefix
            );
            return Ok(report);
        }

        step.set(format!("uploading {} {} files", pending.len(), self.kind));
        let results: Vec<(String, std::result::Result<(), StoreError>)> = stream::iter(pending)
            .map(|file| async move {
                let key = format!("{}{}", prefix, file.rel);
                let result = match tokio::fs::read(&file.path).await {
                    Ok(data) => store.put(&key, data).await,
                    Err(e) => Err(StoreError::other("read", file.path.as_str(), e.to_string())),
                };
                (file.rel.clone(), result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (rel, result) in results {
            match result {
                Ok(()) => report.transferred.push(rel),
                Err(e) if e.is_auth() => return Err(e.into()),
                Err(e) => {
                    warn!("{} upload failed for {}: {}", self.kind, rel, e);
                    report.failed.push((rel, e.to_string()));
                }
            }
        }
        report.transferred.sort();
        info!(
            "Uploaded {} {} files ({} unchanged, {} failed)",
            report.transferred.len(),
            self.kind,
            report.unchanged,
            report.failed.len()
        );
        Ok(report)
    }

    /// Pull the mirror at `prefix` into the local directory
    ///
    /// Per-file failures are reported; an authentication failure aborts.
    pub async fn restore(
        &self,
        store: &dyn ObjectStore,
        prefix: &str,
        options: &SessionRestoreOptions,
        concurrency: usize,
        step: &StepTracker,
    ) -> Result<MirrorReport> {
        let mut report = MirrorReport::new(self.kind, options.dry_run);

        step.set(format!("listing {} mirror", self.kind));
        let objects = store.list(prefix).await?;

        let mut pending: Vec<(String, String, Utf8PathBuf)> = Vec::new();
        for meta in objects {
            if let (Some(after), Some(modified)) = (options.after, meta.last_modified) {
                if modified < after {
                    report.skipped_by_date += 1;
                    continue;
                }
            }
            let Some(rel) = meta.key.strip_prefix(prefix) else {
                continue;
            };
            if rel.is_empty() || rel.ends_with('/') {
                continue;
            }
            if validate_relative_path(rel).is_err() {
                warn!("Skipping unsafe {} path: {}", self.kind, rel);
                report.skipped_unsafe.push(rel.to_string());
                continue;
            }
            if !self.filter.matches(rel) {
                debug!("Skipping {} object outside the allow-list: {}", self.kind, rel);
                continue;
            }
            let local = self.local_dir.join(rel);
            if !options.force && tokio::fs::try_exists(&local).await.unwrap_or(false) {
                report.skipped_existing.push(rel.to_string());
                continue;
            }
            pending.push((meta.key.clone(), rel.to_string(), local));
        }

        if options.dry_run {
            report.transferred = pending.into_iter().map(|(_, rel, _)| rel).collect();
            info!(
                "Would download {} {} files into {}",
                report.transferred.len(),
                self.kind,
                self.local_dir
            );
            return Ok(report);
        }

        step.set(format!("downloading {} {} files", pending.len(), self.kind));
        let results: Vec<(String, std::result::Result<(), TransferFailure>)> = stream::iter(pending)
            .map(|(key, rel, local)| async move {
                let result = download_to(store, &key, &local).await;
                (rel, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (rel, result) in results {
            match result {
                Ok(()) => report.transferred.push(rel),
                Err(TransferFailure::Store(e)) if e.is_auth() => return Err(e.into()),
                Err(e) => {
                    warn!("{} download failed for {}: {}", self.kind, rel, e);
                    report.failed.push((rel, e.to_string()));
                }
            }
        }
        report.transferred.sort();
        Ok(report)
    }
}

async fn download_to(
    store: &dyn ObjectStore,
    key: &str,
    local: &Utf8Path,
) -> std::result::Result<(), TransferFailure> {
    let data = store
        .get(key)
        .await
        .map_err(TransferFailure::Store)?
        .ok_or_else(|| TransferFailure::Local(format!("{} disappeared during restore", key)))?;
    if let Some(parent) = local.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferFailure::Local(format!("cannot create {}: {}", parent, e)))?;
    }
    tokio::fs::write(local, data)
        .await
        .map_err(|e| TransferFailure::Local(format!("cannot write {}: {}", local, e)))
}

fn is_up_to_date(remote: &ObjectMeta, local: &LocalFile) -> bool {
    if remote.size != local.size {
        return false;
    }
    match (remote.last_modified, local.modified) {
        (Some(remote_time), Some(local_time)) => remote_time >= local_time,
        _ => false,
    }
}

fn scan_local(dir: &Utf8Path, filter: &SessionFilter) -> Vec<LocalFile> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            continue;
        };
        let Ok(rel) = path.strip_prefix(dir) else {
            continue;
        };
        let rel = to_key_path(rel);
        if !filter.matches(&rel) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        files.push(LocalFile {
            rel,
            path: path.to_path_buf(),
            size: meta.len(),
            modified: meta.modified().ok().map(system_time_to_utc),
        });
    }
    files
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Parse `--sessions-after YYYY-MM-DD` as midnight UTC
pub fn parse_sessions_after(date: &str) -> Result<DateTime<Utc>> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            Error::invalid_config(format!("Invalid date format '{}'. Use YYYY-MM-DD.", date))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use devenv_storage::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    const PREFIX: &str = "users/dev/claude-code/laptop/";

    fn claude_dir() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("projects/-home-dev-repo")).unwrap();
        fs::write(root.join("projects/-home-dev-repo/s1.jsonl"), "{}\n").unwrap();
        fs::write(root.join("history.jsonl"), "{\"display\":\"hi\"}\n").unwrap();
        fs::write(root.join(".credentials.json"), "secret").unwrap();
        fs::write(root.join("settings.json"), "{}").unwrap();
        (dir, root)
    }

    #[test]
    fn test_parse_sessions_after() {
        let parsed = parse_sessions_after("2026-01-15").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap());
        assert!(parse_sessions_after("15/01/2026").is_err());
        assert!(parse_sessions_after("2026-13-01").is_err());
    }

    #[tokio::test]
    async fn test_upload_filters_and_skips_unchanged() {
        let (_dir, root) = claude_dir();
        let store = MemoryStore::new();
        let mirror = SessionMirror::claude(root).unwrap();
        let step = StepTracker::new();

        let report = mirror.upload(&store, PREFIX, false, 4, &step).await.unwrap();
        assert_eq!(
            report.transferred,
            vec!["history.jsonl".to_string(), "projects/-home-dev-repo/s1.jsonl".to_string()]
        );
        assert!(store.keys().iter().all(|k| !k.contains("credentials")));

        store.reset_counts();
        let again = mirror.upload(&store, PREFIX, false, 4, &step).await.unwrap();
        assert!(again.transferred.is_empty());
        assert_eq!(again.unchanged, 2);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_upload_writes_nothing() {
        let (_dir, root) = claude_dir();
        let store = MemoryStore::new();
        let mirror = SessionMirror::claude(root).unwrap();

        let report = mirror
            .upload(&store, PREFIX, true, 4, &StepTracker::new())
            .await
            .unwrap();
        assert_eq!(report.transferred.len(), 2);
        assert_eq!(store.put_count(), 0);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_restore_after_force_and_unsafe() {
        let store = MemoryStore::new();
        let old = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        store.insert_at(format!("{}projects/p/old.jsonl", PREFIX), "old", old);
        store.insert_at(format!("{}projects/p/new.jsonl", PREFIX), "new", new);
        store.insert_at(format!("{}history.jsonl", PREFIX), "remote history", new);
        store.insert_at(format!("{}projects/../../escape", PREFIX), "x", new);
        store.insert_at(format!("{}.credentials.json", PREFIX), "secret", new);

        let dir = TempDir::new().unwrap();
        let local = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::write(local.join("history.jsonl"), "local history").unwrap();
        let mirror = SessionMirror::claude(local.clone()).unwrap();
        let step = StepTracker::new();

        let options = SessionRestoreOptions {
            after: Some(parse_sessions_after("2026-01-15").unwrap()),
            ..Default::default()
        };
        let report = mirror.restore(&store, PREFIX, &options, 4, &step).await.unwrap();
        assert_eq!(report.transferred, vec!["projects/p/new.jsonl".to_string()]);
        assert_eq!(report.skipped_by_date, 1);
        assert_eq!(report.skipped_existing, vec!["history.jsonl".to_string()]);
        assert_eq!(report.skipped_unsafe.len(), 1);
        assert!(!local.join(".credentials.json").exists());
        assert_eq!(fs::read_to_string(local.join("history.jsonl")).unwrap(), "local history");

        let forced = SessionRestoreOptions {
            force: true,
            ..Default::default()
        };
        mirror.restore(&store, PREFIX, &forced, 4, &step).await.unwrap();
        assert_eq!(fs::read_to_string(local.join("history.jsonl")).unwrap(), "remote history");
        assert!(local.join("projects/p/old.jsonl").exists());
    }

    #[tokio::test]
    async fn test_restore_aborts_on_access_denied() {
        let store = MemoryStore::new();
        store.insert(format!("{}projects/p/s1.jsonl", PREFIX), "{}");
        store.insert(format!("{}history.jsonl", PREFIX), "{}");
        store.fail_gets_matching(
            "projects/",
            StoreError::auth("get", "projects/p/s1.jsonl", "AccessDenied"),
        );

        let dir = TempDir::new().unwrap();
        let local = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let mirror = SessionMirror::claude(local).unwrap();

        let err = mirror
            .restore(&store, PREFIX, &SessionRestoreOptions::default(), 4, &StepTracker::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_restore_reports_other_get_failures() {
        let store = MemoryStore::new();
        store.insert(format!("{}projects/p/s1.jsonl", PREFIX), "{}");
        store.insert(format!("{}history.jsonl", PREFIX), "{}");
        store.fail_gets_matching(
            "projects/",
            StoreError::transient("get", "projects/p/s1.jsonl", "SlowDown"),
        );

        let dir = TempDir::new().unwrap();
        let local = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let mirror = SessionMirror::claude(local.clone()).unwrap();

        let report = mirror
            .restore(&store, PREFIX, &SessionRestoreOptions::default(), 4, &StepTracker::new())
            .await
            .unwrap();
        assert_eq!(report.transferred, vec!["history.jsonl".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(local.join("history.jsonl").exists());
    }
}
