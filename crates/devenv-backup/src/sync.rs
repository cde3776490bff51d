//! Remote sync engine
//!
//! Named backups live under `{base}{machine}/{name}/`: captured files under
//! `files/` are written first and `manifest.json` last, so a backup whose
//! manifest is missing is recognisably incomplete. Re-uploading under an
//! existing name removes the old manifest before any file object changes.

use crate::manifest::{sha256_hex, CapturedFile, Manifest};
use crate::sessions::{MirrorReport, SessionKind, SessionMirror, SessionRestoreOptions};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use devenv_core::{validate_safe_name, Error, Result, StepTracker};
use devenv_storage::{BackupLayout, ObjectStore, StoreError, StoreResult};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on concurrent object-store requests
pub const MAX_CONCURRENT_OPS: usize = 20;

/// What `upload` should do besides writing the manifest
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub name: String,
    /// Root the manifest's file paths are relative to
    pub root: Utf8PathBuf,
    pub dry_run: bool,
    pub mirrors: Vec<SessionMirror>,
}

/// Outcome of one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub name: String,
    pub dry_run: bool,
    /// Root-relative paths uploaded (or, in a dry run, that would be)
    pub uploaded: Vec<String>,
    /// Unchanged since the previous upload under this name
    pub skipped: Vec<String>,
    /// (path, error)
    pub failed: Vec<(String, String)>,
    pub manifest_key: String,
    pub manifest_written: bool,
    pub sessions: Vec<MirrorReport>,
}

impl UploadReport {
    /// Every file and session object made it and the manifest was written
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
            && (self.dry_run || self.manifest_written)
            && self.sessions.iter().all(MirrorReport::is_success)
    }
}

/// A downloaded manifest and the file objects it references that are absent
#[derive(Debug, Clone)]
pub struct DownloadedBackup {
    pub manifest: Manifest,
    pub missing_files: Vec<String>,
}

/// One backup name found under the machine prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    pub name: String,
    /// Manifest present
    pub complete: bool,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    layout: BackupLayout,
    step: StepTracker,
    concurrency: usize,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>, layout: BackupLayout) -> Self {
        Self {
            store,
            layout,
            step: StepTracker::new(),
            concurrency: MAX_CONCURRENT_OPS,
        }
    }

    pub fn with_step(mut self, step: StepTracker) -> Self {
        self.step = step;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENT_OPS);
        self
    }

    pub fn layout(&self) -> &BackupLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Upload captured files, then the manifest, then the session mirrors
    ///
    /// Files whose hash matches the previous manifest under the same name and
    /// whose object is still present are not re-uploaded. A dry run performs
    /// the same listing and comparison but issues no writes. Authentication
    /// failures abort immediately; other per-file failures leave the manifest
    /// unwritten so the backup stays detectably incomplete. When files are
    /// about to be rewritten the previous manifest is deleted first, so it
    /// can never describe objects that no longer match it.
    pub async fn upload(&self, manifest: &Manifest, options: &UploadOptions) -> Result<UploadReport> {
        validate_safe_name(&options.name, "backup name")?;
        manifest.validate()?;

        let name = options.name.as_str();
        let manifest_key = self.layout.manifest_key(name);
        let mut report = UploadReport {
            name: name.to_string(),
            dry_run: options.dry_run,
            uploaded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            manifest_key: manifest_key.clone(),
            manifest_written: false,
            sessions: Vec::new(),
        };

        self.step.set(format!("comparing against existing backup '{}'", name));
        let previous = self.previous_manifest(name).await?;
        let mut pending: Vec<&CapturedFile> = Vec::new();
        for file in manifest.files() {
            if self.is_already_uploaded(name, file, previous.as_ref()).await? {
                report.skipped.push(file.path.clone());
            } else {
                pending.push(file);
            }
        }
        info!(
            "Backup '{}': {} files to upload, {} unchanged",
            name,
            pending.len(),
            report.skipped.len()
        );

        if options.dry_run {
            report.uploaded = pending.iter().map(|f| f.path.clone()).collect();
            for mirror in &options.mirrors {
                let prefix = mirror.kind().prefix(&self.layout);
                report.sessions.push(
                    mirror
                        .upload(self.store.as_ref(), &prefix, true, self.concurrency, &self.step)
                        .await?,
                );
            }
            return Ok(report);
        }

        if !pending.is_empty() {
            self.step.set(format!("removing previous {}", manifest_key));
            self.store.delete(&manifest_key).await?;
            debug!("Removed {} until every file is uploaded", manifest_key);
        }

        let results: Vec<(String, std::result::Result<(), TransferFailure>)> = stream::iter(pending)
            .map(|file| async move {
                let outcome = self.upload_file(name, &options.root, file).await;
                (file.path.clone(), outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (path, outcome) in results {
            match outcome {
                Ok(()) => report.uploaded.push(path),
                Err(TransferFailure::Store(e)) if e.is_auth() => return Err(e.into()),
                Err(failure) => {
                    warn!("Failed to upload {}: {}", path, failure);
                    report.failed.push((path, failure.to_string()));
                }
            }
        }
        report.uploaded.sort();
        report.failed.sort();
        self.step
            .complete(format!("uploaded {} files", report.uploaded.len()));
        for (path, _) in &report.failed {
            self.step.fail(format!("upload {}", path));
        }

        if report.failed.is_empty() {
            self.step.set(format!("writing {}", manifest_key));
            let json = manifest.to_json()?;
            self.store.put(&manifest_key, json.into_bytes()).await?;
            report.manifest_written = true;
            self.step.complete(format!("manifest {}", manifest_key));
            info!("Wrote manifest {}", manifest_key);
        } else {
            warn!(
                "{} files failed; manifest not written so '{}' stays marked incomplete",
                report.failed.len(),
                name
            );
        }

        for mirror in &options.mirrors {
            let prefix = mirror.kind().prefix(&self.layout);
            report.sessions.push(
                mirror
                    .upload(self.store.as_ref(), &prefix, false, self.concurrency, &self.step)
                    .await?,
            );
        }

        Ok(report)
    }

    async fn previous_manifest(&self, name: &str) -> Result<Option<Manifest>> {
        let Some(bytes) = self.store.get(&self.layout.manifest_key(name)).await? else {
            return Ok(None);
        };
        let parsed = std::str::from_utf8(&bytes)
            .map_err(|e| Error::validation(e.to_string()))
            .and_then(Manifest::from_json);
        match parsed {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!("Ignoring unreadable existing manifest for '{}': {}", name, e);
                Ok(None)
            }
        }
    }

    async fn is_already_uploaded(
        &self,
        name: &str,
        file: &CapturedFile,
        previous: Option<&Manifest>,
    ) -> Result<bool> {
        let Some(previous) = previous else {
            return Ok(false);
        };
        let recorded = previous
            .files()
            .iter()
            .any(|f| f.path == file.path && f.content_hash == file.content_hash);
        if !recorded {
            return Ok(false);
        }
        let key = self.layout.file_key(name, &file.path);
        Ok(self
            .store
            .head(&key)
            .await?
            .is_some_and(|meta| meta.size == file.size))
    }

    async fn upload_file(
        &self,
        name: &str,
        root: &camino::Utf8Path,
        file: &CapturedFile,
    ) -> std::result::Result<(), TransferFailure> {
        let local = root.join(&file.path);
        let data = tokio::fs::read(&local)
            .await
            .map_err(|e| TransferFailure::Local(format!("cannot read {}: {}", local, e)))?;
        if sha256_hex(&data) != file.content_hash {
            return Err(TransferFailure::Local(format!(
                "{} changed after the manifest was built",
                local
            )));
        }
        let key = self.layout.file_key(name, &file.path);
        self.step.set(format!("uploading {}", key));
        debug!("Uploading {} ({} bytes)", key, data.len());
        self.store.put(&key, data).await.map_err(TransferFailure::Store)
    }

    /// Fetch and validate the manifest of backup `name`
    ///
    /// File objects the manifest lists but the store lacks (or holds with a
    /// different size) are reported in `missing_files`.
    pub async fn download(&self, name: &str) -> Result<DownloadedBackup> {
        validate_safe_name(name, "backup name")?;
        let key = self.layout.manifest_key(name);
        self.step.set(format!("downloading {}", key));

        let bytes = self.store.get(&key).await?.ok_or_else(|| {
            Error::validation(format!(
                "backup '{}' has no manifest at {} (missing or incomplete backup)",
                name, key
            ))
        })?;
        let json = String::from_utf8(bytes)
            .map_err(|e| Error::validation(format!("manifest is not UTF-8: {}", e)))?;
        let manifest = Manifest::from_json(&json)?;

        self.step.set(format!("checking files of backup '{}'", name));
        let checks: Vec<Result<Option<String>>> = stream::iter(manifest.files())
            .map(|file| async move {
                let meta = self.store.head(&self.layout.file_key(name, &file.path)).await?;
                Ok::<_, Error>(match meta {
                    Some(meta) if meta.size == file.size => None,
                    _ => Some(file.path.clone()),
                })
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut missing_files = Vec::new();
        for check in checks {
            if let Some(path) = check? {
                missing_files.push(path);
            }
        }
        missing_files.sort();
        if !missing_files.is_empty() {
            warn!(
                "Backup '{}' is missing {} file objects",
                name,
                missing_files.len()
            );
        }

        Ok(DownloadedBackup {
            manifest,
            missing_files,
        })
    }

    /// Backups under this machine, most recent first
    pub async fn list_backups(&self) -> Result<Vec<BackupSummary>> {
        let prefix = self.layout.machine_prefix();
        self.step.set(format!("listing backups under {}", prefix));

        let names: Vec<String> = self
            .store
            .list_prefixes(&prefix)
            .await?
            .into_iter()
            .filter_map(|p| {
                p.strip_prefix(&prefix)
                    .map(|rest| rest.trim_end_matches('/').to_string())
            })
            .filter(|name| !name.is_empty())
            .collect();

        let mut summaries: Vec<BackupSummary> = Vec::with_capacity(names.len());
        for name in names {
            let meta = self.store.head(&self.layout.manifest_key(&name)).await?;
            summaries.push(BackupSummary {
                complete: meta.is_some(),
                last_modified: meta.and_then(|m| m.last_modified),
                name,
            });
        }

        summaries.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(summaries)
    }

    /// Bytes of a captured file, `None` when the object is absent
    pub async fn fetch_file(&self, name: &str, file: &CapturedFile) -> StoreResult<Option<Vec<u8>>> {
        let key = self.layout.file_key(name, &file.path);
        self.step.set(format!("downloading {}", key));
        self.store.get(&key).await
    }

    /// Restore every mirror; one mirror failing does not stop the others
    pub async fn restore_sessions(
        &self,
        mirrors: &[SessionMirror],
        options: &SessionRestoreOptions,
    ) -> Vec<(SessionKind, Result<MirrorReport>)> {
        let mut reports = Vec::with_capacity(mirrors.len());
        for mirror in mirrors {
            let prefix = mirror.kind().prefix(&self.layout);
            let result = mirror
                .restore(self.store.as_ref(), &prefix, options, self.concurrency, &self.step)
                .await;
            reports.push((mirror.kind(), result));
        }
        reports
    }
}

/// Per-object failure; store errors stay typed so auth problems can abort
#[derive(Debug)]
pub(crate) enum TransferFailure {
    Local(String),
    Store(StoreError),
}

impl std::fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(message) => f.write_str(message),
            Self::Store(e) => write!(f, "{}", e),
        }
    }
}
