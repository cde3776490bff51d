//! Directory-tree object store for `file://` bases

use crate::error::{StoreError, StoreResult};
use crate::store::{common_prefixes, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use tracing::debug;
use walkdir::WalkDir;

/// Stores each object as a file below `root`, keyed by its relative path
#[derive(Debug, Clone)]
pub struct FsStore {
    root: Utf8PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn object_path(&self, operation: &str, key: &str) -> StoreResult<Utf8PathBuf> {
        let rel = Utf8Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Utf8Component::Normal(_)));
        if !safe {
            return Err(StoreError::other(operation, key, "key is not a plain relative path"));
        }
        Ok(self.root.join(rel))
    }

    fn meta(key: String, metadata: &std::fs::Metadata) -> ObjectMeta {
        ObjectMeta {
            key,
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        }
    }

    fn walk(root: &Utf8Path, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| StoreError::other("list", prefix, e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let Some(rel) = rel.to_str() else {
                continue;
            };
            let key = rel.replace(std::path::MAIN_SEPARATOR, "/");
            if key.ends_with(".partial") || !key.starts_with(prefix) {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|e| StoreError::other("list", &key, e.to_string()))?;
            objects.push(Self::meta(key, &metadata));
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

fn io_error(operation: &str, key: &str, err: std::io::Error) -> StoreError {
    match err.kind() {
        ErrorKind::PermissionDenied => StoreError::auth(operation, key, err.to_string()),
        ErrorKind::TimedOut | ErrorKind::Interrupted => {
            StoreError::transient(operation, key, err.to_string())
        }
        _ => StoreError::other(operation, key, err.to_string()),
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> StoreResult<()> {
        let path = self.object_path("put", key)?;
        debug!("Writing {} bytes to {}", data.len(), path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("put", key, e))?;
        }

        // Readers never observe a half-written object
        let partial = Utf8PathBuf::from(format!("{}.partial", path));
        tokio::fs::write(&partial, data)
            .await
            .map_err(|e| io_error("put", key, e))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| io_error("put", key, e))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.object_path("get", key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("get", key, e)),
        }
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        let path = self.object_path("head", key)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(Self::meta(key.to_string(), &metadata))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("head", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.object_path("delete", key)?;
        debug!("Removing {}", path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("delete", key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let root = self.root.clone();
        let prefix_owned = prefix.to_string();
        tokio::task::spawn_blocking(move || Self::walk(&root, &prefix_owned))
            .await
            .map_err(|e| StoreError::other("list", prefix, e.to_string()))?
    }

    async fn list_prefixes(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let objects = self.list(prefix).await?;
        Ok(common_prefixes(prefix, objects.iter().map(|o| o.key.as_str())))
    }
}
