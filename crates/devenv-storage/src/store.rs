//! The object store seam

use crate::error::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Listing entry for one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Flat key/value object storage with `/`-delimited listing
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>) -> StoreResult<()>;

    /// `None` when the object does not exist
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// `None` when the object does not exist
    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>>;

    /// Remove `key`; deleting an absent object succeeds
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Every object whose key starts with `prefix`, sorted by key
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>>;

    /// Immediate child prefixes of `prefix` (each ending in `/`), sorted
    async fn list_prefixes(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    async fn put(&self, key: &str, data: Vec<u8>) -> StoreResult<()> {
        (**self).put(key, data).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        (**self).head(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        (**self).delete(key).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        (**self).list(prefix).await
    }

    async fn list_prefixes(&self, prefix: &str) -> StoreResult<Vec<String>> {
        (**self).list_prefixes(prefix).await
    }
}

/// Derive delimiter-style common prefixes from a flat key listing
pub(crate) fn common_prefixes<'a>(prefix: &str, keys: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    keys.into_iter()
        .filter_map(|key| {
            let rest = key.strip_prefix(prefix)?;
            let end = rest.find('/')?;
            Some(format!("{}{}", prefix, &rest[..=end]))
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
