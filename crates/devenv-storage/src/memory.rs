//! In-memory object store for tests and dry runs

use crate::error::{StoreError, StoreResult};
use crate::store::{common_prefixes, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Object {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Put,
    Get,
}

/// An operation on a key containing `needle` fails with `error`
#[derive(Debug, Clone)]
struct InjectedFailure {
    operation: Operation,
    needle: String,
    error: StoreError,
    remaining: Option<usize>,
}

/// Thread-safe in-memory store that counts requests and can inject failures
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Object>>,
    failures: Mutex<Vec<InjectedFailure>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as a write
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.insert_at(key, data, Utc::now());
    }

    /// Seed an object with an explicit modification time
    pub fn insert_at(
        &self,
        key: impl Into<String>,
        data: impl Into<Vec<u8>>,
        last_modified: DateTime<Utc>,
    ) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                key.into(),
                Object {
                    data: data.into(),
                    last_modified,
                },
            );
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|mut objects| objects.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Fail every put whose key contains `needle`
    pub fn fail_puts_matching(&self, needle: impl Into<String>, error: StoreError) {
        self.push_failure(Operation::Put, needle.into(), error, None);
    }

    /// Fail the next `times` puts whose key contains `needle`, then succeed
    pub fn fail_puts_times(&self, needle: impl Into<String>, error: StoreError, times: usize) {
        self.push_failure(Operation::Put, needle.into(), error, Some(times));
    }

    /// Fail every get whose key contains `needle`
    pub fn fail_gets_matching(&self, needle: impl Into<String>, error: StoreError) {
        self.push_failure(Operation::Get, needle.into(), error, None);
    }

    fn push_failure(
        &self,
        operation: Operation,
        needle: String,
        error: StoreError,
        remaining: Option<usize>,
    ) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(InjectedFailure {
                operation,
                needle,
                error,
                remaining,
            });
        }
    }

    fn injected_failure(&self, operation: Operation, key: &str) -> Option<StoreError> {
        let mut failures = self.failures.lock().ok()?;
        let failure = failures.iter_mut().find(|f| {
            f.operation == operation && key.contains(&f.needle) && f.remaining != Some(0)
        })?;
        if let Some(remaining) = failure.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(failure.error.clone())
    }

    /// Number of successful and attempted writes so far
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn reset_counts(&self) {
        self.puts.store(0, Ordering::SeqCst);
        self.gets.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
    }

    /// All keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Raw object bytes, bypassing the counters
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).map(|o| o.data.clone()))
    }

    fn poisoned(operation: &str, key: &str) -> StoreError {
        StoreError::other(operation, key, "memory store lock poisoned")
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> StoreResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.injected_failure(Operation::Put, key) {
            return Err(error);
        }
        let mut objects = self.objects.lock().map_err(|_| Self::poisoned("put", key))?;
        objects.insert(
            key.to_string(),
            Object {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.injected_failure(Operation::Get, key) {
            return Err(error);
        }
        let objects = self.objects.lock().map_err(|_| Self::poisoned("get", key))?;
        Ok(objects.get(key).map(|o| o.data.clone()))
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        let objects = self.objects.lock().map_err(|_| Self::poisoned("head", key))?;
        Ok(objects.get(key).map(|o| ObjectMeta {
            key: key.to_string(),
            size: o.data.len() as u64,
            last_modified: Some(o.last_modified),
        }))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock().map_err(|_| Self::poisoned("delete", key))?;
        objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        let objects = self.objects.lock().map_err(|_| Self::poisoned("list", prefix))?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, o)| ObjectMeta {
                key: key.clone(),
                size: o.data.len() as u64,
                last_modified: Some(o.last_modified),
            })
            .collect())
    }

    async fn list_prefixes(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let objects = self.objects.lock().map_err(|_| Self::poisoned("list", prefix))?;
        Ok(common_prefixes(prefix, objects.keys().map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_writes_not_seeds() {
        let store = MemoryStore::new();
        store.insert("seed", b"x".to_vec());
        store.put("a/b", b"hello".to_vec()).await.unwrap();

        assert_eq!(store.put_count(), 1);
        assert_eq!(store.keys(), vec!["a/b", "seed"]);
        assert_eq!(store.head("a/b").await.unwrap().unwrap().size, 5);
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped() {
        let store = MemoryStore::new();
        store.insert("m/a/1", vec![]);
        store.insert("m/a/2", vec![]);
        store.insert("m/b/1", vec![]);
        store.insert("n/a/1", vec![]);

        let keys: Vec<_> = store.list("m/a/").await.unwrap().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["m/a/1", "m/a/2"]);
        assert_eq!(store.list_prefixes("m/").await.unwrap(), vec!["m/a/", "m/b/"]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.fail_puts_times("files/", StoreError::transient("put", "k", "SlowDown"), 1);

        assert!(store.put("x/files/a", vec![]).await.unwrap_err().is_transient());
        store.put("x/files/a", vec![]).await.unwrap();
        store.put("x/manifest.json", vec![]).await.unwrap();
        assert_eq!(store.put_count(), 3);
        assert_eq!(store.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_get_failures_and_delete() {
        let store = MemoryStore::new();
        store.insert("x/files/a", b"a".to_vec());
        store.insert("x/manifest.json", b"{}".to_vec());
        store.fail_gets_matching("files/", StoreError::auth("get", "x/files/a", "AccessDenied"));

        assert!(store.get("x/files/a").await.unwrap_err().is_auth());
        assert_eq!(store.get("x/manifest.json").await.unwrap(), Some(b"{}".to_vec()));

        store.delete("x/manifest.json").await.unwrap();
        store.delete("x/manifest.json").await.unwrap();
        assert_eq!(store.keys(), vec!["x/files/a"]);
        assert_eq!(store.delete_count(), 2);
        assert_eq!(store.put_count(), 0);
    }
}
