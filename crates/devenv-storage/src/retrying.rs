//! Retry wrapper for any object store

use crate::error::{StoreError, StoreResult};
use crate::store::{ObjectMeta, ObjectStore};
use async_trait::async_trait;
use devenv_core::retry::{ClosurePredicate, RetryError, RetryExecutor, TracingObserver};
use devenv_core::types::RetryPolicy;
use std::future::Future;

/// Retries transient failures of the wrapped store; auth and other failures
/// surface on the first attempt
#[derive(Debug)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
    jitter: bool,
}

impl<S: ObjectStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            jitter: true,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, operation: &str, key: &str, op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        RetryExecutor::<StoreError, _, _>::new(self.policy.clone())
            .with_predicate(ClosurePredicate::new(StoreError::is_transient))
            .with_observer(TracingObserver::new(format!("{} {}", operation, key)))
            .with_jitter(self.jitter)
            .execute(op)
            .await
            .map_err(|e| flatten(operation, key, e))
    }
}

fn flatten(operation: &str, key: &str, err: RetryError<StoreError>) -> StoreError {
    let attempts = err.attempts();
    match err.into_inner() {
        Some(StoreError::Transient { message, .. }) => StoreError::transient(
            operation,
            key,
            format!("{} (after {} attempts)", message, attempts),
        ),
        Some(other) => other,
        None => StoreError::other(operation, key, "no attempts were made"),
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for RetryingStore<S> {
    async fn put(&self, key: &str, data: Vec<u8>) -> StoreResult<()> {
        self.run("put", key, || self.inner.put(key, data.clone())).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.run("get", key, || self.inner.get(key)).await
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        self.run("head", key, || self.inner.head(key)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.run("delete", key, || self.inner.delete(key)).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        self.run("list", prefix, || self.inner.list(prefix)).await
    }

    async fn list_prefixes(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.run("list", prefix, || self.inner.list_prefixes(prefix)).await
    }
}
