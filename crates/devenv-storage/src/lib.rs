//! # devenv-storage
//!
//! Object storage behind devenv backups:
//! - [`BackupLocation`] parsing for `s3://` and `file://` bases
//! - [`BackupLayout`] key naming for snapshots and session mirrors
//! - The [`ObjectStore`] trait with S3, filesystem and in-memory implementations
//! - [`RetryingStore`], which retries transient failures with backoff

pub mod error;
pub mod fs;
pub mod location;
pub mod memory;
pub mod retrying;
pub mod s3;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use fs::FsStore;
pub use location::{BackupLayout, BackupLocation};
pub use memory::MemoryStore;
pub use retrying::RetryingStore;
pub use s3::S3Store;
pub use store::{ObjectMeta, ObjectStore};

use devenv_core::types::RetryPolicy;
use std::sync::Arc;

/// Open the store behind `location`, wrapped with the retry policy
pub async fn open_store(
    location: &BackupLocation,
    retry: &RetryPolicy,
) -> StoreResult<Arc<dyn ObjectStore>> {
    match location {
        BackupLocation::S3 {
            bucket,
            region,
            endpoint,
            ..
        } => {
            let store = S3Store::connect(bucket, region.as_deref(), endpoint.as_deref()).await?;
            Ok(Arc::new(RetryingStore::new(store, retry.clone())))
        }
        BackupLocation::Filesystem { root } => Ok(Arc::new(FsStore::new(root.clone()))),
    }
}
