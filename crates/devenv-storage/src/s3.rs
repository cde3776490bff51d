//! S3 object store
//!
//! Works against AWS S3 and S3-compatible services (MinIO, R2, Wasabi) when a
//! custom endpoint is given.

use crate::error::{StoreError, StoreResult};
use crate::store::{ObjectMeta, ObjectStore};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::debug;

const DEFAULT_REGION: &str = "us-east-1";

pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Build a client from the standard AWS credential chain
    pub async fn connect(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
    ) -> StoreResult<Self> {
        let client = Self::create_client(region, endpoint).await;
        Ok(Self::from_client(client, bucket))
    }

    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn create_client(region: Option<&str>, endpoint: Option<&str>) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if sdk_config.region().is_none() {
            s3_config_builder = s3_config_builder.region(Region::new(DEFAULT_REGION));
        }

        if let Some(endpoint_url) = endpoint {
            debug!("Using custom S3 endpoint: {}", endpoint_url);
            // Path-style addressing for MinIO and most S3-compatible services
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint_url)
                .force_path_style(true);
        }

        Client::from_conf(s3_config_builder.build())
    }

    fn classify<E>(&self, operation: &str, key: &str, err: SdkError<E, HttpResponse>) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
            return StoreError::transient(operation, key, DisplayErrorContext(&err).to_string());
        }
        let code = err.code().map(str::to_string);
        let status = err.raw_response().map(|r| r.status().as_u16());
        StoreError::classify(
            operation,
            key,
            code.as_deref(),
            status,
            DisplayErrorContext(&err).to_string(),
            &self.bucket,
        )
    }
}

fn to_chrono(ts: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, data: Vec<u8>) -> StoreResult<()> {
        debug!("Uploading {} bytes: s3://{}/{}", data.len(), self.bucket, key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| self.classify("put", key, e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        debug!("Downloading s3://{}/{}", self.bucket, key);
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    return Ok(None);
                }
                return Err(self.classify("get", key, e));
            }
        };

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::transient("get", key, e.to_string()))?;
        Ok(Some(body.into_bytes().to_vec()))
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectMeta>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => Ok(Some(ObjectMeta {
                key: key.to_string(),
                size: resp.content_length.unwrap_or(0).max(0) as u64,
                last_modified: to_chrono(resp.last_modified.as_ref()),
            })),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    Ok(None)
                } else {
                    Err(self.classify("head", key, e))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        debug!("Deleting s3://{}/{}", self.bucket, key);
        // S3 answers 204 for keys that do not exist
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.classify("delete", key, e))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectMeta>> {
        debug!("Listing s3://{}/{}", self.bucket, prefix);
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| self.classify("list", prefix, e))?;

            for object in resp.contents.unwrap_or_default() {
                if let Some(key) = object.key {
                    objects.push(ObjectMeta {
                        key,
                        size: object.size.unwrap_or(0).max(0) as u64,
                        last_modified: to_chrono(object.last_modified.as_ref()),
                    });
                }
            }

            if resp.is_truncated == Some(true) {
                continuation_token = resp.next_continuation_token;
            } else {
                break;
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        debug!("Found {} objects under {}", objects.len(), prefix);
        Ok(objects)
    }

    async fn list_prefixes(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut prefixes = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .delimiter("/");
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| self.classify("list", prefix, e))?;

            prefixes.extend(
                resp.common_prefixes
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|p| p.prefix),
            );

            if resp.is_truncated == Some(true) {
                continuation_token = resp.next_continuation_token;
            } else {
                break;
            }
        }

        prefixes.sort();
        Ok(prefixes)
    }
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}
