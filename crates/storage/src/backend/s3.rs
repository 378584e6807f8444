//! S3-compatible storage backend.
//!
//! Works against AWS S3 and S3-compatible services (MinIO, Backblaze B2,
//! Tigris). Credentials are provided explicitly via the configuration file.

use crate::{
    ObjectInfo, StorageBackend,
    backend::ObjectInfoStream,
    error::{ErrorKind, Result},
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    operation::create_bucket::CreateBucketError,
    primitives::{ByteStream, DateTime},
    types::{BucketLocationConstraint, CreateBucketConfiguration},
};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// Region that must not be sent as a location constraint.
const DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible storage backend.
///
/// Stores objects in one bucket, optionally under a key prefix. The bucket is
/// the container: [`ensure_container()`](StorageBackend::ensure_container)
/// creates it when missing.
///
/// # Examples
///
/// ```no_run
/// use souvenir_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "minio",
///     "tchat-souvenir-books",
///     None,
///     "us-east-1",
///     Some("http://localhost:9000".to_string()),
///     "minioadmin",
///     "minioadmin",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    region: String,
    endpoint: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        let region = region.into();
        let endpoint = endpoint.map(Into::into);
        let credentials = Credentials::new(key_id, key_secret, None, None, "souvenir-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.clone()))
            // 1 initial attempt + 3 retries with exponential backoff
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services (MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = &endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            bucket: bucket.into(),
            prefix,
            region,
            endpoint,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Construct the full S3 key from a relative path.
    fn full_key(&self, path: &Path) -> Result<String> {
        join_key(self.prefix.as_deref(), path)
    }

    /// Strip the configured prefix from an S3 key to get relative path.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        validate_path(strip_key_prefix(self.prefix.as_deref(), key))
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn network(&self, operation: &str) -> ErrorKind {
        ErrorKind::Network(format!("S3 {operation} on bucket `{}` failed", self.bucket))
    }
}

fn join_key(prefix: Option<&str>, path: &Path) -> Result<String> {
    let validated = validate_path(path)?;
    let path_str = validated.to_str().ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
    Ok(match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path_str),
        None => path_str.to_string(),
    })
}

fn strip_key_prefix<'k>(prefix: Option<&str>, key: &'k str) -> &'k str {
    match prefix {
        Some(prefix) => {
            let prefix_normalized = prefix.trim_end_matches('/');
            key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
        },
        None => key,
    }
}

/// Resolve a CreateBucket rejection caused by the name being taken.
///
/// Only a bucket we already own is usable. A name held by another account
/// is an error: nothing we write there would be ours. Returns `None` for
/// unrelated failures.
fn create_bucket_conflict(bucket: &str, err: &CreateBucketError) -> Option<Result<()>> {
    if err.is_bucket_already_owned_by_you() {
        tracing::debug!(bucket, "Bucket was created concurrently");
        Some(Ok(()))
    } else if err.is_bucket_already_exists() {
        tracing::error!(bucket, "Bucket name is owned by another account");
        Some(Err(exn::Exn::from(ErrorKind::PermissionDenied(PathBuf::from(bucket)))))
    } else {
        None
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_container(&self) -> Result<()> {
        let _permit = self.acquire_permit().await?;
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(()),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {},
            Err(err) => return Err(err).or_raise(|| self.network("HeadBucket")),
        }
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != DEFAULT_REGION {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            request = request
                .create_bucket_configuration(CreateBucketConfiguration::builder().location_constraint(constraint).build());
        }
        match request.send().await {
            Ok(_) => {
                tracing::info!(bucket = %self.bucket, "Created bucket");
                Ok(())
            },
            Err(err) => {
                let conflict = err.as_service_error().and_then(|e| create_bucket_conflict(&self.bucket, e));
                match conflict {
                    Some(outcome) => outcome,
                    None => Err(err).or_raise(|| self.network("CreateBucket")),
                }
            },
        }
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> ObjectInfoStream<'a> {
        let key_prefix = match prefix.map(|p| self.full_key(p)).transpose() {
            // Component-based matching, like the local backend.
            Ok(pfx) => pfx.map(|p| format!("{p}/")),
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };
        let key_prefix = key_prefix.or_else(|| self.prefix.as_ref().map(|p| format!("{}/", p.trim_end_matches('/'))));

        Box::pin(stream! {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(key_prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = match page.or_raise(|| self.network("ListObjectsV2")) {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                };
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    let info = self.relative_path(key).and_then(|path| {
                        let modified = match object.last_modified() {
                            Some(dt) => Self::parse_datetime(dt)?,
                            None => OffsetDateTime::UNIX_EPOCH,
                        };
                        let size = u64::try_from(object.size().unwrap_or_default()).unwrap_or_default();
                        Ok(ObjectInfo::new(path, size, modified))
                    });
                    yield info;
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => Ok(false),
            Err(err) => Err(err).or_raise(|| self.network("HeadObject")),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(err) => return Err(err).or_raise(|| self.network("GetObject")),
        };
        let body = output.body.collect().await.or_raise(|| self.network("GetObject body"))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn write(&self, path: &Path, data: &[u8], content_type: &str) -> Result<()> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .or_raise(|| self.network("PutObject"))?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        // S3 deletes are idempotent: missing keys succeed.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .or_raise(|| self.network("DeleteObject"))?;
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<ObjectInfo> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            Err(err) => return Err(err).or_raise(|| self.network("HeadObject")),
        };
        let modified = match output.last_modified() {
            Some(dt) => Self::parse_datetime(dt)?,
            None => OffsetDateTime::UNIX_EPOCH,
        };
        let size = u64::try_from(output.content_length().unwrap_or_default()).unwrap_or_default();
        let info = ObjectInfo::new(validate_path(path)?, size, modified);
        Ok(match output.content_type() {
            Some(content_type) => info.with_content_type(content_type),
            None => info,
        })
    }

    fn url(&self, path: &Path) -> Result<String> {
        let key = self.full_key(path)?;
        Ok(match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{key}", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("s3://{}/{key}", self.bucket),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::types::error::{BucketAlreadyExists, BucketAlreadyOwnedByYou};
    use rstest::rstest;

    #[rstest]
    #[case(None, "books/user/BOOK-1", "books/user/BOOK-1")]
    #[case(Some("souvenir"), "books/user/BOOK-1", "souvenir/books/user/BOOK-1")]
    #[case(Some("souvenir/"), "books/user/BOOK-1", "souvenir/books/user/BOOK-1")]
    fn test_join_key(#[case] prefix: Option<&str>, #[case] path: &str, #[case] expected: &str) {
        assert_eq!(join_key(prefix, Path::new(path)).unwrap(), expected);
    }

    #[test]
    fn test_join_key_rejects_traversal() {
        assert!(join_key(None, Path::new("../books")).is_err());
    }

    #[rstest]
    #[case(None, "books/user/BOOK-1", "books/user/BOOK-1")]
    #[case(Some("souvenir"), "souvenir/books/user/BOOK-1", "books/user/BOOK-1")]
    #[case(Some("souvenir/"), "souvenir/books/user/BOOK-1", "books/user/BOOK-1")]
    fn test_strip_key_prefix(#[case] prefix: Option<&str>, #[case] key: &str, #[case] expected: &str) {
        assert_eq!(strip_key_prefix(prefix, key), expected);
    }

    #[test]
    fn test_bucket_owned_by_us_is_usable() {
        let err = CreateBucketError::BucketAlreadyOwnedByYou(BucketAlreadyOwnedByYou::builder().build());
        assert!(matches!(create_bucket_conflict("souvenir", &err), Some(Ok(()))));
    }

    #[test]
    fn test_bucket_owned_by_someone_else_is_rejected() {
        let err = CreateBucketError::BucketAlreadyExists(BucketAlreadyExists::builder().build());
        let Some(Err(err)) = create_bucket_conflict("souvenir", &err) else {
            panic!("foreign bucket was accepted");
        };
        assert!(matches!(&*err, ErrorKind::PermissionDenied(bucket) if bucket == Path::new("souvenir")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_other_create_failures_are_left_alone() {
        let err = CreateBucketError::generic(ErrorMetadata::builder().code("AccessDenied").build());
        assert!(create_bucket_conflict("souvenir", &err).is_none());
    }
}
