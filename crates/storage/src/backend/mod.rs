//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for object storage across different backends (local filesystem,
//! S3-compatible services, and an in-memory mock for tests).

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::models::ObjectInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type ObjectInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<ObjectInfo>> + Send + 'a>>;

/// Unified interface for object storage backends.
///
/// A backend owns exactly one container (a root directory, an S3 bucket).
/// The container may not exist yet: call
/// [`ensure_container()`](Self::ensure_container) before the first write.
///
/// # Path Handling
/// All keys are relative to the container root and must be validated using
/// [`validate_path`](crate::validate_path) before use. Implementations
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use souvenir_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_of_book(backend: &dyn StorageBackend) -> Result<u64> {
///     let key = Path::new("books/user-1/BOOK-1700000000000-20231114221320");
///     if backend.exists(key).await? {
///         Ok(backend.stat(key).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// Create the backing container if it does not exist yet.
    ///
    /// Must be idempotent and must tolerate concurrent callers: a creation
    /// that races with another creator and reports "already exists" is a
    /// success, not a failure.
    async fn ensure_container(&self) -> Result<()>;

    /// List all objects matching an optional prefix.
    ///
    /// Default implementation collects [`list_stream()`](Self::list_stream)
    /// into a [`Vec`].
    async fn list(&self, prefix: Option<&Path>) -> Result<Vec<ObjectInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream object metadata matching an optional prefix.
    ///
    /// Prefixes are component-based: `books/user` matches
    /// `books/user/BOOK-1` but not `books/username/BOOK-1`. Listing a
    /// missing container or prefix yields an empty stream.
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use souvenir_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream(Some(Path::new("books")));
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> ObjectInfoStream<'a>;

    /// Check if an object exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read object contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write object contents, replacing any existing object at `path`.
    ///
    /// `content_type` is stored by backends that support it (S3, mock) and
    /// ignored by the local filesystem.
    ///
    /// ```no_run
    /// use std::path::Path;
    /// # use souvenir_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// backend.ensure_container().await?;
    /// backend.write(Path::new("metadata/user-1/BOOK-1"), b"{}", "application/json").await?;
    /// # Ok(())
    /// # }
    /// ```
    async fn write(&self, path: &Path, data: &[u8], content_type: &str) -> Result<()>;

    /// Delete an object. Deleting an object that does not exist succeeds.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Get object metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<ObjectInfo>;

    /// Opaque URL under which the object at `path` is addressable.
    ///
    /// No request is made; the URL is derived from the backend's
    /// configuration.
    fn url(&self, path: &Path) -> Result<String>;
}
