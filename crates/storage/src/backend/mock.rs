//! In-memory storage backend for testing.

use super::{ObjectInfoStream, StorageBackend};
use crate::error::{ErrorKind, Result};
use crate::models::ObjectInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

struct StoredObject {
    inserted: OffsetDateTime,
    content_type: String,
    data: Vec<u8>,
}

/// In-memory storage backend for testing.
///
/// Objects are stored in a `HashMap` behind a [`RwLock`]. The container
/// starts out missing (like a fresh S3 bucket) unless the backend is built
/// with [`with_files()`](Self::with_files): writes fail until
/// [`ensure_container()`](StorageBackend::ensure_container) has run.
///
/// Writes below a prefix can be made to fail with
/// [`fail_writes_under()`](Self::fail_writes_under) to exercise partial
/// failures.
///
/// # Examples
///
/// ```
/// use souvenir_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::default();
/// backend.ensure_container().await.unwrap();
/// backend.write(Path::new("books/u/BOOK-1"), b"data", "application/pdf").await.unwrap();
/// assert!(backend.exists(Path::new("books/u/BOOK-1")).await.unwrap());
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    container: Mutex<bool>,
    containers_created: AtomicUsize,
    listings: AtomicUsize,
    failing_prefix: RwLock<Option<PathBuf>>,
    storage: RwLock<HashMap<PathBuf, StoredObject>>,
}

impl MockBackend {
    /// Create a mock backend with an existing container, pre-populated with
    /// objects.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = HashMap::new();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_files: invalid path {}", path.display());
            };
            let object = StoredObject {
                inserted: now,
                content_type: "application/octet-stream".to_string(),
                data: data.into(),
            };
            map.insert(validated, object);
        }
        Self {
            name: "mock".to_string(),
            container: Mutex::new(true),
            containers_created: AtomicUsize::new(0),
            listings: AtomicUsize::new(0),
            failing_prefix: RwLock::new(None),
            storage: RwLock::new(map),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every subsequent write below `prefix` fail with a network error.
    pub async fn fail_writes_under(&self, prefix: impl Into<PathBuf>) {
        *self.failing_prefix.write().await = Some(prefix.into());
    }

    /// Number of times [`ensure_container()`](StorageBackend::ensure_container)
    /// actually had to create the container.
    pub fn containers_created(&self) -> usize {
        self.containers_created.load(Ordering::SeqCst)
    }

    /// Number of listings started, whether or not they were consumed.
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    async fn container_exists(&self) -> bool {
        *self.container.lock().await
    }

    fn object_info(path: &Path, object: &StoredObject) -> ObjectInfo {
        ObjectInfo::new(path, object.data.len() as u64, object.inserted).with_content_type(&object.content_type)
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        let backend = Self::with_files(files);
        Self {
            container: Mutex::new(false),
            ..backend
        }
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_container(&self) -> Result<()> {
        let mut exists = self.container.lock().await;
        if !*exists {
            // Give a concurrent caller the chance to queue up on the lock.
            tokio::task::yield_now().await;
            *exists = true;
            self.containers_created.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> ObjectInfoStream<'a> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let validated_prefix = match prefix.map(validate_path).transpose() {
            Ok(pfx) => pfx,
            Err(e) => return Box::pin(futures::stream::once(async { Err(e) })),
        };

        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let entries: Vec<ObjectInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(path, _)| match &validated_prefix {
                        Some(pfx) => path.starts_with(pfx),
                        None => true,
                    })
                    .map(|(path, object)| Self::object_info(path, object))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let object = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(object.data.clone())
    }

    async fn write(&self, path: &Path, data: &[u8], content_type: &str) -> Result<()> {
        let path = validate_path(path)?;
        if !self.container_exists().await {
            exn::bail!(ErrorKind::BackendError(format!("container `{}` does not exist", self.name)));
        }
        if let Some(prefix) = self.failing_prefix.read().await.as_ref()
            && path.starts_with(prefix)
        {
            exn::bail!(ErrorKind::Network(format!("injected write failure for {}", path.display())));
        }
        let object = StoredObject {
            inserted: OffsetDateTime::now_utc(),
            content_type: content_type.to_string(),
            data: data.to_vec(),
        };
        self.storage.write().await.insert(path, object);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.remove(&path);
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<ObjectInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let object = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(Self::object_info(&path, object))
    }

    fn url(&self, path: &Path) -> Result<String> {
        Ok(format!("mock://{}/{}", self.name, validate_path(path)?.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_write_requires_container() {
        let backend = MockBackend::default();
        let err = backend.write(Path::new("books/u/BOOK-1"), b"data", "application/pdf").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::BackendError(_)));
        backend.ensure_container().await.unwrap();
        backend.write(Path::new("books/u/BOOK-1"), b"data", "application/pdf").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MockBackend::with_files([("seed.txt", "seed")]);
        backend.write(Path::new("test.txt"), b"hello", "text/plain").await.unwrap();
        assert_eq!(backend.read(Path::new("test.txt")).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("missing.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ensure_container_concurrently_creates_once() {
        let backend = Arc::new(MockBackend::default());
        let (a, b) = tokio::join!(
            tokio::spawn({
                let backend = backend.clone();
                async move { backend.ensure_container().await }
            }),
            tokio::spawn({
                let backend = backend.clone();
                async move { backend.ensure_container().await }
            }),
        );
        assert!(a.unwrap().is_ok());
        assert!(b.unwrap().is_ok());
        assert_eq!(backend.containers_created(), 1);
    }

    #[tokio::test]
    async fn test_stat_keeps_content_type() {
        let backend = MockBackend::default();
        backend.ensure_container().await.unwrap();
        backend.write(Path::new("metadata/u/BOOK-1"), b"{}", "application/json").await.unwrap();
        let info = backend.stat(Path::new("metadata/u/BOOK-1")).await.unwrap();
        assert_eq!(info.size, 2);
        assert_eq!(info.content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let backend = MockBackend::default();
        backend.ensure_container().await.unwrap();
        backend.fail_writes_under("books").await;
        let err = backend.write(Path::new("books/u/BOOK-1"), b"data", "application/pdf").await.unwrap_err();
        assert!(err.is_retryable());
        backend.write(Path::new("metadata/u/BOOK-1"), b"{}", "application/json").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let backend = MockBackend::with_files([("books/u/BOOK-1", "data")]);
        backend.delete(Path::new("books/u/BOOK-1")).await.unwrap();
        backend.delete(Path::new("books/u/BOOK-1")).await.unwrap();
        assert!(!backend.exists(Path::new("books/u/BOOK-1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MockBackend::with_files([
            ("books/alice/BOOK-1", "a"),
            ("books/alice/BOOK-2", "b"),
            ("metadata/alice/BOOK-1", "c"),
        ]);
        assert_eq!(backend.list(Some(Path::new("books"))).await.unwrap().len(), 2);
        assert_eq!(backend.list(None).await.unwrap().len(), 3);
        assert_eq!(backend.listings(), 2);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MockBackend::with_files([("a", "b")]);
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"bad", "text/plain").await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", "bad")]);
    }
}
