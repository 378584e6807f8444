//! Artifact publishing.
//!
//! A book is stored as two objects sharing one book id:
//!
//! - the payload at `books/{user}/{book}`,
//! - the metadata record at `metadata/{user}/{book}`.
//!
//! The metadata record is written first. If the payload write then fails,
//! the record is removed again; should that cleanup fail too, the pair is
//! reported as [`BookState::Incomplete`] by [`Publisher::status()`].
//!
//! Only writes create the storage container. Lookups against a container
//! that does not exist yet simply find nothing.

use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use futures::TryStreamExt;
use serde::Serialize;
use souvenir_book::models::{
    AggregationResult, ArchiveSummary, BookArtifact, BookConfig, BookId, BookMetadata, METADATA_CONTENT_TYPE, Page,
    UserId,
};
use souvenir_book::PayloadRenderer;
use souvenir_storage::BackendHandle;
use souvenir_storage::error::{Error as StorageError, ErrorKind as StorageErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::instrument;

pub const BOOKS_PREFIX: &str = "books";
pub const METADATA_PREFIX: &str = "metadata";

fn unavailable(err: StorageError) -> Error {
    let reason = (*err).to_string();
    err.raise(ErrorKind::StorageUnavailable(reason))
}

fn not_found_or_unavailable(err: StorageError, book_id: &BookId) -> Error {
    if matches!(&*err, StorageErrorKind::NotFound(_)) {
        err.raise(ErrorKind::NotFound(book_id.to_string()))
    } else {
        unavailable(err)
    }
}

/// Everything the publisher needs besides the pages themselves.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub book_id: BookId,
    pub user_id: UserId,
    pub config: BookConfig,
    pub archive: ArchiveSummary,
    pub messages: AggregationResult,
    pub created_at: OffsetDateTime,
}

/// Where a published book ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactLocation {
    pub key: PathBuf,
    pub metadata_key: PathBuf,
    /// Backend-specific URL of the payload.
    pub url: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BookState {
    /// The payload exists.
    Completed,
    /// A metadata record exists without its payload.
    Incomplete,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookStatus {
    pub book_id: String,
    pub exists: bool,
    pub status: BookState,
    pub user_id: Option<String>,
}
impl BookStatus {
    fn new(book_id: &BookId, status: BookState, user_id: Option<String>) -> Self {
        Self {
            book_id: book_id.to_string(),
            exists: status == BookState::Completed,
            status,
            user_id,
        }
    }
}

/// Persists books to a storage backend.
///
/// The backend's container is created lazily on first use. Concurrent first
/// uses share a single initialization; a failed initialization is retried by
/// the next caller.
pub struct Publisher {
    backend: BackendHandle,
    renderer: Arc<PayloadRenderer>,
    container: OnceCell<()>,
}
impl Publisher {
    pub fn new(backend: BackendHandle) -> Result<Self> {
        let renderer = PayloadRenderer::new().or_raise(|| ErrorKind::Render)?;
        Ok(Self::with_renderer(backend, renderer))
    }

    pub fn with_renderer(backend: BackendHandle, renderer: PayloadRenderer) -> Self {
        Self {
            backend,
            renderer: Arc::new(renderer),
            container: OnceCell::new(),
        }
    }

    pub fn artifact_key(user_id: &UserId, book_id: &BookId) -> PathBuf {
        Path::new(BOOKS_PREFIX).join(user_id.as_str()).join(book_id.as_str())
    }

    pub fn metadata_key(user_id: &UserId, book_id: &BookId) -> PathBuf {
        Path::new(METADATA_PREFIX).join(user_id.as_str()).join(book_id.as_str())
    }

    async fn ensure_container(&self) -> Result<()> {
        self.container
            .get_or_try_init(|| async {
                self.backend.ensure_container().await.map_err(unavailable)?;
                tracing::debug!(backend = self.backend.name(), "Storage container ready");
                Ok::<_, Error>(())
            })
            .await?;
        Ok(())
    }

    /// Render `pages` into a payload and persist it with its metadata record.
    #[instrument(skip_all, fields(book_id = %request.book_id, user_id = %request.user_id, pages = pages.len()))]
    pub async fn publish(&self, pages: Vec<Page>, request: PublishRequest) -> Result<ArtifactLocation> {
        let renderer = Arc::clone(&self.renderer);
        let (book_id, config) = (request.book_id.clone(), request.config.clone());
        let page_count = pages.len() as u64;
        let payload = tokio::task::spawn_blocking(move || renderer.render(&book_id, &config, &pages))
            .await
            .or_raise(|| ErrorKind::Task)?
            .or_raise(|| ErrorKind::Render)?;
        let artifact = BookArtifact::new(request.book_id, request.user_id, payload, page_count, request.created_at);
        let metadata = BookMetadata::new(&artifact, request.config, request.archive, request.messages);
        self.store(&artifact, &metadata).await
    }

    /// Persist an already rendered artifact and its metadata record.
    #[instrument(skip_all, fields(book_id = %artifact.book_id, size = artifact.payload.len()))]
    pub async fn store(&self, artifact: &BookArtifact, metadata: &BookMetadata) -> Result<ArtifactLocation> {
        self.ensure_container().await?;
        let key = Self::artifact_key(&artifact.user_id, &artifact.book_id);
        let metadata_key = Self::metadata_key(&artifact.user_id, &artifact.book_id);
        let record = metadata.to_json().or_raise(|| ErrorKind::Render)?;
        self.backend.write(&metadata_key, &record, METADATA_CONTENT_TYPE).await.map_err(unavailable)?;
        if let Err(err) = self.backend.write(&key, &artifact.payload, &artifact.content_type).await {
            if let Err(cleanup) = self.backend.delete(&metadata_key).await {
                tracing::warn!(
                    key = %metadata_key.display(),
                    error = %*cleanup,
                    "Failed to remove metadata record after payload write failure"
                );
            }
            return Err(unavailable(err));
        }
        let url = self.backend.url(&key).map_err(unavailable)?;
        tracing::info!(%url, "Published book");
        Ok(ArtifactLocation {
            key,
            metadata_key,
            url,
            content_hash: artifact.content_hash.clone(),
        })
    }

    /// Find the user owning `book_id` under `prefix`, if any object exists.
    async fn owner(&self, prefix: &str, book_id: &BookId) -> Result<Option<String>> {
        let mut objects = self.backend.list_stream(Some(Path::new(prefix)));
        while let Some(object) = objects.try_next().await.map_err(unavailable)? {
            if object.file_name() != Some(book_id.as_str()) || object.path.components().count() != 3 {
                continue;
            }
            let owner = object.path.parent().and_then(Path::file_name).and_then(|user| user.to_str());
            if let Some(owner) = owner {
                return Ok(Some(owner.to_string()));
            }
        }
        Ok(None)
    }

    /// Look up a book by id alone. Unknown ids are reported as missing.
    ///
    /// The owner is not known, so both prefixes are scanned. Prefer
    /// [`status_of()`](Self::status_of) when it is.
    #[instrument(skip_all, fields(%book_id))]
    pub async fn status(&self, book_id: &BookId) -> Result<BookStatus> {
        let (status, user_id) = match self.owner(BOOKS_PREFIX, book_id).await? {
            Some(user) => (BookState::Completed, Some(user)),
            None => match self.owner(METADATA_PREFIX, book_id).await? {
                Some(user) => (BookState::Incomplete, Some(user)),
                None => (BookState::Missing, None),
            },
        };
        Ok(BookStatus::new(book_id, status, user_id))
    }

    /// Look up a book whose owner is known, by key.
    #[instrument(skip_all, fields(%book_id, %user_id))]
    pub async fn status_of(&self, book_id: &BookId, user_id: &UserId) -> Result<BookStatus> {
        let status = if self.backend.exists(&Self::artifact_key(user_id, book_id)).await.map_err(unavailable)? {
            BookState::Completed
        } else if self.backend.exists(&Self::metadata_key(user_id, book_id)).await.map_err(unavailable)? {
            BookState::Incomplete
        } else {
            BookState::Missing
        };
        let owner = (status != BookState::Missing).then(|| user_id.to_string());
        Ok(BookStatus::new(book_id, status, owner))
    }

    #[instrument(skip_all, fields(%book_id, %user_id))]
    pub async fn download(&self, book_id: &BookId, user_id: &UserId) -> Result<Vec<u8>> {
        let key = Self::artifact_key(user_id, book_id);
        self.backend.read(&key).await.map_err(|err| not_found_or_unavailable(err, book_id))
    }

    pub async fn metadata(&self, book_id: &BookId, user_id: &UserId) -> Result<BookMetadata> {
        let key = Self::metadata_key(user_id, book_id);
        let record = self.backend.read(&key).await.map_err(|err| not_found_or_unavailable(err, book_id))?;
        BookMetadata::from_json(&record).or_raise(|| ErrorKind::Render)
    }

    /// Remove a book and its metadata record. Missing objects are ignored.
    #[instrument(skip_all, fields(%book_id, %user_id))]
    pub async fn delete(&self, book_id: &BookId, user_id: &UserId) -> Result<()> {
        self.backend.delete(&Self::artifact_key(user_id, book_id)).await.map_err(unavailable)?;
        self.backend.delete(&Self::metadata_key(user_id, book_id)).await.map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use souvenir_book::models::PageKind;
    use souvenir_book::synthesize;
    use souvenir_storage::backend::{LocalBackend, MockBackend, StorageBackend};

    fn request(user: &str) -> PublishRequest {
        PublishRequest {
            book_id: BookId::generate(),
            user_id: UserId::parse(user).unwrap(),
            config: BookConfig::new().with("title", "Nos souvenirs"),
            archive: ArchiveSummary {
                name: "chat.zip".to_string(),
                size: 42,
                format: "zip".to_string(),
                files: 3,
            },
            messages: AggregationResult::new(120, 3, 3),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn pages(request: &PublishRequest) -> Vec<Page> {
        synthesize(&request.messages, &request.config)
    }

    fn publisher(backend: &Arc<MockBackend>) -> Publisher {
        Publisher::new(backend.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_publish_then_download_round_trip() {
        let backend = Arc::new(MockBackend::default());
        let publisher = publisher(&backend);
        let request = request("alice");
        let (book_id, user_id) = (request.book_id.clone(), request.user_id.clone());
        let pages = pages(&request);
        let expected = PayloadRenderer::new().unwrap().render(&book_id, &request.config, &pages).unwrap();
        let location = publisher.publish(pages, request).await.unwrap();

        assert_eq!(location.key, PathBuf::from(format!("books/alice/{book_id}")));
        assert_eq!(location.metadata_key, PathBuf::from(format!("metadata/alice/{book_id}")));
        assert!(!location.url.is_empty());
        assert_eq!(location.content_hash, blake3::hash(&expected).to_string());

        let downloaded = publisher.download(&book_id, &user_id).await.unwrap();
        assert_eq!(downloaded, expected);
        let text = String::from_utf8(downloaded).unwrap();
        assert!(text.starts_with(&format!("Nos souvenirs\nBook ID: {book_id}\nPages: 10\n")));
        let metadata = publisher.metadata(&book_id, &user_id).await.unwrap();
        assert_eq!(metadata.content_hash, location.content_hash);

        let info = backend.stat(&location.key).await.unwrap();
        assert_eq!(info.content_type.as_deref(), Some("application/pdf"));
        let info = backend.stat(&location.metadata_key).await.unwrap();
        assert_eq!(info.content_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_metadata_read_back() {
        let backend = Arc::new(MockBackend::default());
        let publisher = publisher(&backend);
        let request = request("alice");
        let (book_id, user_id) = (request.book_id.clone(), request.user_id.clone());
        publisher.publish(pages(&request), request).await.unwrap();
        let metadata = publisher.metadata(&book_id, &user_id).await.unwrap();
        assert_eq!(metadata.book_id, book_id);
        assert_eq!(metadata.pages, 10);
        assert_eq!(metadata.messages.total_messages, 120);
        assert_eq!(metadata.config.title(), "Nos souvenirs");
    }

    #[tokio::test]
    async fn test_status() {
        let backend = Arc::new(MockBackend::default());
        let publisher = publisher(&backend);
        let request = request("alice");
        let book_id = request.book_id.clone();
        publisher.publish(pages(&request), request).await.unwrap();

        let status = publisher.status(&book_id).await.unwrap();
        assert!(status.exists);
        assert_eq!(status.status, BookState::Completed);
        assert_eq!(status.user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_status_of_unknown_book() {
        let backend = Arc::new(MockBackend::default());
        let publisher = publisher(&backend);
        let status = publisher.status(&BookId::parse("BOOK-404-19700101000000").unwrap()).await.unwrap();
        assert!(!status.exists);
        assert_eq!(status.status, BookState::Missing);
        assert_eq!(status.user_id, None);
    }

    #[tokio::test]
    async fn test_download_unknown_book() {
        let backend = Arc::new(MockBackend::default());
        let publisher = publisher(&backend);
        let err = publisher
            .download(&BookId::parse("BOOK-404").unwrap(), &UserId::parse("alice").unwrap())
            .await
            .unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound("BOOK-404".to_string()));
    }

    #[tokio::test]
    async fn test_status_of_known_owner() {
        let backend = Arc::new(MockBackend::default());
        let publisher = publisher(&backend);
        let request = request("alice");
        let (book_id, user_id) = (request.book_id.clone(), request.user_id.clone());
        publisher.publish(pages(&request), request).await.unwrap();
        let listings = backend.listings();

        let status = publisher.status_of(&book_id, &user_id).await.unwrap();
        assert_eq!(status, publisher.status(&book_id).await.unwrap());
        assert_eq!(status.status, BookState::Completed);

        backend.delete(&Publisher::artifact_key(&user_id, &book_id)).await.unwrap();
        let status = publisher.status_of(&book_id, &user_id).await.unwrap();
        assert_eq!(status.status, BookState::Incomplete);
        assert_eq!(status.user_id.as_deref(), Some("alice"));

        let status = publisher.status_of(&book_id, &UserId::parse("mallory").unwrap()).await.unwrap();
        assert_eq!(status.status, BookState::Missing);
        assert_eq!(status.user_id, None);
        // Only the one by-id lookup above had to scan.
        assert_eq!(backend.listings(), listings + 1);
    }

    #[tokio::test]
    async fn test_lookups_do_not_create_container() {
        let backend = Arc::new(MockBackend::default());
        let publisher = publisher(&backend);
        let (book_id, user_id) = (BookId::parse("BOOK-404").unwrap(), UserId::parse("alice").unwrap());

        assert_eq!(publisher.status(&book_id).await.unwrap().status, BookState::Missing);
        assert_eq!(publisher.status_of(&book_id, &user_id).await.unwrap().status, BookState::Missing);
        let err = publisher.download(&book_id, &user_id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = publisher.metadata(&book_id, &user_id).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        publisher.delete(&book_id, &user_id).await.unwrap();
        assert_eq!(backend.containers_created(), 0);
    }

    #[tokio::test]
    async fn test_download_requires_owner() {
        let backend = Arc::new(MockBackend::default());
        let publisher = publisher(&backend);
        let request = request("alice");
        let book_id = request.book_id.clone();
        publisher.publish(pages(&request), request).await.unwrap();
        let err = publisher.download(&book_id, &UserId::parse("mallory").unwrap()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_payload_write_removes_metadata() {
        let backend = Arc::new(MockBackend::default());
        backend.fail_writes_under(BOOKS_PREFIX).await;
        let publisher = publisher(&backend);
        let request = request("alice");
        let (book_id, user_id) = (request.book_id.clone(), request.user_id.clone());
        let err = publisher.publish(pages(&request), request).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StorageUnavailable(_)));
        assert!(err.is_retryable());
        assert!(!backend.exists(&Publisher::metadata_key(&user_id, &book_id)).await.unwrap());
        assert_eq!(publisher.status(&book_id).await.unwrap().status, BookState::Missing);
    }

    #[tokio::test]
    async fn test_orphaned_metadata_is_incomplete() {
        let backend = Arc::new(MockBackend::default());
        let publisher = publisher(&backend);
        let request = request("alice");
        let (book_id, user_id) = (request.book_id.clone(), request.user_id.clone());
        publisher.publish(pages(&request), request).await.unwrap();
        backend.delete(&Publisher::artifact_key(&user_id, &book_id)).await.unwrap();
        let status = publisher.status(&book_id).await.unwrap();
        assert!(!status.exists);
        assert_eq!(status.status, BookState::Incomplete);
        assert_eq!(status.user_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = Arc::new(MockBackend::default());
        let publisher = publisher(&backend);
        let request = request("alice");
        let (book_id, user_id) = (request.book_id.clone(), request.user_id.clone());
        publisher.publish(pages(&request), request).await.unwrap();
        publisher.delete(&book_id, &user_id).await.unwrap();
        publisher.delete(&book_id, &user_id).await.unwrap();
        assert_eq!(publisher.status(&book_id).await.unwrap().status, BookState::Missing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_publishes_create_container_once() {
        let backend = Arc::new(MockBackend::default());
        let publisher = Arc::new(publisher(&backend));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let publisher = publisher.clone();
                tokio::spawn(async move {
                    let request = request("alice");
                    publisher.publish(pages(&request), request).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(backend.containers_created(), 1);
        assert_eq!(backend.list(Some(Path::new(BOOKS_PREFIX))).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_separate_publishers_share_container() {
        let backend = Arc::new(MockBackend::default());
        for _ in 0..2 {
            let publisher = publisher(&backend);
            let request = request("bob");
            publisher.publish(pages(&request), request).await.unwrap();
        }
        assert_eq!(backend.containers_created(), 1);
    }

    #[tokio::test]
    async fn test_local_backend_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("bucket");
        let backend = Arc::new(LocalBackend::new("local", &root).unwrap());
        let publisher = Publisher::new(backend).unwrap();
        let request = request("alice");
        let (book_id, user_id) = (request.book_id.clone(), request.user_id.clone());
        let pages = pages(&request);
        assert_eq!(pages[0].kind, PageKind::Cover);
        let location = publisher.publish(pages, request).await.unwrap();
        assert!(location.url.starts_with("file://"));
        assert!(root.join(&location.key).is_file());
        assert!(publisher.status(&book_id).await.unwrap().exists);
        assert!(!publisher.download(&book_id, &user_id).await.unwrap().is_empty());
    }
}
