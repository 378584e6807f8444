//! One submission through the whole pipeline: extract, aggregate,
//! synthesize, publish.

use crate::error::{Error, ErrorKind, Result};
use crate::publisher::{ArtifactLocation, BookStatus, PublishRequest, Publisher};
use exn::ResultExt;
use serde::Serialize;
use souvenir_archive::ExtractLimits;
use souvenir_book::models::{ArchiveSummary, BookConfig, BookId, UserId};
use souvenir_jobs::{Job, JobRepository};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use time::OffsetDateTime;
use tracing::instrument;

/// An uploaded archive and everything needed to turn it into a book.
#[derive(Clone)]
pub struct Submission {
    pub archive: Vec<u8>,
    pub archive_name: String,
    /// Verified by the caller; validated here only as a storage key segment.
    pub user_id: String,
    pub config: BookConfig,
}
impl Debug for Submission {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Submission")
            .field("archive", &format_args!("<{} bytes>", self.archive.len()))
            .field("archive_name", &self.archive_name)
            .field("user_id", &self.user_id)
            .field("config", &self.config)
            .finish()
    }
}

/// A successfully published book.
#[derive(Debug, Clone)]
pub struct Generated {
    pub book_id: BookId,
    pub user_id: UserId,
    pub location: ArtifactLocation,
    pub pages: u64,
    pub created_at: OffsetDateTime,
}

/// Caller-facing outcome of a generation. Failures are reported here, never
/// raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub success: bool,
    pub book_id: String,
    pub book_url: Option<String>,
    pub pages: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub message: String,
    pub error: Option<String>,
}
impl GenerationResult {
    pub fn completed(generated: &Generated) -> Self {
        Self {
            success: true,
            book_id: generated.book_id.to_string(),
            book_url: Some(generated.location.url.clone()),
            pages: generated.pages,
            created_at: generated.created_at,
            message: "Book generated successfully".to_string(),
            error: None,
        }
    }

    pub fn failed(book_id: &BookId, created_at: OffsetDateTime, err: &Error) -> Self {
        Self {
            success: false,
            book_id: book_id.to_string(),
            book_url: None,
            pages: 0,
            created_at,
            message: "Book generation failed".to_string(),
            error: Some((**err).to_string()),
        }
    }
}

/// Combined view of a book: what storage holds, and what the job store
/// recorded about its generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    #[serde(flatten)]
    pub book: BookStatus,
    pub job: Option<Job>,
}

pub struct Generator {
    publisher: Publisher,
    limits: ExtractLimits,
    jobs: Option<JobRepository>,
}
impl Generator {
    pub fn new(publisher: Publisher, limits: ExtractLimits) -> Self {
        Self {
            publisher,
            limits,
            jobs: None,
        }
    }

    /// Attach a job store so that [`status()`](Self::status) reports job
    /// records too.
    pub fn with_jobs(mut self, jobs: JobRepository) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Generate a book under a freshly assigned id.
    pub async fn generate(&self, submission: Submission) -> GenerationResult {
        let book_id = BookId::generate();
        let started = OffsetDateTime::now_utc();
        match self.run(&book_id, submission).await {
            Ok(generated) => GenerationResult::completed(&generated),
            Err(err) => {
                tracing::warn!(%book_id, error = ?err, "Book generation failed");
                GenerationResult::failed(&book_id, started, &err)
            },
        }
    }

    /// Generate a book under `book_id`, returning typed errors.
    #[instrument(skip_all, fields(%book_id, user_id = %submission.user_id, archive = %submission.archive_name))]
    pub async fn run(&self, book_id: &BookId, submission: Submission) -> Result<Generated> {
        let Submission {
            archive,
            archive_name,
            user_id,
            config,
        } = submission;
        let user_id = parse_user(user_id)?;
        let limits = self.limits;
        let layout_config = config.clone();
        let (summary, messages, pages) = tokio::task::spawn_blocking(move || {
            let content = souvenir_archive::extract(&archive, archive_name, &limits).map_err(|err| {
                let reason = (*err).to_string();
                err.raise(ErrorKind::MalformedArchive(reason))
            })?;
            let messages = souvenir_book::aggregate(&content);
            let pages = souvenir_book::synthesize(&messages, &layout_config);
            Ok::<_, Error>((ArchiveSummary::from(&content), messages, pages))
        })
        .await
        .or_raise(|| ErrorKind::Task)??;
        tracing::info!(
            messages = messages.total_messages,
            files = messages.conversation_files,
            pages = pages.len(),
            "Laid out book"
        );

        let created_at = OffsetDateTime::now_utc();
        let page_count = pages.len() as u64;
        let request = PublishRequest {
            book_id: book_id.clone(),
            user_id: user_id.clone(),
            config,
            archive: summary,
            messages,
            created_at,
        };
        let location = self.publisher.publish(pages, request).await?;
        Ok(Generated {
            book_id: book_id.clone(),
            user_id,
            location,
            pages: page_count,
            created_at,
        })
    }

    #[instrument(skip(self))]
    pub async fn status(&self, book_id: &str) -> Result<GenerationStatus> {
        let book_id = parse_book(book_id)?;
        let job = match &self.jobs {
            Some(jobs) => jobs.get(book_id.as_str()).await.or_raise(|| ErrorKind::Jobs)?,
            None => None,
        };
        // A job record names the owner, which avoids scanning for it.
        let book = match job.as_ref().and_then(|job| UserId::parse(job.user_id.as_str()).ok()) {
            Some(user_id) => self.publisher.status_of(&book_id, &user_id).await?,
            None => self.publisher.status(&book_id).await?,
        };
        Ok(GenerationStatus { book, job })
    }
}

fn invalid(err: souvenir_book::error::Error) -> Error {
    let reason = (*err).to_string();
    err.raise(ErrorKind::InvalidIdentifier(reason))
}

pub(crate) fn parse_user(value: impl Into<String>) -> Result<UserId> {
    UserId::parse(value).map_err(invalid)
}

pub(crate) fn parse_book(value: impl Into<String>) -> Result<BookId> {
    BookId::parse(value).map_err(invalid)
}
