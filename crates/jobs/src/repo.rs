//! Job-status repository.
//!
//! A job moves `queued → running → completed | failed`. Each transition
//! rewrites the outcome columns, so a job that is retried starts clean.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{Job, JobRow, JobState};
use exn::ResultExt;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::instrument;

/// Outcome columns written together with a state change.
struct Outcome<'a> {
    book_url: Option<&'a str>,
    pages: Option<i64>,
    error: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: SqlitePool,
}
impl From<&Database> for JobRepository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}
impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn now() -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }

    /// Record a new job in the `queued` state.
    ///
    /// Fails with [`ErrorKind::Database`] if a job with the same book id
    /// already exists.
    #[instrument(skip(self))]
    pub async fn insert(&self, book_id: &str, user_id: &str, archive_name: &str) -> Result<Job> {
        let now = Self::now();
        let row: JobRow = sqlx::query_as(include_str!("../queries/insert_job.sql"))
            .bind(book_id)
            .bind(user_id)
            .bind(archive_name)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.try_into()
    }

    async fn transition(&self, book_id: &str, state: JobState, outcome: Outcome<'_>) -> Result<()> {
        let result = sqlx::query(include_str!("../queries/update_job_state.sql"))
            .bind(state.as_str())
            .bind(outcome.book_url)
            .bind(outcome.pages)
            .bind(outcome.error)
            .bind(Self::now())
            .bind(book_id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::NotFound(book_id.to_string()));
        }
        tracing::debug!(book_id, %state, "Job state changed");
        Ok(())
    }

    pub async fn mark_running(&self, book_id: &str) -> Result<()> {
        let outcome = Outcome {
            book_url: None,
            pages: None,
            error: None,
        };
        self.transition(book_id, JobState::Running, outcome).await
    }

    pub async fn mark_completed(&self, book_id: &str, book_url: &str, pages: u64) -> Result<()> {
        let outcome = Outcome {
            book_url: Some(book_url),
            pages: Some(i64::try_from(pages).or_raise(|| ErrorKind::InvalidData("pages"))?),
            error: None,
        };
        self.transition(book_id, JobState::Completed, outcome).await
    }

    pub async fn mark_failed(&self, book_id: &str, error: &str) -> Result<()> {
        let outcome = Outcome {
            book_url: None,
            pages: None,
            error: Some(error),
        };
        self.transition(book_id, JobState::Failed, outcome).await
    }

    pub async fn get(&self, book_id: &str) -> Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(include_str!("../queries/get_job.sql"))
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Job::try_from).transpose()
    }

    /// Most recently created jobs first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(include_str!("../queries/list_recent_jobs.sql"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Job::try_from).collect()
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(include_str!("../queries/list_jobs_for_user.sql"))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Job::try_from).collect()
    }

    /// Mark every queued or running job as failed with `reason`.
    ///
    /// Jobs left unfinished by a previous process will never be picked up
    /// again; this makes that visible instead of leaving them pending.
    /// Returns the number of jobs affected.
    #[instrument(skip(self))]
    pub async fn fail_unfinished(&self, reason: &str) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/fail_unfinished_jobs.sql"))
            .bind(reason)
            .bind(Self::now())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let affected = result.rows_affected();
        if affected > 0 {
            tracing::warn!(affected, "Marked unfinished jobs from a previous run as failed");
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repository() -> JobRepository {
        let db = Database::connect_in_memory().await.unwrap();
        JobRepository::from(&db)
    }

    #[tokio::test]
    async fn test_insert_is_queued() {
        let repo = repository().await;
        let job = repo.insert("BOOK-1-20240101000000", "alice", "chat.zip").await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.user_id, "alice");
        assert_eq!(job.archive_name, "chat.zip");
        assert!(job.book_url.is_none() && job.pages.is_none() && job.error.is_none());
        assert_eq!(repo.get("BOOK-1-20240101000000").await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let repo = repository().await;
        repo.insert("BOOK-1-20240101000000", "alice", "chat.zip").await.unwrap();
        let err = repo.insert("BOOK-1-20240101000000", "bob", "other.zip").await.unwrap_err();
        assert_eq!(*err, ErrorKind::Database);
    }

    #[tokio::test]
    async fn test_completed_lifecycle() {
        let repo = repository().await;
        repo.insert("BOOK-1-20240101000000", "alice", "chat.zip").await.unwrap();
        repo.mark_running("BOOK-1-20240101000000").await.unwrap();
        assert_eq!(repo.get("BOOK-1-20240101000000").await.unwrap().unwrap().state, JobState::Running);
        repo.mark_completed("BOOK-1-20240101000000", "mock://mock/books/alice/BOOK-1-20240101000000", 10)
            .await
            .unwrap();
        let job = repo.get("BOOK-1-20240101000000").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.state.is_finished());
        assert_eq!(job.book_url.as_deref(), Some("mock://mock/books/alice/BOOK-1-20240101000000"));
        assert_eq!(job.pages, Some(10));
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_lifecycle() {
        let repo = repository().await;
        repo.insert("BOOK-2-20240101000000", "alice", "chat.zip").await.unwrap();
        repo.mark_running("BOOK-2-20240101000000").await.unwrap();
        repo.mark_failed("BOOK-2-20240101000000", "malformed archive").await.unwrap();
        let job = repo.get("BOOK-2-20240101000000").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("malformed archive"));
        assert!(job.book_url.is_none());
    }

    #[tokio::test]
    async fn test_transition_unknown_job() {
        let repo = repository().await;
        let err = repo.mark_running("BOOK-404").await.unwrap_err();
        assert_eq!(*err, ErrorKind::NotFound("BOOK-404".to_string()));
        assert!(repo.get("BOOK-404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lists() {
        let repo = repository().await;
        repo.insert("BOOK-1", "alice", "a.zip").await.unwrap();
        repo.insert("BOOK-2", "bob", "b.zip").await.unwrap();
        repo.insert("BOOK-3", "alice", "c.zip").await.unwrap();
        let recent = repo.list_recent(2).await.unwrap();
        assert_eq!(recent.iter().map(|j| j.book_id.as_str()).collect::<Vec<_>>(), ["BOOK-3", "BOOK-2"]);
        let alice = repo.list_for_user("alice").await.unwrap();
        assert_eq!(alice.iter().map(|j| j.book_id.as_str()).collect::<Vec<_>>(), ["BOOK-3", "BOOK-1"]);
    }

    #[tokio::test]
    async fn test_fail_unfinished() {
        let repo = repository().await;
        repo.insert("BOOK-1", "alice", "a.zip").await.unwrap();
        repo.insert("BOOK-2", "alice", "b.zip").await.unwrap();
        repo.insert("BOOK-3", "alice", "c.zip").await.unwrap();
        repo.mark_running("BOOK-2").await.unwrap();
        repo.mark_completed("BOOK-3", "file:///books/alice/BOOK-3", 10).await.unwrap();
        assert_eq!(repo.fail_unfinished("interrupted").await.unwrap(), 2);
        let states: Vec<JobState> = repo.list_for_user("alice").await.unwrap().into_iter().map(|j| j.state).collect();
        assert_eq!(states, [JobState::Completed, JobState::Failed, JobState::Failed]);
        assert_eq!(repo.fail_unfinished("interrupted").await.unwrap(), 0);
    }
}
