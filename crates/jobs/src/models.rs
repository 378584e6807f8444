use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}
impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Completed and failed jobs never change state again.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}
impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}
impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queued" => JobState::Queued,
            "running" => JobState::Running,
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            _ => exn::bail!(ErrorKind::InvalidData("state")),
        })
    }
}

/// Durable record of one queued book generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub book_id: String,
    pub user_id: String,
    pub archive_name: String,
    pub state: JobState,
    /// Set once the job has completed.
    pub book_url: Option<String>,
    /// Set once the job has completed.
    pub pages: Option<u64>,
    /// Set once the job has failed.
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct JobRow {
    pub(crate) book_id: String,
    pub(crate) user_id: String,
    pub(crate) archive_name: String,
    pub(crate) state: String,
    pub(crate) book_url: Option<String>,
    pub(crate) pages: Option<i64>,
    pub(crate) error: Option<String>,
    pub(crate) created_at: i64,
    pub(crate) updated_at: i64,
}
impl TryFrom<JobRow> for Job {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            book_id: row.book_id,
            user_id: row.user_id,
            archive_name: row.archive_name,
            state: row.state.parse()?,
            book_url: row.book_url,
            pages: row
                .pages
                .map(|p| u64::try_from(p).or_raise(|| ErrorKind::InvalidData("pages")))
                .transpose()?,
            error: row.error,
            created_at: OffsetDateTime::from_unix_timestamp(row.created_at)
                .or_raise(|| ErrorKind::InvalidData("created_at"))?,
            updated_at: OffsetDateTime::from_unix_timestamp(row.updated_at)
                .or_raise(|| ErrorKind::InvalidData("updated_at"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(JobState::Queued)]
    #[case(JobState::Running)]
    #[case(JobState::Completed)]
    #[case(JobState::Failed)]
    fn test_state_text(#[case] state: JobState) {
        assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        assert_eq!(serde_json::to_string(&state).unwrap(), format!("\"{state}\""));
    }

    #[test]
    fn test_unknown_state() {
        let err = "paused".parse::<JobState>().unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("state"));
    }

    #[test]
    fn test_negative_pages_rejected() {
        let row = JobRow {
            book_id: "BOOK-1-19700101000000".to_string(),
            user_id: "alice".to_string(),
            archive_name: "chat.zip".to_string(),
            state: "completed".to_string(),
            book_url: None,
            pages: Some(-1),
            error: None,
            created_at: 0,
            updated_at: 0,
        };
        let err = Job::try_from(row).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("pages"));
    }
}
