//! Job store error types.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("job database error")]
    Database,
    #[display("job database migration error")]
    Migration,
    #[display("job not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// A stored row cannot be turned back into a job.
    #[display("invalid job data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // SQLITE_BUSY surfaces as a database error once the busy timeout
        // has elapsed; another attempt may well get the lock.
        matches!(self, ErrorKind::Database)
    }
}
