//! Library Error Types
//!
//! Errors raised by lower crates are wrapped into one of these kinds with
//! [`exn`], keeping the original error as the child in the tree.

use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The upload is not a readable archive, or exceeds the extraction limits.
    #[display("malformed archive: {_0}")]
    MalformedArchive(#[error(not(source))] String),
    /// Object storage could not be reached or refused a write.
    #[display("storage unavailable: {_0}")]
    StorageUnavailable(#[error(not(source))] String),
    #[display("book not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("invalid identifier: {_0}")]
    InvalidIdentifier(#[error(not(source))] String),
    #[display("failed to render book")]
    Render,
    #[display("job store error")]
    Jobs,
    #[display("generation queue is full")]
    QueueFull,
    #[display("generation queue is shut down")]
    Shutdown,
    /// A blocking pipeline stage panicked or was cancelled.
    #[display("generation task failed")]
    Task,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::Jobs | Self::QueueFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::StorageUnavailable("timeout".to_string()), true)]
    #[case(ErrorKind::QueueFull, true)]
    #[case(ErrorKind::MalformedArchive("not a zip".to_string()), false)]
    #[case(ErrorKind::NotFound("BOOK-1".to_string()), false)]
    #[case(ErrorKind::Shutdown, false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
