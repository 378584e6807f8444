//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use crate::limits::Limit;
use derive_more::{Display, Error};

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The upload is not a readable archive container, or one of its entries
    /// is corrupt.
    #[display("malformed archive: {_0}")]
    MalformedArchive(#[error(not(source))] String),
    /// The archive was recognized but its compression layer is disabled in
    /// this build.
    #[display("unsupported archive compression: {_0}")]
    UnsupportedFormat(#[error(not(source))] &'static str),
    /// The archive exceeds one of the configured extraction limits.
    #[display("archive exceeds limit: {_0}")]
    LimitExceeded(#[error(not(source))] Limit),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // The bytes are either a valid archive within limits or they aren't.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::MalformedArchive("unrecognized format".to_string()).to_string(),
            "malformed archive: unrecognized format"
        );
        assert_eq!(
            ErrorKind::LimitExceeded(Limit::Entries(10)).to_string(),
            "archive exceeds limit: more than 10 entries"
        );
    }
}
