//! Storage models.

use std::path::PathBuf;
use time::OffsetDateTime;

/// Object metadata returned by storage backends.
///
/// Used for listing operations and for status checks that should not
/// download the object itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Relative path (key) from the container root
    pub path: PathBuf,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
    /// Content type recorded at write time, when the backend keeps one
    pub content_type: Option<String>,
}
impl ObjectInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: impl Into<OffsetDateTime>) -> Self {
        Self {
            path: path.into(),
            size,
            modified: modified.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Final component of the key, e.g. the book id in `books/{user}/{book}`.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}
