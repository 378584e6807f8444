use super::{AggregationResult, BookConfig, BookId, UserId};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use souvenir_archive::ArchiveContent;
use time::OffsetDateTime;

/// The payload stands in for a rendered PDF and is stored as one.
pub const PAYLOAD_CONTENT_TYPE: &str = "application/pdf";
pub const METADATA_CONTENT_TYPE: &str = "application/json";

/// What is kept of the uploaded archive once it has been aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSummary {
    pub name: String,
    pub size: u64,
    pub format: String,
    pub files: usize,
}
impl From<&ArchiveContent> for ArchiveSummary {
    fn from(content: &ArchiveContent) -> Self {
        Self {
            name: content.name.clone(),
            size: content.size,
            format: content.format.to_string(),
            files: content.len(),
        }
    }
}

/// The generated book, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookArtifact {
    pub book_id: BookId,
    pub user_id: UserId,
    pub payload: Vec<u8>,
    pub pages: u64,
    /// BLAKE3 hash of `payload`.
    pub content_hash: String,
    pub content_type: String,
    pub created_at: OffsetDateTime,
}
impl BookArtifact {
    pub fn new(book_id: BookId, user_id: UserId, payload: Vec<u8>, pages: u64, created_at: OffsetDateTime) -> Self {
        Self {
            content_hash: blake3::hash(&payload).to_string(),
            book_id,
            user_id,
            payload,
            pages,
            content_type: PAYLOAD_CONTENT_TYPE.to_string(),
            created_at,
        }
    }
}

/// Side record persisted next to every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMetadata {
    pub book_id: BookId,
    pub user_id: UserId,
    pub config: BookConfig,
    pub archive: ArchiveSummary,
    pub messages: AggregationResult,
    pub pages: u64,
    pub content_hash: String,
    pub content_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
impl BookMetadata {
    pub fn new(
        artifact: &BookArtifact,
        config: BookConfig,
        archive: ArchiveSummary,
        messages: AggregationResult,
    ) -> Self {
        Self {
            book_id: artifact.book_id.clone(),
            user_id: artifact.user_id.clone(),
            config,
            archive,
            messages,
            pages: artifact.pages,
            content_hash: artifact.content_hash.clone(),
            content_type: artifact.content_type.clone(),
            created_at: artifact.created_at,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).or_raise(|| ErrorKind::Serialization)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).or_raise(|| ErrorKind::Serialization)
    }
}
