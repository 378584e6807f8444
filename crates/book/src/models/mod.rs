mod aggregation;
mod artifact;
mod config;
mod id;
mod page;

pub use self::aggregation::AggregationResult;
pub use self::artifact::{ArchiveSummary, BookArtifact, BookMetadata, PAYLOAD_CONTENT_TYPE, METADATA_CONTENT_TYPE};
pub use self::config::BookConfig;
pub use self::id::{BookId, UserId};
pub use self::page::{Page, PageKind};
