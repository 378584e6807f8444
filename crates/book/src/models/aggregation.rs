use serde::{Deserialize, Serialize};

/// Minimum number of pages in a book, whatever the volume of messages.
pub const MIN_PAGES: u64 = 10;
/// Message lines laid out on one page.
pub const MESSAGES_PER_PAGE: u64 = 50;

/// Message counts of an extracted archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    /// Sum of the line counts of eligible (`.json`/`.txt`) files.
    pub total_messages: u64,
    /// Number of files in the archive, eligible or not.
    pub conversation_files: usize,
    /// Number of files whose lines were counted.
    pub eligible_files: usize,
    pub estimated_pages: u64,
}
impl AggregationResult {
    pub fn new(total_messages: u64, conversation_files: usize, eligible_files: usize) -> Self {
        Self {
            total_messages,
            conversation_files,
            eligible_files,
            estimated_pages: estimate_pages(total_messages),
        }
    }
}

pub(crate) fn estimate_pages(total_messages: u64) -> u64 {
    MIN_PAGES.max(total_messages / MESSAGES_PER_PAGE)
}
