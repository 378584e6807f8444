use crate::models::AggregationResult;
use souvenir_archive::ArchiveContent;
use tracing::instrument;

/// File name suffixes whose lines are counted as messages. Matched
/// case-sensitively.
pub const ELIGIBLE_SUFFIXES: [&str; 2] = [".json", ".txt"];

pub fn is_eligible(name: &str) -> bool {
    ELIGIBLE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Number of newline-delimited lines in `text`.
///
/// A trailing newline does not start another line, and an empty text has
/// no lines at all. Every other newline counts, so blank lines are lines:
/// `"a\n\n\n"` has three and `"\n\n"` has two.
pub fn count_lines(text: &str) -> u64 {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return 0;
    }
    let newlines = memchr::memchr_iter(b'\n', bytes).count() as u64;
    newlines + u64::from(!bytes.ends_with(b"\n"))
}

/// Count the message lines of every eligible file in `content`.
///
/// `conversation_files` counts every file in the archive while only eligible
/// files contribute to `total_messages`; `eligible_files` carries the
/// narrower count.
#[instrument(skip_all, fields(archive = %content.name, files = content.len()))]
pub fn aggregate(content: &ArchiveContent) -> AggregationResult {
    let (total_messages, eligible_files) = content
        .iter()
        .filter(|(name, _)| is_eligible(name))
        .fold((0u64, 0usize), |(lines, files), (_, text)| (lines + count_lines(text), files + 1));
    let result = AggregationResult::new(total_messages, content.len(), eligible_files);
    tracing::info!(
        total_messages,
        eligible_files,
        estimated_pages = result.estimated_pages,
        "Aggregated conversation files"
    );
    result
}
