//! Archive extraction for chat exports.
//!
//! Turns an uploaded archive into a map of entry path → text. ZIP archives
//! and TAR archives (plain or wrapped in gzip, bzip2, xz or zstd) are
//! recognized from their magic bytes, not from the upload's file name.
//!
//! Extraction is bounded by [`ExtractLimits`]: entry count, per-entry size
//! and total decompressed size.

pub mod error;
mod extract;
mod format;
mod limits;

use crate::extract::Collector;
use std::collections::BTreeMap;
use tracing::instrument;

pub use crate::error::{ErrorKind, Result};
pub use crate::format::{Compression, Format};
pub use crate::limits::{ExtractLimits, Limit};

/// Text content of an extracted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveContent {
    /// Name of the upload, as given by the caller.
    pub name: String,
    /// Size of the upload in bytes (compressed).
    pub size: u64,
    /// Detected container format.
    pub format: Format,
    /// Entry path → decoded text, ordered by path.
    pub files: BTreeMap<String, String>,
}
impl ArchiveContent {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(name, text)| (name.as_str(), text.as_str()))
    }
}

/// Extract every file entry of `bytes` as UTF-8 text.
///
/// Directory entries are skipped. Invalid UTF-8 sequences are replaced with
/// U+FFFD rather than failing the whole archive.
///
/// # Errors
///
/// - [`MalformedArchive`](ErrorKind::MalformedArchive) when the bytes are not
///   a recognized container, or an entry cannot be read.
/// - [`LimitExceeded`](ErrorKind::LimitExceeded) when `limits` are exceeded.
/// - [`UnsupportedFormat`](ErrorKind::UnsupportedFormat) when the compression
///   layer is disabled in this build.
///
/// # Examples
///
/// ```
/// use souvenir_archive::{ExtractLimits, extract};
///
/// let err = extract(b"definitely not an archive", "chat.zip", &ExtractLimits::default()).unwrap_err();
/// assert!(matches!(&*err, souvenir_archive::ErrorKind::MalformedArchive(_)));
/// ```
#[instrument(skip(bytes, limits), fields(size = bytes.len()))]
pub fn extract(bytes: &[u8], name: impl Into<String> + std::fmt::Debug, limits: &ExtractLimits) -> Result<ArchiveContent> {
    let format = Format::detect(bytes)?;
    let mut collector = Collector::new(limits);
    extract::read(bytes, format, &mut collector)?;
    let files = collector.finish();
    tracing::info!(%format, entries = files.len(), "Extracted archive");
    Ok(ArchiveContent {
        name: name.into(),
        size: bytes.len() as u64,
        format,
        files,
    })
}
