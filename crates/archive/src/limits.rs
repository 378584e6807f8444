use derive_more::Display;

const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_MAX_TOTAL_BYTES: u64 = 256 * 1024 * 1024;

/// Upper bounds applied while extracting an archive.
///
/// Sizes are checked against the bytes actually decompressed, so an entry
/// that lies about its size in the archive headers is still caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExtractLimits {
    /// Maximum number of file entries (directories don't count).
    pub max_entries: usize,
    /// Maximum decompressed size of a single entry.
    pub max_entry_bytes: u64,
    /// Maximum decompressed size of all entries together.
    pub max_total_bytes: u64,
}
impl ExtractLimits {
    /// No limits at all. Only sensible for trusted input.
    pub const fn unlimited() -> Self {
        Self {
            max_entries: usize::MAX,
            max_entry_bytes: u64::MAX,
            max_total_bytes: u64::MAX,
        }
    }
}
impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

/// The limit that an archive exceeded.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    #[display("more than {_0} entries")]
    Entries(usize),
    #[display("entry larger than {_0} bytes")]
    EntryBytes(u64),
    #[display("more than {_0} bytes in total")]
    TotalBytes(u64),
}
