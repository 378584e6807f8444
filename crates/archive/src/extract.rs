use crate::error::{ErrorKind, Result};
use crate::format::{Compression, Format};
use crate::limits::{ExtractLimits, Limit};
use exn::ResultExt;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use tracing::instrument;
use zip::ZipArchive;

fn malformed(reason: impl Into<String>) -> impl FnOnce() -> ErrorKind {
    let reason = reason.into();
    move || ErrorKind::MalformedArchive(reason)
}

/// Accumulates decoded entries while enforcing [`ExtractLimits`].
pub(crate) struct Collector<'l> {
    limits: &'l ExtractLimits,
    entries: usize,
    total_bytes: u64,
    files: BTreeMap<String, String>,
}
impl<'l> Collector<'l> {
    pub(crate) fn new(limits: &'l ExtractLimits) -> Self {
        Self {
            limits,
            entries: 0,
            total_bytes: 0,
            files: BTreeMap::new(),
        }
    }

    /// Read one file entry to the end and record it as text.
    ///
    /// `declared` is the size claimed by the archive headers; it only
    /// allows failing early, the bytes actually read are what count.
    pub(crate) fn accept(&mut self, name: String, reader: impl Read, declared: Option<u64>) -> Result<()> {
        self.entries += 1;
        if self.entries > self.limits.max_entries {
            exn::bail!(ErrorKind::LimitExceeded(Limit::Entries(self.limits.max_entries)));
        }
        if declared.is_some_and(|size| size > self.limits.max_entry_bytes) {
            exn::bail!(ErrorKind::LimitExceeded(Limit::EntryBytes(self.limits.max_entry_bytes)));
        }
        let mut buffer = Vec::new();
        reader
            .take(self.limits.max_entry_bytes.saturating_add(1))
            .read_to_end(&mut buffer)
            .or_raise(malformed(format!("cannot read entry `{name}`")))?;
        let size = buffer.len() as u64;
        if size > self.limits.max_entry_bytes {
            exn::bail!(ErrorKind::LimitExceeded(Limit::EntryBytes(self.limits.max_entry_bytes)));
        }
        self.total_bytes = self.total_bytes.saturating_add(size);
        if self.total_bytes > self.limits.max_total_bytes {
            exn::bail!(ErrorKind::LimitExceeded(Limit::TotalBytes(self.limits.max_total_bytes)));
        }
        let text = match String::from_utf8(buffer) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(entry = %name, "Entry is not valid UTF-8, replacing invalid sequences");
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            },
        };
        // Later entries with the same name replace earlier ones.
        self.files.insert(name, text);
        Ok(())
    }

    pub(crate) fn finish(self) -> BTreeMap<String, String> {
        self.files
    }
}

#[instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
pub(crate) fn read_zip(bytes: &[u8], collector: &mut Collector<'_>) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).or_raise(malformed("cannot read ZIP central directory"))?;
    for index in 0..archive.len() {
        let file = archive.by_index(index).or_raise(malformed(format!("cannot open ZIP entry #{index}")))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let declared = file.size();
        collector.accept(name, file, Some(declared))?;
    }
    Ok(())
}

#[instrument(level = "debug", skip_all, fields(bytes = bytes.len(), compression = compression.as_str()))]
pub(crate) fn read_tar(bytes: &[u8], compression: Compression, collector: &mut Collector<'_>) -> Result<()> {
    let reader = compression.wrap_reader(bytes)?;
    let mut archive = tar::Archive::new(reader);
    let entries = archive.entries().or_raise(malformed("cannot read TAR stream"))?;
    for entry in entries {
        let entry = entry.or_raise(malformed("cannot read TAR entry header"))?;
        // Directories, links and device files carry no text.
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path().or_raise(malformed("invalid TAR entry path"))?.to_string_lossy().into_owned();
        let declared = entry.header().size().ok();
        collector.accept(name, entry, declared)?;
    }
    Ok(())
}

pub(crate) fn read(bytes: &[u8], format: Format, collector: &mut Collector<'_>) -> Result<()> {
    match format {
        Format::Zip => read_zip(bytes, collector),
        Format::Tar(compression) => read_tar(bytes, compression, collector),
    }
}
