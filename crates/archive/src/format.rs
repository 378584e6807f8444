//! Container and compression detection from magic bytes.

use crate::error::{ErrorKind, Result};
use bzip2::read::BzDecoder;
use exn::ResultExt;
use flate2::read::GzDecoder;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Read;
#[cfg(feature = "xz")]
use xz2::read::XzDecoder;
#[cfg(feature = "zstd")]
use zstd::stream::read::Decoder as ZstdDecoder;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
/// End-of-central-directory record; an archive with no entries starts here.
const ZIP_EMPTY_MAGIC: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];
const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5A, 0x68];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_OFFSET: usize = 257;
const TAR_BLOCK: usize = 512;

/// Compression wrapped around a TAR stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    #[default]
    None,
    Bzip2,
    Gzip,
    #[cfg(feature = "xz")]
    Xz,
    #[cfg(feature = "zstd")]
    Zstd,
}
impl Compression {
    /// Detect a compression layer from magic bytes, if any.
    ///
    /// Formats that are recognized but compiled out are reported as
    /// [`UnsupportedFormat`](ErrorKind::UnsupportedFormat) rather than
    /// silently treated as uncompressed.
    pub fn from_magic_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(&BZIP2_MAGIC) {
            return Ok(Compression::Bzip2);
        }
        if bytes.starts_with(&GZIP_MAGIC) {
            return Ok(Compression::Gzip);
        }
        if bytes.starts_with(&XZ_MAGIC) {
            #[cfg(feature = "xz")]
            return Ok(Compression::Xz);
            #[cfg(not(feature = "xz"))]
            exn::bail!(ErrorKind::UnsupportedFormat("xz"));
        }
        if bytes.starts_with(&ZSTD_MAGIC) {
            #[cfg(feature = "zstd")]
            return Ok(Compression::Zstd);
            #[cfg(not(feature = "zstd"))]
            exn::bail!(ErrorKind::UnsupportedFormat("zstd"));
        }
        Ok(Compression::None)
    }

    /// Wrap `reader` in the matching decoder.
    pub fn wrap_reader<'a, R: Read + 'a>(&self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Compression::None => Box::new(reader),
            Compression::Bzip2 => Box::new(BzDecoder::new(reader)),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Compression::Zstd => Box::new(
                ZstdDecoder::new(reader)
                    .or_raise(|| ErrorKind::MalformedArchive("cannot initialize zstd decoder".to_string()))?,
            ),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bzip2 => "bzip2",
            Compression::Gzip => "gzip",
            #[cfg(feature = "xz")]
            Compression::Xz => "xz",
            #[cfg(feature = "zstd")]
            Compression::Zstd => "zstd",
        }
    }
}

/// Archive container format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Zip,
    Tar(Compression),
}
impl Format {
    /// Detect the container format of an upload.
    ///
    /// ZIP is recognized by its local-file or empty-archive signature. A
    /// compressed stream is assumed to hold a TAR archive, which is verified
    /// while reading. Uncompressed TAR is recognized by its `ustar` header,
    /// or by a leading zero block: an archive with no entries is nothing but
    /// its end-of-archive marker.
    pub fn detect(bytes: &[u8]) -> Result<Self> {
        if bytes.starts_with(&ZIP_MAGIC) || bytes.starts_with(&ZIP_EMPTY_MAGIC) {
            return Ok(Format::Zip);
        }
        match Compression::from_magic_bytes(bytes)? {
            Compression::None if is_ustar(bytes) || starts_with_zero_block(bytes) => Ok(Format::Tar(Compression::None)),
            Compression::None => exn::bail!(ErrorKind::MalformedArchive("unrecognized archive format".to_string())),
            compression => Ok(Format::Tar(compression)),
        }
    }

    /// Conventional file extension, used for display and metadata.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Zip => "zip",
            Format::Tar(Compression::None) => "tar",
            Format::Tar(Compression::Bzip2) => "tar.bz2",
            Format::Tar(Compression::Gzip) => "tar.gz",
            #[cfg(feature = "xz")]
            Format::Tar(Compression::Xz) => "tar.xz",
            #[cfg(feature = "zstd")]
            Format::Tar(Compression::Zstd) => "tar.zst",
        }
    }
}
impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.extension())
    }
}

fn is_ustar(bytes: &[u8]) -> bool {
    bytes.get(USTAR_OFFSET..USTAR_OFFSET + USTAR_MAGIC.len()).is_some_and(|magic| magic == USTAR_MAGIC)
}

fn starts_with_zero_block(bytes: &[u8]) -> bool {
    bytes.get(..TAR_BLOCK).is_some_and(|block| block.iter().all(|b| *b == 0))
}
