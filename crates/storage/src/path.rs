//! Key validation.
//!
//! Object keys are relative paths. These functions keep keys inside the
//! container root and keep caller-supplied identifiers (user ids, book ids)
//! to exactly one path segment.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates and normalizes an object key.
///
/// Ensures that keys don't escape the container root (no `..` traversal) and
/// don't contain null bytes. Empty keys are rejected.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use souvenir_storage::validate_path;
/// assert!(validate_path("books/user-1/BOOK-1").is_ok());
/// assert!(validate_path("metadata/a/../b").is_ok()); // (never leaves the root)
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("books//./user-1/BOOK-1/").unwrap(),
///     Path::new("books/user-1/BOOK-1")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Validates that `segment` can be used verbatim as one component of a key.
///
/// Unlike [`validate`], nothing is normalized: a segment containing a
/// separator, a `.`/`..` reference, a null byte or surrounding whitespace is
/// rejected outright, because it would map two different identifiers onto
/// the same key.
///
/// ```
/// use souvenir_storage::validate_segment;
/// assert!(validate_segment("user-42").is_ok());
/// assert!(validate_segment("BOOK-1700000000000-20231114221320").is_ok());
/// assert!(validate_segment("a/b").is_err());
/// assert!(validate_segment("..").is_err());
/// ```
pub fn validate_segment(segment: &str) -> Result<&str> {
    let invalid = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.trim() != segment
        || segment.contains(['/', '\\', '\0']);
    if invalid {
        exn::bail!(ErrorKind::InvalidPath(PathBuf::from(segment)));
    }
    Ok(segment)
}
