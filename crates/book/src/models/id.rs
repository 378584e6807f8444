use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use time::OffsetDateTime;

/// Highest millisecond component handed out so far in this process.
static LAST_MILLIS: AtomicI64 = AtomicI64::new(0);

fn segment(kind: &'static str, value: &str) -> Result<()> {
    souvenir_storage::validate_segment(value).or_raise(|| ErrorKind::InvalidIdentifier {
        kind,
        value: value.to_string(),
    })?;
    Ok(())
}

/// Newtype over a string that is always a single safe storage key segment.
macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);
        impl $name {
            /// Accept an externally supplied identifier.
            pub fn parse(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                segment($kind, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                f.write_str(&self.0)
            }
        }
        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                Self::parse(value).map_err(|err| D::Error::custom(&*err))
            }
        }
    };
}

identifier!(
    /// Identifier of a generated book: `BOOK-<epoch-millis>-<yyyyMMddHHmmss>`.
    ///
    /// Both components are UTC. Ids generated by [`BookId::generate()`] in the
    /// same process have strictly increasing millisecond components, so two
    /// submissions in the same millisecond never share an id. Ids accepted
    /// through [`BookId::parse()`] are only checked for key safety; ids that do
    /// not follow the generated format simply never match a book.
    BookId,
    "book"
);
identifier!(
    /// Verified identifier of the user owning a book, supplied by the caller.
    UserId,
    "user"
);

impl BookId {
    pub fn generate() -> Self {
        Self::generate_at(OffsetDateTime::now_utc())
    }

    /// Generate an id for `now`, bumped forward if `now` is not later than
    /// the last id handed out.
    pub fn generate_at(now: OffsetDateTime) -> Self {
        let wanted = (now.unix_timestamp_nanos() / 1_000_000) as i64;
        let previous = LAST_MILLIS
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(wanted.max(last + 1)))
            .unwrap_or_else(|last| last);
        Self::from_millis(wanted.max(previous + 1), now)
    }

    fn from_millis(millis: i64, fallback: OffsetDateTime) -> Self {
        let at = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).unwrap_or(fallback);
        Self(format!(
            "BOOK-{millis}-{:04}{:02}{:02}{:02}{:02}{:02}",
            at.year(),
            u8::from(at.month()),
            at.day(),
            at.hour(),
            at.minute(),
            at.second(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    fn millis(id: &BookId) -> i64 {
        id.as_str().split('-').nth(1).unwrap().parse().unwrap()
    }

    #[test]
    fn test_format() {
        let id = BookId::from_millis(1_709_528_767_042, datetime!(2000-01-01 00:00 UTC));
        assert_eq!(id.as_str(), "BOOK-1709528767042-20240304050607");
    }

    #[test]
    fn test_generated_format() {
        let id = BookId::generate();
        let parts: Vec<&str> = id.as_str().split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "BOOK");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 14);
    }

    #[test]
    fn test_generated_ids_strictly_increase() {
        let now = OffsetDateTime::now_utc();
        let ids: Vec<BookId> = (0..100).map(|_| BookId::generate_at(now)).collect();
        for pair in ids.windows(2) {
            assert!(millis(&pair[1]) > millis(&pair[0]), "{} !> {}", pair[1], pair[0]);
        }
    }

    #[test]
    fn test_generated_id_is_valid() {
        let id = BookId::generate();
        assert_eq!(BookId::parse(id.as_str()).unwrap(), id);
    }

    #[rstest]
    #[case("")]
    #[case("..")]
    #[case("a/b")]
    #[case("../../etc")]
    #[case(" padded ")]
    fn test_rejects_unsafe_identifiers(#[case] value: &str) {
        let err = UserId::parse(value).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidIdentifier { kind: "user", .. }));
        let err = BookId::parse(value).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidIdentifier { kind: "book", .. }));
    }

    #[test]
    fn test_serde_validates() {
        assert!(serde_json::from_str::<UserId>("\"alice\"").is_ok());
        assert!(serde_json::from_str::<UserId>("\"../alice\"").is_err());
    }
}
