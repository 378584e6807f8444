use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A user or book identifier cannot be used as a storage key segment.
    #[display("invalid {kind} identifier: {value:?}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
    },
    #[display("failed to render book payload")]
    Template,
    #[display("failed to (de)serialize book record")]
    Serialization,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
