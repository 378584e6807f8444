use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("storage backend `{_0}` is not enabled in this build")]
    Unsupported(#[error(not(source))] &'static str),
    #[display("could not open storage")]
    Storage,
    #[display("could not open job store")]
    Jobs,
    #[display("could not read {}", _0.display())]
    Read(#[error(not(source))] PathBuf),
    #[display("could not write {}", _0.display())]
    Write(#[error(not(source))] PathBuf),
    #[display("book generation failed")]
    Generation,
    #[display("could not print output")]
    Output,
}
