//! Book generation on top of the pipeline stages.
//!
//! - [`Publisher`] persists rendered books and their metadata records,
//! - [`Generator`] runs one submission through extraction, aggregation,
//!   synthesis and publishing,
//! - [`GenerationQueue`] runs submissions in the background and tracks them
//!   in the job store.

pub mod error;
mod generator;
mod publisher;
mod queue;

pub use crate::error::{ErrorKind, Result};
pub use crate::generator::{Generated, GenerationResult, GenerationStatus, Generator, Submission};
pub use crate::publisher::{
    ArtifactLocation, BOOKS_PREFIX, BookState, BookStatus, METADATA_PREFIX, PublishRequest, Publisher,
};
pub use crate::queue::GenerationQueue;
