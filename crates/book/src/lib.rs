//! Memory book model and the pure stages of the generation pipeline.
//!
//! - [`aggregate()`] counts message lines in an extracted archive,
//! - [`synthesize()`] lays out the page sequence,
//! - [`PayloadRenderer`] turns pages into the stored payload.

mod aggregate;
pub mod error;
pub mod models;
mod render;
mod synthesize;

pub use crate::aggregate::{ELIGIBLE_SUFFIXES, aggregate, count_lines, is_eligible};
pub use crate::error::{ErrorKind, Result};
pub use crate::render::{DEFAULT_TEMPLATE, PayloadRenderer};
pub use crate::synthesize::synthesize;
