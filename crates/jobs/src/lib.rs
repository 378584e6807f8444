//! SQLite job-status store.
//!
//! Every submission accepted by the generation queue is recorded here before
//! it runs, so that its progress and outcome can be queried later, including
//! from another process.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::error::{ErrorKind, Result};
pub use crate::models::{Job, JobState};
pub use crate::repo::JobRepository;
