//! Object storage for generated books.
//!
//! Every backend implements [`StorageBackend`], a small put/get/stat/list
//! interface over a single container (a directory, an S3 bucket, or a
//! `HashMap` in tests). Keys are relative paths validated by
//! [`validate_path`] before they reach a backend.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::ObjectInfo;
pub use crate::path::{validate as validate_path, validate_segment};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
