//! Layered configuration.
//!
//! Values are resolved from, lowest to highest precedence:
//!
//! 1. built-in defaults,
//! 2. a configuration file: the one given explicitly, otherwise any of
//!    `souvenir.toml`, `souvenir.yaml` or `souvenir.json` found in the
//!    platform configuration directory,
//! 3. environment variables prefixed with `SOUVENIR_`, with `__` separating
//!    nested keys (`SOUVENIR_QUEUE__WORKERS=8`,
//!    `SOUVENIR_STORAGE__BACKEND=s3`).
//!
//! ```toml
//! [storage]
//! backend = "s3"
//! bucket = "tchat-souvenir-books"
//! endpoint = "http://localhost:9000"
//! key_id = "minioadmin"
//! key_secret = "minioadmin"
//!
//! [extract]
//! max_entries = 5000
//!
//! [queue]
//! workers = 2
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use tracing::instrument;

pub use souvenir_archive::ExtractLimits;

pub const ENV_PREFIX: &str = "SOUVENIR_";
pub const DEFAULT_BUCKET: &str = "tchat-souvenir-books";
const FILE_STEM: &str = "souvenir";
const FILE_EXTENSIONS: [&str; 4] = ["toml", "yaml", "yml", "json"];

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "souvenir")
}

/// Directory for books and the job database when nothing else is configured.
fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("souvenir"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub extract: ExtractLimits,
    pub queue: QueueConfig,
    pub jobs: JobsConfig,
}

/// Where generated books are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// A directory on the local filesystem. Must be absolute.
    Local { root: PathBuf },
    /// An S3-compatible bucket (AWS, MinIO, ...).
    S3(S3Config),
}
impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            root: default_data_dir().join("books"),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix prepended to every object inside the bucket.
    pub prefix: Option<String>,
    pub region: String,
    /// Custom endpoint, for S3-compatible services.
    pub endpoint: Option<String>,
    /// Static credentials, required.
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
}
impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            prefix: None,
            region: "us-east-1".to_string(),
            endpoint: None,
            key_id: None,
            key_secret: None,
        }
    }
}
impl Debug for S3Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("key_secret", &self.key_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of generations running at the same time.
    pub workers: usize,
    /// Number of accepted submissions waiting for a worker.
    pub capacity: usize,
}
impl Default for QueueConfig {
    fn default() -> Self {
        Self { workers: 4, capacity: 64 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// SQLite database holding job records.
    pub database: PathBuf,
}
impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            database: default_data_dir().join("jobs.sqlite"),
        }
    }
}

impl Config {
    /// Configuration files looked up in the platform configuration directory
    /// when no file is given explicitly.
    pub fn default_files() -> Vec<PathBuf> {
        let Some(dirs) = project_dirs() else {
            return Vec::new();
        };
        FILE_EXTENSIONS
            .iter()
            .map(|ext| dirs.config_dir().join(format!("{FILE_STEM}.{ext}")))
            .filter(|path| path.is_file())
            .collect()
    }

    /// Load configuration from `path`, or from the default files if `None`.
    ///
    /// An explicit path that doesn't exist is an error; missing default files
    /// are not.
    #[instrument]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let files = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => vec![path.to_path_buf()],
            None => Self::default_files(),
        };
        Self::from_figment(Self::figment(&files)?)
    }

    /// Layer defaults, `files` (in order) and the environment.
    pub fn figment(files: &[PathBuf]) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        for file in files {
            tracing::debug!(file = %file.display(), "Reading configuration file");
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file.clone())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|err| exn::Exn::from(ErrorKind::Load(err.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| exn::Exn::from(ErrorKind::Invalid(reason.to_string()));
        match &self.storage {
            StorageConfig::Local { root } if !root.is_absolute() => {
                return Err(invalid("storage.root must be an absolute path"));
            },
            StorageConfig::S3(s3) if s3.bucket.trim().is_empty() => {
                return Err(invalid("storage.bucket must not be empty"));
            },
            StorageConfig::S3(s3) if s3.key_id.is_none() || s3.key_secret.is_none() => {
                return Err(invalid("storage.key_id and storage.key_secret are required for S3"));
            },
            _ => {},
        }
        if self.queue.workers == 0 {
            return Err(invalid("queue.workers must be at least 1"));
        }
        if self.queue.capacity == 0 {
            return Err(invalid("queue.capacity must be at least 1"));
        }
        if self.extract.max_entries == 0 || self.extract.max_entry_bytes == 0 || self.extract.max_total_bytes == 0 {
            return Err(invalid("extract limits must be greater than zero"));
        }
        Ok(())
    }
}
