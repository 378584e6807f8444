//! Command-line surface over the generation library.
//!
//! Every command prints JSON on stdout. The exit code is non-zero when a
//! book could not be generated, found or downloaded.

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::{OptionExt, ResultExt};
use serde_json::Value;
use souvenir_book::models::{BookConfig, BookId, UserId};
use souvenir_config::{Config, StorageConfig};
use souvenir_jobs::{Database, JobRepository, JobState};
use souvenir_library::{ErrorKind as LibraryErrorKind, GenerationQueue, Generator, Publisher, Submission};
use souvenir_storage::BackendHandle;
use souvenir_storage::backend::LocalBackend;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "souvenir", version, about = "Turn chat-export archives into memory books")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON). Defaults to the platform
    /// config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a book from one archive and wait for the result.
    Generate {
        archive: PathBuf,
        #[arg(long)]
        user: String,
        /// Book option as `key=value`; JSON values are accepted.
        #[arg(long = "option", value_parser = parse_option)]
        options: Vec<(String, Value)>,
    },
    /// Queue archives for background generation and report the jobs.
    Submit {
        #[arg(required = true)]
        archives: Vec<PathBuf>,
        #[arg(long)]
        user: String,
        #[arg(long = "option", value_parser = parse_option)]
        options: Vec<(String, Value)>,
    },
    /// Show where a book is and how its generation went.
    Status { book_id: String },
    /// Save a book's payload to a file.
    Download {
        book_id: String,
        #[arg(long)]
        user: String,
        #[arg(long, short)]
        output: PathBuf,
    },
}

fn parse_option(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw.split_once('=').ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty option name in `{raw}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

async fn open_backend(storage: &StorageConfig) -> Result<BackendHandle> {
    match storage {
        StorageConfig::Local { root } => {
            let backend = LocalBackend::new("local", root).or_raise(|| ErrorKind::Storage)?;
            Ok(Arc::new(backend))
        },
        #[cfg(feature = "s3")]
        StorageConfig::S3(s3) => {
            let key_id = s3.key_id.clone().ok_or_raise(|| ErrorKind::Config)?;
            let key_secret = s3.key_secret.clone().ok_or_raise(|| ErrorKind::Config)?;
            let backend = souvenir_storage::backend::S3Backend::new(
                "s3",
                &s3.bucket,
                s3.prefix.clone(),
                &s3.region,
                s3.endpoint.clone(),
                key_id,
                key_secret,
            )
            .await
            .or_raise(|| ErrorKind::Storage)?;
            Ok(Arc::new(backend))
        },
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3(_) => exn::bail!(ErrorKind::Unsupported("s3")),
    }
}

async fn open_jobs(config: &Config) -> Result<Database> {
    let path = &config.jobs.database;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Write(parent.to_path_buf()))?;
    }
    Database::connect(path).await.or_raise(|| ErrorKind::Jobs)
}

async fn read_submission(path: &Path, user: &str, config: &BookConfig) -> Result<Submission> {
    let archive = tokio::fs::read(path).await.or_raise(|| ErrorKind::Read(path.to_path_buf()))?;
    let archive_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_raise(|| ErrorKind::Read(path.to_path_buf()))?;
    Ok(Submission {
        archive,
        archive_name,
        user_id: user.to_string(),
        config: config.clone(),
    })
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).or_raise(|| ErrorKind::Output)?;
    println!("{json}");
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    tracing::debug!(?config, "Loaded configuration");
    let backend = open_backend(&config.storage).await?;
    let publisher = Publisher::new(backend).or_raise(|| ErrorKind::Generation)?;
    let generator = Generator::new(publisher, config.extract);

    match cli.command {
        Command::Generate { archive, user, options } => {
            let book_config = options.into_iter().collect::<BookConfig>();
            let submission = read_submission(&archive, &user, &book_config).await?;
            let result = generator.generate(submission).await;
            print_json(&result)?;
            Ok(exit_code(result.success))
        },
        Command::Submit { archives, user, options } => {
            let db = open_jobs(&config).await?;
            let jobs = JobRepository::from(&db);
            let interrupted = jobs.fail_unfinished("interrupted before completion").await.or_raise(|| ErrorKind::Jobs)?;
            if interrupted > 0 {
                tracing::warn!(interrupted, "Marked jobs from a previous run as failed");
            }
            let generator = Arc::new(generator.with_jobs(jobs.clone()));
            let queue = GenerationQueue::start(generator, jobs, config.queue.workers, config.queue.capacity).await;

            let book_config = options.into_iter().collect::<BookConfig>();
            let mut queued: Vec<BookId> = Vec::with_capacity(archives.len());
            let mut drained = 0;
            for path in &archives {
                let submission = read_submission(path, &user, &book_config).await?;
                let job = loop {
                    match queue.submit(submission.clone()).await {
                        // More archives than queue slots: let the oldest finish first.
                        Err(err) if *err == LibraryErrorKind::QueueFull && drained < queued.len() => {
                            queue.wait(&queued[drained]).await.or_raise(|| ErrorKind::Generation)?;
                            drained += 1;
                        },
                        result => break result.or_raise(|| ErrorKind::Generation)?,
                    }
                };
                queued.push(BookId::parse(job.book_id.as_str()).or_raise(|| ErrorKind::Generation)?);
            }
            let mut finished = Vec::with_capacity(queued.len());
            for book_id in &queued {
                finished.push(queue.wait(book_id).await.or_raise(|| ErrorKind::Generation)?);
            }
            queue.shutdown().await.or_raise(|| ErrorKind::Generation)?;
            db.close().await;

            print_json(&finished)?;
            Ok(exit_code(finished.iter().all(|job| job.state == JobState::Completed)))
        },
        Command::Status { book_id } => {
            let db = open_jobs(&config).await?;
            let generator = generator.with_jobs(JobRepository::from(&db));
            let status = generator.status(&book_id).await.or_raise(|| ErrorKind::Generation)?;
            db.close().await;
            print_json(&status)?;
            Ok(exit_code(status.book.exists))
        },
        Command::Download { book_id, user, output } => {
            let book_id = BookId::parse(book_id).or_raise(|| ErrorKind::Generation)?;
            let user_id = UserId::parse(user).or_raise(|| ErrorKind::Generation)?;
            let payload = generator.publisher().download(&book_id, &user_id).await.or_raise(|| ErrorKind::Generation)?;
            tokio::fs::write(&output, &payload).await.or_raise(|| ErrorKind::Write(output.clone()))?;
            tracing::info!(%book_id, output = %output.display(), size = payload.len(), "Downloaded book");
            Ok(ExitCode::SUCCESS)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("title=Nos vacances", "title", json!("Nos vacances"))]
    #[case("pages=3", "pages", json!(3))]
    #[case("color=true", "color", json!(true))]
    #[case("style=", "style", json!(""))]
    #[case("note=a=b", "note", json!("a=b"))]
    #[case(r#"tags=["a","b"]"#, "tags", json!(["a", "b"]))]
    fn test_parse_option(#[case] raw: &str, #[case] key: &str, #[case] value: Value) {
        assert_eq!(parse_option(raw).unwrap(), (key.to_string(), value));
    }

    #[rstest]
    #[case("title")]
    #[case("=value")]
    fn test_parse_option_rejects(#[case] raw: &str) {
        assert!(parse_option(raw).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate() {
        let cli = Cli::try_parse_from([
            "souvenir",
            "generate",
            "export.zip",
            "--user",
            "alice",
            "--option",
            "title=Ete",
            "--config",
            "/etc/souvenir.toml",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("/etc/souvenir.toml")));
        let Command::Generate { archive, user, options } = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(archive, PathBuf::from("export.zip"));
        assert_eq!(user, "alice");
        assert_eq!(options, vec![("title".to_string(), json!("Ete"))]);
    }

    #[test]
    fn test_submit_requires_archives() {
        assert!(Cli::try_parse_from(["souvenir", "submit", "--user", "alice"]).is_err());
    }

    #[tokio::test]
    async fn test_open_local_backend_requires_absolute_root() {
        let storage = StorageConfig::Local {
            root: PathBuf::from("relative/books"),
        };
        let Err(err) = open_backend(&storage).await else {
            panic!("relative storage root was accepted");
        };
        assert_eq!(*err, ErrorKind::Storage);
    }

    #[tokio::test]
    async fn test_open_jobs_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.jobs.database = dir.path().join("nested").join("jobs.sqlite");
        let db = open_jobs(&config).await.unwrap();
        db.close().await;
        assert!(config.jobs.database.is_file());
    }

    #[tokio::test]
    async fn test_read_submission_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.zip");
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer.start_file("chat.txt", zip::write::SimpleFileOptions::default()).unwrap();
        std::io::Write::write_all(&mut writer, b"hello\n").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        tokio::fs::write(&path, &bytes).await.unwrap();

        let submission = read_submission(&path, "alice", &BookConfig::new()).await.unwrap();
        assert_eq!(submission.archive_name, "export.zip");
        assert_eq!(submission.archive, bytes);
        assert_eq!(submission.user_id, "alice");

        let err = read_submission(&dir.path().join("missing.zip"), "alice", &BookConfig::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Read(_)));
    }
}
