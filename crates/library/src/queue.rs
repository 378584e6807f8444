//! Background generation queue.
//!
//! A bounded channel feeds a fixed pool of workers sharing one receiver.
//! Every submission gets its book id and a `queued` job record before
//! [`submit()`](GenerationQueue::submit) returns; workers then move the job
//! through `running` to `completed` or `failed`.

use crate::error::{ErrorKind, Result};
use crate::generator::{Generator, Submission, parse_user};
use exn::{OptionExt, ResultExt};
use souvenir_book::models::BookId;
use souvenir_jobs::{Job, JobRepository};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::instrument;

struct Task {
    book_id: BookId,
    submission: Submission,
}

pub struct GenerationQueue {
    generator: Arc<Generator>,
    jobs: JobRepository,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Bumped every time a worker finishes a job.
    finished: Arc<watch::Sender<u64>>,
}
impl GenerationQueue {
    /// Create a queue holding at most `capacity` pending submissions, with no
    /// workers yet.
    pub fn new(generator: Arc<Generator>, jobs: JobRepository, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (finished, _) = watch::channel(0);
        Self {
            generator,
            jobs,
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(Mutex::new(receiver)),
            workers: Mutex::new(Vec::new()),
            finished: Arc::new(finished),
        }
    }

    /// Create a queue and start `workers` workers on the current runtime.
    pub async fn start(generator: Arc<Generator>, jobs: JobRepository, workers: usize, capacity: usize) -> Self {
        let queue = Self::new(generator, jobs, capacity);
        queue.spawn_workers(workers).await;
        queue
    }

    pub async fn spawn_workers(&self, count: usize) {
        let mut workers = self.workers.lock().await;
        for _ in 0..count {
            let id = workers.len();
            let worker = Worker {
                id,
                generator: Arc::clone(&self.generator),
                jobs: self.jobs.clone(),
                receiver: Arc::clone(&self.receiver),
                finished: Arc::clone(&self.finished),
            };
            workers.push(tokio::spawn(worker.run()));
        }
        tracing::debug!(workers = workers.len(), "Generation workers running");
    }

    /// Enqueue a submission.
    ///
    /// # Errors
    ///
    /// - [`QueueFull`](ErrorKind::QueueFull) when `capacity` submissions are
    ///   already pending.
    /// - [`Shutdown`](ErrorKind::Shutdown) after [`shutdown()`](Self::shutdown).
    /// - [`InvalidIdentifier`](ErrorKind::InvalidIdentifier) for an unsafe
    ///   user id; nothing is recorded in that case.
    #[instrument(skip_all, fields(user_id = %submission.user_id, archive = %submission.archive_name))]
    pub async fn submit(&self, submission: Submission) -> Result<Job> {
        let user_id = parse_user(submission.user_id.as_str())?;
        let sender = self.sender.lock().await.clone().ok_or_raise(|| ErrorKind::Shutdown)?;
        let permit = match sender.try_reserve_owned() {
            Ok(permit) => permit,
            Err(TrySendError::Full(_)) => exn::bail!(ErrorKind::QueueFull),
            Err(TrySendError::Closed(_)) => exn::bail!(ErrorKind::Shutdown),
        };
        let book_id = BookId::generate();
        let job = self
            .jobs
            .insert(book_id.as_str(), user_id.as_str(), &submission.archive_name)
            .await
            .or_raise(|| ErrorKind::Jobs)?;
        permit.send(Task { book_id, submission });
        tracing::info!(book_id = %job.book_id, "Queued book generation");
        Ok(job)
    }

    pub async fn job(&self, book_id: &BookId) -> Result<Option<Job>> {
        self.jobs.get(book_id.as_str()).await.or_raise(|| ErrorKind::Jobs)
    }

    /// Wait until the job for `book_id` has completed or failed.
    pub async fn wait(&self, book_id: &BookId) -> Result<Job> {
        let mut finished = self.finished.subscribe();
        loop {
            let job = self.job(book_id).await?.ok_or_raise(|| ErrorKind::NotFound(book_id.to_string()))?;
            if job.state.is_finished() {
                return Ok(job);
            }
            finished.changed().await.or_raise(|| ErrorKind::Shutdown)?;
        }
    }

    /// Stop accepting submissions, let the workers drain what is pending, and
    /// wait for them to exit.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        drop(self.sender.lock().await.take());
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            worker.await.or_raise(|| ErrorKind::Task)?;
        }
        tracing::info!("Generation queue drained");
        Ok(())
    }
}

struct Worker {
    id: usize,
    generator: Arc<Generator>,
    jobs: JobRepository,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    finished: Arc<watch::Sender<u64>>,
}
impl Worker {
    async fn run(self) {
        loop {
            // The lock is only held while waiting, never while generating.
            let task = self.receiver.lock().await.recv().await;
            let Some(task) = task else { break };
            self.process(task).await;
            self.finished.send_modify(|count| *count += 1);
        }
        tracing::debug!(worker = self.id, "Generation worker stopped");
    }

    #[instrument(skip_all, fields(worker = self.id, book_id = %task.book_id))]
    async fn process(&self, task: Task) {
        let id = task.book_id.as_str();
        if let Err(err) = self.jobs.mark_running(id).await {
            tracing::warn!(error = ?err, "Failed to mark job as running");
        }
        let recorded = match self.generator.run(&task.book_id, task.submission).await {
            Ok(generated) => self.jobs.mark_completed(id, &generated.location.url, generated.pages).await,
            Err(err) => {
                tracing::warn!(error = ?err, "Book generation failed");
                self.jobs.mark_failed(id, &(*err).to_string()).await
            },
        };
        if let Err(err) = recorded {
            tracing::error!(error = ?err, "Failed to record job outcome");
        }
    }
}
