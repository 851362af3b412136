use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_channel::{Receiver, Sender};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::models::job::{Job, JobId, JobStatus};
use crate::services::store::JobStore;
use crate::services::transform::{
    panic_message, JobInput, Progress, TransformAdapter, TransformError,
};

pub const CANCELLED_MESSAGE: &str = "Job cancelled";
const SHUTDOWN_MESSAGE: &str = "Queue shut down before the job started";

/// Entry waiting in FIFO order for a worker slot.
///
/// The input itself is parked in the queue's pending map, so a cancelled
/// entry can release it (deleting an uploaded temp file) while the entry
/// is still buried in the channel.
pub struct QueuedJob<O> {
    pub job_id: JobId,
    pub options: O,
    cancel: CancellationToken,
}

/// What a cancellation request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job had not started and is now failed.
    Dequeued,
    /// The job is running; its adapter was asked to stop.
    Signalled,
    /// The job was already terminal; nothing changed.
    AlreadyFinished,
}

/// In-process job queue driving at most `concurrency` jobs at a time.
///
/// `submit` never waits for the work: it records the job, appends the entry
/// to an unbounded FIFO channel and returns the id. Each of the
/// `concurrency` worker tasks loops pulling the next entry, so dispatch
/// follows submission order and with one worker completion does too.
pub struct JobQueue<O> {
    shared: Arc<Shared<O>>,
    sender: Sender<QueuedJob<O>>,
    concurrency: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared<O> {
    store: Arc<JobStore>,
    adapter: Arc<dyn TransformAdapter<Options = O>>,
    receiver: Receiver<QueuedJob<O>>,
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    pending: Mutex<HashMap<JobId, JobInput>>,
    active: AtomicUsize,
    shutdown: CancellationToken,
}

impl<O: Send + Sync + 'static> JobQueue<O> {
    /// Spawn the worker tasks. Must be called within a Tokio runtime.
    pub fn start(
        store: Arc<JobStore>,
        adapter: Arc<dyn TransformAdapter<Options = O>>,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, receiver) = async_channel::unbounded();

        let shared = Arc::new(Shared {
            store,
            adapter,
            receiver,
            tokens: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        });

        let workers = (0..concurrency)
            .map(|slot| {
                let shared = Arc::clone(&shared);
                tokio::spawn(
                    async move { shared.worker_loop().await }
                        .instrument(tracing::info_span!("worker", slot)),
                )
            })
            .collect();

        tracing::info!(
            adapter = shared.adapter.name(),
            concurrency,
            "Job queue started"
        );

        Self {
            shared,
            sender,
            concurrency,
            workers: Mutex::new(workers),
        }
    }

    /// Record a new job and append it to the queue.
    pub fn submit(&self, input: JobInput, options: O) -> Result<JobId, QueueError> {
        if self.sender.is_closed() {
            return Err(QueueError::Closed);
        }

        let job = Job::new(input.describe(), input.original_name())
            .with_original_size(input.size_bytes());
        let job_id = job.id;
        self.shared.store.create(job);

        let cancel = self.shared.shutdown.child_token();
        self.shared.tokens.lock().insert(job_id, cancel.clone());
        self.shared.pending.lock().insert(job_id, input);

        let entry = QueuedJob {
            job_id,
            options,
            cancel,
        };

        if self.sender.try_send(entry).is_err() {
            self.shared.tokens.lock().remove(&job_id);
            self.shared.pending.lock().remove(&job_id);
            self.shared
                .store
                .update(job_id, |job| job.fail(SHUTDOWN_MESSAGE));
            return Err(QueueError::Closed);
        }

        metrics::counter!("media_jobs_submitted_total").increment(1);
        metrics::gauge!("media_jobs_queue_depth").set(self.queue_depth() as f64);
        tracing::info!(job_id = %job_id, adapter = self.shared.adapter.name(), "Job queued");

        Ok(job_id)
    }

    /// Cancel a job: honoured while queued, best-effort while processing.
    pub fn cancel(&self, job_id: JobId) -> Result<CancelOutcome, QueueError> {
        let outcome = self
            .shared
            .store
            .update(job_id, |job| match job.status {
                JobStatus::Queued => {
                    job.fail(CANCELLED_MESSAGE);
                    CancelOutcome::Dequeued
                }
                JobStatus::Processing => CancelOutcome::Signalled,
                JobStatus::Completed | JobStatus::Failed => CancelOutcome::AlreadyFinished,
            })
            .ok_or(QueueError::NotFound(job_id))?;

        if outcome != CancelOutcome::AlreadyFinished {
            if let Some(token) = self.shared.tokens.lock().get(&job_id) {
                token.cancel();
            }
        }
        if outcome == CancelOutcome::Dequeued {
            // The worker skips the entry later; the input goes now.
            let released = self.shared.pending.lock().remove(&job_id);
            drop(released);
        }

        tracing::info!(job_id = %job_id, ?outcome, "Cancellation requested");
        Ok(outcome)
    }

    /// Entries waiting for a worker.
    pub fn queue_depth(&self) -> usize {
        self.sender.len()
    }

    /// Jobs currently held by a worker.
    pub fn active_workers(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.shared.store
    }

    /// Stop accepting work, signal running jobs and wait for the workers.
    ///
    /// Entries still waiting are failed and their inputs released.
    pub async fn shutdown(&self) {
        self.sender.close();
        self.shared.shutdown.cancel();

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }

        while let Ok(entry) = self.shared.receiver.try_recv() {
            self.shared
                .store
                .update(entry.job_id, |job| job.fail(SHUTDOWN_MESSAGE));
            self.shared.tokens.lock().remove(&entry.job_id);
            self.shared.pending.lock().remove(&entry.job_id);
        }

        tracing::info!("Job queue stopped");
    }
}

impl<O: Send + Sync + 'static> Shared<O> {
    async fn worker_loop(&self) {
        loop {
            let entry = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                entry = self.receiver.recv() => match entry {
                    Ok(entry) => entry,
                    Err(_) => break,
                },
            };

            metrics::gauge!("media_jobs_queue_depth").set(self.receiver.len() as f64);

            let job_id = entry.job_id;
            self.process(entry)
                .instrument(tracing::info_span!("job", job_id = %job_id))
                .await;
        }
        tracing::debug!("Worker stopped");
    }

    async fn process(&self, entry: QueuedJob<O>) {
        let job_id = entry.job_id;

        // Cancelled (or externally removed) while waiting.
        let input = self.pending.lock().remove(&job_id);
        let input = match input {
            Some(input) if self.store.update(job_id, |job| job.start()) == Some(true) => input,
            _ => {
                tracing::info!(job_id = %job_id, "Skipping job that is no longer queued");
                self.tokens.lock().remove(&job_id);
                return;
            }
        };

        let _slot = ActiveSlot::acquire(&self.active);
        tracing::info!(job_id = %job_id, "Processing job");

        let progress = Progress::for_job(Arc::clone(&self.store), job_id, entry.cancel.clone());
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.adapter.run(&input, &entry.options, &progress))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(TransformError::Panicked(panic_message(panic.as_ref()))));

        let elapsed = started.elapsed();
        metrics::histogram!("media_job_processing_seconds").record(elapsed.as_secs_f64());

        match outcome {
            Ok(artifact) => {
                let size_bytes = artifact.size_bytes;
                match self.store.update(job_id, |job| job.complete(artifact)) {
                    Some(true) => {
                        metrics::counter!("media_jobs_completed_total").increment(1);
                        tracing::info!(
                            job_id = %job_id,
                            size_bytes,
                            duration_ms = elapsed.as_millis() as u64,
                            "Job completed"
                        );
                    }
                    _ => tracing::warn!(job_id = %job_id, "Job finished but its record is gone"),
                }
            }
            Err(e) => {
                self.store.update(job_id, |job| job.fail(e.to_string()));
                metrics::counter!("media_jobs_failed_total").increment(1);
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "Job failed"
                );
            }
        }

        self.tokens.lock().remove(&job_id);
        // `input` drops here, releasing an uploaded file.
    }
}

/// Occupied worker slot; released on drop.
struct ActiveSlot<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ActiveSlot<'a> {
    fn acquire(active: &'a AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("media_jobs_active").set(now as f64);
        Self { active }
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        let now = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!("media_jobs_active").set(now as f64);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job queue is closed")]
    Closed,

    #[error("Job not found: {0}")]
    NotFound(JobId),
}
