//! Job lifecycle coordination.
//!
//! The [`Scheduler`] owns every state transition a job goes through:
//! submission, dispatch leasing, completion, retry, cancellation, and
//! startup recovery. Workers never touch the store directly; they dequeue an
//! id, ask the scheduler for a lease, and report the attempt outcome back.

pub mod job;
pub mod queue;

pub use job::{AttemptOutcome, Job, JobOptions, JobStatus};
pub use queue::ReadyQueue;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::registry::HandlerRegistry;
use crate::store::JobStore;

/// Attempts made against the store during the startup recovery scan before
/// giving up and failing engine initialization.
const RECOVER_SCAN_ATTEMPTS: u32 = 5;
const RECOVER_BACKOFF_INITIAL: Duration = Duration::from_millis(100);

/// Exclusive ownership of one job for one execution attempt. Handed to a
/// worker by [`Scheduler::lease`]; the token fires on timeout, explicit
/// cancellation, or engine shutdown.
#[derive(Debug)]
pub struct Lease {
    pub job: Job,
    pub cancel: CancellationToken,
}

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    queue: Arc<ReadyQueue>,
    config: EngineConfig,
    shutdown: CancellationToken,
    /// Per-job transition locks. All state mutations for one id are
    /// serialized through its entry; different ids proceed concurrently.
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
    /// Cancellation tokens of attempts currently executing.
    attempts: Mutex<HashMap<Uuid, CancellationToken>>,
    /// Running jobs the caller asked to cancel; consulted when the attempt
    /// reports back.
    cancel_requested: Mutex<HashSet<Uuid>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        queue: Arc<ReadyQueue>,
        config: EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            config,
            shutdown,
            locks: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            cancel_requested: Mutex::new(HashSet::new()),
        }
    }

    /// Validate, persist, and enqueue a new job. Returns its id.
    pub async fn submit(&self, kind: &str, payload: Value, options: JobOptions) -> Result<Uuid> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::PoolShutdown);
        }
        // Reject before anything is persisted.
        if !self.registry.contains(kind) {
            return Err(EngineError::UnknownKind(kind.to_string()));
        }

        let mut job = Job::new(
            kind.to_string(),
            payload,
            options.timeout.unwrap_or(self.config.default_timeout),
            options
                .max_attempts
                .unwrap_or(self.config.default_max_attempts),
        );
        let id = job.id;
        self.store.put(&job).await?;

        let _guard = self.lock_for(id).lock_owned().await;
        job.status = JobStatus::Queued;
        self.store.put(&job).await?;
        self.queue.enqueue(id);
        tracing::info!(job_id = %id, kind, "Job submitted");
        Ok(id)
    }

    /// Current persisted record for a job.
    pub async fn status(&self, id: Uuid) -> Result<Job> {
        self.store.get(id).await
    }

    /// Best-effort cancellation. Queued jobs transition to `Cancelled`
    /// immediately; running jobs get their attempt token cancelled and are
    /// finalized when the worker reports back. Terminal jobs are untouched.
    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        let _guard = self.lock_for(id).lock_owned().await;
        let mut job = self.store.get(id).await?;

        match job.status {
            status if status.is_terminal() => Ok(()),
            JobStatus::Created | JobStatus::Queued => {
                self.queue.remove(&id);
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(Utc::now());
                self.store.put(&job).await?;
                self.locks
                    .lock()
                    .expect("lock map poisoned")
                    .remove(&id);
                tracing::info!(job_id = %id, "Queued job cancelled");
                Ok(())
            }
            JobStatus::Running => {
                self.cancel_requested
                    .lock()
                    .expect("cancel set lock poisoned")
                    .insert(id);
                if let Some(token) = self
                    .attempts
                    .lock()
                    .expect("attempt map lock poisoned")
                    .get(&id)
                {
                    token.cancel();
                }
                tracing::info!(job_id = %id, "Cancellation requested for running job");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Acquire the execution lease for a dequeued job: the combined
    /// `Queued -> Running` store transition. Returns `None` if the job is no
    /// longer `Queued` (cancelled in the meantime, or already leased), so a
    /// racing second acquisition observes a rejection rather than a race.
    pub async fn lease(&self, id: Uuid) -> Result<Option<Lease>> {
        let _guard = self.lock_for(id).lock_owned().await;
        let mut job = self.store.get(id).await?;
        if job.status != JobStatus::Queued {
            return Ok(None);
        }

        job.status = JobStatus::Running;
        job.attempt += 1;
        if job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        self.store.put(&job).await?;

        let token = self.shutdown.child_token();
        self.attempts
            .lock()
            .expect("attempt map lock poisoned")
            .insert(id, token.clone());
        // Honor a cancel that raced in between dequeue and lease.
        if self
            .cancel_requested
            .lock()
            .expect("cancel set lock poisoned")
            .contains(&id)
        {
            token.cancel();
        }

        tracing::debug!(job_id = %id, attempt = job.attempt, "Job leased");
        Ok(Some(Lease { job, cancel: token }))
    }

    /// Record the outcome of an execution attempt, applying cancellation
    /// precedence and the retry policy.
    pub async fn complete(&self, id: Uuid, outcome: AttemptOutcome) -> Result<()> {
        let _guard = self.lock_for(id).lock_owned().await;
        self.attempts
            .lock()
            .expect("attempt map lock poisoned")
            .remove(&id);
        let was_cancelled = self
            .cancel_requested
            .lock()
            .expect("cancel set lock poisoned")
            .remove(&id);

        let mut job = self.store.get(id).await?;
        if job.status != JobStatus::Running {
            tracing::warn!(job_id = %id, status = %job.status, "Completion for a job that is not running");
            return Ok(());
        }

        match outcome {
            AttemptOutcome::Success(value) => {
                job.status = JobStatus::Succeeded;
                job.result = Some(value);
                job.finished_at = Some(Utc::now());
            }
            AttemptOutcome::Failure(detail) => {
                job.error_detail = Some(detail);
                if was_cancelled {
                    job.status = JobStatus::Cancelled;
                    job.finished_at = Some(Utc::now());
                } else if job.attempt < job.max_attempts {
                    job.status = JobStatus::Queued;
                } else {
                    job.status = JobStatus::Failed;
                    job.finished_at = Some(Utc::now());
                }
            }
            AttemptOutcome::TimedOut => {
                job.error_detail = Some(format!(
                    "attempt {} exceeded timeout of {:?}",
                    job.attempt, job.timeout
                ));
                if was_cancelled {
                    job.status = JobStatus::Cancelled;
                    job.finished_at = Some(Utc::now());
                } else if job.attempt < job.max_attempts {
                    job.status = JobStatus::Queued;
                } else {
                    job.status = JobStatus::TimedOut;
                    job.finished_at = Some(Utc::now());
                }
            }
        }

        self.store.put(&job).await?;
        if job.status == JobStatus::Queued {
            self.queue.enqueue(id);
            tracing::info!(
                job_id = %id,
                attempt = job.attempt,
                max_attempts = job.max_attempts,
                "Attempt failed, job re-queued"
            );
        } else {
            tracing::info!(job_id = %id, status = %job.status, attempt = job.attempt, "Job finished");
            self.locks
                .lock()
                .expect("lock map poisoned")
                .remove(&id);
        }
        Ok(())
    }

    /// Pool shutdown interrupted this attempt. The store record is rewound
    /// to `Queued` (attempt count kept) so the next startup recovers it; the
    /// in-memory queue is already closed.
    pub async fn interrupted(&self, id: Uuid) -> Result<()> {
        let _guard = self.lock_for(id).lock_owned().await;
        self.attempts
            .lock()
            .expect("attempt map lock poisoned")
            .remove(&id);
        self.cancel_requested
            .lock()
            .expect("cancel set lock poisoned")
            .remove(&id);

        let mut job = self.store.get(id).await?;
        if job.status != JobStatus::Running {
            return Ok(());
        }
        job.status = JobStatus::Queued;
        self.store.put(&job).await?;
        tracing::info!(job_id = %id, "In-flight job re-queued in store for restart recovery");
        Ok(())
    }

    /// Startup reconciliation: every `Queued` job, plus every `Running` job
    /// left behind by a crashed process, is re-enqueued in `created_at`
    /// order. Attempt counts are kept as-is; the crashed dispatch is retried
    /// at-least-once.
    pub async fn recover(&self) -> Result<()> {
        let mut jobs = self.list_with_retry(JobStatus::Queued).await?;
        let running = self.list_with_retry(JobStatus::Running).await?;

        for mut job in running {
            job.status = JobStatus::Queued;
            self.store.put(&job).await?;
            tracing::info!(job_id = %job.id, attempt = job.attempt, "Crash remnant reset to queued");
            jobs.push(job);
        }

        jobs.sort_by_key(|job| job.created_at);
        for job in &jobs {
            self.queue.enqueue(job.id);
        }
        if !jobs.is_empty() {
            tracing::info!(recovered = jobs.len(), "Recovery re-enqueued persisted jobs");
        }
        Ok(())
    }

    /// Recovery scan with jittered exponential backoff. Startup correctness
    /// depends on this listing, so transient store errors are retried before
    /// the failure is allowed to abort initialization.
    async fn list_with_retry(&self, status: JobStatus) -> Result<Vec<Job>> {
        let mut delay = RECOVER_BACKOFF_INITIAL;
        let mut attempt = 1;
        loop {
            match self.store.list_by_status(status).await {
                Ok(jobs) => return Ok(jobs),
                Err(EngineError::StoreUnavailable(detail)) if attempt < RECOVER_SCAN_ATTEMPTS => {
                    let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
                    tracing::warn!(
                        attempt,
                        error = %detail,
                        delay_ms = delay.as_millis() as u64 + jitter_ms,
                        "Recovery scan failed, retrying"
                    );
                    tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn lock_for(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .expect("lock map poisoned")
            .entry(id)
            .or_default()
            .clone()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("worker_count", &self.config.worker_count)
            .finish()
    }
}
