use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::registry::HandlerRegistry;
use crate::scheduler::{AttemptOutcome, Lease, ReadyQueue, Scheduler};

/// Backoff applied by a slot after a failed lease acquisition (store
/// hiccup) before the id is put back on the queue.
const LEASE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Fixed set of concurrent execution slots.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        config: &EngineConfig,
        scheduler: Arc<Scheduler>,
        queue: Arc<ReadyQueue>,
        registry: Arc<HandlerRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        let handles = (0..config.worker_count)
            .map(|slot| {
                let scheduler = scheduler.clone();
                let queue = queue.clone();
                let registry = registry.clone();
                let shutdown = shutdown.clone();
                let cancel_grace = config.cancel_grace;
                tokio::spawn(async move {
                    worker_loop(slot, scheduler, queue, registry, cancel_grace, shutdown).await;
                })
            })
            .collect();
        Self { handles }
    }

    /// Wait up to `grace` for all slots to exit, then abort stragglers.
    /// Called after the queue has been closed and shutdown signalled.
    pub async fn join(self, grace: Duration) {
        let deadline = Instant::now() + grace;
        for handle in self.handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                tracing::warn!("Worker did not drain within shutdown grace, aborting");
                abort.abort();
            }
        }
    }
}

async fn worker_loop(
    slot: usize,
    scheduler: Arc<Scheduler>,
    queue: Arc<ReadyQueue>,
    registry: Arc<HandlerRegistry>,
    cancel_grace: Duration,
    shutdown: CancellationToken,
) {
    tracing::debug!(slot, "Worker started");
    while let Some(job_id) = queue.dequeue().await {
        let lease = match scheduler.lease(job_id).await {
            Ok(Some(lease)) => lease,
            // Cancelled between enqueue and dequeue, or already taken.
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(slot, job_id = %job_id, error = %e, "Lease failed, re-queueing");
                tokio::time::sleep(LEASE_RETRY_DELAY).await;
                queue.enqueue(job_id);
                continue;
            }
        };
        run_attempt(slot, &scheduler, &registry, cancel_grace, &shutdown, lease).await;
    }
    tracing::debug!(slot, "Worker stopped");
}

async fn run_attempt(
    slot: usize,
    scheduler: &Scheduler,
    registry: &HandlerRegistry,
    cancel_grace: Duration,
    shutdown: &CancellationToken,
    lease: Lease,
) {
    let Lease { job, cancel } = lease;
    let job_id = job.id;

    // The registry is immutable once the engine starts, so a miss here can
    // only mean the store holds recovered jobs of a kind the host no longer
    // registers.
    let handler = match registry.lookup(&job.kind) {
        Ok(handler) => handler,
        Err(e) => {
            tracing::error!(job_id = %job_id, kind = %job.kind, "No handler for recovered job");
            report(scheduler, job_id, AttemptOutcome::Failure(e.to_string())).await;
            return;
        }
    };

    tracing::debug!(slot, job_id = %job_id, kind = %job.kind, attempt = job.attempt, "Executing job");
    let payload = job.payload.clone();
    let token = cancel.clone();
    let mut task = tokio::spawn(async move { handler.execute(payload, token).await });

    let outcome = tokio::select! {
        // Shutdown is polled first: the attempt token is a child of the
        // shutdown token, so a cooperative handler returns the moment
        // shutdown fires and would otherwise win this race and have the
        // interruption recorded as an ordinary failure.
        biased;
        _ = shutdown.cancelled() => {
            cancel.cancel();
            reap(task, cancel_grace).await;
            interrupt(scheduler, job_id).await;
            return;
        }
        res = &mut task => match res {
            Ok(Ok(value)) => AttemptOutcome::Success(value),
            res => {
                // The handler can still beat the shutdown branch if it was
                // already unwinding when shutdown fired. Rewind instead of
                // charging the failure against the retry ceiling.
                if shutdown.is_cancelled() {
                    interrupt(scheduler, job_id).await;
                    return;
                }
                match res {
                    Ok(Err(err)) => AttemptOutcome::Failure(err.to_string()),
                    Err(join_err) if join_err.is_panic() => {
                        tracing::error!(job_id = %job_id, "Handler panicked");
                        AttemptOutcome::Failure("handler panicked".to_string())
                    }
                    _ => AttemptOutcome::Failure("handler task cancelled".to_string()),
                }
            }
        },
        _ = tokio::time::sleep(job.timeout) => {
            tracing::warn!(job_id = %job_id, timeout = ?job.timeout, "Attempt deadline elapsed");
            cancel.cancel();
            reap(task, cancel_grace).await;
            AttemptOutcome::TimedOut
        }
    };

    report(scheduler, job_id, outcome).await;
}

async fn interrupt(scheduler: &Scheduler, job_id: uuid::Uuid) {
    if let Err(e) = scheduler.interrupted(job_id).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to re-queue interrupted job");
    }
}

async fn report(scheduler: &Scheduler, job_id: uuid::Uuid, outcome: AttemptOutcome) {
    if let Err(e) = scheduler.complete(job_id, outcome).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to record attempt outcome");
    }
}

/// Give a cancelled handler `grace` to return, then abort its task. The
/// result, if it ever arrives, is discarded.
async fn reap(
    mut task: JoinHandle<std::result::Result<serde_json::Value, crate::error::HandlerError>>,
    grace: Duration,
) {
    if tokio::time::timeout(grace, &mut task).await.is_err() {
        task.abort();
    }
}
