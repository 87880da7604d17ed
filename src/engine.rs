use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::registry::HandlerRegistry;
use crate::scheduler::{Job, JobOptions, ReadyQueue, Scheduler};
use crate::store::JobStore;
use crate::worker::WorkerPool;

/// The assembled engine: store, registry, scheduler, and worker pool wired
/// together. Constructed once at process startup; the inbound transport
/// (HTTP or otherwise) calls [`submit`](Engine::submit),
/// [`cancel`](Engine::cancel), and [`status`](Engine::status).
pub struct Engine {
    scheduler: Arc<Scheduler>,
    queue: Arc<ReadyQueue>,
    pool: WorkerPool,
    shutdown: CancellationToken,
    shutdown_grace: std::time::Duration,
}

impl Engine {
    /// Validate the configuration, run startup recovery, and spawn the
    /// worker pool. Fails if the store cannot be reached: the engine never
    /// serves submissions against a store it cannot read.
    pub async fn start(
        config: EngineConfig,
        registry: HandlerRegistry,
        store: Arc<dyn JobStore>,
    ) -> Result<Engine> {
        config.validate()?;
        let registry = Arc::new(registry);
        let queue = Arc::new(ReadyQueue::new());
        let shutdown = CancellationToken::new();
        let scheduler = Arc::new(Scheduler::new(
            store,
            registry.clone(),
            queue.clone(),
            config.clone(),
            shutdown.clone(),
        ));

        scheduler.recover().await?;

        let pool = WorkerPool::spawn(
            &config,
            scheduler.clone(),
            queue.clone(),
            registry,
            shutdown.clone(),
        );
        tracing::info!(workers = config.worker_count, "Engine started");

        Ok(Self {
            scheduler,
            queue,
            pool,
            shutdown,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Submit a job of a registered kind. Returns the assigned job id.
    pub async fn submit(&self, kind: &str, payload: Value, options: JobOptions) -> Result<Uuid> {
        self.scheduler.submit(kind, payload, options).await
    }

    /// Best-effort cancellation, see [`Scheduler::cancel`].
    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        self.scheduler.cancel(id).await
    }

    /// Current persisted record for a job.
    pub async fn status(&self, id: Uuid) -> Result<Job> {
        self.scheduler.status(id).await
    }

    /// Graceful shutdown: signal cancellation to every leased job, close the
    /// queue, and wait up to the configured grace for workers to drain.
    /// In-flight jobs are rewound to `Queued` in the store so the next
    /// startup recovers them; store state is never discarded.
    pub async fn shutdown(self) {
        tracing::info!("Engine shutting down");
        self.shutdown.cancel();
        self.queue.close();
        self.pool.join(self.shutdown_grace).await;
        tracing::info!("Engine stopped");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scheduler", &self.scheduler)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}
