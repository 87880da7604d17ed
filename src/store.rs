use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::scheduler::job::{Job, JobStatus};

/// Durable mapping from job id to job record. The engine is the sole writer;
/// the store is the sole source of truth after a restart.
///
/// Implementations must make `put` atomic per record: a reader sees either
/// the old record or the new one, never a partial update.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Upsert a job record. Fails with [`EngineError::StoreUnavailable`] if
    /// the backend is unreachable.
    async fn put(&self, job: &Job) -> Result<()>;

    /// Fetch a job by id. Fails with [`EngineError::NotFound`] if absent.
    async fn get(&self, id: Uuid) -> Result<Job>;

    /// All jobs currently in the given status. Finite; restartable by
    /// calling again. Used at startup to recover queued and in-flight work.
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>>;
}

/// In-memory store. The reference backend for tests and for embedders that
/// don't need durability across restarts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn put(&self, job: &Job) -> Result<()> {
        // Whole-record replacement under the write lock keeps the update
        // atomic per record.
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect())
    }
}
