use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Created,
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses admit no further transition (a retry re-queue
    /// happens before the terminal status is ever recorded).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Created => write!(f, "created"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::TimedOut => write!(f, "timed_out"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-submission overrides. Unset fields fall back to the engine defaults.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub status: JobStatus,
    /// Execution attempts dispatched so far. Incremented when a worker
    /// leases the job, never decremented.
    pub attempt: u32,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error_detail: Option<String>,
}

impl Job {
    pub fn new(kind: String, payload: Value, timeout: Duration, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            status: JobStatus::Created,
            attempt: 0,
            max_attempts,
            timeout,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error_detail: None,
        }
    }
}

/// What a worker observed for one execution attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Value),
    Failure(String),
    TimedOut,
}
