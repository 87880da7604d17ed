use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("unknown job kind: {0}")]
    UnknownKind(String),

    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("engine is shutting down")]
    PoolShutdown,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure reported by a job handler. Recorded in the job's `error_detail`
/// and fed into the retry policy; never surfaced as an [`EngineError`].
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}
