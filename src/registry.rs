use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, HandlerError, Result};

/// The executable logic for one job kind.
///
/// `cancel` is signalled on timeout, explicit cancellation, and engine
/// shutdown; handlers should watch it at their suspension points and return
/// promptly once it fires. A handler that ignores it is aborted after the
/// configured grace period and its result discarded.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(
        &self,
        payload: Value,
        cancel: CancellationToken,
    ) -> std::result::Result<Value, HandlerError>;
}

/// Maps a job's `kind` to its handler. Built by the host before the engine
/// starts accepting submissions and immutable afterwards (it moves behind an
/// `Arc` into the engine).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a kind. Last registration wins.
    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) -> &mut Self {
        let kind = kind.into();
        tracing::debug!(%kind, "Handler registered");
        self.handlers.insert(kind, handler);
        self
    }

    pub fn lookup(&self, kind: &str) -> Result<Arc<dyn JobHandler>> {
        self.handlers
            .get(kind)
            .cloned()
            .ok_or_else(|| EngineError::UnknownKind(kind.to_string()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
