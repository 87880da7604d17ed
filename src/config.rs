use std::time::Duration;

use crate::error::{EngineError, Result};

/// Engine configuration. Supplied by the embedding process; how it is
/// loaded (file, env, flags) is the host's concern.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent worker slots. Must be at least 1.
    pub worker_count: usize,
    /// Timeout applied to jobs that don't specify their own.
    pub default_timeout: Duration,
    /// Retry ceiling applied to jobs that don't specify their own.
    pub default_max_attempts: u32,
    /// How long a slot waits for a cancelled handler to return before the
    /// handler task is aborted and its eventual result discarded.
    pub cancel_grace: Duration,
    /// How long `Engine::shutdown` waits for workers to drain.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            default_timeout: Duration::from_secs(30),
            default_max_attempts: 3,
            cancel_grace: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(EngineError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.default_max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "default_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.default_timeout.is_zero() {
            return Err(EngineError::InvalidConfig(
                "default_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_default() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.default_timeout, Duration::from_secs(30));
        assert_eq!(cfg.default_max_attempts, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let cfg = EngineConfig {
            worker_count: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_max_attempts_rejected() {
        let cfg = EngineConfig {
            default_max_attempts: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let cfg = EngineConfig {
            default_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
