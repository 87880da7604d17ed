//! A job orchestration engine: jobs are submitted, queued FIFO, dispatched
//! to a bounded pool of workers, executed under per-job timeouts, and
//! tracked through a persisted lifecycle that survives restarts.
//!
//! The inbound transport and the concrete storage backend are the host's
//! concern; the engine speaks to them through [`engine::Engine`] and
//! [`store::JobStore`].

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod worker;
