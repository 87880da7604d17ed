//! Bounded pool of job execution slots.
//!
//! Each slot runs the same loop: dequeue a ready id, acquire the execution
//! lease from the scheduler, run the registered handler under the job's
//! deadline, and report the outcome back.
//!
//! # Timeout handling
//!
//! The handler future runs as its own tokio task. When the deadline elapses
//! the slot cancels the attempt token, waits `cancel_grace` for the task to
//! return, then aborts it and records `TimedOut`; a late result is
//! discarded. An abort cannot preempt a synchronous blocking section, so an
//! uncooperative handler can leak its task until the next await point; the
//! slot itself is reclaimed regardless.

pub mod pool;

pub use pool::WorkerPool;
