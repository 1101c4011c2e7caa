//! Coordination Crate - Cross-process coordination on PostgreSQL
//!
//! The parts of the backend that must reason about concurrent, multi-process
//! state under partial failure:
//! - Advisory locks guaranteeing at-most-one-worker execution of named tasks
//! - A savepoint guard letting a transaction absorb optional sub-operation
//!   failures without aborting
//! - The periodic worker loop built on the locks

pub mod advisory;
pub mod error;
pub mod savepoint;
pub mod worker;

// Re-exports for convenience
pub use advisory::{AdvisoryLockCoordinator, LockNamespace, hash_lock_key};
pub use error::{CoordinationError, CoordinationResult};
pub use savepoint::{BestEffort, Protection, SavepointGuard};
pub use worker::{PeriodicTask, TaskError, run_periodic};
