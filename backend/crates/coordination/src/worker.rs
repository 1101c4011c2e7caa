//! Periodic worker loop with cross-process de-duplication.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::advisory::{AdvisoryLockCoordinator, LockNamespace};

/// Boxed error type for task implementations.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// A named unit of shared periodic work.
///
/// The fleet runs each cycle in at most one process; the rest skip it.
#[trait_variant::make(PeriodicTask: Send)]
pub trait LocalPeriodicTask {
    /// Stable task name; doubles as the advisory-lock key.
    fn name(&self) -> &'static str;

    /// Lock space this task's cycles are serialized in.
    fn namespace(&self) -> LockNamespace;

    /// One cycle of work.
    async fn run(&self) -> Result<(), TaskError>;
}

/// Drive `task` forever on a fixed cadence.
///
/// Every tick races for the task's advisory lock. Losing the race means
/// another process owns this cycle, and the loop just waits for the next
/// tick. The lock is released after the cycle whether it succeeded or
/// failed; a crash mid-cycle drops the lock session and self-heals.
pub async fn run_periodic<T>(locks: Arc<AdvisoryLockCoordinator>, task: T, every: Duration)
where
    T: PeriodicTask + Sync,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if !locks.try_acquire(task.namespace(), task.name()).await {
            tracing::debug!(task = task.name(), "Cycle already claimed by another process");
            continue;
        }

        if let Err(e) = task.run().await {
            tracing::error!(task = task.name(), error = %e, "Periodic task cycle failed");
        }

        locks.release(task.namespace(), task.name()).await;
    }
}
