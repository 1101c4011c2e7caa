//! Coordination Error Types

use thiserror::Error;

/// Coordination-specific result type alias
pub type CoordinationResult<T> = Result<T, CoordinationError>;

/// Errors surfaced by the coordination layer.
///
/// Most failure modes here deliberately do not produce an error value: lock
/// contention reads as `false`, an unreachable lock medium fails closed, and
/// savepoint cleanup problems are swallowed. What remains is session
/// establishment.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
