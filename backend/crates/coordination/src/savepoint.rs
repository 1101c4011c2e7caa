//! Savepoint-scoped best-effort execution.
//!
//! PostgreSQL aborts the whole transaction on the first failed statement:
//! every statement after the error fails too, until an explicit rollback.
//! Catching an error in application code and carrying on is therefore not
//! safe on its own. The guard wraps an optional sub-operation in a uniquely
//! named savepoint so its failure stays local: work issued before the
//! checkpoint survives, and the surrounding transaction keeps working.

use futures::future::BoxFuture;
use sqlx::PgConnection;

/// Whether the operation actually ran under a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// A savepoint isolated the operation; its failure cannot poison the
    /// surrounding transaction.
    Savepoint,
    /// The checkpoint could not be established (usually because no
    /// transaction is open on this connection) and the operation ran bare.
    /// A failure in this mode poisons any open transaction; callers seeing
    /// this in production should treat it as a wiring bug.
    Unprotected,
}

/// Result of a best-effort operation.
#[derive(Debug)]
pub struct BestEffort<T> {
    /// What the operation returned, or the error whose work was discarded.
    pub outcome: Result<T, sqlx::Error>,
    /// How well the surrounding transaction was protected.
    pub protection: Protection,
}

impl<T> BestEffort<T> {
    /// The operation's value, if it completed.
    pub fn value(self) -> Option<T> {
        self.outcome.ok()
    }
}

/// Runs optional sub-operations inside an open transaction without letting
/// their failure abort it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SavepointGuard {
    verbose_failures: bool,
}

impl SavepointGuard {
    pub fn new() -> Self {
        Self {
            verbose_failures: false,
        }
    }

    /// Log absorbed failures at `warn` instead of `debug`.
    pub fn with_verbose_failures(verbose_failures: bool) -> Self {
        Self { verbose_failures }
    }

    /// Read the diagnostics toggle from `BEST_EFFORT_VERBOSE`.
    pub fn from_env() -> Self {
        let verbose = std::env::var("BEST_EFFORT_VERBOSE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self::with_verbose_failures(verbose)
    }

    /// Run `op` against `conn` under a uniquely named savepoint.
    ///
    /// On failure the connection rolls back to the checkpoint, so statements
    /// issued before this call stay intact and the transaction stays usable.
    /// Errors while establishing or cleaning up the checkpoint are absorbed;
    /// the guard's one job is to hand the transaction back alive.
    pub async fn run_best_effort<'c, T, F>(
        &self,
        conn: &'c mut PgConnection,
        label: &str,
        op: F,
    ) -> BestEffort<T>
    where
        F: for<'a> FnOnce(&'a mut PgConnection) -> BoxFuture<'a, Result<T, sqlx::Error>>,
    {
        let name = savepoint_name(label);

        if let Err(e) = exec(conn, &format!("SAVEPOINT {name}")).await {
            // No checkpoint, no isolation. Run the operation anyway for
            // callers outside a transaction, but say so in the result.
            tracing::debug!(
                savepoint = %name,
                error = %e,
                "Could not establish savepoint, running unprotected"
            );
            let outcome = op(&mut *conn).await;
            if let Err(error) = &outcome {
                self.log_failure(label, error);
            }
            return BestEffort {
                outcome,
                protection: Protection::Unprotected,
            };
        }

        match op(&mut *conn).await {
            Ok(value) => {
                if let Err(e) = exec(conn, &format!("RELEASE SAVEPOINT {name}")).await {
                    tracing::debug!(savepoint = %name, error = %e, "Savepoint release failed");
                }
                BestEffort {
                    outcome: Ok(value),
                    protection: Protection::Savepoint,
                }
            }
            Err(error) => {
                self.log_failure(label, &error);
                if let Err(e) = exec(conn, &format!("ROLLBACK TO SAVEPOINT {name}")).await {
                    tracing::warn!(savepoint = %name, error = %e, "Rollback to savepoint failed");
                }
                if let Err(e) = exec(conn, &format!("RELEASE SAVEPOINT {name}")).await {
                    tracing::debug!(savepoint = %name, error = %e, "Savepoint release failed");
                }
                BestEffort {
                    outcome: Err(error),
                    protection: Protection::Savepoint,
                }
            }
        }
    }

    fn log_failure(&self, label: &str, error: &sqlx::Error) {
        if self.verbose_failures {
            tracing::warn!(
                label = %label,
                error = %error,
                "Best-effort operation failed, discarding its work"
            );
        } else {
            tracing::debug!(
                label = %label,
                error = %error,
                "Best-effort operation failed, discarding its work"
            );
        }
    }
}

/// Savepoint statements take the name as raw SQL, not as a bind parameter.
async fn exec(conn: &mut PgConnection, sql: &str) -> Result<(), sqlx::Error> {
    sqlx::query(sql).execute(&mut *conn).await?;
    Ok(())
}

/// Savepoint names share one connection with other helpers in the same
/// transaction, so each name gets a random suffix on top of a sanitized
/// label.
fn savepoint_name(label: &str) -> String {
    let mut cleaned: String = label
        .chars()
        .take(32)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if !cleaned
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
    {
        cleaned.insert_str(0, "sp_");
    }
    format!("{}_{:08x}", cleaned, rand::random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_savepoint_name_sanitizes_label() {
        let name = savepoint_name("feed event!");
        assert!(name.starts_with("feed_event__"));
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn test_savepoint_name_prefixes_non_alphabetic_start() {
        assert!(savepoint_name("7daily").starts_with("sp_7daily_"));
        assert!(savepoint_name("").starts_with("sp_"));
    }

    #[test]
    fn test_savepoint_name_is_unique_per_call() {
        assert_ne!(savepoint_name("activity"), savepoint_name("activity"));
    }

    #[test]
    fn test_savepoint_name_truncates_long_labels() {
        let long = "x".repeat(100);
        let name = savepoint_name(&long);
        // 32 label chars + '_' + 8 hex chars
        assert_eq!(name.len(), 41);
    }
}
