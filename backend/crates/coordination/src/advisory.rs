//! Cross-process advisory locks on PostgreSQL.
//!
//! Worker fleets use these to make sure a named periodic task runs in at
//! most one process per cycle. The locks are advisory: nothing physically
//! stops a non-holder from acting, only cooperating processes honor them.

use std::future::Future;

use sqlx::{Connection, PgConnection};
use tokio::sync::Mutex;

use crate::error::CoordinationResult;

/// Lock-space partition, a small integer keeping unrelated task families
/// from colliding on key hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockNamespace(pub i32);

impl LockNamespace {
    /// Periodic world-state advancement (hunger, mood, aging).
    pub const WORLD_TICK: LockNamespace = LockNamespace(1);
    /// Daily arena match scheduling.
    pub const ARENA_SCHEDULE: LockNamespace = LockNamespace(2);
    /// AI brain job dispatch.
    pub const BRAIN_JOBS: LockNamespace = LockNamespace(3);
}

/// Hash a lock key to the fixed-width integer the database expects.
///
/// 32-bit FNV-1a (seed `0x811c9dc5`, prime `0x01000193`), reinterpreted as
/// signed. Two distinct keys whose hashes coincide behave as one lock; with
/// n keys in a namespace the collision probability is about n²/2³³, which
/// callers accept in exchange for keeping no lock table.
pub fn hash_lock_key(key: &str) -> i32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash as i32
}

/// Cross-process mutual exclusion for named work.
///
/// The coordinator owns one dedicated database session; every lock taken
/// through it lives on that session. If the process crashes, the session
/// dies and PostgreSQL releases everything it held, so a stranded lock
/// self-heals.
pub struct AdvisoryLockCoordinator {
    conn: Mutex<PgConnection>,
}

impl AdvisoryLockCoordinator {
    /// Open the dedicated lock session.
    pub async fn connect(database_url: &str) -> CoordinationResult<Self> {
        let conn = PgConnection::connect(database_url).await?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Try to take `(namespace, key)` without waiting.
    ///
    /// Returns `false` when another session holds the lock, and also when
    /// the database cannot be reached: duplicate execution of guarded work
    /// is worse than a skipped cycle, so errors fail closed.
    pub async fn try_acquire(&self, namespace: LockNamespace, key: &str) -> bool {
        let mut conn = self.conn.lock().await;
        let result = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1, $2)")
            .bind(namespace.0)
            .bind(hash_lock_key(key))
            .fetch_one(&mut *conn)
            .await;
        match result {
            Ok(acquired) => acquired,
            Err(e) => {
                tracing::warn!(
                    namespace = namespace.0,
                    key = %key,
                    error = %e,
                    "Advisory lock acquisition failed, treating as contended"
                );
                false
            }
        }
    }

    /// Release `(namespace, key)`. Releasing a lock this session does not
    /// hold is a no-op, not an error.
    pub async fn release(&self, namespace: LockNamespace, key: &str) {
        let mut conn = self.conn.lock().await;
        let result = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1, $2)")
            .bind(namespace.0)
            .bind(hash_lock_key(key))
            .fetch_one(&mut *conn)
            .await;
        match result {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    namespace = namespace.0,
                    key = %key,
                    "Released an advisory lock this session did not hold"
                );
            }
            Err(e) => {
                tracing::warn!(
                    namespace = namespace.0,
                    key = %key,
                    error = %e,
                    "Advisory lock release failed"
                );
            }
        }
    }

    /// Run `work` under the lock, releasing it on the way out.
    ///
    /// Returns `None` without running `work` when the lock is contended.
    /// The release runs whether the work succeeded or not; if the process
    /// dies mid-cycle the session dies with it and the lock self-heals.
    pub async fn with_lock<T, F, Fut>(
        &self,
        namespace: LockNamespace,
        key: &str,
        work: F,
    ) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.try_acquire(namespace, key).await {
            return None;
        }
        let output = work().await;
        self.release(namespace, key).await;
        Some(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(hash_lock_key(""), 0x811c_9dc5_u32 as i32);
        assert_eq!(hash_lock_key("a"), 0xe40c_292c_u32 as i32);
        assert_eq!(hash_lock_key("foobar"), 0xbf9c_f968_u32 as i32);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_lock_key("daily-tick"), hash_lock_key("daily-tick"));
        assert_ne!(hash_lock_key("daily-tick"), hash_lock_key("daily-tock"));
    }

    #[test]
    fn test_colliding_keys_map_to_one_lock() {
        // Documented tradeoff: these two distinct strings share an FNV-1a
        // hash, so they name the same lock.
        assert_eq!(hash_lock_key("costarring"), hash_lock_key("liquid"));
    }

    #[test]
    fn test_namespaces_are_distinct() {
        assert_ne!(LockNamespace::WORLD_TICK, LockNamespace::ARENA_SCHEDULE);
        assert_ne!(LockNamespace::ARENA_SCHEDULE, LockNamespace::BRAIN_JOBS);
    }
}
