//! Shared sliding-window store backed by Redis.
//!
//! Window entries live in one sorted set per key, scored by admission time
//! with a uniqueness token in the member so simultaneous admissions cannot
//! collide. Purge, append, count and oldest-lookup run as a single MULTI/EXEC
//! pipeline, so concurrent callers for one key are serialized by the store
//! and at most `max` of them can land inside a window; an append that lands
//! over the limit is retracted.
//!
//! Admission control must never become the outage: every failure here marks
//! the store not ready and the check falls through to the local
//! [`MemoryStore`]. A background probe PINGs the store and flips the ready
//! flag back once it answers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::memory::MemoryStore;
use super::window::{self, WindowSurvey};
use super::{Decision, Limit, RateLimitStore};

/// How often the probe re-checks an unavailable shared store.
const PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Shared rate limit store with an internal local fallback.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<SharedInner>,
}

struct SharedInner {
    client: redis::Client,
    conn: RwLock<Option<ConnectionManager>>,
    ready: AtomicBool,
    fallback: MemoryStore,
}

impl SharedStore {
    /// Connect to the shared store at `url`, degrading to `fallback` whenever
    /// it is unreachable.
    ///
    /// An invalid URL is a configuration error and fails here. An unreachable
    /// server is not: the store starts in not-ready mode and the probe keeps
    /// trying while checks use the fallback.
    pub async fn connect(url: &str, fallback: MemoryStore) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let inner = Arc::new(SharedInner {
            client,
            conn: RwLock::new(None),
            ready: AtomicBool::new(false),
            fallback,
        });
        inner.probe_once().await;
        spawn_probe(Arc::downgrade(&inner));
        Ok(Self { inner })
    }

    /// Whether checks currently take the shared path.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }
}

impl RateLimitStore for SharedStore {
    async fn check_and_record(&self, key: &str, limit: &Limit, now_ms: i64) -> Decision {
        if self.inner.ready.load(Ordering::Relaxed) {
            let conn = self.inner.conn.read().await.clone();
            if let Some(mut conn) = conn {
                match check_shared(&mut conn, key, limit, now_ms).await {
                    Ok(decision) => return decision,
                    Err(e) => {
                        self.inner.ready.store(false, Ordering::Relaxed);
                        tracing::warn!(
                            error = %e,
                            "Shared rate-limit store unavailable, degrading to local store"
                        );
                    }
                }
            }
        }
        self.inner.fallback.check_and_record(key, limit, now_ms).await
    }
}

async fn check_shared(
    conn: &mut ConnectionManager,
    key: &str,
    limit: &Limit,
    now_ms: i64,
) -> Result<Decision, redis::RedisError> {
    let window_start = now_ms - limit.window_ms();
    let redis_key = redis_key(key);
    let member = entry_member(now_ms);

    // Purge, append, count and oldest-survivor lookup as one atomic unit.
    let mut pipe = redis::pipe();
    pipe.atomic()
        .zrembyscore(&redis_key, "-inf", format!("({window_start}"))
        .ignore()
        .zadd(&redis_key, &member, now_ms)
        .ignore()
        .zcard(&redis_key)
        .zrange_withscores(&redis_key, 0, 0)
        .expire(&redis_key, limit.window_secs() + 1)
        .ignore();
    let (count, oldest): (i64, Vec<(String, i64)>) = pipe.query_async(&mut *conn).await?;

    // The count includes the entry appended above.
    let survey = WindowSurvey {
        live: (count.max(1) - 1) as u32,
        oldest_ms: oldest.first().map(|(_, score)| *score),
    };
    let decision = window::admit(limit, survey, now_ms);

    if !decision.allowed {
        // The append went through atomically; take it back so the key's
        // state matches "not admitted".
        let _removed: i64 = conn.zrem(&redis_key, &member).await?;
    }

    Ok(decision)
}

fn redis_key(key: &str) -> String {
    format!("ratelimit:{key}")
}

/// Sorted-set member: admission time plus a token so two admissions in the
/// same millisecond stay distinct entries.
fn entry_member(now_ms: i64) -> String {
    format!("{now_ms}-{}", Uuid::new_v4())
}

/// The probe holds only a weak handle, so dropping the last store stops it.
fn spawn_probe(inner: Weak<SharedInner>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROBE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else { break };
            if !inner.ready.load(Ordering::Relaxed) {
                inner.probe_once().await;
            }
        }
    });
}

impl SharedInner {
    /// Establish the managed connection if needed, then PING. A successful
    /// round trip is the readiness signal that re-enables the shared path.
    async fn probe_once(&self) {
        let existing = self.conn.read().await.clone();
        let mut conn = match existing {
            Some(conn) => conn,
            None => match self.client.get_connection_manager().await {
                Ok(conn) => {
                    *self.conn.write().await = Some(conn.clone());
                    conn
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Shared rate-limit store unreachable");
                    return;
                }
            },
        };

        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => {
                if !self.ready.swap(true, Ordering::Relaxed) {
                    tracing::info!("Shared rate-limit store ready");
                }
            }
            Err(e) => {
                self.ready.store(false, Ordering::Relaxed);
                tracing::debug!(error = %e, "Shared rate-limit store not ready");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitStore;

    #[test]
    fn test_entry_member_embeds_timestamp_and_stays_unique() {
        let a = entry_member(12_345);
        let b = entry_member(12_345);
        assert!(a.starts_with("12345-"));
        assert!(b.starts_with("12345-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_redis_key_prefix() {
        assert_eq!(redis_key("general:1.2.3.4"), "ratelimit:general:1.2.3.4");
    }

    #[tokio::test]
    async fn test_unreachable_store_serves_from_fallback() {
        // Nothing listens on this port; the store must start not-ready and
        // answer checks from the local fallback without erroring.
        let fallback = MemoryStore::new(Duration::from_secs(60));
        let store = SharedStore::connect("redis://127.0.0.1:1/", fallback)
            .await
            .expect("url parses");
        assert!(!store.is_ready());

        let limit = Limit::new(1, 60);
        let d = store.check_and_record("k", &limit, 0).await;
        assert!(d.allowed);
        let d = store.check_and_record("k", &limit, 1).await;
        assert!(!d.allowed);
    }
}
