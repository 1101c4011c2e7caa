//! Process-local sliding-window store.
//!
//! Keeps admission timestamps per key in a mutex-guarded map. A background
//! sweep drops keys that went quiet for longer than the largest configured
//! window, bounding memory growth; the sweep snapshots keys first and
//! re-locks per key so foreground checks are never blocked for long.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use super::window;
use super::{Decision, Limit, RateLimitStore};

/// How often the background sweep scans for dead keys.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// In-memory rate limit store, safe for concurrent use within one process.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    entries: Mutex<HashMap<String, VecDeque<i64>>>,
    longest_window_ms: i64,
}

impl MemoryStore {
    /// `longest_window` is the largest window any category uses; the sweep
    /// uses it to decide when a key can no longer influence a decision.
    ///
    /// Must be called from within a tokio runtime (the sweeper is a task).
    pub fn new(longest_window: Duration) -> Self {
        let inner = Arc::new(MemoryInner {
            entries: Mutex::new(HashMap::new()),
            longest_window_ms: longest_window.as_millis() as i64,
        });
        spawn_sweeper(Arc::downgrade(&inner));
        Self { inner }
    }
}

impl RateLimitStore for MemoryStore {
    async fn check_and_record(&self, key: &str, limit: &Limit, now_ms: i64) -> Decision {
        let window_start = now_ms - limit.window_ms();
        let mut map = self.inner.entries.lock().unwrap();
        let entries = map.entry(key.to_string()).or_default();

        // Entries arrive in admission order, so expired ones sit at the front.
        while entries.front().is_some_and(|&ts| ts < window_start) {
            entries.pop_front();
        }

        let survey = window::survey(entries.iter().copied(), limit.window_ms(), now_ms);
        let decision = window::admit(limit, survey, now_ms);
        if decision.allowed {
            entries.push_back(now_ms);
        }
        decision
    }
}

/// The sweeper holds only a weak handle: dropping the last store stops it,
/// and the task never keeps a process alive just for cleanup.
fn spawn_sweeper(inner: Weak<MemoryInner>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else { break };
            inner.sweep(chrono::Utc::now().timestamp_millis());
        }
    });
}

impl MemoryInner {
    /// Drop keys whose newest entry is older than the longest window.
    fn sweep(&self, now_ms: i64) {
        let horizon = now_ms - self.longest_window_ms;
        let keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        for key in keys {
            let mut map = self.entries.lock().unwrap();
            if let Some(entries) = map.get(&key) {
                if entries.back().is_none_or(|&newest| newest < horizon) {
                    map.remove(&key);
                }
            }
        }
    }
}
