//! Rate Limiting Infrastructure
//!
//! Sliding-window admission control shared by the HTTP API and the worker
//! processes. Each caller gets an opaque key per limit category; a check
//! purges entries older than the window, counts the survivors and admits or
//! denies the event.
//!
//! Two storage backends implement [`RateLimitStore`]: a process-local map
//! ([`memory::MemoryStore`]) and a shared store ([`shared_store::SharedStore`])
//! that coordinates limits across API instances and degrades to the local map
//! whenever the shared store is unreachable. The backend is picked once, at
//! construction, by [`RateLimiter`].

pub mod limiter;
pub mod memory;
pub mod middleware;
pub mod shared_store;
pub mod window;

pub use limiter::RateLimiter;

use std::time::Duration;

use thiserror::Error;

/// Limit categories enforced by the API.
///
/// The set is closed on purpose: an unknown category cannot reach a request
/// handler, and per-category values are validated once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitCategory {
    /// All requests, keyed by client IP.
    General,
    /// Content creation (new posts on the social feed).
    Posts,
    /// Comments on feed posts.
    Comments,
}

impl LimitCategory {
    pub const ALL: [LimitCategory; 3] = [
        LimitCategory::General,
        LimitCategory::Posts,
        LimitCategory::Comments,
    ];

    /// Stable name, used as the key prefix and in telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitCategory::General => "general",
            LimitCategory::Posts => "posts",
            LimitCategory::Comments => "comments",
        }
    }
}

/// Rate limit configuration for one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limit {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
}

impl Limit {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }

    pub fn window_secs(&self) -> i64 {
        self.window.as_secs() as i64
    }
}

/// Outcome of one admission check.
///
/// Computed fresh per check and never persisted.
#[derive(Debug, Clone)]
pub struct Decision {
    pub allowed: bool,
    /// The category's configured maximum.
    pub limit: u32,
    /// Slots left in the window after this event, clamped to zero.
    pub remaining: u32,
    /// When the oldest surviving entry rolls out of the window.
    pub reset_at_ms: i64,
    /// How long a denied caller should wait before retrying.
    pub retry_after_ms: i64,
}

impl Decision {
    /// Unix seconds for the `X-RateLimit-Reset` header.
    pub fn reset_at_secs(&self) -> i64 {
        self.reset_at_ms / 1000
    }

    /// Whole seconds (rounded up) for the `Retry-After` header.
    pub fn retry_after_secs(&self) -> i64 {
        (self.retry_after_ms.max(0) + 999) / 1000
    }
}

/// Trait for rate limit storage backends
///
/// A check is one logical unit: purge expired entries for `key`, count the
/// survivors, and record the event at `now_ms` when it is admitted.
/// Implementations never fail a check; backend trouble is handled inside.
#[trait_variant::make(RateLimitStore: Send)]
pub trait LocalRateLimitStore {
    async fn check_and_record(&self, key: &str, limit: &Limit, now_ms: i64) -> Decision;
}

/// Configuration error found while reading rate-limit settings.
///
/// These abort startup; admission checks themselves are infallible.
#[derive(Debug, Error)]
pub enum RateLimitConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },

    #[error("invalid shared store url: {0}")]
    SharedStoreUrl(#[from] redis::RedisError),
}

/// Rate-limit settings for every category, plus the optional shared store.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub general: Limit,
    pub posts: Limit,
    pub comments: Limit,
    /// Address of the shared store; absent means local-only mode.
    pub shared_store_url: Option<String>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            general: Limit::new(120, 60),
            posts: Limit::new(10, 300),
            comments: Limit::new(30, 60),
            shared_store_url: None,
        }
    }
}

impl RateLimitSettings {
    /// Read settings from the environment, falling back to the defaults.
    ///
    /// Every category is independently overridable. Unparseable values are
    /// configuration errors and abort startup.
    pub fn from_env() -> Result<Self, RateLimitConfigError> {
        let defaults = Self::default();
        Ok(Self {
            general: Limit {
                max_requests: env_u32("RATE_LIMIT_GENERAL_MAX", defaults.general.max_requests)?,
                window: env_window("RATE_LIMIT_GENERAL_WINDOW_SECS", defaults.general.window)?,
            },
            posts: Limit {
                max_requests: env_u32("RATE_LIMIT_POSTS_MAX", defaults.posts.max_requests)?,
                window: env_window("RATE_LIMIT_POSTS_WINDOW_SECS", defaults.posts.window)?,
            },
            comments: Limit {
                max_requests: env_u32("RATE_LIMIT_COMMENTS_MAX", defaults.comments.max_requests)?,
                window: env_window("RATE_LIMIT_COMMENTS_WINDOW_SECS", defaults.comments.window)?,
            },
            shared_store_url: std::env::var("REDIS_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn limit(&self, category: LimitCategory) -> &Limit {
        match category {
            LimitCategory::General => &self.general,
            LimitCategory::Posts => &self.posts,
            LimitCategory::Comments => &self.comments,
        }
    }

    /// The largest configured window; entries older than this can no longer
    /// influence any decision.
    pub fn longest_window(&self) -> Duration {
        LimitCategory::ALL
            .iter()
            .map(|c| self.limit(*c).window)
            .max()
            .unwrap_or(Duration::from_secs(60))
    }
}

fn env_u32(var: &'static str, default: u32) -> Result<u32, RateLimitConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|e| RateLimitConfigError::InvalidVar {
                var,
                reason: e.to_string(),
            }),
        Err(_) => Ok(default),
    }
}

fn env_window(var: &'static str, default: Duration) -> Result<Duration, RateLimitConfigError> {
    let secs = match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| RateLimitConfigError::InvalidVar {
                var,
                reason: e.to_string(),
            })?,
        Err(_) => return Ok(default),
    };
    if secs == 0 {
        return Err(RateLimitConfigError::InvalidVar {
            var,
            reason: "window must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_cover_all_categories() {
        let settings = RateLimitSettings::default();
        for category in LimitCategory::ALL {
            let limit = settings.limit(category);
            assert!(limit.max_requests > 0);
            assert!(limit.window >= Duration::from_secs(1));
        }
    }

    #[test]
    fn test_longest_window() {
        let settings = RateLimitSettings::default();
        assert_eq!(settings.longest_window(), Duration::from_secs(300));
    }

    #[test]
    fn test_window_ms() {
        let limit = Limit::new(10, 60);
        assert_eq!(limit.window_ms(), 60_000);
        assert_eq!(limit.window_secs(), 60);
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        let decision = Decision {
            allowed: false,
            limit: 2,
            remaining: 0,
            reset_at_ms: 100_500,
            retry_after_ms: 39_001,
        };
        assert_eq!(decision.retry_after_secs(), 40);

        let exact = Decision {
            retry_after_ms: 40_000,
            ..decision.clone()
        };
        assert_eq!(exact.retry_after_secs(), 40);
    }

    #[test]
    fn test_category_names() {
        assert_eq!(LimitCategory::General.as_str(), "general");
        assert_eq!(LimitCategory::Posts.as_str(), "posts");
        assert_eq!(LimitCategory::Comments.as_str(), "comments");
    }
}
