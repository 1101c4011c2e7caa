//! Rate limiter facade.
//!
//! Owns the per-category limit table and the storage backend. The backend is
//! chosen once, at construction: a shared store when an address is
//! configured, the process-local store otherwise. Degradation of the shared
//! store happens inside the backend; `check` itself cannot fail.

use std::sync::Arc;

use super::memory::MemoryStore;
use super::shared_store::SharedStore;
use super::{
    Decision, Limit, LimitCategory, RateLimitConfigError, RateLimitSettings, RateLimitStore,
};

/// Storage capability selected at construction.
#[derive(Clone)]
enum AnyStore {
    Memory(MemoryStore),
    Shared(SharedStore),
}

/// Sliding-window rate limiter for all configured categories.
///
/// Cheap to clone; clones share the backend and its state.
#[derive(Clone)]
pub struct RateLimiter {
    settings: Arc<RateLimitSettings>,
    store: AnyStore,
}

impl RateLimiter {
    /// Build the limiter from validated settings.
    ///
    /// Only a malformed shared-store URL fails here; an unreachable shared
    /// store just starts the backend in fallback mode.
    pub async fn connect(settings: RateLimitSettings) -> Result<Self, RateLimitConfigError> {
        let memory = MemoryStore::new(settings.longest_window());
        let store = match settings.shared_store_url.as_deref() {
            Some(url) => AnyStore::Shared(SharedStore::connect(url, memory).await?),
            None => AnyStore::Memory(memory),
        };
        Ok(Self {
            settings: Arc::new(settings),
            store,
        })
    }

    pub fn limit(&self, category: LimitCategory) -> &Limit {
        self.settings.limit(category)
    }

    /// Admit or deny one event from `identifier` under `category`.
    pub async fn check(&self, category: LimitCategory, identifier: &str) -> Decision {
        let limit = self.settings.limit(category);
        let key = format!("{}:{}", category.as_str(), identifier);
        let now_ms = chrono::Utc::now().timestamp_millis();
        match &self.store {
            AnyStore::Memory(store) => store.check_and_record(&key, limit, now_ms).await,
            AnyStore::Shared(store) => store.check_and_record(&key, limit, now_ms).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_settings() -> RateLimitSettings {
        RateLimitSettings {
            comments: Limit::new(1, 60),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_local_only_mode_enforces_category_limit() {
        let limiter = RateLimiter::connect(tight_settings()).await.unwrap();

        let d = limiter.check(LimitCategory::Comments, "user:42").await;
        assert!(d.allowed);
        assert_eq!(d.limit, 1);

        let d = limiter.check(LimitCategory::Comments, "user:42").await;
        assert!(!d.allowed);
        assert!(d.retry_after_secs() > 0);
    }

    #[tokio::test]
    async fn test_categories_are_limited_independently() {
        let limiter = RateLimiter::connect(tight_settings()).await.unwrap();

        assert!(limiter.check(LimitCategory::Comments, "user:42").await.allowed);
        // Same identifier, different category: separate key, separate window.
        assert!(limiter.check(LimitCategory::General, "user:42").await.allowed);
    }
}
