//! Validation result caching

use crate::config::CacheConfig;
use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

/// Shared store of boolean validation outcomes.
///
/// Entries expire after the configured TTL and the store is bounded in size; when full, the
/// least recently used entries are evicted first. All operations are atomic per key.
#[derive(Clone)]
pub struct ValidationResultCache {
    cache: Cache<String, bool>,
    ttl: Duration,
}

impl ValidationResultCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache, ttl }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.ttl(), config.max_entries)
    }

    pub async fn get(&self, key: &str) -> Option<bool> {
        let hit = self.cache.get(key).await;
        debug!(key, hit = hit.is_some(), "Validation cache lookup");
        hit
    }

    pub async fn put(&self, key: String, outcome: bool) {
        self.cache.insert(key, outcome).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of live entries
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for ValidationResultCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl std::fmt::Debug for ValidationResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationResultCache")
            .field("ttl", &self.ttl)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = ValidationResultCache::new(Duration::from_secs(60), 100);
        assert_eq!(cache.get("k1").await, None);

        cache.put("k1".to_string(), true).await;
        cache.put("k2".to_string(), false).await;

        assert_eq!(cache.get("k1").await, Some(true));
        assert_eq!(cache.get("k2").await, Some(false));
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = ValidationResultCache::new(Duration::from_millis(50), 100);
        cache.put("k".to_string(), true).await;
        assert_eq!(cache.get("k").await, Some(true));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = ValidationResultCache::new(Duration::from_secs(60), 100);
        cache.put("a".to_string(), true).await;
        cache.put("b".to_string(), true).await;

        cache.invalidate("a").await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some(true));

        cache.clear();
        assert_eq!(cache.get("b").await, None);
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_lose_entries() {
        let cache = Arc::new(ValidationResultCache::new(Duration::from_secs(60), 10_000));
        let mut handles = Vec::new();
        for worker in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    cache.put(format!("{}-{}", worker, i), i % 2 == 0).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for worker in 0..8 {
            for i in 0..100 {
                assert_eq!(cache.get(&format!("{}-{}", worker, i)).await, Some(i % 2 == 0));
            }
        }
    }
}
