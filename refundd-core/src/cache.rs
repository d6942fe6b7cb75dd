//! Wallet verification cache.
//!
//! Short-TTL cache of previously computed "does this address have a
//! qualifying transaction" verdicts, consulted by the synchronous
//! verification path to avoid redundant indexer round-trips under
//! repeated client polling.
//!
//! TTLs are asymmetric: a positive verdict is stable and cached for
//! minutes, a negative verdict may flip as soon as the deposit lands and
//! expires much sooner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct CacheEntry {
    result: bool,
    expires_at: Instant,
}

/// Thread-safe TTL cache keyed by namespaced address strings.
pub struct VerificationCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    positive_ttl: Duration,
    negative_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl VerificationCache {
    /// Create a cache with the given TTLs for positive and negative verdicts.
    pub fn new(positive_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            positive_ttl,
            negative_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a cached verdict. Expired entries read as absent.
    pub async fn get(&self, key: &str) -> Option<bool> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.result)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a verdict, picking the TTL from its sign.
    pub async fn set(&self, key: impl Into<String>, result: bool) {
        let ttl = if result {
            self.positive_ttl
        } else {
            self.negative_ttl
        };
        self.set_with_ttl(key, result, ttl).await;
    }

    /// Store a verdict with an explicit TTL.
    pub async fn set_with_ttl(&self, key: impl Into<String>, result: bool, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.into(),
            CacheEntry {
                result,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop all expired entries.
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of live (possibly expired but not yet purged) entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> VerificationCache {
        VerificationCache::new(Duration::from_secs(300), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn get_returns_stored_verdicts() {
        let cache = cache();
        assert_eq!(cache.get("deposit_addr1").await, None);

        cache.set("deposit_addr1", true).await;
        cache.set("deposit_addr2", false).await;

        assert_eq!(cache.get("deposit_addr1").await, Some(true));
        assert_eq!(cache.get("deposit_addr2").await, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn negative_verdict_expires_before_positive() {
        let cache = cache();
        cache.set("positive", true).await;
        cache.set("negative", false).await;

        // Past the negative TTL, before the positive one.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("negative").await, None);
        assert_eq!(cache.get("positive").await, Some(true));

        // Past the positive TTL as well.
        tokio::time::advance(Duration::from_secs(240)).await;
        assert_eq!(cache.get("positive").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let cache = cache();
        cache.set("positive", true).await;
        cache.set("negative", false).await;
        assert_eq!(cache.len().await, 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.purge_expired().await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("positive").await, Some(true));
    }

    #[tokio::test]
    async fn stats_count_hits_and_misses() {
        let cache = cache();
        let _ = cache.get("missing").await;
        cache.set("key", true).await;
        let _ = cache.get("key").await;
        let _ = cache.get("key").await;

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }
}
