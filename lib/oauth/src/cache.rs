//! Short-lived key/value cache backing pending authorization state.

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache as MokaCache;
use std::time::{Duration, Instant};

use crate::error::CacheError;

/// Longest TTL honored; longer requests are clamped.
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// A string key/value cache with per-entry expiry.
///
/// A `ttl_seconds` of `0` stores the entry without expiry. This differs from
/// backends where a zero TTL means "expire immediately"; implementations must
/// translate accordingly.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Stores or overwrites `key`.
    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), CacheError>;

    /// Returns the live value for `key`, if any. Never mutates the entry.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Removes `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

impl Entry {
    fn new(value: String, ttl_seconds: u64) -> Self {
        let ttl = (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds).min(MAX_TTL));
        Self { value, ttl }
    }
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// Process-local cache for single-instance deployments and tests.
#[derive(Clone)]
pub struct MemoryCache {
    cache: MokaCache<String, Entry>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: MokaCache::builder().expire_after(PerEntryTtl).build(),
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), CacheError> {
        self.cache
            .insert(key.to_string(), Entry::new(value, ttl_seconds))
            .await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.remove(key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = MemoryCache::new();
        cache.set("k", "v".to_string(), 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn set_overwrites_existing_value() {
        let cache = MemoryCache::new();
        cache.set("k", "one".to_string(), 60).await.unwrap();
        cache.set("k", "two".to_string(), 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("two"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", "v".to_string(), 1).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_replaces_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", "pending".to_string(), 1).await.unwrap();
        cache.set("k", "done".to_string(), 100).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn huge_ttl_is_stored_without_panicking() {
        let cache = MemoryCache::new();
        cache.set("k", "v".to_string(), u64::MAX).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn zero_ttl_entry_has_no_expiry() {
        let entry = Entry::new("v".to_string(), 0);
        let now = Instant::now();
        assert_eq!(PerEntryTtl.expire_after_create(&"k".to_string(), &entry, now), None);
        assert_eq!(
            PerEntryTtl.expire_after_update(
                &"k".to_string(),
                &entry,
                now,
                Some(Duration::from_secs(5))
            ),
            None
        );
    }

    #[test]
    fn ttl_is_taken_from_the_entry_and_clamped() {
        let now = Instant::now();
        let short = Entry::new("v".to_string(), 300);
        assert_eq!(
            PerEntryTtl.expire_after_create(&"k".to_string(), &short, now),
            Some(Duration::from_secs(300))
        );

        let huge = Entry::new("v".to_string(), u64::MAX);
        assert_eq!(huge.ttl, Some(MAX_TTL));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let cache = MemoryCache::new();
        cache.set("k", "v".to_string(), 60).await.unwrap();
        cache.delete("k").await.unwrap();
        cache.delete("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }
}
