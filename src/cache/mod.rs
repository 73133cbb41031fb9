//! Subscription cache
//!
//! Fetched subscription bodies are stored under `provider:<md5>` keys. The
//! in-process backend keeps entries for the life of the process; the Redis
//! backend lets the server expire them after the configured max-age.

pub mod memory;
#[cfg(feature = "redis-cache")]
pub mod redis;

pub use memory::MemoryCache;
#[cfg(feature = "redis-cache")]
pub use self::redis::RedisCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{CacheConfig, CacheType};
use crate::provider::SubscriptionUserinfo;

pub const CACHE_KEY_PREFIX: &str = "provider";

/// A fetched subscription body plus its usage header, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionCacheItem {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_userinfo: Option<SubscriptionUserinfo>,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache entry (de)serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ============================================================================
// SBIO: Pure key derivation
// ============================================================================

/// `provider:` followed by the md5 hex digest of user agent and URL
pub fn cache_key(user_agent: &str, url: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(url.as_bytes());
    format!("{}:{:x}", CACHE_KEY_PREFIX, hasher.finalize())
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait SubscriptionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<SubscriptionCacheItem>, CacheError>;

    /// Store an item. Backends that cannot expire entries ignore `ttl`.
    async fn set(
        &self,
        key: &str,
        item: &SubscriptionCacheItem,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}

/// Build the backend selected in the configuration
pub async fn build_cache(config: &CacheConfig) -> Result<Arc<dyn SubscriptionCache>, CacheError> {
    match config.cache_type {
        CacheType::Default => Ok(Arc::new(MemoryCache::new())),
        CacheType::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| CacheError::Backend("cache.redis-url is not set".to_string()))?;
            connect_redis(url).await
        }
    }
}

#[cfg(feature = "redis-cache")]
async fn connect_redis(url: &str) -> Result<Arc<dyn SubscriptionCache>, CacheError> {
    let cache = RedisCache::connect(url).await?;
    info!("Using redis subscription cache");
    Ok(Arc::new(cache))
}

#[cfg(not(feature = "redis-cache"))]
async fn connect_redis(_url: &str) -> Result<Arc<dyn SubscriptionCache>, CacheError> {
    info!("Redis cache requested but support is not compiled in");
    Err(CacheError::Backend(
        "this build does not include the redis-cache feature".to_string(),
    ))
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// In-memory backend that honors TTLs against the tokio clock
    #[derive(Default)]
    pub struct ExpiringCache {
        entries: DashMap<String, (SubscriptionCacheItem, Instant)>,
        set_count: Arc<AtomicUsize>,
        get_delay: Option<Duration>,
    }

    impl ExpiringCache {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer lookups late, with the state read when the lookup started
        pub fn with_get_delay(mut self, delay: Duration) -> Self {
            self.get_delay = Some(delay);
            self
        }

                pub fn set_count(&self) -> usize {
            self.set_count.load(Ordering::SeqCst)
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }
    }

    #[async_trait]
    impl SubscriptionCache for ExpiringCache {
        async fn get(&self, key: &str) -> Result<Option<SubscriptionCacheItem>, CacheError> {
            let now = Instant::now();
            let hit = self
                .entries
                .get(key)
                .filter(|entry| entry.1 > now)
                .map(|entry| entry.0.clone());
            if hit.is_none() {
                self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
            }
            if let Some(delay) = self.get_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(hit)
        }

        async fn set(
            &self,
            key: &str,
            item: &SubscriptionCacheItem,
            ttl: Duration,
        ) -> Result<(), CacheError> {
            self.set_count.fetch_add(1, Ordering::SeqCst);
            self.entries
                .insert(key.to_string(), (item.clone(), Instant::now() + ttl));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ExpiringCache;
    use super::*;

    fn item(body: &str) -> SubscriptionCacheItem {
        SubscriptionCacheItem {
            body: body.to_string(),
            subscription_userinfo: None,
        }
    }

    #[test]
    fn test_cache_key_format() {
        let key = cache_key("subforge/0.1.0", "https://example.com/sub");
        let digest = key.strip_prefix("provider:").unwrap();
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_cache_key_known_digest() {
        // md5("") and md5("abc")
        assert_eq!(cache_key("", ""), "provider:d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(cache_key("a", "bc"), "provider:900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_cache_key_depends_on_user_agent() {
        let url = "https://example.com/sub";
        assert_ne!(cache_key("a", url), cache_key("b", url));
    }

    #[test]
    fn test_item_json_shape() {
        let item = SubscriptionCacheItem {
            body: "x".to_string(),
            subscription_userinfo: Some(SubscriptionUserinfo {
                upload: 1,
                download: 2,
                total: 3,
                expire: 4,
            }),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["body"], "x");
        assert_eq!(json["subscriptionUserinfo"]["total"], 3);

        let parsed: SubscriptionCacheItem = serde_json::from_str(r#"{"body": "y"}"#).unwrap();
        assert!(parsed.subscription_userinfo.is_none());
    }

    #[tokio::test]
    async fn test_build_default_cache() {
        let cache = build_cache(&CacheConfig::default()).await.unwrap();
        cache.set("k", &item("body"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(item("body")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiring_mock_honors_ttl() {
        let cache = ExpiringCache::new();
        cache.set("k", &item("body"), Duration::from_secs(5)).await.unwrap();
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert_eq!(cache.len(), 0);
    }
}
