use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheError, SubscriptionCache, SubscriptionCacheItem};

/// Process-local cache. Entries live until the process exits.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, SubscriptionCacheItem>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SubscriptionCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<SubscriptionCacheItem>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(
        &self,
        key: &str,
        item: &SubscriptionCacheItem,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), item.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_returns_copy() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty());

        let item = SubscriptionCacheItem {
            body: "ss://...".to_string(),
            subscription_userinfo: None,
        };
        cache.set("provider:abc", &item, Duration::from_secs(60)).await.unwrap();

        let mut copy = cache.get("provider:abc").await.unwrap().unwrap();
        copy.body.push_str("changed");
        assert_eq!(cache.get("provider:abc").await.unwrap(), Some(item));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_do_not_expire() {
        let cache = MemoryCache::new();
        let item = SubscriptionCacheItem {
            body: "body".to_string(),
            subscription_userinfo: None,
        };
        cache.set("k", &item, Duration::from_secs(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(cache.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_miss() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("provider:missing").await.unwrap(), None);
    }
}
