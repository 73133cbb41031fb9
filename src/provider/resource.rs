//! Cacheable, coalesced subscription requests
//!
//! Concurrent requests for the same cache key share one outbound fetch.
//! The in-flight fetch is registered under the key and removed when it
//! finishes, successful or not. Only successful results are cached.
//! Callers look for an in-flight fetch before reading the cache, and a
//! newly registered fetch reads the cache once more before going out.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use super::fetch::{user_agent, FetchError, Fetcher};
use super::usage::{parse_subscription_userinfo, SUBSCRIPTION_USERINFO_HEADER};
use crate::cache::{cache_key, SubscriptionCache, SubscriptionCacheItem};

type PendingFetch = Shared<BoxFuture<'static, Result<SubscriptionCacheItem, FetchError>>>;
type PendingMap = Arc<DashMap<String, PendingFetch>>;

/// Shared by every provider of a process
pub struct ResourceLoader {
    cache: Arc<dyn SubscriptionCache>,
    fetcher: Arc<dyn Fetcher>,
    ttl: Duration,
    pending: PendingMap,
}

impl ResourceLoader {
    pub fn new(cache: Arc<dyn SubscriptionCache>, fetcher: Arc<dyn Fetcher>, ttl: Duration) -> Self {
        Self {
            cache,
            fetcher,
            ttl,
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of fetches currently in flight
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Fetch `url`, serving from the cache when possible
    pub async fn request_cacheable_resource(
        &self,
        url: &str,
        request_user_agent: Option<&str>,
    ) -> Result<SubscriptionCacheItem, FetchError> {
        let agent = user_agent(request_user_agent);
        let key = cache_key(&agent, url);

        let in_flight = self.pending.get(&key).map(|entry| entry.value().clone());
        if let Some(shared) = in_flight {
            debug!("Joining in-flight fetch of {}", url);
            return shared.await;
        }

        match self.cache.get(&key).await {
            Ok(Some(item)) => {
                debug!("Cache hit for {} ({})", url, key);
                return Ok(item);
            }
            Ok(None) => {}
            Err(e) => warn!("Cache lookup for {} failed, fetching instead: {}", url, e),
        }

        let shared = match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight fetch of {}", url);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let fetch = fetch_and_store(
                    self.fetcher.clone(),
                    self.cache.clone(),
                    self.pending.clone(),
                    key,
                    url.to_string(),
                    agent,
                    self.ttl,
                )
                .boxed()
                .shared();
                entry.insert(fetch.clone());
                fetch
            }
        };

        shared.await
    }
}

async fn fetch_and_store(
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn SubscriptionCache>,
    pending: PendingMap,
    key: String,
    url: String,
    agent: String,
    ttl: Duration,
) -> Result<SubscriptionCacheItem, FetchError> {
    // A fetch may have completed while the caller's cache lookup was pending
    if let Ok(Some(item)) = cache.get(&key).await {
        debug!("Cache filled while waiting for {} ({})", url, key);
        pending.remove(&key);
        return Ok(item);
    }

    debug!("Fetching {}", url);
    let result = fetcher.fetch(&url, &agent).await.map(|response| {
        let subscription_userinfo = response
            .header(SUBSCRIPTION_USERINFO_HEADER)
            .and_then(|raw| {
                let parsed = parse_subscription_userinfo(raw);
                debug!(
                    "{} received subscription userinfo - raw: {} | parsed: {:?}",
                    url, raw, parsed
                );
                parsed
            });
        SubscriptionCacheItem {
            body: response.body,
            subscription_userinfo,
        }
    });

    match result {
        Ok(ref item) => {
            if let Err(e) = cache.set(&key, item, ttl).await {
                warn!("Failed to cache {}: {}", url, e);
            }
        }
        Err(ref e) => warn!("Fetching {} failed: {}", url, e),
    }

    // The cache is written before the entry goes away, so a new caller sees
    // either the in-flight fetch or the cached item
    pending.remove(&key);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::mock::ExpiringCache;
    use crate::cache::MemoryCache;
    use crate::provider::fetch::mock::MockFetcher;
    use crate::provider::SubscriptionUserinfo;

    const URL: &str = "https://example.com/sub";

    fn loader(fetcher: Arc<MockFetcher>, cache: Arc<dyn SubscriptionCache>) -> Arc<ResourceLoader> {
        Arc::new(ResourceLoader::new(cache, fetcher, Duration::from_secs(600)))
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let fetcher = Arc::new(MockFetcher::new("body"));
        let loader = loader(fetcher.clone(), Arc::new(MemoryCache::new()));

        let first = loader.request_cacheable_resource(URL, None).await.unwrap();
        let second = loader.request_cacheable_resource(URL, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(loader.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_fetch() {
        let fetcher = Arc::new(MockFetcher::new("body").with_delay(Duration::from_millis(100)));
        let loader = loader(fetcher.clone(), Arc::new(MemoryCache::new()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let loader = loader.clone();
            handles.push(tokio::spawn(async move {
                loader.request_cacheable_resource(URL, None).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().body, "body");
        }

        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(loader.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_every_waiter_and_is_not_cached() {
        let fetcher = Arc::new(
            MockFetcher::new("body")
                .with_delay(Duration::from_millis(50))
                .failing(1),
        );
        let cache = Arc::new(ExpiringCache::new());
        let loader = loader(fetcher.clone(), cache.clone());

        let (a, b) = tokio::join!(
            loader.request_cacheable_resource(URL, None),
            loader.request_cacheable_resource(URL, None)
        );
        assert!(matches!(a, Err(FetchError::Status { status: 502, .. })));
        assert_eq!(a, b);
        assert_eq!(fetcher.call_count(), 1);
        assert_eq!(cache.set_count(), 0);
        assert_eq!(loader.pending_count(), 0);

        let retry = loader.request_cacheable_resource(URL, None).await.unwrap();
        assert_eq!(retry.body, "body");
        assert_eq!(fetcher.call_count(), 2);
    }

    async fn second_caller_after(offset: Duration) -> (usize, usize) {
        let fetcher = Arc::new(MockFetcher::new("body").with_delay(Duration::from_millis(50)));
        let cache = Arc::new(ExpiringCache::new().with_get_delay(Duration::from_millis(100)));
        let loader = loader(fetcher.clone(), cache);

        let first = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.request_cacheable_resource(URL, None).await })
        };
        tokio::time::sleep(offset).await;
        let pending_at_start = loader.pending_count();
        let second = loader.request_cacheable_resource(URL, None).await.unwrap();

        assert_eq!(first.await.unwrap().unwrap(), second);
        assert_eq!(loader.pending_count(), 0);
        (pending_at_start, fetcher.call_count())
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cache_lookup_joins_in_flight_fetch() {
        let (pending, fetches) = second_caller_after(Duration::from_millis(120)).await;
        assert_eq!(pending, 1);
        assert_eq!(fetches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cache_lookup_before_registration() {
        let (pending, fetches) = second_caller_after(Duration::from_millis(90)).await;
        assert_eq!(pending, 0);
        assert_eq!(fetches, 1);
    }

    #[tokio::test]
    async fn test_user_agent_is_part_of_the_key() {
        let fetcher = Arc::new(MockFetcher::new("body"));
        let loader = loader(fetcher.clone(), Arc::new(MemoryCache::new()));

        loader.request_cacheable_resource(URL, None).await.unwrap();
        loader
            .request_cacheable_resource(URL, Some("clash"))
            .await
            .unwrap();

        assert_eq!(fetcher.call_count(), 2);
        let agents = fetcher.user_agents();
        assert!(agents[1].starts_with("clash subforge/"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let fetcher = Arc::new(MockFetcher::new("body"));
        let loader = loader(fetcher.clone(), Arc::new(ExpiringCache::new()));

        loader.request_cacheable_resource(URL, None).await.unwrap();
        tokio::time::advance(Duration::from_secs(599)).await;
        loader.request_cacheable_resource(URL, None).await.unwrap();
        assert_eq!(fetcher.call_count(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        loader.request_cacheable_resource(URL, None).await.unwrap();
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_userinfo_header_is_parsed_and_cached() {
        let fetcher = Arc::new(
            MockFetcher::new("body")
                .with_header("Subscription-Userinfo", "upload=1; download=2; total=10; expire=0"),
        );
        let cache = Arc::new(MemoryCache::new());
        let loader = loader(fetcher, cache.clone());

        let item = loader.request_cacheable_resource(URL, None).await.unwrap();
        let expected = Some(SubscriptionUserinfo {
            upload: 1,
            download: 2,
            total: 10,
            expire: 0,
        });
        assert_eq!(item.subscription_userinfo, expected);

        let key = cache_key(&user_agent(None), URL);
        let cached = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(cached.subscription_userinfo, expected);
    }
}
