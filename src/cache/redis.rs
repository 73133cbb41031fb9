use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::{CacheError, SubscriptionCache, SubscriptionCacheItem};

/// Redis backed cache shared between processes.
///
/// Items are stored as JSON with `SET key value EX ttl`, so expiry is
/// enforced by the server.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

fn backend_error(e: redis::RedisError) -> CacheError {
    CacheError::Backend(e.to_string())
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(backend_error)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(backend_error)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SubscriptionCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<SubscriptionCacheItem>, CacheError> {
        let mut conn = self.conn.clone();
        let raw = conn
            .get::<_, Option<String>>(key)
            .await
            .map_err(backend_error)?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        item: &SubscriptionCacheItem,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(item)?;
        // EX 0 is rejected by the server
        let seconds = ttl.as_secs().max(1);
        debug!("Caching {} in redis for {}s", key, seconds);

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, json, seconds)
            .await
            .map_err(backend_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_non_redis_url() {
        let result = RedisCache::connect("http://127.0.0.1:6379").await;
        assert!(matches!(result, Err(CacheError::Backend(_))));
    }
}
