//! Typed JSON cache over the Redis pool

use std::time::Duration;

use bb8::PooledConnection;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::{CacheError, CacheResult};
use super::RedisPool;

/// Redis-backed cache storing values as JSON strings
#[derive(Clone)]
pub struct RedisCache {
    pool: RedisPool,
}

impl RedisCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub async fn get_connection(
        &self,
    ) -> CacheResult<PooledConnection<'_, RedisConnectionManager>> {
        self.pool.get().await.map_err(CacheError::from)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let mut conn = self.get_connection().await?;

        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(value) => {
                let parsed = serde_json::from_str(&value)?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let body = serde_json::to_string(value)?;

        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, body, ttl.as_secs()).await?;
            }
            None => {
                let _: () = conn.set(key, body).await?;
            }
        }

        Ok(())
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.del(key).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{init_cache_pool, CacheConfig};

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_json_round_trip() {
        let pool = init_cache_pool(CacheConfig::default()).await.unwrap();
        let cache = RedisCache::new(pool);

        cache
            .set(
                "v1:test:round_trip",
                &serde_json::json!({"balance": "975.00"}),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        let value: Option<serde_json::Value> = cache.get("v1:test:round_trip").await.unwrap();
        assert_eq!(value.unwrap()["balance"], "975.00");

        cache.delete("v1:test:round_trip").await.unwrap();
        let gone: Option<serde_json::Value> = cache.get("v1:test:round_trip").await.unwrap();
        assert!(gone.is_none());
    }
}
