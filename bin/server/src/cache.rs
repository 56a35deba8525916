//! Redis-backed pending-auth cache, shared by every server instance.

use async_trait::async_trait;
use fleetdesk_oauth::{Cache, CacheError};
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tracing::error;

#[derive(Clone)]
pub struct RedisCache {
    conn_manager: ConnectionManager,
}

impl RedisCache {
    /// Connects to Redis and checks the connection with a `PING`.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url).map_err(|e| CacheError::Unavailable {
            details: format!("invalid Redis URL: {e}"),
        })?;

        let conn_manager =
            ConnectionManager::new(client)
                .await
                .map_err(|e| CacheError::Unavailable {
                    details: format!("failed to create Redis connection manager: {e}"),
                })?;

        let mut conn = conn_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| CacheError::Unavailable {
                details: format!("failed to ping Redis: {e}"),
            })?;

        Ok(Self { conn_manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set(&self, key: &str, value: String, ttl_seconds: u64) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        // SET EX rejects 0, so a zero TTL is stored without expiry.
        let result = if ttl_seconds == 0 {
            conn.set::<_, _, ()>(key, value).await
        } else {
            conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await
        };

        result.map_err(|e| {
            error!(key, error = %e, "Redis error while setting key");
            CacheError::Unavailable {
                details: e.to_string(),
            }
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn_manager.clone();

        conn.get::<_, Option<String>>(key).await.map_err(|e| {
            error!(key, error = %e, "Redis error while getting key");
            CacheError::Unavailable {
                details: e.to_string(),
            }
        })
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        conn.del::<_, ()>(key).await.map_err(|e| {
            error!(key, error = %e, "Redis error while deleting key");
            CacheError::Unavailable {
                details: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_url_is_unavailable() {
        let result = RedisCache::connect("not a url").await;
        assert!(matches!(result, Err(CacheError::Unavailable { .. })));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn set_get_delete_round_trip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let cache = RedisCache::connect(&url).await.unwrap();

        cache
            .set("oauth:state:test", "value".to_string(), 5)
            .await
            .unwrap();
        assert_eq!(
            cache.get("oauth:state:test").await.unwrap().as_deref(),
            Some("value")
        );
        cache.delete("oauth:state:test").await.unwrap();
        assert!(cache.get("oauth:state:test").await.unwrap().is_none());
    }
}
