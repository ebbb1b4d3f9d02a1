use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::warn;

use super::CacheBackend;

const KEY_PREFIX: &str = "spax";

/// Redis-backed cache shared across a server fleet. Backend failures
/// degrade to cache misses; the database remains the source of truth.
pub struct SharedCacheBackend {
    conn: ConnectionManager,
}

impl SharedCacheBackend {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn key(key: &str) -> String {
        format!("{KEY_PREFIX}:{key}")
    }
}

#[async_trait]
impl CacheBackend for SharedCacheBackend {
    async fn get(&self, key: &str, ttl: Duration, idle: bool) -> Option<String> {
        let mut conn = self.conn.clone();
        let full = Self::key(key);
        let value: Option<String> = match conn.get(&full).await {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "Shared cache read failed, treating as miss");
                return None;
            }
        };
        if idle && value.is_some() {
            let _: Result<(), _> = conn.expire(&full, ttl.as_secs() as i64).await;
        }
        value
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) {
        let mut conn = self.conn.clone();
        let result: Result<(), _> = conn
            .set_ex(Self::key(key), value, ttl.as_secs())
            .await;
        if let Err(e) = result {
            warn!(key, error = %e, "Shared cache write failed");
        }
    }

    async fn remove(&self, key: &str) {
        let mut conn = self.conn.clone();
        let result: Result<(), _> = conn.del(Self::key(key)).await;
        if let Err(e) = result {
            warn!(key, error = %e, "Shared cache eviction failed");
        }
    }
}
