//! Redis backed key/value store, the default persistent tier
//!
//! Values are stored as JSON strings. With a namespace configured every key
//! is written as `{namespace}:{key}`; fully-qualified keys never contain a
//! colon, so the prefix cannot collide with a cache key.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CacheValue, SimpleCache};
use crate::CacheError;

const DELETE_CHUNK: usize = 500;

/// [`SimpleCache`] over a Redis connection manager
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    namespace: Option<String>,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn new(
        redis_client: redis::Client,
        namespace: Option<String>,
    ) -> Result<Self, CacheError> {
        let redis = ConnectionManager::new(redis_client).await?;
        Ok(Self { redis, namespace })
    }

    fn redis_key(&self, key: &str) -> String {
        namespaced_key(self.namespace.as_deref(), key)
    }

    /// Decode a stored value. An entry that no longer parses is deleted, so
    /// `has` and `add` agree with the miss `get` reports.
    async fn decode(&self, key: &str, raw: Option<String>) -> Option<CacheValue> {
        let json = raw?;
        match serde_json::from_str::<CacheValue>(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    "Failed to deserialize cached value for key {}: {}. Deleting corrupt entry.",
                    key, e
                );
                let redis_key = self.redis_key(key);
                let mut conn = self.redis.clone();
                if let Err(del_err) = conn.del::<_, ()>(&redis_key).await {
                    warn!(
                        "Failed to delete corrupt entry for key {} (Redis key: {}): {}",
                        key, redis_key, del_err
                    );
                }
                None
            }
        }
    }

    /// `SET key value [EX ttl] NX|XX`, true if the write happened
    async fn set_conditional(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
        condition: &str,
    ) -> Result<bool, CacheError> {
        let json = serde_json::to_string(value)?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.redis_key(key)).arg(json).arg(condition);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs());
        }

        let mut conn = self.redis.clone();
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl SimpleCache for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(self.redis_key(key)).await?;
        Ok(self.decode(key, raw).await)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let redis_keys: Vec<String> = keys.iter().map(|key| self.redis_key(key)).collect();
        let mut conn = self.redis.clone();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&redis_keys)
            .query_async(&mut conn)
            .await?;

        let mut values = Vec::with_capacity(keys.len());
        for (key, json) in keys.iter().zip(raw) {
            values.push(self.decode(key, json).await);
        }
        Ok(values)
    }

    async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let json = serde_json::to_string(value)?;
        let redis_key = self.redis_key(key);
        let mut conn = self.redis.clone();

        match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(&redis_key, json, ttl.as_secs())
                    .await?
            }
            None => conn.set::<_, _, ()>(&redis_key, json).await?,
        }

        Ok(true)
    }

    async fn set_many(
        &self,
        values: &[(String, CacheValue)],
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        if values.is_empty() {
            return Ok(true);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in values {
            let json = serde_json::to_string(value)?;
            let redis_key = self.redis_key(key);
            match ttl {
                Some(ttl) => {
                    pipe.set_ex(redis_key, json, ttl.as_secs()).ignore();
                }
                None => {
                    pipe.set(redis_key, json).ignore();
                }
            }
        }

        let mut conn = self.redis.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(true)
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.redis.clone();
        Ok(conn.exists(self.redis_key(key)).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(self.redis_key(key)).await?;
        Ok(true)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<bool, CacheError> {
        if keys.is_empty() {
            return Ok(true);
        }

        let redis_keys: Vec<String> = keys.iter().map(|key| self.redis_key(key)).collect();
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(redis_keys).await?;
        Ok(true)
    }

    async fn clear(&self) -> Result<bool, CacheError> {
        let mut conn = self.redis.clone();

        let Some(namespace) = &self.namespace else {
            let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
            debug!("Flushed Redis database");
            return Ok(true);
        };

        let pattern = scan_pattern(namespace);
        let keys: Vec<String> = {
            let iter: redis::AsyncIter<'_, String> = conn.scan_match(&pattern).await?;
            iter.collect().await
        };

        for chunk in keys.chunks(DELETE_CHUNK) {
            conn.del::<_, ()>(chunk).await?;
        }
        debug!("Cleared {} Redis keys under namespace {}", keys.len(), namespace);

        Ok(true)
    }

    async fn add(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<Option<bool>, CacheError> {
        self.set_conditional(key, value, ttl, "NX").await.map(Some)
    }

    async fn replace(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<Option<bool>, CacheError> {
        self.set_conditional(key, value, ttl, "XX").await.map(Some)
    }
}

fn namespaced_key(namespace: Option<&str>, key: &str) -> String {
    match namespace {
        Some(namespace) => format!("{}:{}", namespace, key),
        None => key.to_owned(),
    }
}

/// `SCAN MATCH` pattern for every key under `namespace`, with glob
/// metacharacters in the namespace matched literally
fn scan_pattern(namespace: &str) -> String {
    let mut pattern = String::with_capacity(namespace.len() + 2);
    for c in namespace.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push_str(":*");
    pattern
}
