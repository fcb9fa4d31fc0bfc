//! Adapter for key/value style stores

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{CacheAdapter, CacheValue, or_warn, ttl_from_secs};
use crate::CacheError;

/// Key/value style backing store.
///
/// `get` reports a miss as `Ok(None)`. `ttl` of `None` means the entry does
/// not expire.
#[async_trait]
pub trait SimpleCache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError>;

    /// Values come back in the order of `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, CacheError>;

    async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    async fn set_many(
        &self,
        values: &[(String, CacheValue)],
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn delete_many(&self, keys: &[String]) -> Result<bool, CacheError>;

    async fn clear(&self) -> Result<bool, CacheError>;

    /// Store only if absent, atomically. `Ok(None)` if unsupported.
    async fn add(
        &self,
        _key: &str,
        _value: &CacheValue,
        _ttl: Option<Duration>,
    ) -> Result<Option<bool>, CacheError> {
        Ok(None)
    }

    /// Store only if present, atomically. `Ok(None)` if unsupported.
    async fn replace(
        &self,
        _key: &str,
        _value: &CacheValue,
        _ttl: Option<Duration>,
    ) -> Result<Option<bool>, CacheError> {
        Ok(None)
    }
}

/// Wraps a [`SimpleCache`] into the [`CacheAdapter`] contract
pub struct SimpleCacheAdapter {
    cache: Arc<dyn SimpleCache>,
}

impl SimpleCacheAdapter {
    pub fn new(cache: Arc<dyn SimpleCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl CacheAdapter for SimpleCacheAdapter {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        or_warn(self.cache.get(key).await, "get", key, None)
    }

    async fn set(&self, key: &str, value: CacheValue, expiration: u64) -> bool {
        let result = self.cache.set(key, &value, ttl_from_secs(expiration)).await;
        or_warn(result, "set", key, false)
    }

    async fn has(&self, key: &str) -> bool {
        or_warn(self.cache.has(key).await, "has", key, false)
    }

    async fn delete(&self, key: &str) -> bool {
        or_warn(self.cache.delete(key).await, "delete", key, false)
    }

    async fn get_multiple(&self, keys: &[String]) -> HashMap<String, Option<CacheValue>> {
        let values = match self.cache.get_many(keys).await {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Store get_multiple failed for {} keys: {}", keys.len(), e);
                Vec::new()
            }
        };

        let mut values = values.into_iter();
        keys.iter()
            .map(|key| (key.clone(), values.next().flatten()))
            .collect()
    }

    async fn set_multiple(&self, values: Vec<(String, CacheValue)>, expiration: u64) -> bool {
        let result = self.cache.set_many(&values, ttl_from_secs(expiration)).await;
        or_warn(result, "set_multiple", &batch_label(values.len()), false)
    }

    async fn delete_multiple(&self, keys: &[String]) -> bool {
        let result = self.cache.delete_many(keys).await;
        or_warn(result, "delete_multiple", &batch_label(keys.len()), false)
    }

    async fn clear(&self) -> bool {
        or_warn(self.cache.clear().await, "clear", "*", false)
    }

    async fn add(&self, key: &str, value: CacheValue, expiration: u64) -> Option<bool> {
        let result = self.cache.add(key, &value, ttl_from_secs(expiration)).await;
        or_warn(result, "add", key, Some(false))
    }

    async fn replace(&self, key: &str, value: CacheValue, expiration: u64) -> Option<bool> {
        let result = self
            .cache
            .replace(key, &value, ttl_from_secs(expiration))
            .await;
        or_warn(result, "replace", key, Some(false))
    }
}

fn batch_label(len: usize) -> String {
    format!("<batch of {}>", len)
}
