//! Adapter for pool style stores with explicit item objects

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{CacheAdapter, CacheValue, or_warn, ttl_from_secs};
use crate::CacheError;

/// An entry handed out by a [`CachePool`].
///
/// A lookup that found nothing still yields an item, with `is_hit()` false.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    key: String,
    value: Option<CacheValue>,
    hit: bool,
    expires_after: Option<Duration>,
}

impl CacheItem {
    /// Item for a key that is not in the pool
    pub fn miss(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            hit: false,
            expires_after: None,
        }
    }

    /// Item for a key found in the pool
    pub fn hit(key: impl Into<String>, value: CacheValue) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            hit: true,
            expires_after: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the lookup that produced this item found an entry
    pub fn is_hit(&self) -> bool {
        self.hit
    }

    /// The cached value, `None` unless the item is a hit
    pub fn get(&self) -> Option<&CacheValue> {
        if self.hit { self.value.as_ref() } else { None }
    }

    /// Set the value to save. Does not change `is_hit()`.
    pub fn set(&mut self, value: CacheValue) -> &mut Self {
        self.value = Some(value);
        self
    }

    /// Relative expiration for the next save; `None` never expires
    pub fn expires_after(&mut self, ttl: Option<Duration>) -> &mut Self {
        self.expires_after = ttl;
        self
    }

    /// Split into key, value to persist (`Null` if never set) and expiration
    pub fn into_parts(self) -> (String, CacheValue, Option<Duration>) {
        (
            self.key,
            self.value.unwrap_or(CacheValue::Null),
            self.expires_after,
        )
    }

    fn into_hit_value(self) -> Option<CacheValue> {
        if self.hit { self.value } else { None }
    }
}

/// Pool style backing store
#[async_trait]
pub trait CachePool: Send + Sync + 'static {
    async fn get_item(&self, key: &str) -> Result<CacheItem, CacheError>;

    /// Items come back in the order of `keys`.
    async fn get_items(&self, keys: &[String]) -> Result<Vec<CacheItem>, CacheError>;

    async fn has_item(&self, key: &str) -> Result<bool, CacheError>;

    async fn save(&self, item: CacheItem) -> Result<bool, CacheError>;

    /// Queue an item until the next [`commit`](CachePool::commit)
    async fn save_deferred(&self, item: CacheItem) -> Result<bool, CacheError>;

    async fn commit(&self) -> Result<bool, CacheError>;

    /// Drop queued items for `keys` without writing them
    async fn discard_deferred(&self, keys: &[String]) -> Result<bool, CacheError>;

    async fn delete_item(&self, key: &str) -> Result<bool, CacheError>;

    async fn delete_items(&self, keys: &[String]) -> Result<bool, CacheError>;

    async fn clear(&self) -> Result<bool, CacheError>;
}

/// Wraps a [`CachePool`] into the [`CacheAdapter`] contract
pub struct PoolCacheAdapter {
    pool: Arc<dyn CachePool>,
}

impl PoolCacheAdapter {
    pub fn new(pool: Arc<dyn CachePool>) -> Self {
        Self { pool }
    }

    /// Roll back a half-queued batch so a later commit cannot write it
    async fn discard(&self, keys: &[String]) {
        if let Err(e) = self.pool.discard_deferred(keys).await {
            tracing::warn!("Failed to discard {} deferred items: {}", keys.len(), e);
        }
    }
}

#[async_trait]
impl CacheAdapter for PoolCacheAdapter {
    async fn get(&self, key: &str) -> Option<CacheValue> {
        let item = or_warn(self.pool.get_item(key).await.map(Some), "get", key, None)?;
        item.into_hit_value()
    }

    async fn set(&self, key: &str, value: CacheValue, expiration: u64) -> bool {
        let mut item = match self.pool.get_item(key).await {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!("Store set failed for key {}: {}", key, e);
                return false;
            }
        };
        item.set(value).expires_after(ttl_from_secs(expiration));

        or_warn(self.pool.save(item).await, "set", key, false)
    }

    async fn has(&self, key: &str) -> bool {
        or_warn(self.pool.has_item(key).await, "has", key, false)
    }

    async fn delete(&self, key: &str) -> bool {
        or_warn(self.pool.delete_item(key).await, "delete", key, false)
    }

    async fn get_multiple(&self, keys: &[String]) -> HashMap<String, Option<CacheValue>> {
        let mut values: HashMap<String, Option<CacheValue>> =
            keys.iter().map(|key| (key.clone(), None)).collect();

        match self.pool.get_items(keys).await {
            Ok(items) => {
                for item in items {
                    let key = item.key().to_owned();
                    if let Some(slot) = values.get_mut(&key) {
                        *slot = item.into_hit_value();
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Store get_multiple failed for {} keys: {}", keys.len(), e);
            }
        }

        values
    }

    async fn set_multiple(&self, values: Vec<(String, CacheValue)>, expiration: u64) -> bool {
        let keys: Vec<String> = values.iter().map(|(key, _)| key.clone()).collect();
        let mut pending: HashMap<String, CacheValue> = values.into_iter().collect();

        let items = match self.pool.get_items(&keys).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("Store set_multiple failed for {} keys: {}", keys.len(), e);
                return false;
            }
        };

        let ttl = ttl_from_secs(expiration);
        for mut item in items {
            let Some(value) = pending.remove(item.key()) else {
                continue;
            };
            item.set(value).expires_after(ttl);
            let key = item.key().to_owned();
            if !or_warn(self.pool.save_deferred(item).await, "save_deferred", &key, false) {
                self.discard(&keys).await;
                return false;
            }
        }

        or_warn(self.pool.commit().await, "commit", "*", false)
    }

    async fn delete_multiple(&self, keys: &[String]) -> bool {
        or_warn(self.pool.delete_items(keys).await, "delete_multiple", "*", false)
    }

    async fn clear(&self) -> bool {
        or_warn(self.pool.clear().await, "clear", "*", false)
    }
}
