//! In-process pool backed by Moka

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{CacheItem, CachePool, CacheValue};
use crate::CacheError;

struct StoredItem {
    value: CacheValue,
    ttl: Option<Duration>,
}

/// Per-entry expiration: every write restarts the entry's own TTL, and a
/// write without TTL clears any previous one.
struct ItemExpiry;

impl Expiry<String, Arc<StoredItem>> for ItemExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<StoredItem>,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<StoredItem>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Bounded in-memory [`CachePool`], the default ephemeral tier.
pub struct MemoryPool {
    entries: Cache<String, Arc<StoredItem>>,
    deferred: Mutex<Vec<CacheItem>>,
}

impl MemoryPool {
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(ItemExpiry)
            .build();

        Self {
            entries,
            deferred: Mutex::new(Vec::new()),
        }
    }

    async fn store(&self, item: CacheItem) {
        let (key, value, ttl) = item.into_parts();
        self.entries
            .insert(key, Arc::new(StoredItem { value, ttl }))
            .await;
    }
}

#[async_trait]
impl CachePool for MemoryPool {
    async fn get_item(&self, key: &str) -> Result<CacheItem, CacheError> {
        Ok(match self.entries.get(key).await {
            Some(stored) => CacheItem::hit(key, stored.value.clone()),
            None => CacheItem::miss(key),
        })
    }

    async fn get_items(&self, keys: &[String]) -> Result<Vec<CacheItem>, CacheError> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            items.push(self.get_item(key).await?);
        }
        Ok(items)
    }

    async fn has_item(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.contains_key(key))
    }

    async fn save(&self, item: CacheItem) -> Result<bool, CacheError> {
        self.store(item).await;
        Ok(true)
    }

    async fn save_deferred(&self, item: CacheItem) -> Result<bool, CacheError> {
        self.deferred.lock().await.push(item);
        Ok(true)
    }

    async fn commit(&self) -> Result<bool, CacheError> {
        let items = std::mem::take(&mut *self.deferred.lock().await);
        for item in items {
            self.store(item).await;
        }
        Ok(true)
    }

    async fn discard_deferred(&self, keys: &[String]) -> Result<bool, CacheError> {
        self.deferred
            .lock()
            .await
            .retain(|item| !keys.iter().any(|key| key == item.key()));
        Ok(true)
    }

    async fn delete_item(&self, key: &str) -> Result<bool, CacheError> {
        self.entries.invalidate(key).await;
        Ok(true)
    }

    async fn delete_items(&self, keys: &[String]) -> Result<bool, CacheError> {
        for key in keys {
            self.entries.invalidate(key).await;
        }
        Ok(true)
    }

    async fn clear(&self) -> Result<bool, CacheError> {
        self.deferred.lock().await.clear();
        self.entries.invalidate_all();
        Ok(true)
    }
}
