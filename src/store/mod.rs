//! Store adapters
//!
//! Backing stores come in two flavors:
//! - [`SimpleCache`]: plain key/value calls (Redis, Memcached-style clients)
//! - [`CachePool`]: pool of explicit [`CacheItem`] objects with a hit flag
//!
//! Both are wrapped into a [`CacheAdapter`], the single contract the object
//! cache talks to. Adapters take fully-qualified keys only; namespacing
//! happens upstream in the key generator.

mod memory;
mod pool;
mod redis_store;
#[cfg(test)]
pub(crate) mod scripted;
mod simple;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::CacheError;

pub use memory::MemoryPool;
pub use pool::{CacheItem, CachePool, PoolCacheAdapter};
pub use redis_store::RedisStore;
pub use simple::{SimpleCache, SimpleCacheAdapter};

/// Opaque cached value. Stores that need bytes encode it themselves.
pub type CacheValue = serde_json::Value;

/// Normalized store contract.
///
/// A miss is always `None`, never a stored `false`/`0`/`null`. Expirations
/// are in seconds, `0` meaning no expiration. Batch calls report a single
/// boolean; which keys failed is not tracked.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheValue>;

    async fn set(&self, key: &str, value: CacheValue, expiration: u64) -> bool;

    async fn has(&self, key: &str) -> bool;

    /// Returns true when the key was removed or was already absent.
    async fn delete(&self, key: &str) -> bool;

    /// Every requested key is present in the returned map.
    async fn get_multiple(&self, keys: &[String]) -> HashMap<String, Option<CacheValue>>;

    async fn set_multiple(&self, values: Vec<(String, CacheValue)>, expiration: u64) -> bool;

    async fn delete_multiple(&self, keys: &[String]) -> bool;

    async fn clear(&self) -> bool;

    /// Atomic set-if-absent. `None` when the store has no such primitive.
    async fn add(&self, _key: &str, _value: CacheValue, _expiration: u64) -> Option<bool> {
        None
    }

    /// Atomic set-if-present. `None` when the store has no such primitive.
    async fn replace(&self, _key: &str, _value: CacheValue, _expiration: u64) -> Option<bool> {
        None
    }
}

/// A backing store of either flavor, ready to be wrapped into an adapter.
pub enum StoreHandle {
    Pool(Arc<dyn CachePool>),
    Simple(Arc<dyn SimpleCache>),
}

impl StoreHandle {
    /// Wrap the store in the adapter matching its flavor
    pub fn into_adapter(self) -> Arc<dyn CacheAdapter> {
        match self {
            StoreHandle::Pool(pool) => Arc::new(PoolCacheAdapter::new(pool)),
            StoreHandle::Simple(cache) => Arc::new(SimpleCacheAdapter::new(cache)),
        }
    }
}

impl From<MemoryPool> for StoreHandle {
    fn from(pool: MemoryPool) -> Self {
        StoreHandle::Pool(Arc::new(pool))
    }
}

impl From<RedisStore> for StoreHandle {
    fn from(store: RedisStore) -> Self {
        StoreHandle::Simple(Arc::new(store))
    }
}

/// `0` means no expiration
pub(crate) fn ttl_from_secs(expiration: u64) -> Option<Duration> {
    (expiration > 0).then(|| Duration::from_secs(expiration))
}

/// Collapse a store error into `fallback`, logging it.
pub(crate) fn or_warn<T>(result: Result<T, CacheError>, op: &str, key: &str, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!("Store {} failed for key {}: {}", op, key, e);
            fallback
        }
    }
}

/// Pointer identity, ignoring vtables.
pub(crate) fn same_store(a: &Arc<dyn CacheAdapter>, b: &Arc<dyn CacheAdapter>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
