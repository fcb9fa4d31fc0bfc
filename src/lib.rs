//! tiered-object-cache - Two-tier object cache with tenant namespacing
//!
//! This library routes cache calls across two tiers:
//! - Ephemeral: in-process Moka pool, consulted first
//! - Persistent: shared store (Redis), the tier of record
//!
//! The cache supports:
//! - Read-through with backfill of the ephemeral tier
//! - Write-through where the persistent write is authoritative
//! - Per-site, per-network and global key scopes
//! - Non-persistent groups that never leave the ephemeral tier
//! - Batch get/set/delete with per-key groups

mod config;
mod error;
pub mod keygen;
mod object_cache;
pub mod router;
pub mod store;

pub use config::{CacheConfig, Consistency};
pub use error::CacheError;
pub use keygen::{KeyGenerator, TenantContext};
pub use object_cache::{DEFAULT_GROUP, Groups, ObjectCache, ObjectCacheBuilder};
pub use router::CacheRouter;
pub use store::{
    CacheAdapter, CacheItem, CachePool, CacheValue, MemoryPool, RedisStore, SimpleCache,
    StoreHandle,
};

// Re-export async_trait for store implementors
pub use async_trait::async_trait;
