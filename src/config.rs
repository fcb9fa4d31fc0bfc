//! Cache configuration

use serde::{Deserialize, Serialize};

/// How `add` and `replace` guard against concurrent writers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// Existence check and write are two separate store calls. Two callers
    /// racing on the same key can both observe it absent (or present) and
    /// both succeed.
    #[default]
    CheckThenWrite,
    /// Use the store's own set-if-absent / set-if-present primitive when it
    /// has one; stores without one fall back to `CheckThenWrite`.
    Atomic,
}

/// Configuration for the object cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the in-process ephemeral tier
    pub ephemeral_max_capacity: u64,
    /// Site the key generator starts in
    pub site_id: u64,
    /// Network the key generator starts in
    pub network_id: u64,
    /// Guarantee level for `add`/`replace`
    pub consistency: Consistency,
    /// Prefix for every Redis key. When set, flushing only removes keys
    /// under this prefix instead of the whole Redis database.
    pub redis_namespace: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ephemeral_max_capacity: 10_000,
            site_id: 1,
            network_id: 1,
            consistency: Consistency::CheckThenWrite,
            redis_namespace: None,
        }
    }
}
