//! Two-tier object cache
//!
//! Reads go ephemeral first, then persistent, backfilling the ephemeral tier
//! on a persistent hit. Writes go to the persistent tier first and are only
//! mirrored into the ephemeral tier once the persistent write succeeded.
//! Groups registered as non-persistent never touch the persistent tier.
//!
//! Failures are reported as `false`/`None`, never as errors: a store that
//! cannot be reached looks like a miss or a failed write.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::keygen::{KeyGenerator, TenantContext};
use crate::router::CacheRouter;
use crate::store::{CacheAdapter, CacheValue, MemoryPool, RedisStore, StoreHandle, same_store};
use crate::{CacheConfig, CacheError, Consistency};

/// Group used when the caller passes an empty one
pub const DEFAULT_GROUP: &str = "default";

/// Group argument of the batch operations.
///
/// `PerKey` lines up with the keys by position: missing entries fall back to
/// the default group and surplus entries are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Groups {
    Single(String),
    PerKey(Vec<String>),
}

impl Groups {
    fn resolve(&self, len: usize) -> Vec<String> {
        match self {
            Groups::Single(group) => vec![normalize_group(group).to_owned(); len],
            Groups::PerKey(groups) => (0..len)
                .map(|i| {
                    normalize_group(groups.get(i).map(String::as_str).unwrap_or_default())
                        .to_owned()
                })
                .collect(),
        }
    }
}

impl From<&str> for Groups {
    fn from(group: &str) -> Self {
        Groups::Single(group.to_owned())
    }
}

impl From<String> for Groups {
    fn from(group: String) -> Self {
        Groups::Single(group)
    }
}

impl From<Vec<String>> for Groups {
    fn from(groups: Vec<String>) -> Self {
        Groups::PerKey(groups)
    }
}

impl From<Vec<&str>> for Groups {
    fn from(groups: Vec<&str>) -> Self {
        Groups::PerKey(groups.into_iter().map(str::to_owned).collect())
    }
}

impl From<&[&str]> for Groups {
    fn from(groups: &[&str]) -> Self {
        Groups::PerKey(groups.iter().map(|g| (*g).to_owned()).collect())
    }
}

fn normalize_group(group: &str) -> &str {
    if group.is_empty() { DEFAULT_GROUP } else { group }
}

/// One key of a batch call, resolved against the registries
struct BatchEntry {
    key: String,
    full_key: String,
    group: String,
    non_persistent: bool,
}

/// Builder for [`ObjectCache`]. Both stores are required.
#[derive(Default)]
pub struct ObjectCacheBuilder {
    persistent: Option<Arc<dyn CacheAdapter>>,
    ephemeral: Option<Arc<dyn CacheAdapter>>,
    config: CacheConfig,
}

impl ObjectCacheBuilder {
    pub fn persistent(mut self, store: Arc<dyn CacheAdapter>) -> Self {
        self.persistent = Some(store);
        self
    }

    pub fn ephemeral(mut self, store: Arc<dyn CacheAdapter>) -> Self {
        self.ephemeral = Some(store);
        self
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ObjectCache, CacheError> {
        let persistent = self.persistent.ok_or(CacheError::MissingStore("persistent"))?;
        let ephemeral = self.ephemeral.ok_or(CacheError::MissingStore("ephemeral"))?;

        Ok(ObjectCache {
            keygen: KeyGenerator::new(self.config.site_id, self.config.network_id),
            router: CacheRouter::new(persistent, ephemeral),
            consistency: self.config.consistency,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }
}

/// The cache facade.
///
/// Registry and tenant changes need `&mut self`, so they can never overlap a
/// cache call running against the previous context.
pub struct ObjectCache {
    keygen: KeyGenerator,
    router: CacheRouter,
    consistency: Consistency,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ObjectCache {
    pub fn builder() -> ObjectCacheBuilder {
        ObjectCacheBuilder::default()
    }

    /// Redis as the persistent tier, an in-process Moka pool as the
    /// ephemeral tier
    pub async fn connect(
        redis_client: redis::Client,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        let redis = RedisStore::new(redis_client, config.redis_namespace.clone()).await?;
        let memory = MemoryPool::new(config.ephemeral_max_capacity);

        Self::builder()
            .persistent(StoreHandle::from(redis).into_adapter())
            .ephemeral(StoreHandle::from(memory).into_adapter())
            .config(config)
            .build()
    }

    /// Fetch a value. `force` skips the ephemeral tier for persistent groups
    /// so the value is re-read from the persistent tier.
    pub async fn get(&self, key: &str, group: &str, force: bool) -> Option<CacheValue> {
        let group = normalize_group(group);
        let full_key = self.keygen.generate(key, group);
        let ephemeral = self.router.select_ephemeral(group);
        let non_persistent = self.router.is_non_persistent_group(group);

        if non_persistent || !force {
            if let Some(value) = ephemeral.get(&full_key).await {
                debug!("Cache hit ephemeral for key: {}", full_key);
                self.record_hit();
                return Some(value);
            }

            if non_persistent {
                debug!("Cache miss for non-persistent key: {}", full_key);
                self.record_miss();
                return None;
            }
        }

        let persistent = self.router.select_persistent(group);
        match persistent.get(&full_key).await {
            Some(value) => {
                debug!("Cache hit persistent for key: {}", full_key);
                self.record_hit();
                ephemeral.set(&full_key, value.clone(), 0).await;
                Some(value)
            }
            None => {
                debug!("Cache miss for key: {}", full_key);
                self.record_miss();
                None
            }
        }
    }

    /// Store a value. For persistent groups the persistent write decides
    /// the result; the ephemeral mirror is best effort.
    pub async fn set(&self, key: &str, value: CacheValue, group: &str, expiration: u64) -> bool {
        let group = normalize_group(group);
        let full_key = self.keygen.generate(key, group);
        let ephemeral = self.router.select_ephemeral(group);

        if self.router.is_non_persistent_group(group) {
            return ephemeral.set(&full_key, value, expiration).await;
        }

        let persistent = self.router.select_persistent(group);
        if persistent.set(&full_key, value.clone(), expiration).await {
            ephemeral.set(&full_key, value, expiration).await;
            return true;
        }

        false
    }

    /// Store a value only if the key is absent from the tier of record.
    ///
    /// With [`Consistency::CheckThenWrite`] the existence check and the
    /// write are separate store calls: concurrent callers on the same key
    /// can all see it absent and all succeed.
    pub async fn add(&self, key: &str, value: CacheValue, group: &str, expiration: u64) -> bool {
        self.conditional_set(key, value, group, expiration, Condition::Absent)
            .await
    }

    /// Store a value only if the key is present in the tier of record.
    /// Subject to the same race as [`add`](Self::add).
    pub async fn replace(
        &self,
        key: &str,
        value: CacheValue,
        group: &str,
        expiration: u64,
    ) -> bool {
        self.conditional_set(key, value, group, expiration, Condition::Present)
            .await
    }

    /// Add `offset` to a cached number and return the new value.
    ///
    /// Non-numeric values count as `0`, results never go below `0`, and the
    /// entry is rewritten without expiration.
    pub async fn increment(&self, key: &str, offset: i64, group: &str) -> Option<i64> {
        self.apply_delta(key, offset, group).await
    }

    /// Subtract `offset` from a cached number, see [`increment`](Self::increment).
    pub async fn decrement(&self, key: &str, offset: i64, group: &str) -> Option<i64> {
        self.apply_delta(key, offset.saturating_neg(), group).await
    }

    /// Remove a value. A key that is already absent counts as deleted.
    pub async fn delete(&self, key: &str, group: &str) -> bool {
        let group = normalize_group(group);
        let full_key = self.keygen.generate(key, group);
        let ephemeral = self.router.select_ephemeral(group);

        if self.router.is_non_persistent_group(group) {
            return !ephemeral.has(&full_key).await || ephemeral.delete(&full_key).await;
        }

        let persistent = self.router.select_persistent(group);
        if !persistent.has(&full_key).await || persistent.delete(&full_key).await {
            ephemeral.delete(&full_key).await;
            return true;
        }

        false
    }

    /// Clear both tiers. The ephemeral tier is only cleared once the
    /// persistent tier was.
    pub async fn flush(&self) -> bool {
        if !self.router.clear_persistent().await {
            debug!("Persistent clear failed, leaving ephemeral tier intact");
            return false;
        }

        self.router.clear_ephemeral().await;
        true
    }

    /// Whether the tier of record holds the key. The ephemeral tier is not
    /// consulted for persistent groups.
    pub async fn has(&self, key: &str, group: &str) -> bool {
        let group = normalize_group(group);
        let full_key = self.keygen.generate(key, group);

        if self.router.is_non_persistent_group(group) {
            return self.router.select_ephemeral(group).has(&full_key).await;
        }

        self.router.select_persistent(group).has(&full_key).await
    }

    /// Batch [`get`](Self::get), keyed by the raw keys passed in. A raw key
    /// requested in several groups keeps the result of its last occurrence.
    pub async fn get_multiple(
        &self,
        keys: &[&str],
        groups: impl Into<Groups>,
        force: bool,
    ) -> HashMap<String, Option<CacheValue>> {
        let entries = self.resolve(keys.iter().copied(), &groups.into(), keys.len());
        let mut found: HashMap<String, CacheValue> = HashMap::new();

        let ephemeral_batches = bucket_by_store(
            entries
                .iter()
                .filter(|e| e.non_persistent || !force)
                .map(|e| (self.router.select_ephemeral(&e.group), e.full_key.clone())),
        );
        for (store, batch) in ephemeral_batches {
            for (full_key, value) in store.get_multiple(&batch).await {
                if let Some(value) = value {
                    found.insert(full_key, value);
                }
            }
        }

        let mut seen = HashSet::new();
        let persistent_batches = bucket_by_store(
            entries
                .iter()
                .filter(|e| !e.non_persistent && !found.contains_key(&e.full_key))
                .filter(|e| seen.insert(e.full_key.clone()))
                .map(|e| (self.router.select_persistent(&e.group), e)),
        );
        for (store, batch) in persistent_batches {
            let full_keys: Vec<String> = batch.iter().map(|e| e.full_key.clone()).collect();
            let values = store.get_multiple(&full_keys).await;

            let backfill = bucket_by_store(batch.into_iter().filter_map(|e| {
                let value = values.get(&e.full_key).cloned().flatten()?;
                Some((self.router.select_ephemeral(&e.group), (e.full_key.clone(), value)))
            }));
            for (ephemeral, values) in backfill {
                debug!("Backfilling {} keys into ephemeral tier", values.len());
                for (full_key, value) in &values {
                    found.insert(full_key.clone(), value.clone());
                }
                ephemeral.set_multiple(values, 0).await;
            }
        }

        let mut results = HashMap::with_capacity(entries.len());
        for entry in entries {
            let value = found.get(&entry.full_key).cloned();
            if value.is_some() {
                self.record_hit();
            } else {
                self.record_miss();
            }
            results.insert(entry.key, value);
        }
        results
    }

    /// Batch [`set`](Self::set). Groups line up with `values` by position.
    pub async fn set_multiple(
        &self,
        values: Vec<(String, CacheValue)>,
        groups: impl Into<Groups>,
        expiration: u64,
    ) -> bool {
        let entries = self.resolve(
            values.iter().map(|(key, _)| key.as_str()),
            &groups.into(),
            values.len(),
        );
        let entries: Vec<(BatchEntry, CacheValue)> = entries
            .into_iter()
            .zip(values.into_iter().map(|(_, value)| value))
            .collect();

        let mut stored = true;

        let ephemeral_only = bucket_by_store(
            entries
                .iter()
                .filter(|(e, _)| e.non_persistent)
                .map(|(e, value)| {
                    (
                        self.router.select_ephemeral(&e.group),
                        (e.full_key.clone(), value.clone()),
                    )
                }),
        );
        for (store, batch) in ephemeral_only {
            stored &= store.set_multiple(batch, expiration).await;
        }

        let persistent_batches = bucket_by_store(
            entries
                .iter()
                .filter(|(e, _)| !e.non_persistent)
                .map(|entry| (self.router.select_persistent(&entry.0.group), entry)),
        );
        for (store, batch) in persistent_batches {
            let pairs: Vec<(String, CacheValue)> = batch
                .iter()
                .map(|(e, value)| (e.full_key.clone(), value.clone()))
                .collect();
            if !store.set_multiple(pairs, expiration).await {
                stored = false;
                continue;
            }

            let mirror = bucket_by_store(batch.into_iter().map(|(e, value)| {
                (
                    self.router.select_ephemeral(&e.group),
                    (e.full_key.clone(), value.clone()),
                )
            }));
            for (ephemeral, pairs) in mirror {
                ephemeral.set_multiple(pairs, expiration).await;
            }
        }

        stored
    }

    /// Batch [`delete`](Self::delete). Groups line up with `keys` by position.
    pub async fn delete_multiple(&self, keys: &[&str], groups: impl Into<Groups>) -> bool {
        let entries = self.resolve(keys.iter().copied(), &groups.into(), keys.len());
        let mut deleted = true;

        let ephemeral_only = bucket_by_store(
            entries
                .iter()
                .filter(|e| e.non_persistent)
                .map(|e| (self.router.select_ephemeral(&e.group), e.full_key.clone())),
        );
        for (store, batch) in ephemeral_only {
            deleted &= store.delete_multiple(&batch).await;
        }

        let persistent_batches = bucket_by_store(
            entries
                .iter()
                .filter(|e| !e.non_persistent)
                .map(|e| (self.router.select_persistent(&e.group), e)),
        );
        for (store, batch) in persistent_batches {
            let full_keys: Vec<String> = batch.iter().map(|e| e.full_key.clone()).collect();
            if !store.delete_multiple(&full_keys).await {
                deleted = false;
                continue;
            }

            let mirror = bucket_by_store(
                batch
                    .into_iter()
                    .map(|e| (self.router.select_ephemeral(&e.group), e.full_key.clone())),
            );
            for (ephemeral, full_keys) in mirror {
                ephemeral.delete_multiple(&full_keys).await;
            }
        }

        deleted
    }

    /// The fully-qualified key `key` in `group` maps to right now
    pub fn build_key(&self, key: &str, group: &str) -> String {
        self.keygen.generate(key, normalize_group(group))
    }

    pub fn add_global_groups<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keygen.add_global_groups(groups);
    }

    pub fn add_network_groups<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keygen.add_network_groups(groups);
    }

    pub fn add_non_persistent_groups<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.router.add_non_persistent_groups(groups);
    }

    /// Pin the persistent tier of `groups` to a dedicated store
    pub fn register_persistent_store<I, S>(&mut self, store: Arc<dyn CacheAdapter>, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.router.register_persistent_store(store, groups);
    }

    /// Pin the ephemeral tier of `groups` to a dedicated store
    pub fn register_ephemeral_store<I, S>(&mut self, store: Arc<dyn CacheAdapter>, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.router.register_ephemeral_store(store, groups);
    }

    pub fn switch_site_context(&mut self, site_id: u64) {
        debug!("Switching cache site context to {}", site_id);
        self.keygen.switch_site_context(site_id);
    }

    pub fn switch_network_context(&mut self, network_id: u64) {
        debug!("Switching cache network context to {}", network_id);
        self.keygen.switch_network_context(network_id);
    }

    pub fn cache_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn global_groups(&self) -> &HashSet<String> {
        self.keygen.global_groups()
    }

    pub fn network_groups(&self) -> &HashSet<String> {
        self.keygen.network_groups()
    }

    pub fn non_persistent_groups(&self) -> &HashSet<String> {
        self.router.non_persistent_groups()
    }

    pub fn context(&self) -> TenantContext {
        self.keygen.context()
    }

    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    pub fn keygen(&self) -> &KeyGenerator {
        &self.keygen
    }

    pub fn router(&self) -> &CacheRouter {
        &self.router
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn resolve<'a>(
        &self,
        keys: impl Iterator<Item = &'a str>,
        groups: &Groups,
        len: usize,
    ) -> Vec<BatchEntry> {
        keys.zip(groups.resolve(len))
            .map(|(key, group)| BatchEntry {
                key: key.to_owned(),
                full_key: self.keygen.generate(key, &group),
                non_persistent: self.router.is_non_persistent_group(&group),
                group,
            })
            .collect()
    }

    async fn conditional_set(
        &self,
        key: &str,
        value: CacheValue,
        group: &str,
        expiration: u64,
        condition: Condition,
    ) -> bool {
        let group = normalize_group(group);
        let full_key = self.keygen.generate(key, group);
        let ephemeral = self.router.select_ephemeral(group);
        let non_persistent = self.router.is_non_persistent_group(group);
        let record = if non_persistent {
            Arc::clone(&ephemeral)
        } else {
            self.router.select_persistent(group)
        };

        let atomic = match self.consistency {
            Consistency::Atomic => match condition {
                Condition::Absent => record.add(&full_key, value.clone(), expiration).await,
                Condition::Present => record.replace(&full_key, value.clone(), expiration).await,
            },
            Consistency::CheckThenWrite => None,
        };

        let written = match atomic {
            Some(written) => written,
            None => {
                if self.consistency == Consistency::Atomic {
                    debug!(
                        "Store has no atomic primitive, checking then writing key: {}",
                        full_key
                    );
                }
                record.has(&full_key).await == condition.expects_present()
                    && record.set(&full_key, value.clone(), expiration).await
            }
        };

        if written && !non_persistent {
            ephemeral.set(&full_key, value, expiration).await;
        }

        written
    }

    async fn apply_delta(&self, key: &str, delta: i64, group: &str) -> Option<i64> {
        let current = self.get(key, group, false).await?;
        let updated = numeric_value(&current).saturating_add(delta).max(0);

        if self.set(key, CacheValue::from(updated), group, 0).await {
            Some(updated)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Condition {
    Absent,
    Present,
}

impl Condition {
    fn expects_present(self) -> bool {
        matches!(self, Condition::Present)
    }
}

/// Integer view of a cached value: numbers and numeric strings, floats
/// truncated toward zero, everything else `0`.
fn numeric_value(value: &CacheValue) -> i64 {
    match value {
        CacheValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        CacheValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f as i64)
                })
                .unwrap_or(0)
        }
        _ => 0,
    }
}

/// Group items by the store they go to, keeping first-seen store order.
fn bucket_by_store<T>(
    items: impl IntoIterator<Item = (Arc<dyn CacheAdapter>, T)>,
) -> Vec<(Arc<dyn CacheAdapter>, Vec<T>)> {
    let mut buckets: Vec<(Arc<dyn CacheAdapter>, Vec<T>)> = Vec::new();
    for (store, item) in items {
        match buckets.iter_mut().find(|(s, _)| same_store(s, &store)) {
            Some((_, bucket)) => bucket.push(item),
            None => buckets.push((store, vec![item])),
        }
    }
    buckets
}
