//! Scripted in-memory [`SimpleCache`] for tests: records calls, can fail on
//! demand and can hold `has` lookups at a barrier.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Barrier, Mutex};

use super::{CacheValue, SimpleCache};
use crate::CacheError;

#[derive(Default)]
pub(crate) struct ScriptedStore {
    entries: Mutex<HashMap<String, (CacheValue, Option<Duration>)>>,
    calls: Mutex<Vec<&'static str>>,
    fail_writes: AtomicBool,
    fail_clear: AtomicBool,
    atomic_primitives: bool,
    has_barrier: Option<Barrier>,
}

impl ScriptedStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_atomic_primitives(mut self) -> Self {
        self.atomic_primitives = true;
        self
    }

    /// Every `has` waits until `parties` lookups are in flight
    pub(crate) fn with_has_barrier(mut self, parties: usize) -> Self {
        self.has_barrier = Some(Barrier::new(parties));
        self
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    pub(crate) async fn insert(&self, key: &str, value: CacheValue) {
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), (value, None));
    }

    pub(crate) async fn value(&self, key: &str) -> Option<CacheValue> {
        self.entries.lock().await.get(key).map(|(v, _)| v.clone())
    }

    pub(crate) async fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries.lock().await.get(key).and_then(|(_, ttl)| *ttl)
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub(crate) async fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: &'static str) {
        self.calls.lock().await.push(call);
    }

    fn check_writes(&self) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SimpleCache for ScriptedStore {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>, CacheError> {
        self.record("get").await;
        Ok(self.value(key).await)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, CacheError> {
        self.record("get_many").await;
        let entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .map(|key| entries.get(key).map(|(v, _)| v.clone()))
            .collect())
    }

    async fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        self.record("set").await;
        self.check_writes()?;
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), (value.clone(), ttl));
        Ok(true)
    }

    async fn set_many(
        &self,
        values: &[(String, CacheValue)],
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        self.record("set_many").await;
        self.check_writes()?;
        let mut entries = self.entries.lock().await;
        for (key, value) in values {
            entries.insert(key.clone(), (value.clone(), ttl));
        }
        Ok(true)
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        self.record("has").await;
        // Read before waiting so every party answers from the same snapshot
        let present = self.entries.lock().await.contains_key(key);
        if let Some(barrier) = &self.has_barrier {
            barrier.wait().await;
        }
        Ok(present)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.record("delete").await;
        self.check_writes()?;
        self.entries.lock().await.remove(key);
        Ok(true)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<bool, CacheError> {
        self.record("delete_many").await;
        self.check_writes()?;
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(true)
    }

    async fn clear(&self) -> Result<bool, CacheError> {
        self.record("clear").await;
        if self.fail_clear.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.entries.lock().await.clear();
        Ok(true)
    }

    async fn add(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<Option<bool>, CacheError> {
        if !self.atomic_primitives {
            return Ok(None);
        }
        self.record("add").await;
        self.check_writes()?;
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            return Ok(Some(false));
        }
        entries.insert(key.to_owned(), (value.clone(), ttl));
        Ok(Some(true))
    }

    async fn replace(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> Result<Option<bool>, CacheError> {
        if !self.atomic_primitives {
            return Ok(None);
        }
        self.record("replace").await;
        self.check_writes()?;
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(Some(false));
        }
        entries.insert(key.to_owned(), (value.clone(), ttl));
        Ok(Some(true))
    }
}
