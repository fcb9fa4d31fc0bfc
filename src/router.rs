//! Tier routing
//!
//! Decides per group whether data may leave the ephemeral tier, and which
//! store backs each tier. Groups can be pinned to their own store; every
//! other group uses the default store of its tier.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::store::{CacheAdapter, same_store};

pub struct CacheRouter {
    persistent: Arc<dyn CacheAdapter>,
    ephemeral: Arc<dyn CacheAdapter>,
    persistent_overrides: HashMap<String, Arc<dyn CacheAdapter>>,
    ephemeral_overrides: HashMap<String, Arc<dyn CacheAdapter>>,
    non_persistent_groups: HashSet<String>,
}

impl CacheRouter {
    pub fn new(persistent: Arc<dyn CacheAdapter>, ephemeral: Arc<dyn CacheAdapter>) -> Self {
        Self {
            persistent,
            ephemeral,
            persistent_overrides: HashMap::new(),
            ephemeral_overrides: HashMap::new(),
            non_persistent_groups: HashSet::new(),
        }
    }

    /// Groups whose data must never reach the persistent tier
    pub fn add_non_persistent_groups<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_persistent_groups
            .extend(groups.into_iter().map(Into::into));
    }

    pub fn is_non_persistent_group(&self, group: &str) -> bool {
        self.non_persistent_groups.contains(group)
    }

    pub fn non_persistent_groups(&self) -> &HashSet<String> {
        &self.non_persistent_groups
    }

    /// Back the persistent tier of `groups` with `store`
    pub fn register_persistent_store<I, S>(&mut self, store: Arc<dyn CacheAdapter>, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for group in groups {
            self.persistent_overrides
                .insert(group.into(), Arc::clone(&store));
        }
    }

    /// Back the ephemeral tier of `groups` with `store`
    pub fn register_ephemeral_store<I, S>(&mut self, store: Arc<dyn CacheAdapter>, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for group in groups {
            self.ephemeral_overrides
                .insert(group.into(), Arc::clone(&store));
        }
    }

    pub fn select_persistent(&self, group: &str) -> Arc<dyn CacheAdapter> {
        Arc::clone(
            self.persistent_overrides
                .get(group)
                .unwrap_or(&self.persistent),
        )
    }

    pub fn select_ephemeral(&self, group: &str) -> Arc<dyn CacheAdapter> {
        Arc::clone(self.ephemeral_overrides.get(group).unwrap_or(&self.ephemeral))
    }

    /// Clear every persistent store. True only if all of them cleared.
    pub async fn clear_persistent(&self) -> bool {
        clear_all(&self.persistent, &self.persistent_overrides).await
    }

    /// Clear every ephemeral store. True only if all of them cleared.
    pub async fn clear_ephemeral(&self) -> bool {
        clear_all(&self.ephemeral, &self.ephemeral_overrides).await
    }
}

async fn clear_all(
    default: &Arc<dyn CacheAdapter>,
    overrides: &HashMap<String, Arc<dyn CacheAdapter>>,
) -> bool {
    let mut stores: Vec<&Arc<dyn CacheAdapter>> = vec![default];
    for store in overrides.values() {
        if !stores.iter().any(|seen| same_store(seen, store)) {
            stores.push(store);
        }
    }

    let mut cleared = true;
    for store in stores {
        cleared &= store.clear().await;
    }
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryPool, StoreHandle};
    use serde_json::json;

    fn memory() -> Arc<dyn CacheAdapter> {
        StoreHandle::from(MemoryPool::new(100)).into_adapter()
    }

    #[test]
    fn test_non_persistent_registry() {
        let mut router = CacheRouter::new(memory(), memory());
        assert!(!router.is_non_persistent_group("counts"));

        router.add_non_persistent_groups(["counts", "plugins"]);
        router.add_non_persistent_groups(["counts"]);

        assert!(router.is_non_persistent_group("counts"));
        assert!(!router.is_non_persistent_group("posts"));
        assert_eq!(router.non_persistent_groups().len(), 2);
    }

    #[test]
    fn test_select_falls_back_to_defaults() {
        let persistent = memory();
        let ephemeral = memory();
        let transients = memory();
        let mut router = CacheRouter::new(Arc::clone(&persistent), Arc::clone(&ephemeral));
        router.register_persistent_store(Arc::clone(&transients), ["transient"]);

        assert!(same_store(&router.select_persistent("transient"), &transients));
        assert!(same_store(&router.select_persistent("posts"), &persistent));
        assert!(same_store(&router.select_ephemeral("transient"), &ephemeral));
    }

    #[tokio::test]
    async fn test_clear_persistent_reaches_override_stores() {
        let persistent = memory();
        let transients = memory();
        let mut router = CacheRouter::new(Arc::clone(&persistent), memory());
        router.register_persistent_store(Arc::clone(&transients), ["transient", "site-transient"]);

        persistent.set("a", json!(1), 0).await;
        transients.set("b", json!(2), 0).await;

        assert!(router.clear_persistent().await);
        assert!(!persistent.has("a").await);
        assert!(!transients.has("b").await);
    }
}
