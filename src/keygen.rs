//! Fully-qualified key generation
//!
//! Every cache key is namespaced by the scope of its group:
//! - global groups: `global.{group}.{key}`
//! - network groups: `network.{network_id}.{group}.{key}`
//! - everything else: `site.{site_id}.{group}.{key}`
//!
//! The joined key is then sanitized for backing stores. This format is the
//! only thing external tooling sees, so it must stay stable.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Active tenant: the site and the network it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    pub site_id: u64,
    pub network_id: u64,
}

/// Key generator holding the tenant context and the group scope registries
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    global_groups: HashSet<String>,
    network_groups: HashSet<String>,
    context: TenantContext,
}

impl KeyGenerator {
    pub fn new(site_id: u64, network_id: u64) -> Self {
        Self {
            global_groups: HashSet::new(),
            network_groups: HashSet::new(),
            context: TenantContext {
                site_id,
                network_id,
            },
        }
    }

    /// Build the fully-qualified key for `key` in `group`.
    ///
    /// Global registration takes precedence over network registration.
    pub fn generate(&self, key: &str, group: &str) -> String {
        let full_key = if self.global_groups.contains(group) {
            format!("global.{}.{}", group, key)
        } else if self.network_groups.contains(group) {
            format!("network.{}.{}.{}", self.context.network_id, group, key)
        } else {
            format!("site.{}.{}.{}", self.context.site_id, group, key)
        };

        sanitize(&full_key)
    }

    pub fn add_global_groups<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.global_groups.extend(groups.into_iter().map(Into::into));
    }

    pub fn add_network_groups<I, S>(&mut self, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.network_groups.extend(groups.into_iter().map(Into::into));
    }

    /// Affects keys generated from now on; stored keys are left alone.
    pub fn switch_site_context(&mut self, site_id: u64) {
        self.context.site_id = site_id;
    }

    /// Affects keys generated from now on; stored keys are left alone.
    pub fn switch_network_context(&mut self, network_id: u64) {
        self.context.network_id = network_id;
    }

    pub fn context(&self) -> TenantContext {
        self.context
    }

    pub fn global_groups(&self) -> &HashSet<String> {
        &self.global_groups
    }

    pub fn network_groups(&self) -> &HashSet<String> {
        &self.network_groups
    }
}

/// Strip characters that backing stores reject or mishandle.
///
/// `{ } ( ) / \ @` and spaces are dropped, `:` becomes `.`.
fn sanitize(key: &str) -> String {
    key.chars()
        .filter_map(|c| match c {
            '{' | '}' | '(' | ')' | '/' | '\\' | '@' | ' ' => None,
            ':' => Some('.'),
            c => Some(c),
        })
        .collect()
}
