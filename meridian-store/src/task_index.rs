//! Host task index.
//!
//! Records which controller host owns which in-flight request so another
//! host can pick the work up if the owner dies.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use meridian_core::{composite_resource_name, StoreError, StoreResult};
use tracing::debug;

/// Per-host index of pending entities with an opaque payload each.
#[async_trait]
pub trait HostIndex: Send + Sync + 'static {
    /// Add `entity` under `host_id`. Adding an existing entity keeps its
    /// first payload and succeeds.
    async fn add_entity(&self, host_id: &str, entity: &str, payload: Vec<u8>) -> StoreResult<()>;

    /// Remove `entity` from `host_id`. A missing entity is `DataNotFound`
    /// when `must_exist`, otherwise a no-op.
    async fn remove_entity(&self, host_id: &str, entity: &str, must_exist: bool) -> StoreResult<()>;

    /// Entities indexed under `host_id`, sorted.
    async fn get_entities(&self, host_id: &str) -> StoreResult<Vec<String>>;

    async fn get_entity_payload(&self, host_id: &str, entity: &str) -> StoreResult<Vec<u8>>;

    /// Hosts with at least one entity, sorted.
    async fn get_hosts(&self) -> StoreResult<Vec<String>>;

    /// Drop a host and all of its entities.
    async fn remove_host(&self, host_id: &str) -> StoreResult<()>;
}

/// In-memory host index.
#[derive(Debug, Default)]
pub struct InMemoryHostIndex {
    hosts: DashMap<String, BTreeMap<String, Vec<u8>>>,
}

impl InMemoryHostIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn entity_key(host_id: &str, entity: &str) -> String {
    composite_resource_name(&[host_id, entity])
}

#[async_trait]
impl HostIndex for InMemoryHostIndex {
    async fn add_entity(&self, host_id: &str, entity: &str, payload: Vec<u8>) -> StoreResult<()> {
        self.hosts
            .entry(host_id.to_string())
            .or_default()
            .entry(entity.to_string())
            .or_insert(payload);
        debug!(host = host_id, entity, "Entity indexed");
        Ok(())
    }

    async fn remove_entity(&self, host_id: &str, entity: &str, must_exist: bool) -> StoreResult<()> {
        let removed = match self.hosts.get_mut(host_id) {
            Some(mut entities) => entities.remove(entity).is_some(),
            None => false,
        };
        self.hosts.remove_if(host_id, |_, entities| entities.is_empty());

        if !removed && must_exist {
            return Err(StoreError::not_found(entity_key(host_id, entity)));
        }
        debug!(host = host_id, entity, removed, "Entity removed from index");
        Ok(())
    }

    async fn get_entities(&self, host_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .hosts
            .get(host_id)
            .map(|entities| entities.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_entity_payload(&self, host_id: &str, entity: &str) -> StoreResult<Vec<u8>> {
        self.hosts
            .get(host_id)
            .and_then(|entities| entities.get(entity).cloned())
            .ok_or_else(|| StoreError::not_found(entity_key(host_id, entity)))
    }

    async fn get_hosts(&self) -> StoreResult<Vec<String>> {
        let mut hosts: Vec<String> = self.hosts.iter().map(|entry| entry.key().clone()).collect();
        hosts.sort();
        Ok(hosts)
    }

    async fn remove_host(&self, host_id: &str) -> StoreResult<()> {
        self.hosts.remove(host_id);
        Ok(())
    }
}
