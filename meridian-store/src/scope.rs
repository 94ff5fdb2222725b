//! Scope handle over a [`BackingStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use meridian_core::{StoreError, StoreResult};
use tracing::{debug, info};

use crate::backend::{keys, BackingStore};
use crate::handle::ScopeHandle;

/// Scope persisted in a backing store.
///
/// The table listing is cached locally until the next [`refresh`](ScopeHandle::refresh).
/// A listing read before a refresh is never cached.
pub struct PersistentScope {
    name: String,
    store: Arc<dyn BackingStore>,
    tables: RwLock<Option<Vec<String>>>,
    refreshes: AtomicU64,
}

impl PersistentScope {
    pub fn new(name: impl Into<String>, store: Arc<dyn BackingStore>) -> Self {
        Self {
            name: name.into(),
            store,
            tables: RwLock::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    fn generation(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn cached_tables(&self) -> Option<Vec<String>> {
        self.tables.read().ok().and_then(|guard| guard.clone())
    }

    fn cache_tables(&self, generation: u64, tables: Vec<String>) {
        if let Ok(mut guard) = self.tables.write() {
            if self.generation() == generation {
                *guard = Some(tables);
            }
        }
    }

    fn clear_tables(&self) {
        if let Ok(mut guard) = self.tables.write() {
            *guard = None;
        }
    }
}

#[async_trait]
impl ScopeHandle for PersistentScope {
    fn name(&self) -> &str {
        &self.name
    }

    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.clear_tables();
    }

    async fn create(&self) -> StoreResult<()> {
        match self.store.create(&keys::scope(&self.name), Vec::new()).await {
            Ok(_) => {
                info!(scope = %self.name, "Scope created");
                Ok(())
            }
            Err(StoreError::DataExists { .. }) => {
                debug!(scope = %self.name, "Scope already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self) -> StoreResult<()> {
        let tables = self.store.list_children(&keys::tables_of(&self.name)).await?;
        if !tables.is_empty() {
            return Err(StoreError::DataNotEmpty {
                key: keys::scope(&self.name),
            });
        }
        self.store.delete(&keys::scope(&self.name)).await?;
        self.clear_tables();
        info!(scope = %self.name, "Scope deleted");
        Ok(())
    }

    async fn exists(&self) -> StoreResult<bool> {
        self.store.exists(&keys::scope(&self.name)).await
    }

    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        if let Some(tables) = self.cached_tables() {
            return Ok(tables);
        }
        let generation = self.generation();
        if !self.exists().await? {
            return Err(StoreError::not_found(keys::scope(&self.name)));
        }
        let tables = self.store.list_children(&keys::tables_of(&self.name)).await?;
        self.cache_tables(generation, tables.clone());
        Ok(tables)
    }
}
