//! Handle construction per storage backend.

use std::sync::Arc;

use async_trait::async_trait;
use meridian_core::{SegmentNumber, StoreResult};

use crate::backend::BackingStore;
use crate::handle::{ScopeHandle, TableHandle};
use crate::scope::PersistentScope;
use crate::table::PersistentKeyValueTable;

/// Per-backend seam of the metadata store.
///
/// Builds handles for the resolution cache on a miss, and answers the two
/// questions table creation asks of the backend directly. Implemented once
/// per storage backend; the store never reaches the backend any other way.
#[async_trait]
pub trait HandleFactory: Send + Sync + 'static {
    async fn new_scope(&self, scope: &str) -> StoreResult<Arc<dyn ScopeHandle>>;

    async fn new_table(&self, scope: &str, name: &str) -> StoreResult<Arc<dyn TableHandle>>;

    /// Whether the scope exists. Always read from the backend.
    async fn scope_exists(&self, scope: &str) -> StoreResult<bool>;

    /// Highest segment number any deleted incarnation of the table used.
    async fn highest_deleted_segment(
        &self,
        scope: &str,
        name: &str,
    ) -> StoreResult<Option<SegmentNumber>>;
}

/// Factory producing [`PersistentScope`] and [`PersistentKeyValueTable`]
/// handles over one backing store.
#[derive(Clone)]
pub struct BackingStoreHandleFactory {
    store: Arc<dyn BackingStore>,
}

impl BackingStoreHandleFactory {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HandleFactory for BackingStoreHandleFactory {
    async fn new_scope(&self, scope: &str) -> StoreResult<Arc<dyn ScopeHandle>> {
        Ok(Arc::new(PersistentScope::new(scope, self.store.clone())))
    }

    async fn new_table(&self, scope: &str, name: &str) -> StoreResult<Arc<dyn TableHandle>> {
        Ok(Arc::new(PersistentKeyValueTable::new(
            scope,
            name,
            self.store.clone(),
        )))
    }

    async fn scope_exists(&self, scope: &str) -> StoreResult<bool> {
        PersistentScope::new(scope, self.store.clone()).exists().await
    }

    async fn highest_deleted_segment(
        &self,
        scope: &str,
        name: &str,
    ) -> StoreResult<Option<SegmentNumber>> {
        self.store.highest_deleted_segment(scope, name).await
    }
}
