//! Key-value table metadata store.
//!
//! Entry point of the crate. Every operation takes the caller's executor and
//! returns a [`Completion`] that runs the whole operation on that executor.
//! Handles come from the [`ResolutionCache`] unless the caller passes an
//! [`OperationContext`], in which case the pinned handle is used as is.

use std::future::Future;
use std::sync::Arc;

use meridian_core::{
    validate_resource_name, ControllerEvent, CreateTableResponse, KeyValueTableConfiguration,
    MeridianResult, SegmentNumber, StoreConfig, StoreError, StoreResult, TableState,
    TimestampMs, VersionedMetadata,
};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::allocator::SafeSegmentAllocator;
use crate::backend::BackingStore;
use crate::cache::{ResolutionCache, ResolutionStats};
use crate::completion::{with_completion, Completion};
use crate::context::OperationContext;
use crate::factory::{BackingStoreHandleFactory, HandleFactory};
use crate::handle::TableHandle;
use crate::task_index::HostIndex;

/// Metadata store for scopes and their key-value tables.
#[derive(Clone)]
pub struct KvTableMetadataStore {
    factory: Arc<dyn HandleFactory>,
    cache: ResolutionCache,
    allocator: SafeSegmentAllocator,
    host_index: Arc<dyn HostIndex>,
}

impl KvTableMetadataStore {
    /// Build a store over the backend behind `factory`. Handles, scope checks
    /// and deletion records all come from it.
    pub fn new(
        factory: Arc<dyn HandleFactory>,
        host_index: Arc<dyn HostIndex>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            cache: ResolutionCache::new(factory.clone(), config),
            allocator: SafeSegmentAllocator::new(factory.clone()),
            factory,
            host_index,
        }
    }

    /// Validate `config` and build a store with persistent handles over
    /// `backing`.
    pub fn from_config(
        backing: Arc<dyn BackingStore>,
        host_index: Arc<dyn HostIndex>,
        config: &StoreConfig,
    ) -> MeridianResult<Self> {
        config.validate()?;
        let factory = Arc::new(BackingStoreHandleFactory::new(backing));
        Ok(Self::new(factory, host_index, config))
    }

    pub fn resolution_cache(&self) -> &ResolutionCache {
        &self.cache
    }

    async fn table(
        &self,
        scope: &str,
        name: &str,
        context: Option<&OperationContext>,
    ) -> StoreResult<Arc<dyn TableHandle>> {
        match context {
            Some(context) => context.verify(scope, name),
            None => self.cache.resolve_table(scope, name).await,
        }
    }

    /// Run `op` against the table's handle on `executor`.
    fn with_table<T, F, Fut>(
        &self,
        scope: &str,
        name: &str,
        context: Option<&OperationContext>,
        executor: &Handle,
        op: F,
    ) -> Completion<T>
    where
        F: FnOnce(Arc<dyn TableHandle>) -> Fut + Send + 'static,
        Fut: Future<Output = StoreResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        let scope = scope.to_string();
        let name = name.to_string();
        let context = context.cloned();
        with_completion(
            async move {
                validate_table_names(&scope, &name)?;
                let table = store.table(&scope, &name, context.as_ref()).await?;
                op(table).await
            },
            executor,
        )
    }

    // ========================================================================
    // CONTEXTS AND SCOPES
    // ========================================================================

    /// Resolve the table's handle once and pin it in a context.
    pub fn create_context(
        &self,
        scope: &str,
        name: &str,
        executor: &Handle,
    ) -> Completion<OperationContext> {
        self.with_table(scope, name, None, executor, |table| async move {
            Ok(OperationContext::new(table))
        })
    }

    pub fn create_scope(&self, scope: &str, executor: &Handle) -> Completion<()> {
        let cache = self.cache.clone();
        let scope = scope.to_string();
        with_completion(
            async move {
                validate_resource_name("scope", &scope)?;
                cache.resolve_scope(&scope).await?.create().await
            },
            executor,
        )
    }

    /// Delete an empty scope. Fails with `DataNotEmpty` while it has tables.
    pub fn delete_scope(&self, scope: &str, executor: &Handle) -> Completion<()> {
        let cache = self.cache.clone();
        let scope = scope.to_string();
        with_completion(
            async move {
                validate_resource_name("scope", &scope)?;
                cache.resolve_scope(&scope).await?.delete().await?;
                cache.invalidate_scope(&scope);
                Ok(())
            },
            executor,
        )
    }

    pub fn check_scope_exists(&self, scope: &str, executor: &Handle) -> Completion<bool> {
        let cache = self.cache.clone();
        let scope = scope.to_string();
        with_completion(
            async move {
                validate_resource_name("scope", &scope)?;
                cache.resolve_scope(&scope).await?.exists().await
            },
            executor,
        )
    }

    pub fn list_key_value_tables(&self, scope: &str, executor: &Handle) -> Completion<Vec<String>> {
        let cache = self.cache.clone();
        let scope = scope.to_string();
        with_completion(
            async move {
                validate_resource_name("scope", &scope)?;
                cache.resolve_scope(&scope).await?.list_tables().await
            },
            executor,
        )
    }

    // ========================================================================
    // TABLE CREATION
    // ========================================================================

    /// Smallest starting segment number that no incarnation of the table has
    /// used. Reads the deletion records, never the cache.
    pub fn get_safe_starting_segment_number(
        &self,
        scope: &str,
        name: &str,
        executor: &Handle,
    ) -> Completion<SegmentNumber> {
        let allocator = self.allocator.clone();
        let scope = scope.to_string();
        let name = name.to_string();
        with_completion(
            async move {
                validate_table_names(&scope, &name)?;
                allocator.safe_starting_segment_number(&scope, &name).await
            },
            executor,
        )
    }

    /// Create the table's metadata.
    ///
    /// The starting segment number is computed first, then the backend is
    /// asked whether the scope exists, bypassing the cache. A missing scope
    /// fails with `DataNotFound` before any table handle is resolved.
    pub fn create_key_value_table(
        &self,
        scope: &str,
        name: &str,
        configuration: KeyValueTableConfiguration,
        creation_time: TimestampMs,
        context: Option<&OperationContext>,
        executor: &Handle,
    ) -> Completion<CreateTableResponse> {
        let store = self.clone();
        let scope = scope.to_string();
        let name = name.to_string();
        let context = context.cloned();
        with_completion(
            async move {
                validate_table_names(&scope, &name)?;
                let start = store
                    .allocator
                    .safe_starting_segment_number(&scope, &name)
                    .await?;

                if !store.factory.scope_exists(&scope).await? {
                    debug!(scope = %scope, table = %name, "Create rejected, scope missing");
                    return Err(StoreError::not_found(format!("scope {}", scope)));
                }

                let table = store.table(&scope, &name, context.as_ref()).await?;
                let response = table.create(configuration, creation_time, start).await?;
                info!(
                    scope = %scope,
                    table = %name,
                    status = ?response.status,
                    starting_segment_number = response.starting_segment_number,
                    "Create table completed"
                );
                Ok(response)
            },
            executor,
        )
    }

    // ========================================================================
    // TABLE READS
    // ========================================================================

    pub fn check_table_exists(
        &self,
        scope: &str,
        name: &str,
        context: Option<&OperationContext>,
        executor: &Handle,
    ) -> Completion<bool> {
        self.with_table(scope, name, context, executor, |table| async move {
            table.exists().await
        })
    }

    pub fn get_creation_time(
        &self,
        scope: &str,
        name: &str,
        context: Option<&OperationContext>,
        executor: &Handle,
    ) -> Completion<TimestampMs> {
        self.with_table(scope, name, context, executor, |table| async move {
            table.get_creation_time().await
        })
    }

    pub fn get_configuration(
        &self,
        scope: &str,
        name: &str,
        context: Option<&OperationContext>,
        executor: &Handle,
    ) -> Completion<KeyValueTableConfiguration> {
        self.with_table(scope, name, context, executor, |table| async move {
            table.get_configuration().await
        })
    }

    // ========================================================================
    // TABLE STATE
    // ========================================================================

    /// Unconditional state write.
    pub fn set_state(
        &self,
        scope: &str,
        name: &str,
        state: TableState,
        context: Option<&OperationContext>,
        executor: &Handle,
    ) -> Completion<()> {
        self.with_table(scope, name, context, executor, move |table| async move {
            table.update_state(state).await
        })
    }

    pub fn get_state(
        &self,
        scope: &str,
        name: &str,
        ignore_cached: bool,
        context: Option<&OperationContext>,
        executor: &Handle,
    ) -> Completion<TableState> {
        self.with_table(scope, name, context, executor, move |table| async move {
            table.get_state(ignore_cached).await
        })
    }

    pub fn get_versioned_state(
        &self,
        scope: &str,
        name: &str,
        context: Option<&OperationContext>,
        executor: &Handle,
    ) -> Completion<VersionedMetadata<TableState>> {
        self.with_table(scope, name, context, executor, |table| async move {
            table.get_versioned_state().await
        })
    }

    /// Compare-and-swap the table state. Fails with `WriteConflict` if the
    /// state was written since `previous` was read.
    pub fn update_versioned_state(
        &self,
        scope: &str,
        name: &str,
        new_state: TableState,
        previous: &VersionedMetadata<TableState>,
        context: Option<&OperationContext>,
        executor: &Handle,
    ) -> Completion<VersionedMetadata<TableState>> {
        let previous = previous.clone();
        self.with_table(scope, name, context, executor, move |table| async move {
            table.update_versioned_state(&previous, new_state).await
        })
    }

    // ========================================================================
    // TABLE DELETION
    // ========================================================================

    /// Delete the table's metadata and drop its cached handle.
    pub fn delete_key_value_table(
        &self,
        scope: &str,
        name: &str,
        context: Option<&OperationContext>,
        executor: &Handle,
    ) -> Completion<()> {
        let cache = self.cache.clone();
        let (scope_name, table_name) = (scope.to_string(), name.to_string());
        self.with_table(scope, name, context, executor, move |table| async move {
            table.delete().await?;
            cache.invalidate_table(&scope_name, &table_name);
            Ok(())
        })
    }

    // ========================================================================
    // TASK INDEX
    // ========================================================================

    /// Record a pending request under `host_id`.
    pub fn add_request_to_index(
        &self,
        host_id: &str,
        id: &str,
        event: &ControllerEvent,
        executor: &Handle,
    ) -> Completion<()> {
        let index = self.host_index.clone();
        let host_id = host_id.to_string();
        let id = id.to_string();
        let payload = event.to_bytes();
        with_completion(
            async move { index.add_entity(&host_id, &id, payload?).await },
            executor,
        )
    }

    /// Remove a completed request from `host_id`. The entry must exist.
    pub fn remove_task_from_index(
        &self,
        host_id: &str,
        id: &str,
        executor: &Handle,
    ) -> Completion<()> {
        let index = self.host_index.clone();
        let host_id = host_id.to_string();
        let id = id.to_string();
        with_completion(
            async move { index.remove_entity(&host_id, &id, true).await },
            executor,
        )
    }

    // ========================================================================
    // CACHE CONTROL
    // ========================================================================

    pub fn invalidate_scope(&self, scope: &str) {
        self.cache.invalidate_scope(scope);
    }

    pub fn invalidate_table(&self, scope: &str, name: &str) {
        self.cache.invalidate_table(scope, name);
    }

    pub fn cache_stats(&self) -> ResolutionStats {
        self.cache.stats()
    }

    /// Drop every cached handle. Pinned contexts keep working.
    pub fn shutdown(&self) {
        self.cache.shutdown();
        info!("Metadata store shut down");
    }
}

fn validate_table_names(scope: &str, name: &str) -> StoreResult<()> {
    validate_resource_name("scope", scope)?;
    validate_resource_name("table", name)
}
