//! Scope and table handles.
//!
//! A handle is the in-memory object through which every operation on one
//! scope or one table reaches the backing store. Handles are shared by all
//! callers that resolve the same name, so implementations keep any local
//! state behind their own synchronization.

use async_trait::async_trait;
use meridian_core::{
    scoped_table_name, CreateTableResponse, KeyValueTableConfiguration, SegmentNumber,
    StoreResult, TableState, TimestampMs, VersionedMetadata,
};

/// Handle to one scope.
#[async_trait]
pub trait ScopeHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Drop locally cached state. Cheap, idempotent, no remote call.
    fn refresh(&self);

    /// Create the scope. Creating an existing scope succeeds.
    async fn create(&self) -> StoreResult<()>;

    /// Delete the scope. Fails with `DataNotEmpty` while it still has tables.
    async fn delete(&self) -> StoreResult<()>;

    async fn exists(&self) -> StoreResult<bool>;

    /// Names of the tables in this scope, sorted.
    async fn list_tables(&self) -> StoreResult<Vec<String>>;
}

/// Handle to one table inside a scope.
///
/// The (scope, name) pair of a handle never changes.
#[async_trait]
pub trait TableHandle: Send + Sync {
    fn scope(&self) -> &str;

    fn name(&self) -> &str;

    /// `"{scope}/{name}"`.
    fn scoped_name(&self) -> String {
        scoped_table_name(self.scope(), self.name())
    }

    /// Drop locally cached state. Cheap, idempotent, no remote call, and safe
    /// to call while other operations on the handle are in flight. Reads that
    /// started before the refresh must not cache what they fetched.
    fn refresh(&self);

    /// Create the table's metadata with segments numbered from
    /// `starting_segment_number`.
    async fn create(
        &self,
        configuration: KeyValueTableConfiguration,
        creation_time: TimestampMs,
        starting_segment_number: SegmentNumber,
    ) -> StoreResult<CreateTableResponse>;

    async fn exists(&self) -> StoreResult<bool>;

    async fn get_creation_time(&self) -> StoreResult<TimestampMs>;

    async fn get_configuration(&self) -> StoreResult<KeyValueTableConfiguration>;

    /// First segment number of this incarnation.
    async fn get_starting_segment_number(&self) -> StoreResult<SegmentNumber>;

    /// Current state. With `ignore_cached` the local copy is bypassed and
    /// replaced by a fresh read.
    async fn get_state(&self, ignore_cached: bool) -> StoreResult<TableState>;

    /// Unconditional state write.
    async fn update_state(&self, state: TableState) -> StoreResult<()>;

    async fn get_versioned_state(&self) -> StoreResult<VersionedMetadata<TableState>>;

    /// Compare-and-swap on the state record. Fails with `WriteConflict` if
    /// the stored version is no longer `previous.version`.
    async fn update_versioned_state(
        &self,
        previous: &VersionedMetadata<TableState>,
        new_state: TableState,
    ) -> StoreResult<VersionedMetadata<TableState>>;

    /// Remove the table's metadata, recording the highest segment number it
    /// used so a recreated table never reuses one.
    async fn delete(&self) -> StoreResult<()>;
}
