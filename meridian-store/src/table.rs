//! Key-value table handle over a [`BackingStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use meridian_core::{
    CodecError, CreateStatus, CreateTableResponse, KeyValueTableConfiguration,
    KvtConfigurationRecord, SegmentNumber, StoreError, StoreResult, TableState, TimestampMs,
    VersionedMetadata,
};
use tracing::{debug, info, warn};

use crate::backend::{keys, BackingStore};
use crate::handle::TableHandle;

/// Table persisted in a backing store.
///
/// State and configuration are cached locally after the first read and
/// dropped again by [`refresh`](TableHandle::refresh). A value fetched before
/// a refresh is returned to its caller but never cached.
pub struct PersistentKeyValueTable {
    scope: String,
    name: String,
    store: Arc<dyn BackingStore>,
    state: RwLock<Option<VersionedMetadata<TableState>>>,
    configuration: RwLock<Option<KeyValueTableConfiguration>>,
    refreshes: AtomicU64,
}

impl PersistentKeyValueTable {
    pub fn new(
        scope: impl Into<String>,
        name: impl Into<String>,
        store: Arc<dyn BackingStore>,
    ) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
            store,
            state: RwLock::new(None),
            configuration: RwLock::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Refresh count observed before a backing-store access.
    fn generation(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn key(&self, field: &str) -> String {
        keys::table_field(&self.scope, &self.name, field)
    }

    fn cached_state(&self) -> Option<VersionedMetadata<TableState>> {
        self.state.read().ok().and_then(|guard| guard.clone())
    }

    /// Cache `state` unless the handle was refreshed after `generation`.
    fn cache_state(&self, generation: u64, state: VersionedMetadata<TableState>) {
        if let Ok(mut guard) = self.state.write() {
            if self.generation() == generation {
                *guard = Some(state);
            }
        }
    }

    fn clear_state(&self) {
        if let Ok(mut guard) = self.state.write() {
            *guard = None;
        }
    }

    fn cached_configuration(&self) -> Option<KeyValueTableConfiguration> {
        self.configuration.read().ok().and_then(|guard| *guard)
    }

    fn cache_configuration(&self, generation: u64, configuration: KeyValueTableConfiguration) {
        if let Ok(mut guard) = self.configuration.write() {
            if self.generation() == generation {
                *guard = Some(configuration);
            }
        }
    }

    fn clear_configuration(&self) {
        if let Ok(mut guard) = self.configuration.write() {
            *guard = None;
        }
    }

    /// Create `key` unless a previous attempt already did.
    async fn create_if_absent(&self, key: String, data: Vec<u8>) -> StoreResult<()> {
        match self.store.create(&key, data).await {
            Ok(_) | Err(StoreError::DataExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn read_i64(&self, field: &str) -> StoreResult<i64> {
        let read = self.store.get(&self.key(field)).await?;
        let bytes: [u8; 8] = read.value.as_slice().try_into().map_err(|_| {
            StoreError::Codec(CodecError::Malformed {
                reason: format!("{} record must be 8 bytes, got {}", field, read.value.len()),
            })
        })?;
        Ok(i64::from_be_bytes(bytes))
    }

    /// Describe a table some other request already created.
    async fn existing_table_response(
        &self,
        requested: KeyValueTableConfiguration,
        requested_start: SegmentNumber,
        creation_time: TimestampMs,
    ) -> StoreResult<CreateTableResponse> {
        let state = missing_as(self.get_state(true).await, TableState::Creating)?;
        let configuration = missing_as(self.get_configuration().await, requested)?;
        let starting_segment_number =
            missing_as(self.get_starting_segment_number().await, requested_start)?;
        let status = if state == TableState::Active {
            CreateStatus::ExistsActive
        } else {
            CreateStatus::ExistsCreating
        };
        Ok(CreateTableResponse {
            status,
            configuration,
            creation_time,
            starting_segment_number,
        })
    }
}

/// Records of a table still being created may not exist yet.
fn missing_as<T>(result: StoreResult<T>, fallback: T) -> StoreResult<T> {
    match result {
        Err(StoreError::DataNotFound { .. }) => Ok(fallback),
        other => other,
    }
}

#[async_trait]
impl TableHandle for PersistentKeyValueTable {
    fn scope(&self) -> &str {
        &self.scope
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.clear_state();
        self.clear_configuration();
    }

    async fn create(
        &self,
        configuration: KeyValueTableConfiguration,
        creation_time: TimestampMs,
        starting_segment_number: SegmentNumber,
    ) -> StoreResult<CreateTableResponse> {
        configuration.validate()?;
        let record = KvtConfigurationRecord::new(&self.scope, &self.name, configuration);
        let record_bytes = record.to_bytes()?;

        match self
            .store
            .create(
                &self.key(keys::CREATION_TIME),
                creation_time.to_be_bytes().to_vec(),
            )
            .await
        {
            Ok(_) => {}
            Err(StoreError::DataExists { .. }) => {
                let stored = self.get_creation_time().await?;
                if stored != creation_time {
                    debug!(
                        scope = %self.scope,
                        table = %self.name,
                        stored,
                        requested = creation_time,
                        "Table already exists"
                    );
                    return self
                        .existing_table_response(configuration, starting_segment_number, stored)
                        .await;
                }
                // Same timestamp: a retry of this create, finish the missing records.
            }
            Err(e) => return Err(e),
        }

        self.create_if_absent(self.key(keys::CONFIGURATION), record_bytes)
            .await?;
        self.create_if_absent(
            self.key(keys::SEGMENTS),
            starting_segment_number.to_be_bytes().to_vec(),
        )
        .await?;
        self.create_if_absent(self.key(keys::STATE), vec![TableState::Creating.to_byte()])
            .await?;

        let configuration = self.get_configuration().await?;
        let starting_segment_number = self.get_starting_segment_number().await?;
        info!(
            scope = %self.scope,
            table = %self.name,
            partitions = configuration.partition_count,
            starting_segment_number,
            "Table metadata created"
        );
        Ok(CreateTableResponse {
            status: CreateStatus::New,
            configuration,
            creation_time,
            starting_segment_number,
        })
    }

    async fn exists(&self) -> StoreResult<bool> {
        self.store.exists(&self.key(keys::CREATION_TIME)).await
    }

    async fn get_creation_time(&self) -> StoreResult<TimestampMs> {
        self.read_i64(keys::CREATION_TIME).await
    }

    async fn get_configuration(&self) -> StoreResult<KeyValueTableConfiguration> {
        if let Some(configuration) = self.cached_configuration() {
            return Ok(configuration);
        }
        let generation = self.generation();
        let read = self.store.get(&self.key(keys::CONFIGURATION)).await?;
        let record = KvtConfigurationRecord::from_bytes(&read.value)?;
        if record.scope != self.scope || record.table_name != self.name {
            return Err(StoreError::IllegalState {
                resource: self.scoped_name(),
                reason: format!(
                    "configuration record belongs to {}/{}",
                    record.scope, record.table_name
                ),
            });
        }
        self.cache_configuration(generation, record.configuration);
        Ok(record.configuration)
    }

    async fn get_starting_segment_number(&self) -> StoreResult<SegmentNumber> {
        self.read_i64(keys::SEGMENTS).await
    }

    async fn get_state(&self, ignore_cached: bool) -> StoreResult<TableState> {
        if !ignore_cached {
            if let Some(cached) = self.cached_state() {
                return Ok(cached.value);
            }
        }
        Ok(self.get_versioned_state().await?.value)
    }

    async fn update_state(&self, state: TableState) -> StoreResult<()> {
        let generation = self.generation();
        let version = self
            .store
            .update(&self.key(keys::STATE), vec![state.to_byte()], None)
            .await?;
        self.cache_state(generation, VersionedMetadata::new(state, version));
        debug!(scope = %self.scope, table = %self.name, ?state, "Table state set");
        Ok(())
    }

    async fn get_versioned_state(&self) -> StoreResult<VersionedMetadata<TableState>> {
        let generation = self.generation();
        let read = self.store.get(&self.key(keys::STATE)).await?;
        let versioned = read.try_map(|bytes| TableState::from_bytes(&bytes))?;
        self.cache_state(generation, versioned.clone());
        Ok(versioned)
    }

    async fn update_versioned_state(
        &self,
        previous: &VersionedMetadata<TableState>,
        new_state: TableState,
    ) -> StoreResult<VersionedMetadata<TableState>> {
        let generation = self.generation();
        let result = self
            .store
            .update(
                &self.key(keys::STATE),
                vec![new_state.to_byte()],
                Some(previous.version),
            )
            .await;

        match result {
            Ok(version) => {
                let updated = VersionedMetadata::new(new_state, version);
                self.cache_state(generation, updated.clone());
                debug!(
                    scope = %self.scope,
                    table = %self.name,
                    from = ?previous.value,
                    to = ?new_state,
                    "Table state transitioned"
                );
                Ok(updated)
            }
            Err(e) => {
                if e.is_write_conflict() {
                    warn!(scope = %self.scope, table = %self.name, error = %e, "State update conflicted");
                }
                self.clear_state();
                Err(e)
            }
        }
    }

    async fn delete(&self) -> StoreResult<()> {
        let configuration = self.get_configuration().await?;
        let start = self.get_starting_segment_number().await?;
        let highest = configuration.highest_segment_number(start);
        self.store
            .record_deleted_segment(&self.scope, &self.name, highest)
            .await?;

        for field in [
            keys::STATE,
            keys::SEGMENTS,
            keys::CONFIGURATION,
            keys::CREATION_TIME,
        ] {
            match self.store.delete(&self.key(field)).await {
                Ok(()) | Err(StoreError::DataNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.refresh();
        info!(scope = %self.scope, table = %self.name, highest_segment = highest, "Table metadata deleted");
        Ok(())
    }
}
