//! Property Tests for the Key-Value Table Metadata Store
//!
//! **Property 1: Cache coalescing.** Concurrent resolutions of one unseen
//! table run a single load and observe the same handle.
//!
//! **Property 2: TTL eviction.** A handle older than the cache window is
//! reloaded on the next lookup.
//!
//! **Property 3: Context pinning.** Operations through a context never touch
//! the cache, and a context only serves its own table.
//!
//! **Property 4: Optimistic concurrency.** A state update against a stale
//! version fails with a write conflict.
//!
//! **Property 5: Safe allocation.** A recreated table starts past every
//! segment its deleted incarnations used.
//!
//! **Property 6: Record codec.** Stored configuration records decode to what
//! was written; truncated bytes never decode.
//!
//! **Property 7: Executor affinity.** Operation bodies and continuations run
//! on the caller's executor, even when the backing store completes elsewhere.
//!
//! **Property 8: Missing scope.** Creating a table in a missing scope fails
//! with `DataNotFound` without resolving a table handle.
//!
//! **Property 9: Refresh wins.** A read that was in flight when its handle was
//! refreshed never puts what it read back into the handle's cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meridian_core::{
    CacheConfig, CreateStatus, KeyValueTableConfiguration, KvtConfigurationRecord,
    SegmentNumber, StoreConfig, StoreError, StoreResult, TableState, Version, VersionedMetadata,
};
use meridian_store::{
    keys, BackingStore, InMemoryBackingStore, KvTableMetadataStore, PersistentKeyValueTable,
    PersistentScope, ScopeHandle, TableHandle,
};
use meridian_test_utils::assertions::{
    assert_context_mismatch, assert_not_found, assert_on_caller_thread, assert_write_conflict,
};
use meridian_test_utils::fixtures::{caller_runtime, test_store, test_store_with, TestStore};
use meridian_test_utils::generators::{arb_configuration, arb_configuration_record};
use proptest::prelude::*;
use tokio::runtime::Handle;
use tokio::sync::Notify;

// ============================================================================
// HELPERS
// ============================================================================

async fn store_with_table(scope: &str, name: &str, partitions: i32) -> TestStore {
    let ts = test_store();
    let exec = Handle::current();
    ts.store.create_scope(scope, &exec).await.unwrap();
    ts.store
        .create_key_value_table(
            scope,
            name,
            KeyValueTableConfiguration::new(partitions),
            1_000,
            None,
            &exec,
        )
        .await
        .unwrap();
    ts
}

// ============================================================================
// PROPERTY 1: CACHE COALESCING
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolution_loads_once() {
    let ts = test_store_with(StoreConfig::default(), Duration::from_millis(50));
    let exec = Handle::current();

    let contexts: Vec<_> = (0..16)
        .map(|_| ts.store.create_context("s1", "t1", &exec))
        .collect();

    let mut handles = Vec::new();
    for context in contexts {
        handles.push(context.await.unwrap().table().clone());
    }

    assert_eq!(ts.factory.table_loads(), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    assert_eq!(ts.store.cache_stats().tables.misses, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_resolution_reaches_every_waiter() {
    let ts = test_store_with(StoreConfig::default(), Duration::from_millis(50));
    let exec = Handle::current();
    ts.factory.set_failing(true);

    let attempts: Vec<_> = (0..8)
        .map(|_| ts.store.get_state("s1", "t1", false, None, &exec))
        .collect();
    for attempt in attempts {
        match attempt.await {
            Err(StoreError::ResolutionFailed { resource, .. }) => assert_eq!(resource, "s1/t1"),
            other => panic!("Expected ResolutionFailed, got: {:?}", other),
        }
    }
    assert_eq!(ts.factory.table_loads(), 1);

    ts.factory.set_failing(false);
    assert!(!ts.store.check_table_exists("s1", "t1", None, &exec).await.unwrap());
    assert_eq!(ts.factory.table_loads(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_full_cache_keeps_pending_resolution() {
    let ts = test_store_with(
        StoreConfig::default().with_table_cache(CacheConfig::tables().with_max_entries(1)),
        Duration::from_millis(200),
    );
    let exec = Handle::current();

    // Spawned in order on a single thread: t1 starts loading, t2 misses while
    // the cache is full, then t1 is requested again before its load finishes.
    let first = ts.store.create_context("s1", "t1", &exec);
    let other = ts.store.create_context("s1", "t2", &exec);
    let again = ts.store.create_context("s1", "t1", &exec);
    let (first, other, again) = tokio::join!(first, other, again);
    let (first, other, again) = (first.unwrap(), other.unwrap(), again.unwrap());

    assert!(Arc::ptr_eq(first.table(), again.table()));
    assert_eq!(other.table().scoped_name(), "s1/t2");
    assert_eq!(ts.factory.table_loads(), 2);
    assert_eq!(ts.store.cache_stats().tables.evictions, 0);
}

// ============================================================================
// PROPERTY 2: TTL EVICTION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_handle_reloaded_after_ttl() {
    let ttl = Duration::from_secs(600);
    let ts = test_store_with(
        StoreConfig::default().with_table_cache(CacheConfig::tables().with_ttl(ttl)),
        Duration::ZERO,
    );
    let exec = Handle::current();

    let first = ts.store.create_context("s1", "t1", &exec).await.unwrap();
    tokio::time::advance(ttl - Duration::from_secs(1)).await;
    let second = ts.store.create_context("s1", "t1", &exec).await.unwrap();
    assert!(Arc::ptr_eq(first.table(), second.table()));
    assert_eq!(ts.factory.table_loads(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let third = ts.store.create_context("s1", "t1", &exec).await.unwrap();
    assert!(!Arc::ptr_eq(first.table(), third.table()));
    assert_eq!(ts.factory.table_loads(), 2);
}

// ============================================================================
// PROPERTY 3: CONTEXT PINNING
// ============================================================================

#[tokio::test]
async fn test_context_bypasses_cache() {
    let ts = store_with_table("s1", "t1", 2).await;
    let exec = Handle::current();

    let ctx = ts.store.create_context("s1", "t1", &exec).await.unwrap();
    let loads = ts.factory.table_loads();
    let stats = ts.store.cache_stats().tables;

    ts.store
        .set_state("s1", "t1", TableState::Active, Some(&ctx), &exec)
        .await
        .unwrap();
    assert_eq!(
        ts.store.get_state("s1", "t1", false, Some(&ctx), &exec).await.unwrap(),
        TableState::Active
    );
    assert_eq!(ts.store.get_creation_time("s1", "t1", Some(&ctx), &exec).await.unwrap(), 1_000);

    assert_eq!(ts.factory.table_loads(), loads);
    assert_eq!(ts.store.cache_stats().tables, stats);

    // The pinned handle outlives its cache entry.
    ts.store.invalidate_table("s1", "t1");
    assert!(ts.store.check_table_exists("s1", "t1", Some(&ctx), &exec).await.unwrap());
    assert_eq!(ts.factory.table_loads(), loads);
}

#[tokio::test]
async fn test_context_rejects_other_table() {
    let ts = store_with_table("s1", "t1", 2).await;
    let exec = Handle::current();
    let ctx = ts.store.create_context("s1", "t1", &exec).await.unwrap();
    let loads = ts.factory.table_loads();

    assert_context_mismatch(&ts.store.get_state("s1", "t2", false, Some(&ctx), &exec).await);
    assert_context_mismatch(&ts.store.get_versioned_state("s2", "t1", Some(&ctx), &exec).await);
    assert_context_mismatch(
        &ts.store
            .create_key_value_table(
                "s1",
                "t2",
                KeyValueTableConfiguration::new(1),
                2_000,
                Some(&ctx),
                &exec,
            )
            .await,
    );
    assert_eq!(ts.factory.table_loads(), loads);
}

// ============================================================================
// PROPERTY 4: OPTIMISTIC CONCURRENCY
// ============================================================================

#[tokio::test]
async fn test_stale_version_conflicts() {
    let ts = store_with_table("s1", "t1", 2).await;
    let exec = Handle::current();

    let v1 = ts.store.get_versioned_state("s1", "t1", None, &exec).await.unwrap();
    assert_eq!(v1.value, TableState::Creating);

    let v2 = ts
        .store
        .update_versioned_state("s1", "t1", TableState::Active, &v1, None, &exec)
        .await
        .unwrap();
    assert_ne!(v2.version, v1.version);
    assert_eq!(v2.value, TableState::Active);

    assert_write_conflict(
        &ts.store
            .update_versioned_state("s1", "t1", TableState::Deleting, &v1, None, &exec)
            .await,
    );
    assert_eq!(
        ts.store.get_state("s1", "t1", true, None, &exec).await.unwrap(),
        TableState::Active
    );

    let forged = VersionedMetadata::new(TableState::Active, Version::new(u64::MAX));
    assert_write_conflict(
        &ts.store
            .update_versioned_state("s1", "t1", TableState::Deleting, &forged, None, &exec)
            .await,
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_updates_have_one_winner() {
    let ts = store_with_table("s1", "t1", 2).await;
    let exec = Handle::current();
    let v1 = ts.store.get_versioned_state("s1", "t1", None, &exec).await.unwrap();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            ts.store
                .update_versioned_state("s1", "t1", TableState::Active, &v1, None, &exec)
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        match attempt.await {
            Ok(_) => winners += 1,
            Err(e) => assert!(e.is_write_conflict(), "unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1);
}

// ============================================================================
// PROPERTY 5: SAFE ALLOCATION
// ============================================================================

#[tokio::test]
async fn test_recreated_table_starts_past_deleted_segments() {
    let ts = store_with_table("s1", "t1", 4).await;
    let exec = Handle::current();
    let config = KeyValueTableConfiguration::new(4);

    ts.store.delete_key_value_table("s1", "t1", None, &exec).await.unwrap();
    assert!(!ts.store.check_table_exists("s1", "t1", None, &exec).await.unwrap());

    let second = ts
        .store
        .create_key_value_table("s1", "t1", config, 2_000, None, &exec)
        .await
        .unwrap();
    assert_eq!(second.status, CreateStatus::New);
    assert_eq!(second.starting_segment_number, 4);

    ts.store.delete_key_value_table("s1", "t1", None, &exec).await.unwrap();
    let third = ts
        .store
        .create_key_value_table("s1", "t1", KeyValueTableConfiguration::new(1), 3_000, None, &exec)
        .await
        .unwrap();
    assert_eq!(third.starting_segment_number, 8);

    let fresh = ts
        .store
        .create_key_value_table("s1", "other", config, 2_000, None, &exec)
        .await
        .unwrap();
    assert_eq!(fresh.starting_segment_number, 0);
}

// ============================================================================
// PROPERTY 6: RECORD CODEC
// ============================================================================

#[tokio::test]
async fn test_stored_configuration_record_decodes() {
    let ts = store_with_table("s1", "t1", 7).await;
    let stored = ts
        .backing
        .get(&keys::table_field("s1", "t1", keys::CONFIGURATION))
        .await
        .unwrap();

    let record = KvtConfigurationRecord::from_bytes(&stored.value).unwrap();
    assert_eq!(
        record,
        KvtConfigurationRecord::new("s1", "t1", KeyValueTableConfiguration::new(7))
    );
}

proptest! {
    #[test]
    fn test_record_round_trip(record in arb_configuration_record()) {
        let bytes = record.to_bytes().unwrap();
        prop_assert_eq!(KvtConfigurationRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn test_truncated_record_fails(record in arb_configuration_record(), cut in any::<prop::sample::Index>()) {
        let bytes = record.to_bytes().unwrap();
        let len = cut.index(bytes.len());
        prop_assert!(KvtConfigurationRecord::from_bytes(&bytes[..len]).is_err());
    }

    #[test]
    fn test_valid_configurations_create(config in arb_configuration()) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let response = rt.block_on(async {
            let ts = test_store();
            let exec = Handle::current();
            ts.store.create_scope("s1", &exec).await.unwrap();
            ts.store.create_key_value_table("s1", "t1", config, 1, None, &exec).await.unwrap()
        });
        prop_assert_eq!(response.configuration, config);
    }
}

// ============================================================================
// PROPERTY 7: EXECUTOR AFFINITY
// ============================================================================

/// Backing store whose every call completes on a separate runtime.
struct ForeignRuntimeStore {
    inner: Arc<InMemoryBackingStore>,
    runtime: Handle,
}

impl ForeignRuntimeStore {
    async fn run<T, F, Fut>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(Arc<InMemoryBackingStore>) -> Fut + Send,
        Fut: std::future::Future<Output = StoreResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.runtime
            .spawn(op(self.inner.clone()))
            .await
            .map_err(|_| StoreError::CompletionDropped)?
    }
}

#[async_trait]
impl BackingStore for ForeignRuntimeStore {
    async fn create(&self, key: &str, data: Vec<u8>) -> StoreResult<Version> {
        let key = key.to_string();
        self.run(|s| async move { s.create(&key, data).await }).await
    }

    async fn get(&self, key: &str) -> StoreResult<VersionedMetadata<Vec<u8>>> {
        let key = key.to_string();
        self.run(|s| async move { s.get(&key).await }).await
    }

    async fn update(
        &self,
        key: &str,
        data: Vec<u8>,
        expected: Option<Version>,
    ) -> StoreResult<Version> {
        let key = key.to_string();
        self.run(move |s| async move { s.update(&key, data, expected).await }).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let key = key.to_string();
        self.run(|s| async move { s.exists(&key).await }).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.run(|s| async move { s.delete(&key).await }).await
    }

    async fn list_children(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let prefix = prefix.to_string();
        self.run(|s| async move { s.list_children(&prefix).await }).await
    }

    async fn record_deleted_segment(
        &self,
        scope: &str,
        table: &str,
        highest: SegmentNumber,
    ) -> StoreResult<()> {
        let (scope, table) = (scope.to_string(), table.to_string());
        self.run(move |s| async move { s.record_deleted_segment(&scope, &table, highest).await })
            .await
    }

    async fn highest_deleted_segment(
        &self,
        scope: &str,
        table: &str,
    ) -> StoreResult<Option<SegmentNumber>> {
        let (scope, table) = (scope.to_string(), table.to_string());
        self.run(|s| async move { s.highest_deleted_segment(&scope, &table).await })
            .await
    }
}

#[test]
fn test_continuations_run_on_caller_executor() {
    let caller = caller_runtime("caller-executor");
    let backend = caller_runtime("backend-io");
    let driver = caller_runtime("driver");

    let backing: Arc<dyn BackingStore> = Arc::new(ForeignRuntimeStore {
        inner: Arc::new(InMemoryBackingStore::new()),
        runtime: backend.handle().clone(),
    });
    let store = KvTableMetadataStore::from_config(
        backing,
        Arc::new(meridian_store::InMemoryHostIndex::new()),
        &StoreConfig::default(),
    )
    .unwrap();
    let exec = caller.handle();

    driver.block_on(store.create_scope("s1", exec)).unwrap();

    let created = store
        .create_key_value_table("s1", "t1", KeyValueTableConfiguration::new(2), 10, None, exec)
        .map(|response| {
            assert_on_caller_thread("caller-executor");
            response.starting_segment_number
        });
    assert_eq!(driver.block_on(created).unwrap(), 0);

    let state_store = store.clone();
    let exec_for_chain = exec.clone();
    let chained = store
        .get_versioned_state("s1", "t1", None, exec)
        .and_then(move |previous| {
            assert_on_caller_thread("caller-executor");
            state_store.update_versioned_state(
                "s1",
                "t1",
                TableState::Active,
                &previous,
                None,
                &exec_for_chain,
            )
        })
        .map(|updated| {
            assert_on_caller_thread("caller-executor");
            updated.value
        });
    assert_eq!(driver.block_on(chained).unwrap(), TableState::Active);

    let failed = store.get_state("s1", "missing", false, None, exec);
    assert_not_found(&driver.block_on(failed));
}

// ============================================================================
// PROPERTY 8: MISSING SCOPE
// ============================================================================

#[tokio::test]
async fn test_create_in_missing_scope_fails_without_handle() {
    let ts = test_store();
    let exec = Handle::current();

    let result = ts
        .store
        .create_key_value_table(
            "missing",
            "t1",
            KeyValueTableConfiguration::new(3),
            1_000,
            None,
            &exec,
        )
        .await;

    assert_not_found(&result);
    assert_eq!(ts.factory.table_loads(), 0);
    assert_eq!(ts.store.cache_stats().tables.entry_count, 0);
    assert!(ts.backing.is_empty().await);
}

#[tokio::test]
async fn test_create_checks_scope_through_handle_factory() {
    let ts = test_store();
    let exec = Handle::current();
    let config = KeyValueTableConfiguration::new(2);
    ts.store.create_scope("s1", &exec).await.unwrap();

    ts.store
        .create_key_value_table("s1", "t1", config, 1_000, None, &exec)
        .await
        .unwrap();
    assert_eq!(ts.factory.scope_checks(), 1);

    ts.factory.set_failing(true);
    let result = ts
        .store
        .create_key_value_table("s1", "t2", config, 1_000, None, &exec)
        .await;
    assert!(matches!(result, Err(StoreError::Unavailable { .. })));
}

// ============================================================================
// PROPERTY 9: REFRESH WINS
// ============================================================================

/// Backing store that holds the next read back after fetching its value,
/// until the test resumes it.
struct ParkedReadStore {
    inner: Arc<InMemoryBackingStore>,
    armed: AtomicBool,
    fetched: Notify,
    resume: Notify,
}

impl ParkedReadStore {
    fn new(inner: Arc<InMemoryBackingStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            fetched: Notify::new(),
            resume: Notify::new(),
        }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    async fn park_if_armed(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.fetched.notify_one();
            self.resume.notified().await;
        }
    }
}

#[async_trait]
impl BackingStore for ParkedReadStore {
    async fn create(&self, key: &str, data: Vec<u8>) -> StoreResult<Version> {
        self.inner.create(key, data).await
    }

    async fn get(&self, key: &str) -> StoreResult<VersionedMetadata<Vec<u8>>> {
        let read = self.inner.get(key).await;
        self.park_if_armed().await;
        read
    }

    async fn update(
        &self,
        key: &str,
        data: Vec<u8>,
        expected: Option<Version>,
    ) -> StoreResult<Version> {
        self.inner.update(key, data, expected).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }

    async fn list_children(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let children = self.inner.list_children(prefix).await;
        self.park_if_armed().await;
        children
    }

    async fn record_deleted_segment(
        &self,
        scope: &str,
        table: &str,
        highest: SegmentNumber,
    ) -> StoreResult<()> {
        self.inner.record_deleted_segment(scope, table, highest).await
    }

    async fn highest_deleted_segment(
        &self,
        scope: &str,
        table: &str,
    ) -> StoreResult<Option<SegmentNumber>> {
        self.inner.highest_deleted_segment(scope, table).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refresh_during_state_read_is_not_undone() {
    let inner = Arc::new(InMemoryBackingStore::new());
    let parked = Arc::new(ParkedReadStore::new(inner.clone()));
    let table = Arc::new(PersistentKeyValueTable::new("s1", "t1", parked.clone()));
    table
        .create(KeyValueTableConfiguration::new(1), 1_000, 0)
        .await
        .unwrap();

    parked.arm();
    let reader = {
        let table = table.clone();
        tokio::spawn(async move { table.get_versioned_state().await })
    };
    parked.fetched.notified().await;

    // Another writer moves the table on, then this handle is refreshed while
    // the read above still holds the old value.
    PersistentKeyValueTable::new("s1", "t1", inner.clone())
        .update_state(TableState::Active)
        .await
        .unwrap();
    table.refresh();
    parked.resume.notify_one();

    assert_eq!(reader.await.unwrap().unwrap().value, TableState::Creating);
    assert_eq!(table.get_state(false).await.unwrap(), TableState::Active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refresh_during_listing_is_not_undone() {
    let inner = Arc::new(InMemoryBackingStore::new());
    let parked = Arc::new(ParkedReadStore::new(inner.clone()));
    let scope = Arc::new(PersistentScope::new("s1", parked.clone()));
    scope.create().await.unwrap();

    parked.arm();
    let reader = {
        let scope = scope.clone();
        tokio::spawn(async move { scope.list_tables().await })
    };
    parked.fetched.notified().await;

    inner.create(&keys::table("s1", "t1"), Vec::new()).await.unwrap();
    scope.refresh();
    parked.resume.notify_one();

    assert!(reader.await.unwrap().unwrap().is_empty());
    assert_eq!(scope.list_tables().await.unwrap(), vec!["t1".to_string()]);
}
