//! MERIDIAN Test Utilities
//!
//! Shared test infrastructure for the MERIDIAN workspace:
//! - Proptest generators for names, configurations and records
//! - A handle factory that counts and controls loads
//! - Fixtures for a fully wired in-memory store and caller runtimes
//! - Assertions for MERIDIAN error variants

pub use meridian_core::{
    KeyValueTableConfiguration, KvtConfigurationRecord, SegmentNumber, StoreConfig, StoreError,
    StoreResult, TableState,
};
pub use meridian_store::{
    BackingStore, BackingStoreHandleFactory, HandleFactory, InMemoryBackingStore,
    InMemoryHostIndex, KvTableMetadataStore, ScopeHandle, TableHandle,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// COUNTING HANDLE FACTORY
// ============================================================================

/// Handle factory that counts how often the resolution cache loads and how
/// often the store asks the backend directly.
///
/// Every call can be slowed down to widen race windows, or made to fail.
pub struct CountingHandleFactory {
    inner: BackingStoreHandleFactory,
    scope_loads: AtomicUsize,
    table_loads: AtomicUsize,
    scope_checks: AtomicUsize,
    failing: AtomicBool,
    load_delay: Duration,
}

impl CountingHandleFactory {
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self {
            inner: BackingStoreHandleFactory::new(store),
            scope_loads: AtomicUsize::new(0),
            table_loads: AtomicUsize::new(0),
            scope_checks: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            load_delay: Duration::ZERO,
        }
    }

    /// Sleep for `delay` inside every call.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn scope_loads(&self) -> usize {
        self.scope_loads.load(Ordering::SeqCst)
    }

    pub fn table_loads(&self) -> usize {
        self.table_loads.load(Ordering::SeqCst)
    }

    pub fn scope_checks(&self) -> usize {
        self.scope_checks.load(Ordering::SeqCst)
    }

    async fn before_load(&self) -> StoreResult<()> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "handle factory set to fail".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HandleFactory for CountingHandleFactory {
    async fn new_scope(&self, scope: &str) -> StoreResult<Arc<dyn ScopeHandle>> {
        self.scope_loads.fetch_add(1, Ordering::SeqCst);
        self.before_load().await?;
        self.inner.new_scope(scope).await
    }

    async fn new_table(&self, scope: &str, name: &str) -> StoreResult<Arc<dyn TableHandle>> {
        self.table_loads.fetch_add(1, Ordering::SeqCst);
        self.before_load().await?;
        self.inner.new_table(scope, name).await
    }

    async fn scope_exists(&self, scope: &str) -> StoreResult<bool> {
        self.scope_checks.fetch_add(1, Ordering::SeqCst);
        self.before_load().await?;
        self.inner.scope_exists(scope).await
    }

    async fn highest_deleted_segment(
        &self,
        scope: &str,
        name: &str,
    ) -> StoreResult<Option<SegmentNumber>> {
        self.before_load().await?;
        self.inner.highest_deleted_segment(scope, name).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for MERIDIAN types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a scope name.
    pub fn arb_scope_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }

    /// Generate a table name, including non-ASCII characters.
    pub fn arb_table_name() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-zA-Z][a-zA-Z0-9_.-]{0,31}",
            "[a-z]{1,4}[\u{e0}-\u{ff}\u{4e00}-\u{4e20}]{1,4}",
        ]
    }

    /// Generate a valid table configuration.
    pub fn arb_configuration() -> impl Strategy<Value = KeyValueTableConfiguration> {
        (1i32..=1024).prop_map(KeyValueTableConfiguration::new)
    }

    /// Generate a valid configuration record.
    pub fn arb_configuration_record() -> impl Strategy<Value = KvtConfigurationRecord> {
        (arb_scope_name(), arb_table_name(), arb_configuration())
            .prop_map(|(scope, name, config)| KvtConfigurationRecord::new(scope, name, config))
    }

    /// Generate a TableState variant.
    pub fn arb_table_state() -> impl Strategy<Value = TableState> {
        prop_oneof![
            Just(TableState::Unknown),
            Just(TableState::Creating),
            Just(TableState::Active),
            Just(TableState::Deleting),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-wired stores and runtimes.

    use super::*;
    use tokio::runtime::{Builder, Runtime};

    /// A store over in-memory collaborators, with handles to each of them.
    pub struct TestStore {
        pub store: KvTableMetadataStore,
        pub backing: Arc<InMemoryBackingStore>,
        pub factory: Arc<CountingHandleFactory>,
        pub host_index: Arc<InMemoryHostIndex>,
    }

    /// Store with default configuration and instant loads.
    pub fn test_store() -> TestStore {
        test_store_with(StoreConfig::default(), Duration::ZERO)
    }

    /// Store with the given configuration and per-load delay.
    pub fn test_store_with(config: StoreConfig, load_delay: Duration) -> TestStore {
        let backing = Arc::new(InMemoryBackingStore::new());
        let factory = Arc::new(
            CountingHandleFactory::new(backing.clone()).with_load_delay(load_delay),
        );
        let host_index = Arc::new(InMemoryHostIndex::new());
        let store = KvTableMetadataStore::new(factory.clone(), host_index.clone(), &config);
        TestStore {
            store,
            backing,
            factory,
            host_index,
        }
    }

    /// Multi-threaded runtime whose worker threads are all named
    /// `thread_name`, standing in for a caller's executor.
    pub fn caller_runtime(thread_name: &str) -> Runtime {
        Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(thread_name)
            .enable_all()
            .build()
            .expect("failed to build caller runtime")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for MERIDIAN-specific validation.

    use super::*;

    /// Assert that a StoreResult is a DataNotFound error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &StoreResult<T>) {
        match result {
            Err(StoreError::DataNotFound { .. }) => {}
            other => panic!("Expected DataNotFound, got: {:?}", other),
        }
    }

    /// Assert that a StoreResult is a WriteConflict error.
    #[track_caller]
    pub fn assert_write_conflict<T: std::fmt::Debug>(result: &StoreResult<T>) {
        match result {
            Err(StoreError::WriteConflict { .. }) => {}
            other => panic!("Expected WriteConflict, got: {:?}", other),
        }
    }

    /// Assert that a StoreResult is a ContextMismatch error.
    #[track_caller]
    pub fn assert_context_mismatch<T: std::fmt::Debug>(result: &StoreResult<T>) {
        match result {
            Err(StoreError::ContextMismatch { .. }) => {}
            other => panic!("Expected ContextMismatch, got: {:?}", other),
        }
    }

    /// Assert that the current thread belongs to the named caller runtime.
    #[track_caller]
    pub fn assert_on_caller_thread(expected: &str) {
        let current = std::thread::current();
        assert_eq!(
            current.name(),
            Some(expected),
            "Expected to run on a {} thread",
            expected
        );
    }
}
