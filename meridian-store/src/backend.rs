//! Backing store contract and in-memory implementation.
//!
//! The backing store persists raw bytes under hierarchical keys and issues a
//! fresh [`Version`] on every write. The metadata layer only relies on the
//! operations below; replication and durability are the store's business.

use async_trait::async_trait;
use meridian_core::{
    scoped_table_name, SegmentNumber, StoreError, StoreResult, Version, VersionedMetadata,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Key layout used by the persistent handles.
///
/// ```text
/// /scopes/{scope}                          scope marker
/// /scopes/{scope}/tables/{table}           table marker
/// /scopes/{scope}/tables/{table}/{field}   per-table records
/// ```
pub mod keys {
    pub const CONFIGURATION: &str = "configuration";
    pub const STATE: &str = "state";
    pub const CREATION_TIME: &str = "creationTime";
    pub const SEGMENTS: &str = "segments";

    pub fn scope(scope: &str) -> String {
        format!("/scopes/{}", scope)
    }

    pub fn tables_of(scope: &str) -> String {
        format!("/scopes/{}/tables", scope)
    }

    pub fn table(scope: &str, table: &str) -> String {
        format!("/scopes/{}/tables/{}", scope, table)
    }

    pub fn table_field(scope: &str, table: &str, field: &str) -> String {
        format!("/scopes/{}/tables/{}/{}", scope, table, field)
    }
}

/// Durable byte store with per-key versions.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    /// Create `key`. Fails with `DataExists` if it is already present.
    async fn create(&self, key: &str, data: Vec<u8>) -> StoreResult<Version>;

    /// Read `key` with its current version. Fails with `DataNotFound`.
    async fn get(&self, key: &str) -> StoreResult<VersionedMetadata<Vec<u8>>>;

    /// Overwrite `key`. With `expected` set, fails with `WriteConflict`
    /// unless the stored version still matches.
    async fn update(&self, key: &str, data: Vec<u8>, expected: Option<Version>)
        -> StoreResult<Version>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Remove `key`. Fails with `DataNotFound`.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Names of the direct children of `prefix`, sorted.
    async fn list_children(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Remember the highest segment number issued to a deleted table
    /// incarnation. The stored value only ever grows.
    async fn record_deleted_segment(
        &self,
        scope: &str,
        table: &str,
        highest: SegmentNumber,
    ) -> StoreResult<()>;

    /// Highest segment number ever issued to a deleted incarnation of the
    /// table, if any incarnation was deleted.
    async fn highest_deleted_segment(
        &self,
        scope: &str,
        table: &str,
    ) -> StoreResult<Option<SegmentNumber>>;
}

// ============================================================================
// IN-MEMORY BACKING STORE
// ============================================================================

/// In-memory backing store for tests and single-process deployments.
///
/// Uses tokio::sync::RwLock for safe async access. Versions come from one
/// store-wide counter, so no two writes ever share a token.
#[derive(Debug)]
pub struct InMemoryBackingStore {
    entries: tokio::sync::RwLock<BTreeMap<String, StoredEntry>>,
    deleted_segments: tokio::sync::RwLock<HashMap<String, SegmentNumber>>,
    next_version: AtomicU64,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    data: Vec<u8>,
    version: Version,
}

impl Default for InMemoryBackingStore {
    fn default() -> Self {
        Self {
            entries: tokio::sync::RwLock::new(BTreeMap::new()),
            deleted_segments: tokio::sync::RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
        }
    }
}

impl InMemoryBackingStore {
    /// Create a new in-memory backing store.
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_version(&self) -> Version {
        Version::new(self.next_version.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl BackingStore for InMemoryBackingStore {
    async fn create(&self, key: &str, data: Vec<u8>) -> StoreResult<Version> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Err(StoreError::DataExists {
                key: key.to_string(),
            });
        }
        let version = self.mint_version();
        entries.insert(key.to_string(), StoredEntry { data, version });
        Ok(version)
    }

    async fn get(&self, key: &str) -> StoreResult<VersionedMetadata<Vec<u8>>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .map(|entry| VersionedMetadata::new(entry.data.clone(), entry.version))
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn update(
        &self,
        key: &str,
        data: Vec<u8>,
        expected: Option<Version>,
    ) -> StoreResult<Version> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key))?;

        if let Some(expected) = expected {
            if entry.version != expected {
                return Err(StoreError::WriteConflict {
                    key: key.to_string(),
                    expected,
                    actual: entry.version,
                });
            }
        }

        let version = self.mint_version();
        entry.data = data;
        entry.version = version;
        Ok(version)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn list_children(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().await;
        let start = format!("{}/", prefix);
        let mut children = BTreeSet::new();
        for key in entries.range(start.clone()..).map(|(k, _)| k) {
            let Some(rest) = key.strip_prefix(&start) else {
                break;
            };
            let child = rest.split('/').next().unwrap_or(rest);
            if !child.is_empty() {
                children.insert(child.to_string());
            }
        }
        Ok(children.into_iter().collect())
    }

    async fn record_deleted_segment(
        &self,
        scope: &str,
        table: &str,
        highest: SegmentNumber,
    ) -> StoreResult<()> {
        let mut deleted = self.deleted_segments.write().await;
        let slot = deleted
            .entry(scoped_table_name(scope, table))
            .or_insert(highest);
        *slot = (*slot).max(highest);
        Ok(())
    }

    async fn highest_deleted_segment(
        &self,
        scope: &str,
        table: &str,
    ) -> StoreResult<Option<SegmentNumber>> {
        let deleted = self.deleted_segments.read().await;
        Ok(deleted.get(&scoped_table_name(scope, table)).copied())
    }
}
