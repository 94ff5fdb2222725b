//! Resolution cache for scope and table handles.
//!
//! Two bounded loading caches, one keyed by scope name and one keyed by
//! (scope, table), hand out shared handles. A miss starts exactly one load
//! per key; every concurrent requester awaits that same load and receives the
//! same `Arc`, or the same error. Entries are dropped a fixed time after their
//! load completed whether or not they are in use, and the next request loads a
//! fresh handle. A load still in flight is never expired or evicted.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use meridian_core::{CacheConfig, StoreConfig, StoreError, StoreResult};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::factory::HandleFactory;
use crate::handle::{ScopeHandle, TableHandle};

// ============================================================================
// CACHE STATISTICS
// ============================================================================

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served by an existing entry (including one still loading).
    pub hits: u64,
    /// Lookups that started a load.
    pub misses: u64,
    /// Loads that failed.
    pub load_failures: u64,
    /// Entries dropped for age or capacity.
    pub evictions: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// LOADING CACHE
// ============================================================================

type SharedLoad<V> = Shared<BoxFuture<'static, StoreResult<V>>>;

struct Slot<V: Clone> {
    load: SharedLoad<V>,
    /// Set once the load has completed successfully; `None` while pending.
    loaded_at: Option<Instant>,
    last_access: Instant,
    generation: u64,
}

struct CacheState<K, V: Clone> {
    slots: HashMap<K, Slot<V>>,
    stats: CacheStats,
    next_generation: u64,
}

/// Bounded, time-limited cache with single-flight loading.
pub struct LoadingCache<K, V: Clone> {
    name: &'static str,
    config: CacheConfig,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> LoadingCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        Self {
            name,
            config,
            state: Mutex::new(CacheState {
                slots: HashMap::new(),
                stats: CacheStats::default(),
                next_generation: 0,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        // Slots are only mutated in short critical sections without panicking
        // calls, so a poisoned lock still guards a consistent map.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_live(&self, slot: &Slot<V>, now: Instant) -> bool {
        match slot.loaded_at {
            Some(loaded_at) => now.duration_since(loaded_at) < self.config.entry_ttl,
            None => slot.load.peek().map_or(true, |result| result.is_ok()),
        }
    }

    /// Stamp a slot whose load finished without any waiter recording it.
    /// Returns `false` if the load failed.
    fn settle(slot: &mut Slot<V>, now: Instant) -> bool {
        match slot.load.peek() {
            None => true,
            Some(Ok(_)) => {
                slot.loaded_at.get_or_insert(now);
                true
            }
            Some(Err(_)) => false,
        }
    }

    /// Return the cached value for `key`, or run `loader` once and share its
    /// result with every concurrent caller for the same key.
    ///
    /// A failed load is removed so a later request can try again; the cache
    /// itself never retries.
    pub async fn get_or_load<F, Fut>(&self, key: &K, loader: F) -> StoreResult<V>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = StoreResult<V>> + Send + 'static,
    {
        let (load, generation) = {
            let mut state = self.lock();
            let now = Instant::now();

            let live = state.slots.get_mut(key).and_then(|slot| {
                if !(Self::settle(slot, now) && self.is_live(slot, now)) {
                    return None;
                }
                slot.last_access = now;
                Some((slot.load.clone(), slot.generation))
            });

            match live {
                Some(found) => {
                    state.stats.hits += 1;
                    found
                }
                None => {
                    if state.slots.remove(key).is_some() {
                        state.stats.evictions += 1;
                        debug!(cache = self.name, ?key, "Expired entry dropped");
                    }
                    self.make_room(&mut state, now);

                    let generation = state.next_generation;
                    state.next_generation += 1;
                    state.stats.misses += 1;

                    let load = loader().boxed().shared();
                    state.slots.insert(
                        key.clone(),
                        Slot {
                            load: load.clone(),
                            loaded_at: None,
                            last_access: now,
                            generation,
                        },
                    );
                    debug!(cache = self.name, ?key, "Loading entry");
                    (load, generation)
                }
            }
        };

        match load.await {
            Ok(value) => {
                let mut state = self.lock();
                if let Some(slot) = state.slots.get_mut(key) {
                    if slot.generation == generation {
                        slot.loaded_at.get_or_insert_with(Instant::now);
                    }
                }
                Ok(value)
            }
            Err(err) => {
                let mut state = self.lock();
                let same_load = state
                    .slots
                    .get(key)
                    .is_some_and(|slot| slot.generation == generation);
                if same_load {
                    state.slots.remove(key);
                    state.stats.load_failures += 1;
                    warn!(cache = self.name, ?key, error = %err, "Load failed");
                }
                Err(err)
            }
        }
    }

    /// Evict expired entries, then least recently used completed ones, until
    /// one more entry fits.
    ///
    /// Pending loads are kept even when that leaves the cache over capacity,
    /// so a key never has two loads in flight.
    fn make_room(&self, state: &mut CacheState<K, V>, now: Instant) {
        if state.slots.len() < self.config.max_entries {
            return;
        }

        let before = state.slots.len();
        state
            .slots
            .retain(|_, slot| Self::settle(slot, now) && self.is_live(slot, now));
        let mut evicted = before - state.slots.len();

        while state.slots.len() >= self.config.max_entries {
            let oldest = state
                .slots
                .iter()
                .filter(|(_, slot)| slot.loaded_at.is_some())
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    state.slots.remove(&key);
                    evicted += 1;
                }
                None => {
                    debug!(
                        cache = self.name,
                        pending = state.slots.len(),
                        "Over capacity while loads are pending"
                    );
                    break;
                }
            }
        }

        if evicted > 0 {
            state.stats.evictions += evicted as u64;
            debug!(cache = self.name, evicted, "Evicted entries for capacity");
        }
    }

    /// True if a live entry exists for `key`. Does not count as an access.
    pub fn contains(&self, key: &K) -> bool {
        let state = self.lock();
        let now = Instant::now();
        state
            .slots
            .get(key)
            .is_some_and(|slot| self.is_live(slot, now))
    }

    /// Drop the entry for `key`. Returns whether one was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.lock().slots.remove(key).is_some()
    }

    /// Drop every entry whose key matches `predicate`. Returns how many.
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let mut state = self.lock();
        let before = state.slots.len();
        state.slots.retain(|key, _| !predicate(key));
        before - state.slots.len()
    }

    pub fn invalidate_all(&self) {
        self.lock().slots.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entry_count: state.slots.len() as u64,
            ..state.stats.clone()
        }
    }
}

// ============================================================================
// RESOLUTION CACHE
// ============================================================================

/// Key of the table handle cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableKey {
    pub scope: String,
    pub name: String,
}

impl TableKey {
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }
}

/// Statistics of both resolution caches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    pub scopes: CacheStats,
    pub tables: CacheStats,
}

/// The scope and table handle caches, built once and passed explicitly to
/// everything that resolves handles.
#[derive(Clone)]
pub struct ResolutionCache {
    factory: Arc<dyn HandleFactory>,
    scopes: Arc<LoadingCache<String, Arc<dyn ScopeHandle>>>,
    tables: Arc<LoadingCache<TableKey, Arc<dyn TableHandle>>>,
}

impl ResolutionCache {
    pub fn new(factory: Arc<dyn HandleFactory>, config: &StoreConfig) -> Self {
        Self {
            factory,
            scopes: Arc::new(LoadingCache::new("scopes", config.scope_cache.clone())),
            tables: Arc::new(LoadingCache::new("tables", config.table_cache.clone())),
        }
    }

    /// Resolve the handle for `scope`, loading it on a miss. The handle is
    /// refreshed before it is returned.
    pub async fn resolve_scope(&self, scope: &str) -> StoreResult<Arc<dyn ScopeHandle>> {
        let key = scope.to_string();
        let name = key.clone();
        let factory = self.factory.clone();

        let handle = self
            .scopes
            .get_or_load(&key, move || async move {
                let handle = factory
                    .new_scope(&name)
                    .await
                    .map_err(|e| resolution_failed(&name, &e))?;
                if handle.name() != name {
                    return Err(identity_mismatch(&name, handle.name()));
                }
                Ok(handle)
            })
            .await?;

        handle.refresh();
        Ok(handle)
    }

    /// Resolve the handle for (`scope`, `name`), loading it on a miss. The
    /// handle is refreshed before it is returned.
    pub async fn resolve_table(&self, scope: &str, name: &str) -> StoreResult<Arc<dyn TableHandle>> {
        let key = TableKey::new(scope, name);
        let wanted = key.clone();
        let factory = self.factory.clone();

        let handle = self
            .tables
            .get_or_load(&key, move || async move {
                let resource = meridian_core::scoped_table_name(&wanted.scope, &wanted.name);
                let handle = factory
                    .new_table(&wanted.scope, &wanted.name)
                    .await
                    .map_err(|e| resolution_failed(&resource, &e))?;
                if handle.scope() != wanted.scope || handle.name() != wanted.name {
                    return Err(identity_mismatch(&resource, &handle.scoped_name()));
                }
                Ok(handle)
            })
            .await?;

        handle.refresh();
        Ok(handle)
    }

    /// Drop the scope's entry and the entries of all its tables.
    pub fn invalidate_scope(&self, scope: &str) {
        self.scopes.invalidate(&scope.to_string());
        let dropped = self.tables.invalidate_where(|key| key.scope == scope);
        debug!(scope, dropped_tables = dropped, "Scope invalidated");
    }

    pub fn invalidate_table(&self, scope: &str, name: &str) {
        self.tables.invalidate(&TableKey::new(scope, name));
    }

    pub fn contains_scope(&self, scope: &str) -> bool {
        self.scopes.contains(&scope.to_string())
    }

    pub fn contains_table(&self, scope: &str, name: &str) -> bool {
        self.tables.contains(&TableKey::new(scope, name))
    }

    pub fn stats(&self) -> ResolutionStats {
        ResolutionStats {
            scopes: self.scopes.stats(),
            tables: self.tables.stats(),
        }
    }

    /// Drop every cached handle.
    pub fn shutdown(&self) {
        self.scopes.invalidate_all();
        self.tables.invalidate_all();
        debug!("Resolution cache cleared");
    }
}

fn resolution_failed(resource: &str, cause: &StoreError) -> StoreError {
    StoreError::ResolutionFailed {
        resource: resource.to_string(),
        reason: cause.to_string(),
    }
}

fn identity_mismatch(resource: &str, built: &str) -> StoreError {
    StoreError::ResolutionFailed {
        resource: resource.to_string(),
        reason: format!("factory built a handle for {}", built),
    }
}
