//! MERIDIAN Store - Key-Value Table Metadata Store
//!
//! Caches scope and table handles, pins handles in operation contexts,
//! allocates safe starting segment numbers and runs every operation on the
//! caller's executor. Persistence goes through the [`BackingStore`] trait;
//! an in-memory implementation is included.

pub mod allocator;
pub mod backend;
pub mod cache;
pub mod completion;
pub mod context;
pub mod factory;
pub mod handle;
pub mod scope;
pub mod store;
pub mod table;
pub mod task_index;
pub mod telemetry;

pub use allocator::SafeSegmentAllocator;
pub use backend::{keys, BackingStore, InMemoryBackingStore};
pub use cache::{CacheStats, LoadingCache, ResolutionCache, ResolutionStats, TableKey};
pub use completion::{with_completion, Completion};
pub use context::OperationContext;
pub use factory::{BackingStoreHandleFactory, HandleFactory};
pub use handle::{ScopeHandle, TableHandle};
pub use scope::PersistentScope;
pub use store::KvTableMetadataStore;
pub use table::PersistentKeyValueTable;
pub use task_index::{HostIndex, InMemoryHostIndex};
pub use telemetry::{init_tracing, TelemetryConfig};
