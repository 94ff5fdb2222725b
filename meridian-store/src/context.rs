//! Operation contexts.

use std::fmt;
use std::sync::Arc;

use meridian_core::{scoped_table_name, StoreError, StoreResult};

use crate::handle::TableHandle;

/// Pins a resolved table handle so a sequence of operations can skip the
/// resolution cache.
///
/// A context only ever serves the (scope, name) it was created for.
#[derive(Clone)]
pub struct OperationContext {
    table: Arc<dyn TableHandle>,
}

impl OperationContext {
    pub fn new(table: Arc<dyn TableHandle>) -> Self {
        Self { table }
    }

    /// The pinned handle.
    pub fn table(&self) -> &Arc<dyn TableHandle> {
        &self.table
    }

    /// Return the pinned handle if it belongs to (`scope`, `name`).
    pub fn verify(&self, scope: &str, name: &str) -> StoreResult<Arc<dyn TableHandle>> {
        if self.table.scope() == scope && self.table.name() == name {
            Ok(self.table.clone())
        } else {
            Err(StoreError::ContextMismatch {
                pinned: self.table.scoped_name(),
                requested: scoped_table_name(scope, name),
            })
        }
    }
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("table", &self.table.scoped_name())
            .finish()
    }
}
