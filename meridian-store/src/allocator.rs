//! Starting segment numbers for new tables.

use std::sync::Arc;

use meridian_core::{SegmentNumber, StoreResult};
use tracing::debug;

use crate::factory::HandleFactory;

/// Chooses where a new table's segment numbering begins.
///
/// A table recreated under a previously deleted name starts one past the
/// highest segment number the deleted incarnations ever used.
#[derive(Clone)]
pub struct SafeSegmentAllocator {
    backend: Arc<dyn HandleFactory>,
}

impl SafeSegmentAllocator {
    pub fn new(backend: Arc<dyn HandleFactory>) -> Self {
        Self { backend }
    }

    pub async fn safe_starting_segment_number(
        &self,
        scope: &str,
        table: &str,
    ) -> StoreResult<SegmentNumber> {
        let highest = self.backend.highest_deleted_segment(scope, table).await?;
        let start = highest.map_or(0, |segment| segment + 1);
        debug!(scope, table, start, "Safe starting segment computed");
        Ok(start)
    }
}
