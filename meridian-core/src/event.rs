//! Controller events recorded in the host task index.
//!
//! A controller host records the task it is about to run so that, if the host
//! fails, another host can pick the task up from the index.

use crate::{scoped_table_name, SegmentNumber, StoreError, TimestampMs};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pending controller-initiated task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    CreateTable {
        scope: String,
        table: String,
        partition_count: i32,
        timestamp: TimestampMs,
        request_id: Uuid,
    },
    DeleteTable {
        scope: String,
        table: String,
        request_id: Uuid,
        /// Table id the delete is aimed at, so a recreated table is not hit.
        starting_segment_number: Option<SegmentNumber>,
    },
}

impl ControllerEvent {
    /// Routing key of the event: the scoped table name.
    pub fn key(&self) -> String {
        match self {
            ControllerEvent::CreateTable { scope, table, .. }
            | ControllerEvent::DeleteTable { scope, table, .. } => scoped_table_name(scope, table),
        }
    }

    pub fn request_id(&self) -> Uuid {
        match self {
            ControllerEvent::CreateTable { request_id, .. }
            | ControllerEvent::DeleteTable { request_id, .. } => *request_id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(data).map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })
    }
}
