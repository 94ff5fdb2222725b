//! MERIDIAN Core - Metadata Types
//!
//! Data types shared by the table metadata store: versioned values, table
//! lifecycle states, table configuration and the revisioned record codec.
//! No backing-store or caching logic lives here.

pub mod config;
pub mod error;
pub mod event;
pub mod record;
pub mod serialization;

pub use config::{CacheConfig, StoreConfig};
pub use error::{CodecError, ConfigError, MeridianError, MeridianResult, StoreError, StoreResult};
pub use event::ControllerEvent;
pub use record::KvtConfigurationRecord;
pub use serialization::{RevisionReader, RevisionWriter, VersionedSerializer};

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// IDENTITY AND NAMING
// ============================================================================

/// Creation timestamps are epoch milliseconds.
pub type TimestampMs = i64;

/// Segment numbers issued to a table incarnation.
pub type SegmentNumber = i64;

/// Separator used when a single resource name is composed from several parts.
pub const RESOURCE_PART_SEPARATOR: &str = "_%_";

/// Fully qualified table name, `"{scope}/{name}"`.
pub fn scoped_table_name(scope: &str, name: &str) -> String {
    format!("{}/{}", scope, name)
}

/// Join resource name parts with [`RESOURCE_PART_SEPARATOR`].
pub fn composite_resource_name(parts: &[&str]) -> String {
    parts.join(RESOURCE_PART_SEPARATOR)
}

/// Check a scope or table name before it is used to build keys.
///
/// Names are path segments of the backing-store layout, so they must be
/// non-empty and free of `/`. The composite separator is reserved as well.
pub fn validate_resource_name(kind: &str, name: &str) -> StoreResult<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.contains('/') {
        "must not contain '/'"
    } else if name.contains(RESOURCE_PART_SEPARATOR) {
        "must not contain the reserved separator \"_%_\""
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidName {
        kind: kind.to_string(),
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Current wall-clock time as a creation timestamp.
pub fn now_millis() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// VERSIONED METADATA
// ============================================================================

/// Opaque version token issued by the backing store on every write.
///
/// Tokens are only ever compared for equality. A successful conditional
/// write always yields a token distinct from the one it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Wrap a raw token. Only backing-store implementations mint versions.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw token value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A value paired with the version it was read at or written as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedMetadata<T> {
    pub value: T,
    pub version: Version,
}

impl<T> VersionedMetadata<T> {
    pub fn new(value: T, version: Version) -> Self {
        Self { value, version }
    }

    /// Transform the value, keeping the version.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> VersionedMetadata<U> {
        VersionedMetadata {
            value: f(self.value),
            version: self.version,
        }
    }

    /// Transform the value fallibly, keeping the version.
    pub fn try_map<U, E, F: FnOnce(T) -> Result<U, E>>(self, f: F) -> Result<VersionedMetadata<U>, E> {
        Ok(VersionedMetadata {
            value: f(self.value)?,
            version: self.version,
        })
    }
}

// ============================================================================
// TABLE LIFECYCLE
// ============================================================================

/// Lifecycle state of a key-value table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableState {
    Unknown,
    Creating,
    Active,
    Deleting,
}

impl TableState {
    /// Encode as a single discriminant byte.
    pub fn to_byte(self) -> u8 {
        match self {
            TableState::Unknown => 0,
            TableState::Creating => 1,
            TableState::Active => 2,
            TableState::Deleting => 3,
        }
    }

    /// Decode a discriminant byte written by [`TableState::to_byte`].
    pub fn from_byte(byte: u8) -> Result<Self, CodecError> {
        match byte {
            0 => Ok(TableState::Unknown),
            1 => Ok(TableState::Creating),
            2 => Ok(TableState::Active),
            3 => Ok(TableState::Deleting),
            other => Err(CodecError::InvalidField {
                field: "state".to_string(),
                reason: format!("unknown discriminant {}", other),
            }),
        }
    }

    /// Decode the single-byte state record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        match bytes {
            [byte] => Self::from_byte(*byte),
            _ => Err(CodecError::Malformed {
                reason: format!("state record must be 1 byte, got {}", bytes.len()),
            }),
        }
    }
}

/// Configuration of a key-value table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyValueTableConfiguration {
    /// Number of partitions, one segment each. Always positive.
    pub partition_count: i32,
}

impl KeyValueTableConfiguration {
    pub fn new(partition_count: i32) -> Self {
        Self { partition_count }
    }

    /// Reject non-positive partition counts.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.partition_count <= 0 {
            return Err(CodecError::InvalidField {
                field: "partition_count".to_string(),
                reason: format!("must be positive, got {}", self.partition_count),
            });
        }
        Ok(())
    }

    /// Highest segment number used by a table starting at `starting_segment`.
    pub fn highest_segment_number(&self, starting_segment: SegmentNumber) -> SegmentNumber {
        starting_segment + i64::from(self.partition_count) - 1
    }
}

/// Outcome of a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateStatus {
    /// This request created the table (or finished a retried create).
    New,
    /// A table with a different creation timestamp exists and is still being created.
    ExistsCreating,
    /// A table with a different creation timestamp exists and is active.
    ExistsActive,
}

/// Response to a create request, carrying the stored table attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTableResponse {
    pub status: CreateStatus,
    pub configuration: KeyValueTableConfiguration,
    pub creation_time: TimestampMs,
    pub starting_segment_number: SegmentNumber,
}
