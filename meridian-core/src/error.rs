//! Error types for MERIDIAN operations

use crate::Version;
use thiserror::Error;

/// Record codec errors.
///
/// Every decoding failure is reported as one of these; a decoder never hands
/// back a partially populated value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Truncated input: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unsupported format version {version}")]
    UnsupportedVersion { version: u8 },

    #[error("Invalid UTF-8 in field {field}")]
    InvalidUtf8 { field: String },

    #[error("Required revision {revision} of format version {version} is missing")]
    MissingRevision { version: u8, revision: u8 },

    #[error("Invalid value for field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Malformed envelope: {reason}")]
    Malformed { reason: String },
}

/// Metadata store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Data not found: {key}")]
    DataNotFound { key: String },

    #[error("Data already exists: {key}")]
    DataExists { key: String },

    #[error("Data not empty: {key}")]
    DataNotEmpty { key: String },

    #[error("Write conflict on {key}: expected version {expected}, found {actual}")]
    WriteConflict {
        key: String,
        expected: Version,
        actual: Version,
    },

    #[error("Failed to resolve handle for {resource}: {reason}")]
    ResolutionFailed { resource: String, reason: String },

    #[error("Operation context is pinned to {pinned}, but {requested} was requested")]
    ContextMismatch { pinned: String, requested: String },

    #[error("Record codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Backing store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Completion dropped before a result was delivered")]
    CompletionDropped,

    #[error("Illegal state for {resource}: {reason}")]
    IllegalState { resource: String, reason: String },

    #[error("Invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        kind: String,
        name: String,
        reason: String,
    },
}

impl StoreError {
    /// True for [`StoreError::DataNotFound`].
    pub fn is_data_not_found(&self) -> bool {
        matches!(self, StoreError::DataNotFound { .. })
    }

    /// True for [`StoreError::DataNotEmpty`].
    pub fn is_data_not_empty(&self) -> bool {
        matches!(self, StoreError::DataNotEmpty { .. })
    }

    /// True for [`StoreError::WriteConflict`].
    ///
    /// Callers that see this usually re-read the versioned value and retry.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, StoreError::WriteConflict { .. })
    }

    /// True for [`StoreError::InvalidName`].
    pub fn is_invalid_name(&self) -> bool {
        matches!(self, StoreError::InvalidName { .. })
    }

    /// Shorthand for [`StoreError::DataNotFound`].
    pub fn not_found(key: impl Into<String>) -> Self {
        StoreError::DataNotFound { key: key.into() }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to initialize {component}: {reason}")]
    InitFailed { component: String, reason: String },
}

/// Master error type for all MERIDIAN errors.
#[derive(Debug, Clone, Error)]
pub enum MeridianError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for MERIDIAN operations.
pub type MeridianResult<T> = Result<T, MeridianError>;

// =============================================================================
// TESTS
// =============================================================================
