//! Key-value table configuration record.

use crate::serialization::{RevisionReader, RevisionWriter, VersionedSerializer};
use crate::{CodecError, KeyValueTableConfiguration};
use serde::{Deserialize, Serialize};

/// Persisted configuration of a table: owning scope, table name and
/// configuration. Fields are written in exactly that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvtConfigurationRecord {
    pub scope: String,
    pub table_name: String,
    pub configuration: KeyValueTableConfiguration,
}

impl KvtConfigurationRecord {
    pub fn new(
        scope: impl Into<String>,
        table_name: impl Into<String>,
        configuration: KeyValueTableConfiguration,
    ) -> Self {
        Self {
            scope: scope.into(),
            table_name: table_name.into(),
            configuration,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        ConfigurationRecordSerializer::serialize(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        ConfigurationRecordSerializer::deserialize(data)
    }
}

#[derive(Debug, Default)]
pub struct KvtConfigurationRecordBuilder {
    scope: Option<String>,
    table_name: Option<String>,
    configuration: Option<KeyValueTableConfiguration>,
}

/// Version 0 has a single revision 0: scope, table name, partition count.
pub struct ConfigurationRecordSerializer;

impl VersionedSerializer for ConfigurationRecordSerializer {
    type Value = KvtConfigurationRecord;
    type Builder = KvtConfigurationRecordBuilder;

    const WRITE_VERSION: u8 = 0;

    fn revisions(version: u8) -> Option<&'static [u8]> {
        match version {
            0 => Some(&[0]),
            _ => None,
        }
    }

    fn before_serialization(record: &KvtConfigurationRecord) -> Result<(), CodecError> {
        if record.scope.is_empty() {
            return Err(CodecError::InvalidField {
                field: "scope".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if record.table_name.is_empty() {
            return Err(CodecError::InvalidField {
                field: "table_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        record.configuration.validate()
    }

    fn write_revision(
        record: &KvtConfigurationRecord,
        _version: u8,
        _revision: u8,
        out: &mut RevisionWriter,
    ) -> Result<(), CodecError> {
        out.write_utf("scope", &record.scope)?;
        out.write_utf("table_name", &record.table_name)?;
        out.write_i32(record.configuration.partition_count);
        Ok(())
    }

    fn read_revision(
        _version: u8,
        _revision: u8,
        input: &mut RevisionReader<'_>,
        builder: &mut KvtConfigurationRecordBuilder,
    ) -> Result<(), CodecError> {
        let scope = input.read_utf("scope")?;
        let table_name = input.read_utf("table_name")?;
        let partition_count = input.read_i32()?;
        builder.scope = Some(scope);
        builder.table_name = Some(table_name);
        builder.configuration = Some(KeyValueTableConfiguration::new(partition_count));
        Ok(())
    }

    fn build(
        version: u8,
        builder: KvtConfigurationRecordBuilder,
    ) -> Result<KvtConfigurationRecord, CodecError> {
        let missing = CodecError::MissingRevision {
            version,
            revision: 0,
        };
        match (builder.scope, builder.table_name, builder.configuration) {
            (Some(scope), Some(table_name), Some(configuration)) => {
                configuration.validate()?;
                Ok(KvtConfigurationRecord {
                    scope,
                    table_name,
                    configuration,
                })
            }
            _ => Err(missing),
        }
    }
}
