//! Versioned, revisioned binary envelope.
//!
//! Records are written as a format version followed by one framed block per
//! revision:
//!
//! ```text
//! [format-version: u8][revision-count: u8]
//! ([revision: u8][length: u32 BE][payload: length bytes]) * revision-count
//! ```
//!
//! Readers pick decoding logic from the (version, revision) pair in the
//! envelope, never from the payload shape. Revisions a reader does not know
//! are skipped whole, and bytes left over at the end of a known revision are
//! ignored, so newer writers can append fields without breaking older
//! readers.

use crate::CodecError;

// ============================================================================
// REVISION WRITER
// ============================================================================

/// Appends primitive fields to a revision payload.
#[derive(Debug, Default)]
pub struct RevisionWriter {
    buf: Vec<u8>,
}

impl RevisionWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a UTF-8 string prefixed by its u16 BE byte length.
    pub fn write_utf(&mut self, field: &str, value: &str) -> Result<(), CodecError> {
        let len = u16::try_from(value.len()).map_err(|_| CodecError::InvalidField {
            field: field.to_string(),
            reason: format!("string of {} bytes exceeds {}", value.len(), u16::MAX),
        })?;
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// ============================================================================
// REVISION READER
// ============================================================================

/// Reads primitive fields from a byte slice, failing on truncation.
#[derive(Debug)]
pub struct RevisionReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RevisionReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < needed {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        self.take(len)
    }

    /// Read a string written by [`RevisionWriter::write_utf`].
    pub fn read_utf(&mut self, field: &str) -> Result<String, CodecError> {
        let len = u16::from_be_bytes(self.take_array()?) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 {
            field: field.to_string(),
        })
    }
}

// ============================================================================
// VERSIONED SERIALIZER
// ============================================================================

/// A serializer with explicitly declared versions and revisions.
///
/// Implementors declare which revisions exist per format version, how to
/// write and read each one, and how to finish a builder once every block has
/// been read. The envelope framing is provided.
pub trait VersionedSerializer {
    /// The value being serialized.
    type Value;
    /// Accumulates fields while revisions are read.
    type Builder: Default;

    /// Format version used when writing.
    const WRITE_VERSION: u8;

    /// Revisions known for `version`, in write order. `None` if the version
    /// is unknown to this reader.
    fn revisions(version: u8) -> Option<&'static [u8]>;

    fn write_revision(
        value: &Self::Value,
        version: u8,
        revision: u8,
        out: &mut RevisionWriter,
    ) -> Result<(), CodecError>;

    fn read_revision(
        version: u8,
        revision: u8,
        input: &mut RevisionReader<'_>,
        builder: &mut Self::Builder,
    ) -> Result<(), CodecError>;

    /// Finish the builder. Fails if a required revision never arrived.
    fn build(version: u8, builder: Self::Builder) -> Result<Self::Value, CodecError>;

    /// Hook run before anything is written.
    fn before_serialization(_value: &Self::Value) -> Result<(), CodecError> {
        Ok(())
    }

    fn serialize(value: &Self::Value) -> Result<Vec<u8>, CodecError> {
        Self::before_serialization(value)?;
        let version = Self::WRITE_VERSION;
        let revisions = Self::revisions(version)
            .ok_or(CodecError::UnsupportedVersion { version })?;
        let count = u8::try_from(revisions.len()).map_err(|_| CodecError::Malformed {
            reason: format!("{} revisions declared for version {}", revisions.len(), version),
        })?;

        let mut out = vec![version, count];
        for &revision in revisions {
            let mut writer = RevisionWriter::new();
            Self::write_revision(value, version, revision, &mut writer)?;
            let payload = writer.into_bytes();
            let len = u32::try_from(payload.len()).map_err(|_| CodecError::Malformed {
                reason: format!("revision {} payload too large", revision),
            })?;
            out.push(revision);
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&payload);
        }
        Ok(out)
    }

    fn deserialize(data: &[u8]) -> Result<Self::Value, CodecError> {
        let mut envelope = RevisionReader::new(data);
        let version = envelope.read_u8()?;
        let known = Self::revisions(version).ok_or(CodecError::UnsupportedVersion { version })?;
        let count = envelope.read_u8()?;

        let mut builder = Self::Builder::default();
        for _ in 0..count {
            let revision = envelope.read_u8()?;
            let len = envelope.read_u32()? as usize;
            let payload = envelope.read_bytes(len)?;
            if known.contains(&revision) {
                let mut input = RevisionReader::new(payload);
                Self::read_revision(version, revision, &mut input, &mut builder)?;
            }
        }

        if envelope.remaining() > 0 {
            return Err(CodecError::Malformed {
                reason: format!("{} bytes after the last revision", envelope.remaining()),
            });
        }
        Self::build(version, builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two revisions: 0 carries `name`, 1 adds `weight` (default 1).
    #[derive(Debug, Clone, PartialEq)]
    struct Sample {
        name: String,
        weight: i64,
    }

    #[derive(Default)]
    struct SampleBuilder {
        name: Option<String>,
        weight: Option<i64>,
    }

    struct SampleV0;
    struct SampleV1;

    impl VersionedSerializer for SampleV0 {
        type Value = Sample;
        type Builder = SampleBuilder;
        const WRITE_VERSION: u8 = 0;

        fn revisions(version: u8) -> Option<&'static [u8]> {
            match version {
                0 => Some(&[0]),
                _ => None,
            }
        }

        fn write_revision(
            value: &Sample,
            _version: u8,
            _revision: u8,
            out: &mut RevisionWriter,
        ) -> Result<(), CodecError> {
            out.write_utf("name", &value.name)
        }

        fn read_revision(
            _version: u8,
            _revision: u8,
            input: &mut RevisionReader<'_>,
            builder: &mut SampleBuilder,
        ) -> Result<(), CodecError> {
            builder.name = Some(input.read_utf("name")?);
            Ok(())
        }

        fn build(version: u8, builder: SampleBuilder) -> Result<Sample, CodecError> {
            Ok(Sample {
                name: builder
                    .name
                    .ok_or(CodecError::MissingRevision { version, revision: 0 })?,
                weight: builder.weight.unwrap_or(1),
            })
        }
    }

    impl VersionedSerializer for SampleV1 {
        type Value = Sample;
        type Builder = SampleBuilder;
        const WRITE_VERSION: u8 = 0;

        fn revisions(version: u8) -> Option<&'static [u8]> {
            match version {
                0 => Some(&[0, 1]),
                _ => None,
            }
        }

        fn write_revision(
            value: &Sample,
            _version: u8,
            revision: u8,
            out: &mut RevisionWriter,
        ) -> Result<(), CodecError> {
            match revision {
                0 => out.write_utf("name", &value.name)?,
                _ => out.write_i64(value.weight),
            }
            Ok(())
        }

        fn read_revision(
            version: u8,
            revision: u8,
            input: &mut RevisionReader<'_>,
            builder: &mut SampleBuilder,
        ) -> Result<(), CodecError> {
            match revision {
                0 => SampleV0::read_revision(version, revision, input, builder),
                _ => {
                    builder.weight = Some(input.read_i64()?);
                    Ok(())
                }
            }
        }

        fn build(version: u8, builder: SampleBuilder) -> Result<Sample, CodecError> {
            SampleV0::build(version, builder)
        }
    }

    fn sample() -> Sample {
        Sample {
            name: "alpha".to_string(),
            weight: 9,
        }
    }

    #[test]
    fn test_envelope_layout() {
        let bytes = SampleV0::serialize(&sample()).unwrap();
        // version, count, revision, len(4), utf len(2), "alpha"
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[1], 1);
        assert_eq!(bytes[2], 0);
        assert_eq!(&bytes[3..7], &7u32.to_be_bytes());
        assert_eq!(&bytes[7..9], &5u16.to_be_bytes());
        assert_eq!(&bytes[9..], b"alpha");
    }

    #[test]
    fn test_older_reader_skips_newer_revision() {
        let bytes = SampleV1::serialize(&sample()).unwrap();
        let decoded = SampleV0::deserialize(&bytes).unwrap();
        assert_eq!(decoded.name, "alpha");
        assert_eq!(decoded.weight, 1);
    }

    #[test]
    fn test_newer_reader_defaults_missing_revision() {
        let bytes = SampleV0::serialize(&sample()).unwrap();
        let decoded = SampleV1::deserialize(&bytes).unwrap();
        assert_eq!(decoded.name, "alpha");
        assert_eq!(decoded.weight, 1);
    }

    #[test]
    fn test_same_revision_round_trip() {
        let bytes = SampleV1::serialize(&sample()).unwrap();
        assert_eq!(SampleV1::deserialize(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut bytes = SampleV0::serialize(&sample()).unwrap();
        bytes[0] = 3;
        assert_eq!(
            SampleV0::deserialize(&bytes),
            Err(CodecError::UnsupportedVersion { version: 3 })
        );
    }

    #[test]
    fn test_every_truncation_fails() {
        let bytes = SampleV1::serialize(&sample()).unwrap();
        for cut in 0..bytes.len() {
            assert!(
                SampleV1::deserialize(&bytes[..cut]).is_err(),
                "prefix of {} bytes decoded",
                cut
            );
        }
    }

    #[test]
    fn test_trailing_envelope_bytes_rejected() {
        let mut bytes = SampleV0::serialize(&sample()).unwrap();
        bytes.push(0xAB);
        assert!(matches!(
            SampleV0::deserialize(&bytes),
            Err(CodecError::Malformed { .. })
        ));
    }

    #[test]
    fn test_missing_required_revision() {
        // Envelope with zero revisions.
        assert_eq!(
            SampleV0::deserialize(&[0, 0]),
            Err(CodecError::MissingRevision {
                version: 0,
                revision: 0
            })
        );
    }

    #[test]
    fn test_invalid_utf8_reported() {
        let mut reader = RevisionReader::new(&[0, 2, 0xFF, 0xFE]);
        assert_eq!(
            reader.read_utf("name"),
            Err(CodecError::InvalidUtf8 {
                field: "name".to_string()
            })
        );
        assert_eq!(reader.remaining(), 0);
    }
}
