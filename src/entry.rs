//! Entries and argument validation
//!
//! An [`Entry`] is the unit of storage: an opaque key, an opaque value and
//! [`EntryMetadata`] (version, integrity tag, tag algorithm). Validation here
//! runs before anything is sent so bad arguments never reach the wire.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{KineticError, Result};

/// Max key length in bytes
pub const MAX_KEY_SIZE: usize = 4096;

/// Max value length of a single PUT
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Max version length in bytes
pub const MAX_VERSION_SIZE: usize = 128;

/// Max integrity tag length in bytes
pub const MAX_TAG_SIZE: usize = 128;

/// Integrity tag scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Sha1,
    Sha2,
    Sha3,
    Crc32,
    Crc64,
}

impl Algorithm {
    /// Compute a tag over `value`
    ///
    /// SHA3 and CRC64 tags are accepted on the wire but must be supplied by
    /// the writer.
    pub fn compute(self, value: &[u8]) -> Result<Vec<u8>> {
        match self {
            Algorithm::Sha1 => Ok(Sha1::digest(value).to_vec()),
            Algorithm::Sha2 => Ok(Sha256::digest(value).to_vec()),
            Algorithm::Crc32 => Ok(crc32fast::hash(value).to_be_bytes().to_vec()),
            Algorithm::Sha3 | Algorithm::Crc64 => Err(KineticError::InvalidRequest(format!(
                "cannot compute {:?} tags locally",
                self
            ))),
        }
    }
}

/// Metadata carried alongside every entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Compare-and-swap token; empty means "no version"
    pub version: Vec<u8>,

    /// Writer-supplied integrity tag
    pub tag: Vec<u8>,

    /// Scheme used for `tag`
    pub algorithm: Option<Algorithm>,
}

/// A key, its value and its metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Bytes,
    pub metadata: EntryMetadata,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            metadata: EntryMetadata::default(),
        }
    }

    /// Set the version (the new version for PUT, the expected one for DELETE)
    pub fn with_version(mut self, version: impl Into<Vec<u8>>) -> Self {
        self.metadata.version = version.into();
        self
    }

    /// Attach a writer-supplied tag
    pub fn with_tag(mut self, algorithm: Algorithm, tag: impl Into<Vec<u8>>) -> Self {
        self.metadata.algorithm = Some(algorithm);
        self.metadata.tag = tag.into();
        self
    }

    /// Compute and attach a tag over the current value
    pub fn with_computed_tag(mut self, algorithm: Algorithm) -> Result<Self> {
        self.metadata.tag = algorithm.compute(&self.value)?;
        self.metadata.algorithm = Some(algorithm);
        Ok(self)
    }

    pub fn version(&self) -> &[u8] {
        &self.metadata.version
    }
}

// =============================================================================
// Validation
// =============================================================================

pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(KineticError::InvalidRequest("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(KineticError::InvalidRequest(format!(
            "key length {} exceeds {}",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

/// Keys used as range or iteration bounds may be empty
pub fn validate_bound(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(KineticError::InvalidRequest(format!(
            "key length {} exceeds {}",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

pub fn validate_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(KineticError::InvalidRequest(format!(
            "value length {} exceeds {}",
            value.len(),
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}

pub fn validate_version(version: &[u8]) -> Result<()> {
    if version.len() > MAX_VERSION_SIZE {
        return Err(KineticError::InvalidRequest(format!(
            "version length {} exceeds {}",
            version.len(),
            MAX_VERSION_SIZE
        )));
    }
    Ok(())
}

/// Full check of an entry about to be written
pub fn validate_entry(entry: &Entry) -> Result<()> {
    validate_key(&entry.key)?;
    validate_value(&entry.value)?;
    validate_version(&entry.metadata.version)?;
    if entry.metadata.tag.len() > MAX_TAG_SIZE {
        return Err(KineticError::InvalidRequest(format!(
            "tag length {} exceeds {}",
            entry.metadata.tag.len(),
            MAX_TAG_SIZE
        )));
    }
    if !entry.metadata.tag.is_empty() && entry.metadata.algorithm.is_none() {
        return Err(KineticError::InvalidRequest(
            "tag supplied without an algorithm".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        let err = validate_key(b"").unwrap_err();
        assert!(matches!(err, KineticError::InvalidRequest(_)));
    }

    #[test]
    fn test_key_size_bound() {
        assert!(validate_key(&vec![1u8; MAX_KEY_SIZE]).is_ok());
        assert!(validate_key(&vec![1u8; MAX_KEY_SIZE + 1]).is_err());
    }

    #[test]
    fn test_version_bound() {
        let entry = Entry::new("k", "v").with_version(vec![0u8; MAX_VERSION_SIZE + 1]);
        assert!(matches!(
            validate_entry(&entry),
            Err(KineticError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_tag_requires_algorithm() {
        let mut entry = Entry::new("k", "v");
        entry.metadata.tag = vec![1, 2, 3];
        assert!(validate_entry(&entry).is_err());
    }

    #[test]
    fn test_computed_tags() {
        let entry = Entry::new("k", "hello").with_computed_tag(Algorithm::Crc32).unwrap();
        assert_eq!(entry.metadata.tag, crc32fast::hash(b"hello").to_be_bytes());

        let entry = Entry::new("k", "hello").with_computed_tag(Algorithm::Sha1).unwrap();
        assert_eq!(entry.metadata.tag.len(), 20);

        assert!(Entry::new("k", "hello").with_computed_tag(Algorithm::Crc64).is_err());
    }
}
