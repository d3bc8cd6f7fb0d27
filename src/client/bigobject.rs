//! Big objects
//!
//! Values larger than one PUT are split into fixed-size chunks stored under
//! derived keys, plus a manifest describing the layout.
//!
//! ## Key Layout
//! ```text
//! chunk i:   base_key ‖ be64(i)          (version be64(i))
//! manifest:  base_key ‖ 0x00 ‖ "manifest"
//! ```
//!
//! ## Manifest Format
//! ```text
//! ┌─────────────────────────────┬───────────┐
//! │ bincode(Manifest)           │ CRC32 (4) │
//! └─────────────────────────────┴───────────┘
//! ```

use std::io::{ErrorKind, Read, Write};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::entry::{validate_key, Entry, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::error::{KineticError, Result};
use super::kinetic::KineticClient;

/// Default chunk size
pub const CHUNK_SIZE: usize = 1024 * 1024;

const MANIFEST_SUFFIX: &[u8] = b"\x00manifest";

/// Keys requested per range scan when sweeping chunks
const SWEEP_BATCH: u32 = 1024;

/// Chunk layout of a stored big object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub base_key: Vec<u8>,
    pub chunk_size: u64,
    pub chunk_count: u64,
    pub total_bytes: u64,
    /// Length of the final chunk; 0 when there are no chunks
    pub last_chunk_bytes: u64,
}

fn corrupt(reason: impl Into<String>) -> KineticError {
    KineticError::CorruptBigObject(reason.into())
}

impl Manifest {
    /// Layout of `total_bytes` split into `chunk_size` pieces
    pub fn describe(base_key: &[u8], chunk_size: u64, total_bytes: u64) -> Self {
        let chunk_count = if chunk_size == 0 { 0 } else { total_bytes.div_ceil(chunk_size) };
        let last_chunk_bytes = match chunk_count {
            0 => 0,
            n => total_bytes - (n - 1) * chunk_size,
        };
        Self {
            base_key: base_key.to_vec(),
            chunk_size,
            chunk_count,
            total_bytes,
            last_chunk_bytes,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = bincode::serialize(self)?;
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        Ok(bytes)
    }

    /// Parse the manifest stored for `base_key` and check its fields agree
    pub fn decode(bytes: &[u8], base_key: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(corrupt("manifest too short"));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(body) != stored {
            return Err(corrupt("manifest checksum mismatch"));
        }
        let manifest: Manifest =
            bincode::deserialize(body).map_err(|e| corrupt(format!("manifest: {}", e)))?;
        manifest.validate(base_key)?;
        Ok(manifest)
    }

    fn validate(&self, base_key: &[u8]) -> Result<()> {
        if self.base_key != base_key {
            return Err(corrupt("manifest names a different base key"));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_VALUE_SIZE as u64 {
            return Err(corrupt(format!("manifest chunk size {} is out of range", self.chunk_size)));
        }
        let expected = Self::describe(base_key, self.chunk_size, self.total_bytes);
        if self.chunk_count != expected.chunk_count {
            return Err(corrupt(format!(
                "manifest lists {} chunks for {} bytes, expected {}",
                self.chunk_count, self.total_bytes, expected.chunk_count
            )));
        }
        if self.last_chunk_bytes != expected.last_chunk_bytes {
            return Err(corrupt(format!(
                "manifest final chunk of {} bytes, expected {}",
                self.last_chunk_bytes, expected.last_chunk_bytes
            )));
        }
        Ok(())
    }

    /// Expected length of chunk `index`
    fn chunk_len(&self, index: u64) -> Result<u64> {
        let start = index
            .checked_mul(self.chunk_size)
            .filter(|start| *start < self.total_bytes)
            .ok_or_else(|| corrupt(format!("chunk {} lies past the end of the object", index)))?;
        Ok((self.total_bytes - start).min(self.chunk_size))
    }
}

pub fn chunk_key(base_key: &[u8], index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(base_key.len() + 8);
    key.extend_from_slice(base_key);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub fn manifest_key(base_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(base_key.len() + MANIFEST_SUFFIX.len());
    key.extend_from_slice(base_key);
    key.extend_from_slice(MANIFEST_SUFFIX);
    key
}

fn is_chunk_key(base_key: &[u8], key: &[u8]) -> bool {
    key.len() == base_key.len() + 8 && key.starts_with(base_key)
}

/// Chunked streaming on top of a [`KineticClient`]
///
/// Operations on one base key are sequential; nothing coordinates two
/// writers of the same base key.
pub struct BigObject<'a> {
    client: &'a KineticClient,
    chunk_size: usize,
}

impl<'a> BigObject<'a> {
    pub fn new(client: &'a KineticClient) -> Self {
        Self {
            client,
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Use `chunk_size` bytes per chunk (at most the max value size)
    pub fn with_chunk_size(client: &'a KineticClient, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_size > MAX_VALUE_SIZE {
            return Err(KineticError::InvalidRequest(format!(
                "chunk size {} must be within 1..={}",
                chunk_size, MAX_VALUE_SIZE
            )));
        }
        Ok(Self { client, chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Store everything `source` yields under `base_key`; returns bytes written
    ///
    /// Chunk keys are deterministic, so replaying the same source over a
    /// partial upload converges on the same object. Chunks left over from a
    /// longer object previously stored under `base_key` are removed once
    /// the new manifest is in place.
    pub fn putx<R: Read>(&self, base_key: &[u8], mut source: R) -> Result<u64> {
        validate_base_key(base_key)?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut index: u64 = 0;
        let mut total: u64 = 0;

        loop {
            let filled = read_full(&mut source, &mut buf)?;
            if filled == 0 {
                break;
            }

            let chunk = Entry::new(chunk_key(base_key, index), Bytes::copy_from_slice(&buf[..filled]))
                .with_version(index.to_be_bytes().to_vec());
            self.client.put_forced(&chunk)?;

            total += filled as u64;
            index += 1;
            if filled < buf.len() {
                break;
            }
        }

        let manifest = Manifest::describe(base_key, self.chunk_size as u64, total);
        let entry = Entry::new(manifest_key(base_key), manifest.encode()?);
        self.client.put_forced(&entry)?;

        let stale = self.remove_chunks_from(base_key, index)?;
        tracing::debug!(
            "Stored big object ({} bytes in {} chunks, {} stale chunks removed)",
            total,
            index,
            stale
        );
        Ok(total)
    }

    /// Write the object stored under `base_key` to `sink`; returns bytes read
    pub fn getx<W: Write>(&self, base_key: &[u8], mut sink: W) -> Result<u64> {
        let manifest = self.manifest(base_key)?;

        let mut total: u64 = 0;
        for index in 0..manifest.chunk_count {
            let chunk = self
                .client
                .get(&chunk_key(base_key, index))?
                .ok_or_else(|| KineticError::CorruptBigObject(format!("chunk {} is missing", index)))?;

            let expected = manifest.chunk_len(index)?;
            if chunk.value.len() as u64 != expected {
                return Err(KineticError::CorruptBigObject(format!(
                    "chunk {} holds {} bytes, expected {}",
                    index,
                    chunk.value.len(),
                    expected
                )));
            }

            sink.write_all(&chunk.value)?;
            total += expected;
        }
        sink.flush()?;

        Ok(total)
    }

    /// Delete every chunk, then the manifest; returns entries deleted
    ///
    /// Chunks past the manifest's count (left by an interrupted overwrite)
    /// are swept as well.
    pub fn deletex(&self, base_key: &[u8]) -> Result<u64> {
        let manifest = self.manifest(base_key)?;

        let mut deleted = 0;
        for index in 0..manifest.chunk_count {
            if self.client.delete_forced(&chunk_key(base_key, index))? {
                deleted += 1;
            }
        }
        deleted += self.remove_chunks_from(base_key, manifest.chunk_count)?;
        if self.client.delete_forced(&manifest_key(base_key))? {
            deleted += 1;
        }

        Ok(deleted)
    }

    pub fn manifest(&self, base_key: &[u8]) -> Result<Manifest> {
        validate_base_key(base_key)?;
        let entry = self
            .client
            .get(&manifest_key(base_key))?
            .ok_or(KineticError::NotFound)?;
        Manifest::decode(&entry.value, base_key)
    }

    /// Delete chunk entries with index `first` and above; returns entries deleted
    fn remove_chunks_from(&self, base_key: &[u8], first: u64) -> Result<u64> {
        let end = chunk_key(base_key, u64::MAX);
        let mut start = chunk_key(base_key, first);
        let mut start_inclusive = true;
        let mut deleted = 0;

        loop {
            let keys = self
                .client
                .get_key_range(&start, start_inclusive, &end, true, SWEEP_BATCH, false)?;
            let Some(last) = keys.last() else {
                break;
            };
            for key in keys.iter().filter(|k| is_chunk_key(base_key, k)) {
                if self.client.delete_forced(key)? {
                    deleted += 1;
                }
            }
            start = last.clone();
            start_inclusive = false;
        }

        Ok(deleted)
    }
}

fn validate_base_key(base_key: &[u8]) -> Result<()> {
    validate_key(base_key)?;
    // Derived keys must still fit
    if base_key.len() + MANIFEST_SUFFIX.len() > MAX_KEY_SIZE {
        return Err(KineticError::InvalidRequest(format!(
            "base key length {} leaves no room for chunk suffixes",
            base_key.len()
        )));
    }
    Ok(())
}

/// Fill `buf` unless the source ends first; returns bytes read
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
