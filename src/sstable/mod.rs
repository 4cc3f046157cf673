//! Sorted string tables
//!
//! An immutable, key-ordered, on-disk table produced by a flush or a
//! compaction pass. Records are packed end-to-end starting right after a
//! small footer at chunk 0; the footer is rewritten once in place, after
//! the owning [`CuckooFilter`] has been appended to the tail — the
//! tail-placed design SPEC_FULL.md settles on over a head-placed filter.
//!
//! Layout: `[footer @ chunk 0][records...][serialized filter]`.

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::chunk_store::{ChunkStore, ChunkStoreError};
use crate::compression::{self, CompressionError};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::filter::{CuckooFilter, FilterError};

/// Errors produced by the SSTable module.
#[derive(Debug, Error)]
pub enum SstableError {
    /// Underlying chunk-store failure.
    #[error("chunk store error: {0}")]
    ChunkStore(#[from] ChunkStoreError),

    /// A stored record or footer could not be decoded.
    #[error("corrupt sstable encoding: {0}")]
    Encoding(#[from] EncodingError),

    /// The table's filter could not be deserialized.
    #[error("corrupt sstable filter: {0}")]
    Filter(#[from] FilterError),

    /// A compressed record could not be decompressed.
    #[error("corrupt compressed record: {0}")]
    Compression(#[from] CompressionError),

    /// Filesystem failure outside the chunk store (e.g. deleting the file).
    #[error("sstable file error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, SstableError>;

/// One stored record: a key, a value (which may be the tombstone
/// sentinel, see `crate::engine::TOMBSTONE`), and an optional absolute
/// expiry timestamp (nanoseconds since Unix epoch).
#[derive(Debug, Clone)]
pub struct Record {
    /// The record's key, as given by the caller (decompressed on read).
    pub key: Vec<u8>,
    /// The record's value (decompressed on read).
    pub value: Vec<u8>,
    /// Absolute expiry, if a TTL was supplied at write time.
    pub expires_at: Option<i64>,
}

impl Encode for Record {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.value.encode_to(buf)?;
        self.expires_at.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Record {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (expires_at, n) = Option::<i64>::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Record { key, value, expires_at }, offset))
    }
}

#[derive(Debug, Clone, Copy)]
struct Footer {
    data_start: u64,
    filter_start: u64,
    record_count: u64,
    compressed: bool,
}

impl Encode for Footer {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        self.data_start.encode_to(buf)?;
        self.filter_start.encode_to(buf)?;
        self.record_count.encode_to(buf)?;
        self.compressed.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Footer {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (data_start, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (filter_start, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (record_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (compressed, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Footer { data_start, filter_start, record_count, compressed }, offset))
    }
}

/// An immutable, on-disk sorted table of records plus its membership filter.
pub struct Sstable {
    store: ChunkStore,
    footer: Footer,
    filter: CuckooFilter,
    path: PathBuf,
}

impl Sstable {
    /// Build a new SSTable at `path` from records already in key-ascending
    /// order (as produced by [`crate::memtable::Memtable::iter_forward`] or
    /// a compaction merge). `compress` independently compresses each
    /// record's key and value bytes before they hit disk; the filter still
    /// indexes the original, uncompressed key, since lookups are always
    /// performed with the caller's raw key.
    pub fn build<I>(path: &Path, compress: bool, records: I) -> Result<Sstable>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>, Option<i64>)>,
    {
        let store = ChunkStore::open(path)?;
        let placeholder =
            Footer { data_start: 0, filter_start: 0, record_count: 0, compressed: compress };
        store.write_to(0, &encoding::encode_to_vec(&placeholder)?)?;
        let data_start = store.count();

        let mut filter = CuckooFilter::new();
        let mut record_count = 0u64;
        for (key, value, expires_at) in records {
            let (stored_key, stored_value) = if compress {
                (compression::compress(&key), compression::compress(&value))
            } else {
                (key.clone(), value.clone())
            };
            let record = Record { key: stored_key, value: stored_value, expires_at };
            let bytes = encoding::encode_to_vec(&record)?;
            let chunk_index = store.write(&bytes)?;
            filter.insert(chunk_index, &key);
            record_count += 1;
        }

        let filter_start = store.count();
        store.write(&filter.serialize()?)?;

        let footer = Footer { data_start, filter_start, record_count, compressed: compress };
        store.write_to(0, &encoding::encode_to_vec(&footer)?)?;

        debug!(path = %path.display(), record_count, compress, "built sstable");
        Ok(Sstable { store, footer, filter, path: path.to_path_buf() })
    }

    /// Open a previously built SSTable.
    pub fn open(path: &Path) -> Result<Sstable> {
        let store = ChunkStore::open(path)?;
        let footer_bytes = store.read(0)?;
        let (footer, _) = encoding::decode_from_slice::<Footer>(&footer_bytes)?;
        let filter_bytes = store.read(footer.filter_start)?;
        let filter = CuckooFilter::deserialize(&filter_bytes)?;
        trace!(path = %path.display(), record_count = footer.record_count, "opened sstable");
        Ok(Sstable { store, footer, filter, path: path.to_path_buf() })
    }

    /// The file this table is backed by.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records stored (including any tombstones carried through
    /// from a flush).
    pub fn record_count(&self) -> u64 {
        self.footer.record_count
    }

    /// Total on-disk size of the backing chunk store, in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.store.count() * crate::chunk_store::CHUNK_SIZE as u64
    }

    /// Probe the filter for `key`. A filter hit is only a maybe: two
    /// distinct keys can collide on the same fingerprint halves, so the
    /// record at the recorded chunk index is decoded and its (decompressed)
    /// key compared against `key` before trusting the hit. The returned
    /// value may be the tombstone sentinel, and the expiry may already be in
    /// the past — resolving that is the caller's (engine's) job, not this
    /// layer's.
    pub fn get(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Option<i64>)>> {
        let (chunk_index, found) = self.filter.lookup(key);
        if !found {
            return Ok(None);
        }
        let bytes = self.store.read(chunk_index)?;
        let (record, _) = encoding::decode_from_slice::<Record>(&bytes)?;
        let record_key = if self.footer.compressed {
            compression::decompress(&record.key)?
        } else {
            record.key
        };
        if record_key != key {
            return Ok(None);
        }
        let value = if self.footer.compressed {
            compression::decompress(&record.value)?
        } else {
            record.value
        };
        Ok(Some((value, record.expires_at)))
    }

    /// Iterate every stored record in on-disk order (key-ascending, since
    /// both flush and compaction write in that order), decompressing each
    /// key/value if the table was built with compression enabled.
    pub fn iter_records(&self) -> SstableIter<'_> {
        SstableIter {
            store: &self.store,
            cursor: self.footer.data_start,
            remaining: self.footer.record_count,
            compressed: self.footer.compressed,
        }
    }

    /// Flush buffered writes and release the underlying file.
    pub fn close(&self) -> Result<()> {
        Ok(self.store.close()?)
    }

    /// Remove the backing file. Used once a compacted replacement has been
    /// durably written and the original is no longer needed.
    pub fn delete_file(&self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

/// Sequential iterator over a [`Sstable`]'s records.
pub struct SstableIter<'a> {
    store: &'a ChunkStore,
    cursor: u64,
    remaining: u64,
    compressed: bool,
}

impl Iterator for SstableIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.store.read_chain(self.cursor) {
            Ok((bytes, next)) => {
                self.cursor = next;
                self.remaining -= 1;
                match encoding::decode_from_slice::<Record>(&bytes) {
                    Ok((mut record, _)) => {
                        if self.compressed {
                            let key = match compression::decompress(&record.key) {
                                Ok(k) => k,
                                Err(e) => return Some(Err(SstableError::Compression(e))),
                            };
                            let value = match compression::decompress(&record.value) {
                                Ok(v) => v,
                                Err(e) => return Some(Err(SstableError::Compression(e))),
                            };
                            record.key = key;
                            record.value = value;
                        }
                        Some(Ok(record))
                    }
                    Err(e) => Some(Err(SstableError::Encoding(e))),
                }
            }
            Err(e) => Some(Err(SstableError::ChunkStore(e))),
        }
    }
}
