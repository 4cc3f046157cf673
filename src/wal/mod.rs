//! Write-ahead log
//!
//! A single paged file ([`crate::chunk_store`]) holding an append-only
//! sequence of encoded [`Operation`]s. The engine's WAL writer thread
//! drains a staging queue into this log; [`Wal::replay_iter`] streams it
//! back during engine recovery.
//!
//! Each `append` is one chunk-store `write`, so it lands atomically at the
//! chunk-sequence level: either the whole chain is there on replay or
//! [`ChunkStoreError::Eof`] stops the iterator short, never a
//! half-decoded record.

#[cfg(test)]
mod tests;

use std::path::Path;

use thiserror::Error;

use crate::chunk_store::{ChunkStore, ChunkStoreError};
use crate::encoding::{self, Decode, Encode, EncodingError};

/// Errors produced by the write-ahead log.
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying chunk-store failure.
    #[error("chunk store error: {0}")]
    ChunkStore(#[from] ChunkStoreError),

    /// A stored operation could not be decoded.
    #[error("corrupt WAL record: {0}")]
    Encoding(#[from] EncodingError),
}

type Result<T> = std::result::Result<T, WalError>;

/// The kind of mutation an [`Operation`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Insert or overwrite a key.
    Put,
    /// Tombstone a key.
    Delete,
    /// Recorded by a transaction as the inverse of a read; never itself
    /// replayed into engine state.
    Get,
}

impl OpCode {
    fn to_i32(self) -> i32 {
        match self {
            OpCode::Put => 0,
            OpCode::Delete => 1,
            OpCode::Get => 2,
        }
    }

    fn from_i32(v: i32) -> Option<OpCode> {
        match v {
            0 => Some(OpCode::Put),
            1 => Some(OpCode::Delete),
            2 => Some(OpCode::Get),
            _ => None,
        }
    }
}

/// One WAL entry: an op code, a key, a value, and an optional inverse used
/// to support transaction rollback.
#[derive(Debug, Clone)]
pub struct Operation {
    /// The kind of mutation.
    pub code: OpCode,
    /// The affected key.
    pub key: Vec<u8>,
    /// The mutation's value (empty for deletes and gets).
    pub value: Vec<u8>,
    /// The operation that undoes this one, if one was recorded.
    pub inverse: Option<Box<Operation>>,
}

impl Operation {
    /// Build a PUT operation with no inverse attached.
    pub fn put(key: Vec<u8>, value: Vec<u8>) -> Self {
        Operation { code: OpCode::Put, key, value, inverse: None }
    }

    /// Build a DELETE operation with no inverse attached.
    pub fn delete(key: Vec<u8>) -> Self {
        Operation { code: OpCode::Delete, key, value: Vec::new(), inverse: None }
    }

    /// Attach `inverse` to this operation, replacing any previous one.
    pub fn with_inverse(mut self, inverse: Operation) -> Self {
        self.inverse = Some(Box::new(inverse));
        self
    }
}

impl Encode for Operation {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        self.code.to_i32().encode_to(buf)?;
        self.key.encode_to(buf)?;
        self.value.encode_to(buf)?;
        match &self.inverse {
            None => 0u8.encode_to(buf)?,
            Some(inner) => {
                1u8.encode_to(buf)?;
                inner.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for Operation {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (code_raw, n) = i32::decode_from(&buf[offset..])?;
        offset += n;
        let code = OpCode::from_i32(code_raw)
            .ok_or(EncodingError::InvalidTag { tag: code_raw as u32, type_name: "OpCode" })?;
        let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (has_inverse, n) = u8::decode_from(&buf[offset..])?;
        offset += n;
        let inverse = if has_inverse == 1 {
            let (inner, n) = Operation::decode_from(&buf[offset..])?;
            offset += n;
            Some(Box::new(inner))
        } else {
            None
        };
        Ok((Operation { code, key, value, inverse }, offset))
    }
}

/// The append-only, paged write-ahead log.
pub struct Wal {
    store: ChunkStore,
}

impl Wal {
    /// Open or create the WAL file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Wal { store: ChunkStore::open(path)? })
    }

    /// Append one operation, returning its starting chunk index.
    pub fn append(&self, op: &Operation) -> Result<u64> {
        let bytes = encoding::encode_to_vec(op)?;
        Ok(self.store.write(&bytes)?)
    }

    /// Stream every operation from the beginning of the log, in the order
    /// they were appended.
    pub fn replay_iter(&self) -> WalIter<'_> {
        WalIter { store: &self.store, cursor: 0 }
    }

    /// Flush buffered writes and release the underlying file.
    pub fn close(&self) -> Result<()> {
        Ok(self.store.close()?)
    }
}

/// Sequential replay iterator over a [`Wal`]'s operations.
pub struct WalIter<'a> {
    store: &'a ChunkStore,
    cursor: u64,
}

impl Iterator for WalIter<'_> {
    type Item = Result<Operation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.store.count() {
            return None;
        }
        match self.store.read_chain(self.cursor) {
            Ok((bytes, next)) => {
                self.cursor = next;
                match encoding::decode_from_slice::<Operation>(&bytes) {
                    Ok((op, _)) => Some(Ok(op)),
                    Err(e) => Some(Err(WalError::Encoding(e))),
                }
            }
            Err(ChunkStoreError::Eof) => None,
            Err(e) => Some(Err(WalError::ChunkStore(e))),
        }
    }
}
