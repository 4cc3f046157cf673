//! # AeternusDB
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture. Designed for
//! fast writes and crash-safe operation with a single data directory per
//! engine instance.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │  ┌────────────┐   put/delete    ┌────────────────────────┐ │
//! │  │  Memtable  │◄────────────────┤  WAL staging queue      │ │
//! │  │ (skip list)│  flush_threshold│  → WAL writer thread    │ │
//! │  └─────┬──────┘                 └────────────────────────┘ │
//! │        │ flush queue                                       │
//! │        ▼                                                    │
//! │  ┌────────────┐   compaction_interval   ┌─────────────────┐│
//! │  │  Flusher   │────────────────────────►│    Compactor    ││
//! │  │  thread    │                         │     thread      ││
//! │  └─────┬──────┘                         └────────┬────────┘│
//! │        ▼                                         ▼         │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │     SSTables (oldest→newest), each with a cuckoo      │  │
//! │  │     filter mapping key → chunk index                 │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, scan, transactions, recovery |
//! | [`memtable`] | In-memory sorted write buffer (skip list) with per-key expiry |
//! | [`wal`] | Append-only, paged log of encoded operations, replayed on recovery |
//! | [`sstable`] | Immutable, sorted, on-disk tables with a tail-placed cuckoo filter |
//! | [`compaction`] | Periodic pairwise merge of the oldest SSTables |
//! | [`filter`] | Cuckoo-style approximate-membership filter mapping key → chunk index |
//! | [`compression`] | Self-contained LZ77-style codec for on-disk key/value bytes |
//! | [`chunk_store`] | Paged file abstraction shared by the WAL and every SSTable |
//! | [`encoding`] | Hand-written binary `Encode`/`Decode` trait pair for on-disk structures |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is staged to the WAL before
//!   (concurrently with) landing in the memtable, for crash recovery via
//!   [`engine::Engine::recover_from_wal`].
//! - **Background flush and compaction pipeline** — three cooperating
//!   threads (WAL writer, flusher, compactor) drain queues independently of
//!   the calling thread.
//! - **Approximate-membership filters with payload** — each SSTable carries
//!   a cuckoo filter that resolves a membership hit directly to a chunk
//!   index, skipping a linear scan on point lookups.
//! - **Per-field compression** — key and value bytes are compressed
//!   independently when enabled; the memtable itself is never compressed.
//! - **Transactions with rollback** — operations recorded against a
//!   transaction id carry their own inverse, so a failed or explicit
//!   rollback can undo a partial commit.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aeternusdb::engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::default();
//! let engine = Engine::open("/tmp/my_db", config).unwrap();
//!
//! // Write
//! engine.put(b"hello".to_vec(), b"world".to_vec(), None).unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! engine.delete(b"hello".to_vec()).unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//!
//! // Scan
//! engine.put(b"a".to_vec(), b"1".to_vec(), None).unwrap();
//! engine.put(b"b".to_vec(), b"2".to_vec(), None).unwrap();
//! let pairs = engine.range(b"a", b"c").unwrap();
//! assert_eq!(pairs.len(), 2);
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

pub mod chunk_store;
pub mod compaction;
pub mod compression;
pub mod encoding;
pub mod engine;
pub mod filter;
pub mod memtable;
pub mod sstable;
pub mod wal;
