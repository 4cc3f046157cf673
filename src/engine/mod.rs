//! # LSM Storage Engine
//!
//! Orchestrates the memtable, WAL, SSTables, and the background flush and
//! compaction pipeline behind one public, synchronous API. A write is
//! staged to the WAL and applied to the memtable under a single exclusive
//! lock; crossing the configured byte threshold swaps in a fresh memtable
//! and hands the old one to the flusher. Reads consult the memtable, then
//! every SSTable newest-to-oldest. See `crate::memtable`, `crate::wal`,
//! `crate::sstable`, and `crate::compaction` for the components this module
//! coordinates.

mod utils;


pub use utils::{EngineIterator, EngineStats, TOMBSTONE};
use utils::now_nanos;

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use thiserror::Error;
use tracing::{debug, error, info, info_span, trace, warn};

use crate::compaction::{self, CompactionError};
use crate::compression::{self, CompressionError};
use crate::memtable::{Memtable, MemtableError, DEFAULT_MAX_LEVEL, DEFAULT_PROBABILITY};
use crate::sstable::{Sstable, SstableError};
use crate::wal::{OpCode, Operation, Wal, WalError};

const IDLE_SLEEP: Duration = Duration::from_micros(5);

/// Errors surfaced by every public engine operation. Every concrete
/// module's own error enum converts into this one via `#[from]`, so
/// callers see one taxonomy regardless of which layer actually failed.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `Put`/`Delete` supplied an empty key.
    #[error("key must not be empty")]
    EmptyKey,

    /// `Put` supplied an empty value.
    #[error("value must not be empty")]
    EmptyValue,

    /// `Put` supplied a value equal to the reserved tombstone sentinel.
    #[error("value equals the reserved tombstone sentinel")]
    ReservedTombstoneValue,

    /// A transaction operation or commit/rollback referenced an id that is
    /// not (or no longer) registered.
    #[error("unknown transaction {0}")]
    UnknownTransaction(u64),

    /// A transaction or WAL replay encountered an operation code that
    /// cannot be applied (a GET reaching commit/replay).
    #[error("invalid operation code encountered during commit or recovery")]
    InvalidOperationCode,

    /// Memtable-layer failure.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// WAL-layer failure.
    #[error("wal error: {0}")]
    Wal(#[from] WalError),

    /// SSTable-layer failure.
    #[error("sstable error: {0}")]
    Sstable(#[from] SstableError),

    /// Compaction-layer failure.
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// Compression codec failure (corrupt compressed bytes on disk).
    #[error("compression error: {0}")]
    Compression(#[from] CompressionError),

    /// Filesystem failure outside any chunk store (directory creation,
    /// reading the data directory's entries).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, EngineError>;

/// Every recognized option at `Engine::open`, per §6.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memtable byte size at which a flush is triggered.
    pub flush_threshold: usize,
    /// Interval between compaction attempts.
    pub compaction_interval: Duration,
    /// Route background-thread failures to `tracing` (`true`) or `eprintln!` (`false`).
    pub logging: bool,
    /// Compress record key/value bytes (WAL and SSTable) independently per field.
    pub compress: bool,
    /// Override the memtable's maximum skip-list level (default 12).
    pub memtable_max_level: Option<usize>,
    /// Override the memtable's level-advance probability (default 0.25).
    pub memtable_probability: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            flush_threshold: 4 * 1024 * 1024,
            compaction_interval: Duration::from_secs(60),
            logging: true,
            compress: false,
            memtable_max_level: None,
            memtable_probability: None,
        }
    }
}

/// A registered transaction: the ordered list of applied operations, each
/// carrying its own inverse for `rollback`.
#[derive(Default)]
struct Transaction {
    operations: Vec<Operation>,
}

struct BackgroundThreads {
    wal_writer: JoinHandle<()>,
    flusher: JoinHandle<()>,
    compactor: JoinHandle<()>,
}

/// An open LSM storage engine bound to one data directory.
pub struct Engine {
    dir: Arc<PathBuf>,
    config: EngineConfig,
    memtable_max_level: usize,
    memtable_probability: f64,
    memtable: RwLock<Memtable>,
    sstables: Arc<RwLock<Vec<Sstable>>>,
    wal: Arc<Wal>,
    wal_tx: Sender<Operation>,
    flush_tx: Sender<Memtable>,
    transactions: Mutex<HashMap<u64, Transaction>>,
    next_txn_id: AtomicU64,
    next_sstable_ordinal: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    threads: Mutex<Option<BackgroundThreads>>,
}

impl Engine {
    /// Open (creating if absent) an engine rooted at `dir`: discover
    /// existing SSTables (oldest-to-newest by modification time), open or
    /// create the WAL, and start the three background threads.
    pub fn open(dir: impl AsRef<Path>, config: EngineConfig) -> Result<Engine> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let memtable_max_level = config.memtable_max_level.unwrap_or(DEFAULT_MAX_LEVEL);
        let memtable_probability = config.memtable_probability.unwrap_or(DEFAULT_PROBABILITY);

        let mut sstable_paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "sst"))
            .collect();
        sstable_paths.sort_by_key(|path| {
            fs::metadata(path).and_then(|m| m.modified()).unwrap_or(std::time::UNIX_EPOCH)
        });

        let mut sstables = Vec::with_capacity(sstable_paths.len());
        let mut max_ordinal = 0u64;
        for path in &sstable_paths {
            if let Some(ordinal) = parse_ordinal(path) {
                max_ordinal = max_ordinal.max(ordinal + 1);
            }
            sstables.push(Sstable::open(path)?);
        }

        let wal = Arc::new(Wal::open(&dir.join("wal.wal"))?);

        let (wal_tx, wal_rx) = crossbeam_channel::unbounded::<Operation>();
        let (flush_tx, flush_rx) = crossbeam_channel::unbounded::<Memtable>();
        let stop = Arc::new(AtomicBool::new(false));
        let dir = Arc::new(dir);
        let sstables = Arc::new(RwLock::new(sstables));
        let next_sstable_ordinal = Arc::new(AtomicU64::new(max_ordinal));

        let threads = spawn_background_threads(
            Arc::clone(&wal),
            wal_rx,
            Arc::clone(&sstables),
            flush_rx,
            Arc::clone(&dir),
            Arc::clone(&next_sstable_ordinal),
            &config,
            Arc::clone(&stop),
        );

        info!(dir = %dir.display(), sstables = sstable_paths.len(), "engine opened");

        Ok(Engine {
            memtable: RwLock::new(Memtable::new(memtable_max_level, memtable_probability)),
            memtable_max_level,
            memtable_probability,
            dir,
            sstables,
            wal,
            wal_tx,
            flush_tx,
            transactions: Mutex::new(HashMap::new()),
            next_txn_id: AtomicU64::new(0),
            next_sstable_ordinal,
            stop,
            threads: Mutex::new(Some(threads)),
            config,
        })
    }

    /// Drain any non-empty memtable to the flush queue, signal the
    /// background threads to stop, join them (they must drain their
    /// queues first), then close every SSTable and the WAL.
    pub fn close(&self) -> Result<()> {
        {
            let mut mem = self.memtable.write().expect("memtable poisoned");
            if !mem.is_empty() {
                self.move_memtable_to_flush_queue(&mut mem);
            }
        }

        self.stop.store(true, Ordering::SeqCst);
        if let Some(threads) = self.threads.lock().expect("threads poisoned").take() {
            threads.wal_writer.join().expect("wal writer thread panicked");
            threads.flusher.join().expect("flusher thread panicked");
            threads.compactor.join().expect("compactor thread panicked");
        }

        for table in self.sstables.read().expect("sstables poisoned").iter() {
            table.close()?;
        }
        self.wal.close()?;
        info!("engine closed");
        Ok(())
    }

    fn stage_wal(&self, op: Operation) {
        if self.wal_tx.send(op).is_err() {
            warn!("failed to stage WAL operation: writer thread has exited");
        }
    }

    fn move_memtable_to_flush_queue(&self, mem: &mut Memtable) {
        let fresh = Memtable::new(self.memtable_max_level, self.memtable_probability);
        let frozen = std::mem::replace(mem, fresh);
        if frozen.is_empty() {
            return;
        }
        debug!(bytes = frozen.size(), entries = frozen.len(), "moving memtable to flush queue");
        if self.flush_tx.send(frozen).is_err() {
            warn!("failed to stage memtable for flush: flusher thread has exited");
        }
    }

    fn maybe_flush(&self, mem: &mut Memtable) {
        if mem.size() >= self.config.flush_threshold {
            self.move_memtable_to_flush_queue(mem);
        }
    }

    /// Force the current memtable to the flush queue, even below the
    /// configured byte threshold.
    pub fn escalate_flush(&self) -> Result<()> {
        let mut mem = self.memtable.write().expect("memtable poisoned");
        self.move_memtable_to_flush_queue(&mut mem);
        Ok(())
    }

    /// Force one compaction pass over the current SSTable list, in-line
    /// rather than waiting for the periodic compactor thread. The SSTable
    /// list's exclusive lock is held for the whole pass, including the
    /// parallel pair-merge fan-out, so a concurrent `get`/scan never
    /// observes the list emptied mid-compaction.
    pub fn escalate_compaction(&self) -> Result<()> {
        let now = now_nanos();
        let mut guard = self.sstables.write().expect("sstables poisoned");
        let current = std::mem::take(&mut *guard);
        let mut ordinal = self.next_sstable_ordinal.load(Ordering::SeqCst);
        let merged =
            compaction::compact_pass(current, &self.dir, self.config.compress, now, &mut ordinal)?;
        self.next_sstable_ordinal.store(ordinal, Ordering::SeqCst);
        *guard = merged;
        Ok(())
    }

    /// Insert or overwrite `key`, rejecting an empty key/value or a value
    /// equal to the reserved tombstone sentinel. Stages a WAL entry and
    /// applies the write to the memtable under its exclusive lock,
    /// escalating to a flush if the byte threshold is now met.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        if value.is_empty() {
            return Err(EngineError::EmptyValue);
        }
        if value == TOMBSTONE {
            return Err(EngineError::ReservedTombstoneValue);
        }
        let expires_at = ttl.map(|d| now_nanos() + d.as_nanos() as i64);

        let (wal_key, wal_value) = if self.config.compress {
            (compression::compress(&key), compression::compress(&value))
        } else {
            (key.clone(), value.clone())
        };
        self.stage_wal(Operation::put(wal_key, wal_value));

        let mut mem = self.memtable.write().expect("memtable poisoned");
        mem.insert(key, value, expires_at)?;
        self.maybe_flush(&mut mem);
        Ok(())
    }

    /// Tombstone `key`, rejecting an empty key.
    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        let wal_key =
            if self.config.compress { compression::compress(&key) } else { key.clone() };
        self.stage_wal(Operation::delete(wal_key));

        let mut mem = self.memtable.write().expect("memtable poisoned");
        mem.insert(key, TOMBSTONE.to_vec(), None)?;
        self.maybe_flush(&mut mem);
        Ok(())
    }

    /// Look up `key`: memtable first, then every SSTable newest-to-oldest.
    /// The first live hit wins; a tombstone or an expired TTL at any layer
    /// resolves to absent without consulting older layers.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let now = now_nanos();
        {
            let mem = self.memtable.read().expect("memtable poisoned");
            let (value, found) = mem.search(key, now);
            if found {
                return Ok(if value == TOMBSTONE { None } else { Some(value) });
            }
        }
        let tables = self.sstables.read().expect("sstables poisoned");
        for table in tables.iter().rev() {
            if let Some((value, expires_at)) = table.get(key)? {
                if value == TOMBSTONE || expires_at.is_some_and(|exp| now >= exp) {
                    return Ok(None);
                }
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Walk the memtable forward, then every SSTable newest-to-oldest,
    /// keeping the first (therefore newest) occurrence of each candidate
    /// key a tombstone/expiry does not suppress.
    fn scan_internal(&self, predicate: impl Fn(&[u8]) -> bool) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let now = now_nanos();
        let mut acc: Vec<(Vec<u8>, Option<Vec<u8>>)> = Vec::new();

        {
            let mem = self.memtable.read().expect("memtable poisoned");
            for (key, value, ttl) in mem.iter_forward() {
                visit_scan_candidate(&mut acc, &predicate, now, key, value, ttl);
            }
        }
        {
            let tables = self.sstables.read().expect("sstables poisoned");
            for table in tables.iter().rev() {
                for record in table.iter_records() {
                    let record = record?;
                    visit_scan_candidate(
                        &mut acc,
                        &predicate,
                        now,
                        record.key,
                        record.value,
                        record.expires_at,
                    );
                }
            }
        }

        Ok(acc.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect())
    }

    /// Exactly the requested keys among those `keys`, live ones only.
    pub fn n_get(&self, keys: &[Vec<u8>]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let wanted: BTreeSet<Vec<u8>> = keys.iter().cloned().collect();
        self.scan_internal(move |k| wanted.contains(k))
    }

    /// Live pairs with key strictly greater than `start`.
    pub fn greater_than(&self, start: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = start.to_vec();
        self.scan_internal(move |k| k > start.as_slice())
    }

    /// Live pairs with key greater than or equal to `start`.
    pub fn greater_than_eq(&self, start: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = start.to_vec();
        self.scan_internal(move |k| k >= start.as_slice())
    }

    /// Live pairs with key strictly less than `end`.
    pub fn less_than(&self, end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let end = end.to_vec();
        self.scan_internal(move |k| k < end.as_slice())
    }

    /// Live pairs with key less than or equal to `end`.
    pub fn less_than_eq(&self, end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let end = end.to_vec();
        self.scan_internal(move |k| k <= end.as_slice())
    }

    /// Live pairs with `start <= key <= end` (both bounds inclusive).
    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let (start, end) = (start.to_vec(), end.to_vec());
        self.scan_internal(move |k| k >= start.as_slice() && k <= end.as_slice())
    }

    /// Live pairs with key outside the closed `[start, end]` interval.
    pub fn n_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let (start, end) = (start.to_vec(), end.to_vec());
        self.scan_internal(move |k| !(k >= start.as_slice() && k <= end.as_slice()))
    }

    /// Snapshot an ordered, bidirectional walk over every live pair.
    pub fn new_iterator(&self) -> Result<EngineIterator> {
        let items = self.scan_internal(|_| true)?;
        Ok(EngineIterator::new(items))
    }

    /// Register a fresh transaction and return its id.
    pub fn begin_transaction(&self) -> u64 {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.transactions.lock().expect("transactions poisoned").insert(id, Transaction::default());
        trace!(txn = id, "transaction begun");
        id
    }

    /// Record an operation against `txn`. GETs are silently dropped; a PUT
    /// records a DELETE of the same key as its inverse, and a DELETE
    /// records a PUT of the caller-supplied prior value as its inverse.
    pub fn add_operation(
        &self,
        txn: u64,
        code: OpCode,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<()> {
        let mut txns = self.transactions.lock().expect("transactions poisoned");
        let entry = txns.get_mut(&txn).ok_or(EngineError::UnknownTransaction(txn))?;
        match code {
            OpCode::Get => {}
            OpCode::Put => {
                let inverse = Operation::delete(key.clone());
                entry.operations.push(Operation::put(key, value).with_inverse(inverse));
            }
            OpCode::Delete => {
                let inverse = Operation::put(key.clone(), value);
                entry.operations.push(Operation::delete(key).with_inverse(inverse));
            }
        }
        Ok(())
    }

    fn apply_operation(&self, mem: &mut Memtable, op: &Operation) -> Result<()> {
        match op.code {
            OpCode::Put => {
                let (wal_key, wal_value) = if self.config.compress {
                    (compression::compress(&op.key), compression::compress(&op.value))
                } else {
                    (op.key.clone(), op.value.clone())
                };
                self.stage_wal(Operation::put(wal_key, wal_value));
                mem.insert(op.key.clone(), op.value.clone(), None)?;
                Ok(())
            }
            OpCode::Delete => {
                let wal_key =
                    if self.config.compress { compression::compress(&op.key) } else { op.key.clone() };
                self.stage_wal(Operation::delete(wal_key));
                mem.insert(op.key.clone(), TOMBSTONE.to_vec(), None)?;
                Ok(())
            }
            OpCode::Get => Err(EngineError::InvalidOperationCode),
        }
    }

    /// Apply every recorded operation of `txn`, in order, under the
    /// memtable's exclusive lock. An invalid op code aborts the remaining
    /// operations, rolls the transaction back, and surfaces the error.
    pub fn commit(&self, txn: u64) -> Result<()> {
        let ops = {
            let txns = self.transactions.lock().expect("transactions poisoned");
            let entry = txns.get(&txn).ok_or(EngineError::UnknownTransaction(txn))?;
            entry.operations.clone()
        };

        let mut mem = self.memtable.write().expect("memtable poisoned");
        for op in &ops {
            if let Err(err) = self.apply_operation(&mut mem, op) {
                drop(mem);
                let _ = self.rollback(txn);
                return Err(err);
            }
        }
        self.maybe_flush(&mut mem);
        drop(mem);

        info!(txn, ops = ops.len(), "transaction committed");
        Ok(())
    }

    /// Apply `txn`'s recorded inverses in reverse order, under the
    /// memtable's exclusive lock. Valid both after a successful commit and
    /// after a failed one.
    pub fn rollback(&self, txn: u64) -> Result<()> {
        let ops = {
            let txns = self.transactions.lock().expect("transactions poisoned");
            let entry = txns.get(&txn).ok_or(EngineError::UnknownTransaction(txn))?;
            entry.operations.clone()
        };

        let mut mem = self.memtable.write().expect("memtable poisoned");
        for op in ops.iter().rev() {
            if let Some(inverse) = &op.inverse {
                self.apply_operation(&mut mem, inverse)?;
            }
        }
        self.maybe_flush(&mut mem);
        drop(mem);

        info!(txn, "transaction rolled back");
        Ok(())
    }

    /// Drop `txn` from the registry; it becomes unusable afterward.
    pub fn remove_transaction(&self, txn: u64) -> Result<()> {
        self.transactions
            .lock()
            .expect("transactions poisoned")
            .remove(&txn)
            .ok_or(EngineError::UnknownTransaction(txn))?;
        Ok(())
    }

    /// Replay the WAL from the beginning, decompressing staged bytes if
    /// compression is enabled and re-applying each PUT/DELETE through the
    /// engine's normal paths. Intended for recovery into an otherwise
    /// empty data directory; a GET op code or an unrecognized one is
    /// fatal, since the WAL should never have persisted either.
    pub fn recover_from_wal(&self) -> Result<()> {
        info!("recovering from WAL");
        let mut replayed = 0usize;
        for op in self.wal.replay_iter() {
            let op = op?;
            let (key, value) = if self.config.compress {
                (compression::decompress(&op.key)?, compression::decompress(&op.value)?)
            } else {
                (op.key, op.value)
            };
            match op.code {
                OpCode::Put => self.put(key, value, None)?,
                OpCode::Delete => self.delete(key)?,
                OpCode::Get => return Err(EngineError::InvalidOperationCode),
            }
            replayed += 1;
        }
        info!(replayed, "WAL recovery complete");
        Ok(())
    }

    /// Point-in-time counters: memtable size/entry count, live SSTable
    /// count and total bytes, and the two background queue depths.
    pub fn stats(&self) -> EngineStats {
        let mem = self.memtable.read().expect("memtable poisoned");
        let tables = self.sstables.read().expect("sstables poisoned");
        EngineStats {
            memtable_bytes: mem.size(),
            memtable_entries: mem.len(),
            sstable_count: tables.len(),
            sstable_bytes: tables.iter().map(|t| t.size_bytes()).sum(),
            wal_queue_depth: self.wal_tx.len(),
            flush_queue_depth: self.flush_tx.len(),
        }
    }
}

fn visit_scan_candidate(
    acc: &mut Vec<(Vec<u8>, Option<Vec<u8>>)>,
    predicate: &impl Fn(&[u8]) -> bool,
    now: i64,
    key: Vec<u8>,
    value: Vec<u8>,
    expires_at: Option<i64>,
) {
    if !predicate(&key) {
        return;
    }
    if let Err(pos) = acc.binary_search_by(|(k, _)| k.as_slice().cmp(key.as_slice())) {
        let live = value.as_slice() != TOMBSTONE && !expires_at.is_some_and(|exp| now >= exp);
        acc.insert(pos, (key, live.then_some(value)));
    }
}

fn parse_ordinal(path: &Path) -> Option<u64> {
    path.file_stem()?.to_str()?.strip_prefix("sstable_")?.parse().ok()
}

fn log_background_failure(logging: bool, context: &str, err: &dyn std::fmt::Display) {
    if logging {
        error!(%err, context);
    } else {
        eprintln!("{context}: {err}");
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_background_threads(
    wal: Arc<Wal>,
    wal_rx: Receiver<Operation>,
    sstables: Arc<RwLock<Vec<Sstable>>>,
    flush_rx: Receiver<Memtable>,
    dir: Arc<PathBuf>,
    next_sstable_ordinal: Arc<AtomicU64>,
    config: &EngineConfig,
    stop: Arc<AtomicBool>,
) -> BackgroundThreads {
    let wal_writer = {
        let wal = Arc::clone(&wal);
        let stop = Arc::clone(&stop);
        let logging = config.logging;
        thread::Builder::new()
            .name("wal-writer".into())
            .spawn(move || wal_writer_loop(wal, wal_rx, stop, logging))
            .expect("failed to spawn wal writer thread")
    };

    let flusher = {
        let sstables = Arc::clone(&sstables);
        let dir = Arc::clone(&dir);
        let next_sstable_ordinal = Arc::clone(&next_sstable_ordinal);
        let stop = Arc::clone(&stop);
        let compress = config.compress;
        let logging = config.logging;
        thread::Builder::new()
            .name("flusher".into())
            .spawn(move || {
                flusher_loop(sstables, flush_rx, dir, next_sstable_ordinal, compress, stop, logging)
            })
            .expect("failed to spawn flusher thread")
    };

    let compactor = {
        let sstables = Arc::clone(&sstables);
        let dir = Arc::clone(&dir);
        let next_sstable_ordinal = Arc::clone(&next_sstable_ordinal);
        let stop = Arc::clone(&stop);
        let compress = config.compress;
        let interval = config.compaction_interval;
        let logging = config.logging;
        thread::Builder::new()
            .name("compactor".into())
            .spawn(move || {
                compactor_loop(sstables, dir, next_sstable_ordinal, compress, interval, stop, logging)
            })
            .expect("failed to spawn compactor thread")
    };

    BackgroundThreads { wal_writer, flusher, compactor }
}

fn wal_writer_loop(wal: Arc<Wal>, rx: Receiver<Operation>, stop: Arc<AtomicBool>, logging: bool) {
    let span = info_span!("wal-writer");
    let _guard = span.enter();
    loop {
        match rx.try_recv() {
            Ok(op) => {
                if let Err(err) = wal.append(&op) {
                    log_background_failure(logging, "WAL append failed", &err);
                }
            }
            Err(TryRecvError::Empty) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(IDLE_SLEEP);
            }
            Err(TryRecvError::Disconnected) => break,
        }
    }
    for op in rx.try_iter() {
        if let Err(err) = wal.append(&op) {
            log_background_failure(logging, "WAL append failed during drain", &err);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn flusher_loop(
    sstables: Arc<RwLock<Vec<Sstable>>>,
    rx: Receiver<Memtable>,
    dir: Arc<PathBuf>,
    next_sstable_ordinal: Arc<AtomicU64>,
    compress: bool,
    stop: Arc<AtomicBool>,
    logging: bool,
) {
    let span = info_span!("flusher");
    let _guard = span.enter();
    loop {
        match rx.try_recv() {
            Ok(mem) => flush_one(&sstables, &mem, &dir, &next_sstable_ordinal, compress, logging),
            Err(TryRecvError::Empty) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                thread::sleep(IDLE_SLEEP);
            }
            Err(TryRecvError::Disconnected) => break,
        }
    }
    for mem in rx.try_iter() {
        flush_one(&sstables, &mem, &dir, &next_sstable_ordinal, compress, logging);
    }
}

fn flush_one(
    sstables: &Arc<RwLock<Vec<Sstable>>>,
    mem: &Memtable,
    dir: &Path,
    next_sstable_ordinal: &AtomicU64,
    compress: bool,
    logging: bool,
) {
    let ordinal = next_sstable_ordinal.fetch_add(1, Ordering::SeqCst);
    let now = now_nanos();
    let records = mem
        .iter_forward()
        .filter(|(_, _, expires_at)| !expires_at.is_some_and(|exp| now >= exp));
    let path = dir.join(format!("sstable_{ordinal}.sst"));
    match Sstable::build(&path, compress, records) {
        Ok(table) => {
            debug!(path = %path.display(), "flushed memtable to sstable");
            sstables.write().expect("sstables poisoned").push(table);
        }
        Err(err) => log_background_failure(logging, "memtable flush failed", &err),
    }
}

#[allow(clippy::too_many_arguments)]
fn compactor_loop(
    sstables: Arc<RwLock<Vec<Sstable>>>,
    dir: Arc<PathBuf>,
    next_sstable_ordinal: Arc<AtomicU64>,
    compress: bool,
    interval: Duration,
    stop: Arc<AtomicBool>,
    logging: bool,
) {
    let span = info_span!("compactor");
    let _guard = span.enter();
    let mut last_run = std::time::Instant::now();
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if last_run.elapsed() < interval {
            thread::sleep(IDLE_SLEEP);
            continue;
        }
        last_run = std::time::Instant::now();
        run_compaction_pass(&sstables, &dir, &next_sstable_ordinal, compress, logging);
    }
}

fn run_compaction_pass(
    sstables: &Arc<RwLock<Vec<Sstable>>>,
    dir: &Path,
    next_sstable_ordinal: &AtomicU64,
    compress: bool,
    logging: bool,
) {
    let now = now_nanos();
    // Held for the whole pass, including the parallel pair-merge fan-out, so
    // a concurrent get/scan never observes the list emptied mid-compaction.
    let mut guard = sstables.write().expect("sstables poisoned");
    let current = std::mem::take(&mut *guard);
    let mut ordinal = next_sstable_ordinal.load(Ordering::SeqCst);
    match compaction::compact_pass(current, dir, compress, now, &mut ordinal) {
        Ok(merged) => {
            next_sstable_ordinal.store(ordinal, Ordering::SeqCst);
            *guard = merged;
        }
        Err(err) => log_background_failure(logging, "compaction pass failed", &err),
    }
}
