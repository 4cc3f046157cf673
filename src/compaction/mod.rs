//! Compaction
//!
//! A single periodic strategy: pair the oldest SSTables two at a time and
//! merge each pair into a replacement table in parallel, dropping
//! tombstones and expired records along the way. Exactly two SSTables is a
//! steady state the compactor intentionally leaves alone (§9 open
//! question), since merging the same pair over and over produces no
//! progress.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::sstable::{Record, Sstable, SstableError};

/// Errors produced during a compaction pass.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// An underlying SSTable operation failed.
    #[error("sstable error during compaction: {0}")]
    Sstable(#[from] SstableError),
}

type Result<T> = std::result::Result<T, CompactionError>;

struct Pair {
    older: Sstable,
    newer: Option<Sstable>,
    ordinal: Option<u64>,
}

/// Run one compaction pass over `tables` (ordered oldest-to-newest),
/// returning the replacement list. `next_ordinal` supplies fresh filenames
/// for merged tables and is advanced by the number consumed.
pub fn compact_pass(
    tables: Vec<Sstable>,
    dir: &Path,
    compress: bool,
    now: i64,
    next_ordinal: &mut u64,
) -> Result<Vec<Sstable>> {
    if tables.len() < 2 {
        return Ok(tables);
    }
    if tables.len() == 2 {
        debug!("skipping compaction pass: exactly two sstables present");
        return Ok(tables);
    }

    let mut pairs = Vec::new();
    let mut iter = tables.into_iter();
    loop {
        let older = match iter.next() {
            Some(t) => t,
            None => break,
        };
        match iter.next() {
            Some(newer) => {
                let ordinal = *next_ordinal;
                *next_ordinal += 1;
                pairs.push(Pair { older, newer: Some(newer), ordinal: Some(ordinal) });
            }
            None => pairs.push(Pair { older, newer: None, ordinal: None }),
        }
    }

    let merge_results: Vec<Option<Result<Sstable>>> = crossbeam::scope(|scope| {
        let handles: Vec<Option<_>> = pairs
            .iter()
            .map(|pair| {
                pair.newer.as_ref().zip(pair.ordinal).map(|(newer, ordinal)| {
                    let older = &pair.older;
                    scope.spawn(move |_| merge_pair(dir, ordinal, compress, now, older, newer))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.map(|handle| handle.join().expect("compaction worker panicked")))
            .collect()
    })
    .expect("compaction scope panicked");

    let mut output = Vec::with_capacity(pairs.len() * 2);
    for (pair, result) in pairs.into_iter().zip(merge_results.into_iter()) {
        match result {
            Some(Ok(new_table)) => output.push(new_table),
            Some(Err(err)) => {
                warn!(%err, "compaction pair failed; keeping original tables");
                output.push(pair.older);
                if let Some(newer) = pair.newer {
                    output.push(newer);
                }
            }
            None => output.push(pair.older),
        }
    }
    info!(tables = output.len(), "compaction pass complete");
    Ok(output)
}

fn merge_pair(
    dir: &Path,
    ordinal: u64,
    compress: bool,
    now: i64,
    older: &Sstable,
    newer: &Sstable,
) -> Result<Sstable> {
    let older_records: Vec<Record> =
        older.iter_records().collect::<std::result::Result<_, SstableError>>()?;
    let newer_records: Vec<Record> =
        newer.iter_records().collect::<std::result::Result<_, SstableError>>()?;
    let merged = merge_records(older_records, newer_records, now);

    let path = dir.join(format!("sstable_{ordinal}.sst"));
    let table = Sstable::build(&path, compress, merged)?;

    older.close()?;
    older.delete_file()?;
    newer.close()?;
    newer.delete_file()?;

    debug!(path = %path.display(), "merged compaction pair");
    Ok(table)
}

/// Merge two key-ascending record streams, keeping the newer table's
/// version of a duplicate key, and dropping tombstones and expired
/// records — the only place they are permanently discarded.
fn merge_records(
    older: Vec<Record>,
    newer: Vec<Record>,
    now: i64,
) -> Vec<(Vec<u8>, Vec<u8>, Option<i64>)> {
    let mut out = Vec::with_capacity(older.len() + newer.len());
    let mut i = 0;
    let mut j = 0;
    while i < older.len() && j < newer.len() {
        match older[i].key.cmp(&newer[j].key) {
            Ordering::Less => {
                push_if_live(&older[i], now, &mut out);
                i += 1;
            }
            Ordering::Greater => {
                push_if_live(&newer[j], now, &mut out);
                j += 1;
            }
            Ordering::Equal => {
                push_if_live(&newer[j], now, &mut out);
                i += 1;
                j += 1;
            }
        }
    }
    while i < older.len() {
        push_if_live(&older[i], now, &mut out);
        i += 1;
    }
    while j < newer.len() {
        push_if_live(&newer[j], now, &mut out);
        j += 1;
    }
    out
}

fn push_if_live(record: &Record, now: i64, out: &mut Vec<(Vec<u8>, Vec<u8>, Option<i64>)>) {
    if record.value == crate::engine::TOMBSTONE {
        return;
    }
    if record.expires_at.is_some_and(|exp| now >= exp) {
        return;
    }
    out.push((record.key.clone(), record.value.clone(), record.expires_at));
}
