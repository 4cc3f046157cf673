//! Sorted in-memory buffer
//!
//! A probabilistic ordered map (skip list) that serves as the engine's
//! write buffer. Keys are stored in ascending byte order; each entry
//! carries an optional absolute expiry timestamp. The structure is not
//! internally synchronized — the engine holds it behind its own
//! exclusive/shared lock, matching how every other layer here is a bare
//! data structure rather than a self-locking one.

#[cfg(test)]
mod tests;

use rand::Rng;
use thiserror::Error;
use tracing::trace;

/// Default maximum number of levels, per §4.4.
pub const DEFAULT_MAX_LEVEL: usize = 12;
/// Default level-advance probability, per §4.4.
pub const DEFAULT_PROBABILITY: f64 = 0.25;

/// Errors produced by the memtable.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Null key or value supplied to an operation that forbids it.
    #[error("key or value must not be empty")]
    EmptyKeyOrValue,
}

type Result<T> = std::result::Result<T, MemtableError>;

#[derive(Clone, Debug)]
struct Node {
    key: Vec<u8>,
    value: Vec<u8>,
    expires_at: Option<i64>,
    forward: Vec<Option<usize>>,
}

/// The in-memory, byte-ordered write buffer.
///
/// Implemented as an arena of nodes linked by per-level forward indices —
/// a skip list without raw pointers, so the whole structure stays safe
/// Rust. `insert` is an upsert: overwriting an existing key replaces its
/// value and TTL in place rather than growing the node list.
#[derive(Clone)]
pub struct Memtable {
    arena: Vec<Node>,
    head: Vec<Option<usize>>,
    max_level: usize,
    probability: f64,
    size_bytes: usize,
    len: usize,
}

impl Memtable {
    /// Create an empty memtable with the given level/probability parameters.
    pub fn new(max_level: usize, probability: f64) -> Self {
        let max_level = max_level.max(1);
        Memtable {
            arena: Vec::new(),
            head: vec![None; max_level],
            max_level,
            probability,
            size_bytes: 0,
            len: 0,
        }
    }

    /// Number of live entries (puts and tombstones alike).
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the memtable holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cumulative byte size of key+value across all live entries.
    pub fn size(&self) -> usize {
        self.size_bytes
    }

    fn random_level(&self) -> usize {
        let mut level = 1;
        let mut rng = rand::rng();
        while level < self.max_level && rng.random::<f64>() < self.probability {
            level += 1;
        }
        level
    }

    fn key_at(&self, idx: Option<usize>) -> Option<&[u8]> {
        idx.map(|i| self.arena[i].key.as_slice())
    }

    /// Find, for each level, the last node whose key is `< key` (the
    /// standard skip-list search path used by both insert and lookup).
    fn search_path(&self, key: &[u8]) -> Vec<Option<usize>> {
        let mut update = vec![None; self.max_level];
        let mut cur: Option<usize> = None;
        for level in (0..self.max_level).rev() {
            loop {
                let next = match cur {
                    Some(i) => self.arena[i].forward[level],
                    None => self.head[level],
                };
                match self.key_at(next) {
                    Some(k) if k < key => cur = next,
                    _ => break,
                }
            }
            update[level] = cur;
        }
        update
    }

    /// Insert or update `key`. Overwriting an existing key replaces its
    /// value/TTL and adjusts the size counter by the delta rather than the
    /// full payload.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Option<i64>) -> Result<()> {
        if key.is_empty() {
            return Err(MemtableError::EmptyKeyOrValue);
        }
        let update = self.search_path(&key);
        let existing = update[0]
            .and_then(|i| self.arena[i].forward[0])
            .filter(|&i| self.arena[i].key == key);

        if let Some(idx) = existing {
            let old_len = self.arena[idx].value.len();
            self.size_bytes = self.size_bytes - old_len + value.len();
            self.arena[idx].value = value;
            self.arena[idx].expires_at = ttl;
            trace!(key = %HexKey(&key), "memtable upsert");
            return Ok(());
        }

        let level = self.random_level();
        let new_idx = self.arena.len();
        let mut forward = vec![None; level];
        for (l, slot) in forward.iter_mut().enumerate() {
            let prev = update[l];
            *slot = match prev {
                Some(i) if l < self.arena[i].forward.len() => self.arena[i].forward[l],
                Some(_) => None,
                None => self.head[l],
            };
        }
        self.size_bytes += key.len() + value.len();
        self.len += 1;
        self.arena.push(Node {
            key: key.clone(),
            value,
            expires_at: ttl,
            forward,
        });
        for l in 0..level {
            match update[l] {
                Some(i) => self.arena[i].forward[l] = Some(new_idx),
                None => self.head[l] = Some(new_idx),
            }
        }
        trace!(key = %HexKey(&key), level, "memtable insert");
        Ok(())
    }

    /// Look up `key`, honoring expiry. Returns `(value, found)`; an expired
    /// entry is reported as not found.
    pub fn search(&self, key: &[u8], now: i64) -> (Vec<u8>, bool) {
        let update = self.search_path(key);
        let found = update[0]
            .and_then(|i| self.arena[i].forward[0])
            .filter(|&i| self.arena[i].key == key);
        match found {
            Some(idx) => {
                let node = &self.arena[idx];
                if node.expires_at.is_some_and(|exp| now >= exp) {
                    (Vec::new(), false)
                } else {
                    (node.value.clone(), true)
                }
            }
            None => (Vec::new(), false),
        }
    }

    /// Snapshot this memtable, used at the flush-queue handoff.
    pub fn copy(&self) -> Memtable {
        self.clone()
    }

    /// Forward iterator over `(key, value, ttl)` in ascending key order.
    pub fn iter_forward(&self) -> impl Iterator<Item = (Vec<u8>, Vec<u8>, Option<i64>)> + '_ {
        let mut cur = self.head[0];
        std::iter::from_fn(move || {
            let idx = cur?;
            let node = &self.arena[idx];
            cur = node.forward[0];
            Some((node.key.clone(), node.value.clone(), node.expires_at))
        })
    }

    /// Reverse iterator over `(key, value, ttl)` in descending key order.
    pub fn iter_backward(&self) -> impl Iterator<Item = (Vec<u8>, Vec<u8>, Option<i64>)> + '_ {
        let mut forward: Vec<usize> = Vec::with_capacity(self.len);
        let mut cur = self.head[0];
        while let Some(idx) = cur {
            forward.push(idx);
            cur = self.arena[idx].forward[0];
        }
        forward.into_iter().rev().map(move |idx| {
            let node = &self.arena[idx];
            (node.key.clone(), node.value.clone(), node.expires_at)
        })
    }
}

struct HexKey<'a>(&'a [u8]);

impl std::fmt::Display for HexKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{byte:02x}")?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{byte:02x}")?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
