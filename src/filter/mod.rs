//! Approximate-membership filter with payload
//!
//! A cuckoo-style bucketed table answering, for a key known to the builder,
//! both "is this key possibly present" and, when present, "at which chunk
//! index does its record begin". Built once (during a flush or a
//! compaction pass) and then serialized onto the tail of its owning
//! SSTable; never mutated again after that point.
//!
//! # Implementation notes
//!
//! Each slot stores the low and high 32-bit halves of the key's 64-bit hash
//! alongside the payload chunk index, rather than a single truncated
//! fingerprint plus a side map. Since both bucket candidates are a direct
//! function of those two halves (`low % n`, `high % n`), an evicted entry
//! can always be relocated to its other candidate bucket, and the whole
//! table can be rehashed after a capacity doubling, without ever touching
//! the original key bytes again.

#[cfg(test)]
mod tests;

use thiserror::Error;
use tracing::trace;

use crate::encoding::{Decode, Encode, EncodingError};

/// Initial number of buckets.
pub const INITIAL_BUCKETS: usize = 1000;
/// Slots per bucket.
pub const SLOTS_PER_BUCKET: usize = 8;
/// Maximum relocation attempts before the table is grown.
const MAX_KICKS: usize = 500;

/// Errors produced by the filter module.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Serialized filter bytes were malformed.
    #[error("corrupt filter encoding: {0}")]
    Encoding(#[from] EncodingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    low: u32,
    high: u32,
    chunk_index: u64,
}

impl Encode for Slot {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.low.encode_to(buf)?;
        self.high.encode_to(buf)?;
        self.chunk_index.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Slot {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (low, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (high, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (chunk_index, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Slot { low, high, chunk_index }, offset))
    }
}

/// Cuckoo-style membership filter mapping keys to the chunk index of their
/// record in an owning SSTable.
#[derive(Debug, Clone)]
pub struct CuckooFilter {
    buckets: Vec<[Option<Slot>; SLOTS_PER_BUCKET]>,
    len: usize,
}

impl Default for CuckooFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl CuckooFilter {
    /// Create an empty filter at the default initial capacity.
    pub fn new() -> Self {
        CuckooFilter {
            buckets: vec![[None; SLOTS_PER_BUCKET]; INITIAL_BUCKETS],
            len: 0,
        }
    }

    /// Number of keys currently recorded.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no keys have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    fn hash_halves(key: &[u8]) -> (u32, u32) {
        let h = murmur3_x64_64(key, 0);
        (h as u32, (h >> 32) as u32)
    }

    fn bucket_indices(&self, low: u32, high: u32) -> (usize, usize) {
        let n = self.num_buckets();
        (low as usize % n, high as usize % n)
    }

    /// Record the association `key -> chunk_index`. Grows (doubling
    /// capacity) and rehashes if eviction saturates.
    pub fn insert(&mut self, chunk_index: u64, key: &[u8]) {
        let (low, high) = Self::hash_halves(key);
        self.insert_slot(Slot { low, high, chunk_index });
    }

    fn insert_slot(&mut self, slot: Slot) {
        let (i1, i2) = self.bucket_indices(slot.low, slot.high);
        if self.try_place(i1, slot) || self.try_place(i2, slot) {
            self.len += 1;
            return;
        }

        // Both candidate buckets are full: evict and relocate, doubling
        // capacity if the relocation chain doesn't settle.
        let mut current = slot;
        let mut bucket = i1;
        for _ in 0..MAX_KICKS {
            let slot_idx = (current.low as usize).wrapping_add(bucket) % SLOTS_PER_BUCKET;
            let evicted = self.buckets[bucket][slot_idx].replace(current);
            let evicted = match evicted {
                Some(e) => e,
                None => {
                    self.len += 1;
                    return;
                }
            };
            let (e1, e2) = self.bucket_indices(evicted.low, evicted.high);
            let alt = if e1 == bucket { e2 } else { e1 };
            if self.try_place(alt, evicted) {
                self.len += 1;
                return;
            }
            current = evicted;
            bucket = alt;
        }

        self.grow_and_reinsert(current);
    }

    fn try_place(&mut self, bucket: usize, slot: Slot) -> bool {
        for existing in self.buckets[bucket].iter_mut() {
            if existing.is_none() {
                *existing = Some(slot);
                return true;
            }
        }
        false
    }

    fn grow_and_reinsert(&mut self, pending: Slot) {
        let old_buckets = std::mem::replace(
            &mut self.buckets,
            vec![[None; SLOTS_PER_BUCKET]; self.buckets.len() * 2],
        );
        let old_len = self.len;
        self.len = 0;
        trace!(old = old_buckets.len(), new = self.buckets.len(), "growing cuckoo filter");
        for bucket in old_buckets {
            for slot in bucket.into_iter().flatten() {
                self.insert_slot(slot);
            }
        }
        self.insert_slot(pending);
        debug_assert!(self.len >= old_len);
    }

    /// Look up `key`, returning the chunk index recorded at insertion if
    /// present.
    pub fn lookup(&self, key: &[u8]) -> (u64, bool) {
        let (low, high) = Self::hash_halves(key);
        let (i1, i2) = self.bucket_indices(low, high);
        for bucket in [i1, i2] {
            for slot in self.buckets[bucket].iter().flatten() {
                if slot.low == low && slot.high == high {
                    return (slot.chunk_index, true);
                }
            }
        }
        (0, false)
    }

    /// Serialize the filter to bytes.
    pub fn serialize(&self) -> Result<Vec<u8>, FilterError> {
        let mut buf = Vec::new();
        (self.buckets.len() as u32).encode_to(&mut buf)?;
        (self.len as u32).encode_to(&mut buf)?;
        for bucket in &self.buckets {
            for slot in bucket {
                slot.encode_to(&mut buf)?;
            }
        }
        Ok(buf)
    }

    /// Deserialize a filter previously produced by [`Self::serialize`].
    pub fn deserialize(buf: &[u8]) -> Result<Self, FilterError> {
        let mut offset = 0;
        let (num_buckets, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (len, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let mut buckets = vec![[None; SLOTS_PER_BUCKET]; num_buckets as usize];
        for bucket in buckets.iter_mut() {
            for slot in bucket.iter_mut() {
                let (decoded, n) = Option::<Slot>::decode_from(&buf[offset..])?;
                offset += n;
                *slot = decoded;
            }
        }
        Ok(CuckooFilter { buckets, len: len as usize })
    }
}

/// 64-bit MurmurHash3 (x64 variant, low lane of the 128-bit digest),
/// seeded to zero for on-disk stability.
fn murmur3_x64_64(data: &[u8], seed: u64) -> u64 {
    const C1: u64 = 0x87c3_7b91_1142_53d5;
    const C2: u64 = 0x4cf5_ad43_2745_937f;

    let mut h1: u64 = seed;
    let mut h2: u64 = seed;
    let len = data.len();
    let nblocks = len / 16;

    for i in 0..nblocks {
        let block = &data[i * 16..i * 16 + 16];
        let mut k1 = u64::from_le_bytes(block[0..8].try_into().expect("8 bytes"));
        let mut k2 = u64::from_le_bytes(block[8..16].try_into().expect("8 bytes"));

        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(27);
        h1 = h1.wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;
        h2 = h2.rotate_left(31);
        h2 = h2.wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    let tail = &data[nblocks * 16..];
    let mut k1: u64 = 0;
    let mut k2: u64 = 0;
    let tail_len = tail.len();
    if tail_len > 8 {
        for (i, &b) in tail[8..].iter().enumerate() {
            k2 ^= (b as u64) << (8 * i);
        }
        k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 ^= k2;
    }
    if tail_len >= 1 {
        let n = tail_len.min(8);
        for (i, &b) in tail[..n].iter().enumerate() {
            k1 ^= (b as u64) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= len as u64;
    h2 ^= len as u64;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1 = h1.wrapping_add(h2);

    h1
}

fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}
