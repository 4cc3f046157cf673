//! Compression codec
//!
//! A self-contained LZ77-style encoder used, at the call sites that opt in,
//! to compress record key and value bytes independently before they are
//! written to a chunk store. The memtable itself is never compressed — only
//! bytes destined for the WAL or an SSTable pass through this codec.
//!
//! # Token format
//!
//! Every emitted token is exactly 3 bytes: a big-endian `u16` distance
//! followed by a `u8`. A distance of zero marks a literal (the trailing
//! byte is the literal value); any other distance marks a back-reference
//! (the trailing byte is the match length). Decompression is a single
//! forward pass and tolerates overlapping copies (`distance < length`) by
//! copying one byte at a time from the already-reconstructed output.

#[cfg(test)]
mod tests;

use thiserror::Error;

/// Sliding window size.
pub const WINDOW_SIZE: usize = 32 * 1024;
/// Minimum match length worth encoding as a back-reference.
const MIN_MATCH: usize = 3;
/// Maximum match length (bounded by the single-byte length field).
const MAX_MATCH: usize = 255;
/// Hash table bucket count for match acceleration.
const HASH_TABLE_SIZE: usize = 1 << 15;

/// Errors produced by the compression codec.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// A back-reference token pointed further back than any data produced
    /// so far.
    #[error("back-reference distance {distance} exceeds {produced} bytes produced so far")]
    InvalidBackReference { distance: usize, produced: usize },

    /// The input ended in the middle of a 3-byte token.
    #[error("truncated compressed stream: {0} trailing bytes")]
    TruncatedInput(usize),
}

fn hash3(b: &[u8]) -> u64 {
    let v = (b[0] as u64) | ((b[1] as u64) << 8) | ((b[2] as u64) << 16);
    v.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Compress `data` into a sequence of 3-byte tokens.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let n = data.len();
    let mut out = Vec::with_capacity(n);
    let mut table = vec![-1i64; HASH_TABLE_SIZE];
    let mut i = 0usize;

    while i < n {
        let mut best_len = 0usize;
        let mut best_dist = 0usize;

        if i + MIN_MATCH <= n {
            let bucket = (hash3(&data[i..i + 3]) as usize) % HASH_TABLE_SIZE;
            let candidate = table[bucket];
            if candidate >= 0 {
                let candidate = candidate as usize;
                let distance = i - candidate;
                if distance >= 1 && distance <= WINDOW_SIZE {
                    let max_len = (n - i).min(MAX_MATCH);
                    let mut len = 0usize;
                    while len < max_len && data[candidate + len] == data[i + len] {
                        len += 1;
                    }
                    if len >= MIN_MATCH {
                        best_len = len;
                        best_dist = distance;
                    }
                }
            }
        }

        if best_len >= MIN_MATCH {
            out.extend_from_slice(&(best_dist as u16).to_be_bytes());
            out.push(best_len as u8);
            for k in 0..best_len {
                if i + k + MIN_MATCH <= n {
                    let bucket = (hash3(&data[i + k..i + k + 3]) as usize) % HASH_TABLE_SIZE;
                    table[bucket] = (i + k) as i64;
                }
            }
            i += best_len;
        } else {
            out.extend_from_slice(&0u16.to_be_bytes());
            out.push(data[i]);
            if i + MIN_MATCH <= n {
                let bucket = (hash3(&data[i..i + 3]) as usize) % HASH_TABLE_SIZE;
                table[bucket] = i as i64;
            }
            i += 1;
        }
    }

    out
}

/// Decompress a token stream produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0usize;

    while i + 3 <= data.len() {
        let distance = u16::from_be_bytes([data[i], data[i + 1]]) as usize;
        let trailing = data[i + 2];
        i += 3;

        if distance == 0 {
            out.push(trailing);
            continue;
        }

        if distance > out.len() {
            return Err(CompressionError::InvalidBackReference {
                distance,
                produced: out.len(),
            });
        }
        let start = out.len() - distance;
        let length = trailing as usize;
        for k in 0..length {
            let byte = out[start + k];
            out.push(byte);
        }
    }

    if i != data.len() {
        return Err(CompressionError::TruncatedInput(data.len() - i));
    }

    Ok(out)
}
