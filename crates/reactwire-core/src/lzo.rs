//! LZO1X-style block codec
//!
//! Greedy LZ77 over a single block with a small hash table of recent
//! positions. The token stream is byte aligned:
//!
//! ```text
//!   0lllllll                 literal run, l+1 bytes follow   (1..=128)
//!   1mmmmmmm  off_lo off_hi  copy m+4 bytes from `off` back  (4..=131, off 1..=65535)
//! ```
//!
//! Output never exceeds [`max_compressed_len`], the classic LZO1X bound, so
//! callers can size buffers before compressing. The decoder never writes
//! past the declared output size and rejects back-references that point
//! before the start of the block.

use crate::error::{ChunkError, ChunkResult, CorruptReason};

/// Shortest back-reference worth encoding
pub const MIN_MATCH: usize = 4;

/// Longest back-reference one token can carry
pub const MAX_MATCH: usize = 0x7F + MIN_MATCH;

/// Furthest back-reference distance
pub const MAX_OFFSET: usize = u16::MAX as usize;

/// Longest literal run one token can carry
pub const MAX_LITERAL_RUN: usize = 0x80;

const MATCH_TOKEN_LEN: usize = 3;
const HASH_BITS: u32 = 12;

/// Worst-case compressed size of `n` input bytes.
#[inline]
pub const fn max_compressed_len(n: usize) -> usize {
    n + n / 16 + 64 + 3
}

/// Worst-case decompressed size of a `payload_len`-byte compressed block.
///
/// Every output byte is produced either by a literal (one input byte each)
/// or by a 3-byte match token yielding at most [`MAX_MATCH`] bytes.
#[inline]
pub const fn max_expanded_len(payload_len: usize) -> usize {
    payload_len.div_ceil(MATCH_TOKEN_LEN) * MAX_MATCH
}

#[inline]
fn read_u32(src: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]])
}

#[inline]
fn hash(seq: u32) -> usize {
    (seq.wrapping_mul(0x9E37_79B1) >> (32 - HASH_BITS)) as usize
}

fn emit_literals(literals: &[u8], dst: &mut Vec<u8>) {
    for run in literals.chunks(MAX_LITERAL_RUN) {
        dst.push((run.len() - 1) as u8);
        dst.extend_from_slice(run);
    }
}

/// Compress `src`, appending the block to `dst`.
pub fn compress(src: &[u8], dst: &mut Vec<u8>) {
    dst.reserve(max_compressed_len(src.len()));

    if src.len() < MIN_MATCH {
        emit_literals(src, dst);
        return;
    }

    // position + 1 of the last occurrence of each 4-byte hash, 0 = empty
    let mut table = vec![0u32; 1 << HASH_BITS];
    let last = src.len() - MIN_MATCH;
    let mut anchor = 0usize;
    let mut i = 0usize;

    while i <= last {
        let seq = read_u32(src, i);
        let slot = hash(seq);
        let prev = table[slot] as usize;
        table[slot] = (i + 1) as u32;

        if prev != 0 {
            let cand = prev - 1;
            let distance = i - cand;
            if distance <= MAX_OFFSET && read_u32(src, cand) == seq {
                let mut len = MIN_MATCH;
                while i + len < src.len() && len < MAX_MATCH && src[cand + len] == src[i + len] {
                    len += 1;
                }

                emit_literals(&src[anchor..i], dst);
                dst.push(0x80 | (len - MIN_MATCH) as u8);
                dst.extend_from_slice(&(distance as u16).to_le_bytes());

                i += len;
                anchor = i;
                continue;
            }
        }
        i += 1;
    }

    emit_literals(&src[anchor..], dst);
}

/// Decompress a block that must expand to exactly `expected` bytes.
pub fn decompress(src: &[u8], expected: usize) -> ChunkResult<Vec<u8>> {
    let malformed = || ChunkError::CorruptChunk(CorruptReason::MalformedPayload);
    let oversized = || ChunkError::CorruptChunk(CorruptReason::SizeMismatch);

    let mut out = Vec::with_capacity(expected);
    let mut i = 0usize;

    while i < src.len() {
        let token = src[i];
        i += 1;

        if token & 0x80 == 0 {
            let n = token as usize + 1;
            let run = src.get(i..i + n).ok_or_else(malformed)?;
            if out.len() + n > expected {
                return Err(oversized());
            }
            out.extend_from_slice(run);
            i += n;
        } else {
            let len = (token & 0x7F) as usize + MIN_MATCH;
            let raw = src.get(i..i + 2).ok_or_else(malformed)?;
            let distance = u16::from_le_bytes([raw[0], raw[1]]) as usize;
            i += 2;

            if distance == 0 || distance > out.len() {
                return Err(malformed());
            }
            if out.len() + len > expected {
                return Err(oversized());
            }
            // byte at a time: the source may overlap what we are writing
            let start = out.len() - distance;
            for k in 0..len {
                let b = out[start + k];
                out.push(b);
            }
        }
    }

    if out.len() != expected {
        return Err(oversized());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(data: &[u8]) -> Vec<u8> {
        let mut block = Vec::new();
        compress(data, &mut block);
        assert!(block.len() <= max_compressed_len(data.len()));
        assert!(data.len() <= max_expanded_len(block.len()));
        decompress(&block, data.len()).unwrap()
    }

    #[test]
    fn test_empty_and_tiny() {
        assert_eq!(round_trip(&[]), Vec::<u8>::new());
        assert_eq!(round_trip(b"a"), b"a".to_vec());
        assert_eq!(round_trip(b"abc"), b"abc".to_vec());
    }

    #[test]
    fn test_repetitive_input_shrinks() {
        let data: Vec<u8> = b"0123456789".iter().cycle().take(4000).copied().collect();
        let mut block = Vec::new();
        compress(&data, &mut block);
        assert!(block.len() < data.len() / 10);
        assert_eq!(decompress(&block, data.len()).unwrap(), data);
    }

    #[test]
    fn test_overlapping_match() {
        let data = vec![b'z'; 300];
        assert_eq!(round_trip(&data), data);
    }

    #[test]
    fn test_incompressible_input_stays_in_bound() {
        // xorshift noise
        let mut x = 0x2545_F491u32;
        let data: Vec<u8> = (0..5000)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x as u8
            })
            .collect();
        assert_eq!(round_trip(&data), data);
    }

    #[test]
    fn test_rejects_reference_before_start() {
        // literal "ab", then copy 4 from 3 back
        let block = [0x01, b'a', b'b', 0x80, 0x03, 0x00];
        let err = decompress(&block, 6).unwrap_err();
        assert_eq!(err, ChunkError::CorruptChunk(CorruptReason::MalformedPayload));
    }

    #[test]
    fn test_rejects_truncated_literal_run() {
        let block = [0x05, b'a', b'b'];
        let err = decompress(&block, 6).unwrap_err();
        assert_eq!(err, ChunkError::CorruptChunk(CorruptReason::MalformedPayload));
    }

    #[test]
    fn test_rejects_wrong_size() {
        let mut block = Vec::new();
        compress(b"hello world", &mut block);
        assert_eq!(
            decompress(&block, 5).unwrap_err(),
            ChunkError::CorruptChunk(CorruptReason::SizeMismatch)
        );
        assert_eq!(
            decompress(&block, 50).unwrap_err(),
            ChunkError::CorruptChunk(CorruptReason::SizeMismatch)
        );
    }
}
