//! Self-describing, checksummed compression frames
//!
//! ```text
//! offset  size  field
//! 0       4     chunk_length         bytes after this field (13 + payload)
//! 4       4     crc32                over algorithm_id | uncompressed_length | payload
//! 8       5     algorithm_id         "LZO1X", "BEGIN" or "END__"
//! 13      4     uncompressed_length
//! 17      N     payload
//! ```
//!
//! All integers little-endian, no padding. `BEGIN` and `END__` chunks carry
//! no payload and frame the content chunks of one compressed array; their
//! `uncompressed_length` is the size of the whole array.

use crc_any::CRCu32;

use crate::error::{ChunkError, ChunkResult, CorruptReason};
use crate::lzo;

pub use crate::lzo::{max_compressed_len, max_expanded_len};

/// Bytes before the payload
pub const HEADER_SIZE: usize = 17;

/// Width of the algorithm tag
pub const ALGORITHM_WIDTH: usize = 5;

/// Header bytes counted by `chunk_length`
const HEADER_TAIL: usize = HEADER_SIZE - 4;

/// What a chunk carries, by algorithm tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    /// Start of a compressed array
    Begin,
    /// One LZO1X-compressed segment
    Lzo1x,
    /// End of a compressed array
    End,
}

impl ChunkKind {
    pub const fn tag(self) -> [u8; ALGORITHM_WIDTH] {
        match self {
            ChunkKind::Begin => *b"BEGIN",
            ChunkKind::Lzo1x => *b"LZO1X",
            ChunkKind::End => *b"END__",
        }
    }

    pub fn from_tag(tag: &[u8; ALGORITHM_WIDTH]) -> Option<Self> {
        [ChunkKind::Begin, ChunkKind::Lzo1x, ChunkKind::End]
            .into_iter()
            .find(|k| &k.tag() == tag)
    }

    /// Zero-payload framing chunk
    #[inline]
    pub fn is_marker(self) -> bool {
        !matches!(self, ChunkKind::Lzo1x)
    }
}

/// Parsed fixed-size chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub total_length: u32,
    pub checksum: u32,
    pub algorithm_id: [u8; ALGORITHM_WIDTH],
    pub uncompressed_length: u32,
}

impl ChunkHeader {
    /// Payload bytes implied by `total_length`, `None` if it is too short
    /// to even cover the header.
    #[inline]
    pub fn payload_len(&self) -> Option<usize> {
        (self.total_length as usize).checked_sub(HEADER_TAIL)
    }

    /// Bytes of the whole frame on the wire
    #[inline]
    pub fn frame_len(&self) -> usize {
        4 + self.total_length as usize
    }

    #[inline]
    pub fn kind(&self) -> Option<ChunkKind> {
        ChunkKind::from_tag(&self.algorithm_id)
    }
}

/// One frame: header fields plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub total_length: u32,
    pub checksum: u32,
    pub algorithm_id: [u8; ALGORITHM_WIDTH],
    pub uncompressed_length: u32,
    pub payload: Vec<u8>,
}

impl Chunk {
    /// Build a chunk with consistent length and checksum fields.
    fn seal(kind: ChunkKind, uncompressed_length: u32, payload: Vec<u8>) -> ChunkResult<Self> {
        let total_length = u32::try_from(HEADER_TAIL + payload.len())
            .map_err(|_| ChunkError::TooLarge(payload.len()))?;
        let algorithm_id = kind.tag();
        Ok(Self {
            total_length,
            checksum: checksum(&algorithm_id, uncompressed_length, &payload),
            algorithm_id,
            uncompressed_length,
            payload,
        })
    }

    /// Start marker for an array of `total` bytes
    pub fn begin(total: u32) -> Self {
        let algorithm_id = ChunkKind::Begin.tag();
        Self {
            total_length: HEADER_TAIL as u32,
            checksum: checksum(&algorithm_id, total, &[]),
            algorithm_id,
            uncompressed_length: total,
            payload: Vec::new(),
        }
    }

    /// Stop marker for an array of `total` bytes
    pub fn end(total: u32) -> Self {
        let algorithm_id = ChunkKind::End.tag();
        Self {
            total_length: HEADER_TAIL as u32,
            checksum: checksum(&algorithm_id, total, &[]),
            algorithm_id,
            uncompressed_length: total,
            payload: Vec::new(),
        }
    }

    pub fn header(&self) -> ChunkHeader {
        ChunkHeader {
            total_length: self.total_length,
            checksum: self.checksum,
            algorithm_id: self.algorithm_id,
            uncompressed_length: self.uncompressed_length,
        }
    }

    #[inline]
    pub fn kind(&self) -> Option<ChunkKind> {
        ChunkKind::from_tag(&self.algorithm_id)
    }

    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize header and payload into one frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = vec![0u8; self.encoded_len()];
        put_header(&self.header(), &mut frame[..HEADER_SIZE]);
        frame[HEADER_SIZE..].copy_from_slice(&self.payload);
        frame
    }

    /// Parse one complete frame. Does not validate; see [`validate`].
    pub fn decode(frame: &[u8]) -> ChunkResult<Self> {
        let header = read_header(frame)?;
        if header.frame_len() != frame.len() {
            return Err(ChunkError::CorruptChunk(CorruptReason::LengthMismatch));
        }
        Ok(Self {
            total_length: header.total_length,
            checksum: header.checksum,
            algorithm_id: header.algorithm_id,
            uncompressed_length: header.uncompressed_length,
            payload: frame[HEADER_SIZE..].to_vec(),
        })
    }
}

/// CRC-32 over `algorithm_id | uncompressed_length | payload`
pub fn checksum(algorithm_id: &[u8; ALGORITHM_WIDTH], uncompressed_length: u32, payload: &[u8]) -> u32 {
    let mut crc = CRCu32::crc32();
    crc.digest(algorithm_id);
    crc.digest(&uncompressed_length.to_le_bytes());
    crc.digest(payload);
    crc.get_crc()
}

/// Compress one block into an `LZO1X` chunk.
pub fn compress(raw: &[u8]) -> ChunkResult<Chunk> {
    let uncompressed_length = u32::try_from(raw.len()).map_err(|_| ChunkError::TooLarge(raw.len()))?;
    let mut payload = Vec::new();
    lzo::compress(raw, &mut payload);
    Chunk::seal(ChunkKind::Lzo1x, uncompressed_length, payload)
}

/// Validate and expand an `LZO1X` chunk.
#[inline]
pub fn decompress(chunk: &Chunk) -> ChunkResult<Vec<u8>> {
    validate_as(chunk, ChunkKind::Lzo1x)
}

fn put_header(header: &ChunkHeader, buf: &mut [u8]) {
    buf[0..4].copy_from_slice(&header.total_length.to_le_bytes());
    buf[4..8].copy_from_slice(&header.checksum.to_le_bytes());
    buf[8..13].copy_from_slice(&header.algorithm_id);
    buf[13..17].copy_from_slice(&header.uncompressed_length.to_le_bytes());
}

/// Write `chunk`'s header into the front of `buf`, returning bytes written.
pub fn write_header(chunk: &Chunk, buf: &mut [u8]) -> ChunkResult<usize> {
    if buf.len() < HEADER_SIZE {
        return Err(ChunkError::TruncatedHeader {
            needed: HEADER_SIZE,
            available: buf.len(),
        });
    }
    put_header(&chunk.header(), &mut buf[..HEADER_SIZE]);
    Ok(HEADER_SIZE)
}

/// Parse the header at the front of `buf`.
pub fn read_header(buf: &[u8]) -> ChunkResult<ChunkHeader> {
    if buf.len() < HEADER_SIZE {
        return Err(ChunkError::TruncatedHeader {
            needed: HEADER_SIZE,
            available: buf.len(),
        });
    }
    let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
    let mut algorithm_id = [0u8; ALGORITHM_WIDTH];
    algorithm_id.copy_from_slice(&buf[8..13]);
    Ok(ChunkHeader {
        total_length: u32_at(0),
        checksum: u32_at(4),
        algorithm_id,
        uncompressed_length: u32_at(13),
    })
}

/// Length of the frame starting at the front of `buf`.
///
/// Only needs the header; the frame itself may extend past `buf`.
pub fn frame_len(buf: &[u8]) -> ChunkResult<usize> {
    let header = read_header(buf)?;
    if header.payload_len().is_none() {
        return Err(ChunkError::CorruptChunk(CorruptReason::LengthMismatch));
    }
    Ok(header.frame_len())
}

/// Check every header field against the payload and return the raw bytes.
///
/// Markers validate to an empty block. Checks run in order: length,
/// algorithm, size bound, checksum, then the payload itself.
pub fn validate(chunk: &Chunk) -> ChunkResult<Vec<u8>> {
    let corrupt = |reason| Err(ChunkError::CorruptChunk(reason));

    if chunk.total_length as usize != HEADER_TAIL + chunk.payload.len() {
        return corrupt(CorruptReason::LengthMismatch);
    }

    let Some(kind) = chunk.kind() else {
        return corrupt(CorruptReason::UnknownAlgorithm);
    };

    let declared = chunk.uncompressed_length as usize;
    match kind {
        ChunkKind::Lzo1x => {
            if chunk.payload.len() > max_compressed_len(declared)
                || declared > max_expanded_len(chunk.payload.len())
            {
                return corrupt(CorruptReason::BoundExceeded);
            }
        }
        ChunkKind::Begin | ChunkKind::End => {
            if !chunk.payload.is_empty() {
                return corrupt(CorruptReason::MalformedPayload);
            }
        }
    }

    if checksum(&chunk.algorithm_id, chunk.uncompressed_length, &chunk.payload) != chunk.checksum {
        return corrupt(CorruptReason::ChecksumMismatch);
    }

    match kind {
        ChunkKind::Lzo1x => lzo::decompress(&chunk.payload, declared),
        ChunkKind::Begin | ChunkKind::End => Ok(Vec::new()),
    }
}

/// [`validate`], additionally requiring a specific kind.
pub fn validate_as(chunk: &Chunk, expected: ChunkKind) -> ChunkResult<Vec<u8>> {
    let raw = validate(chunk)?;
    if chunk.kind() != Some(expected) {
        return Err(ChunkError::CorruptChunk(CorruptReason::UnexpectedAlgorithm));
    }
    Ok(raw)
}

/// True if `frame` is exactly one valid `BEGIN` marker.
///
/// This is how the stream layer tells a chunked array from a plain one.
pub fn is_begin_frame(frame: &[u8]) -> bool {
    frame.len() == HEADER_SIZE
        && Chunk::decode(frame)
            .map(|c| c.kind() == Some(ChunkKind::Begin) && validate(&c).is_ok())
            .unwrap_or(false)
}

/// True if `buf` opens with a valid `BEGIN` marker (more frames may follow).
pub fn starts_with_begin_frame(buf: &[u8]) -> bool {
    buf.len() >= HEADER_SIZE && is_begin_frame(&buf[..HEADER_SIZE])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i % 251) as u8 ^ (i / 7) as u8).collect()
    }

    #[test]
    fn test_header_layout() {
        let chunk = compress(b"hello hello hello hello").unwrap();
        let frame = chunk.encode();

        assert_eq!(frame.len(), HEADER_SIZE + chunk.payload.len());
        assert_eq!(&frame[0..4], &chunk.total_length.to_le_bytes());
        assert_eq!(chunk.total_length as usize, 13 + chunk.payload.len());
        assert_eq!(&frame[8..13], b"LZO1X");
        assert_eq!(&frame[13..17], &23u32.to_le_bytes());

        let header = read_header(&frame).unwrap();
        assert_eq!(header, chunk.header());
        assert_eq!(header.frame_len(), frame.len());
        assert_eq!(frame_len(&frame[..HEADER_SIZE]).unwrap(), frame.len());
    }

    #[test]
    fn test_round_trip_sizes() {
        for n in [0, 1, 1023, 1024, 1025, 4096] {
            let raw = pattern(n);
            let chunk = compress(&raw).unwrap();
            let decoded = Chunk::decode(&chunk.encode()).unwrap();
            assert_eq!(decompress(&decoded).unwrap(), raw, "size {n}");
        }
    }

    #[test]
    fn test_read_header_truncated() {
        let frame = Chunk::begin(10).encode();
        assert_eq!(
            read_header(&frame[..16]).unwrap_err(),
            ChunkError::TruncatedHeader { needed: 17, available: 16 }
        );
        let mut small = [0u8; 4];
        assert!(write_header(&Chunk::end(1), &mut small).unwrap_err().is_recoverable());
    }

    #[test]
    fn test_markers() {
        let begin = Chunk::begin(2000);
        assert_eq!(begin.kind(), Some(ChunkKind::Begin));
        assert_eq!(begin.encoded_len(), HEADER_SIZE);
        assert!(validate(&begin).unwrap().is_empty());
        assert!(is_begin_frame(&begin.encode()));
        assert!(!is_begin_frame(&Chunk::end(2000).encode()));

        let mut stream = begin.encode();
        stream.extend_from_slice(&Chunk::end(2000).encode());
        assert!(starts_with_begin_frame(&stream));
        assert!(!is_begin_frame(&stream));
    }

    #[test]
    fn test_plain_bytes_are_not_a_begin_frame() {
        let mut frame = Chunk::begin(5).encode();
        frame[5] ^= 0x01;
        assert!(!is_begin_frame(&frame));
        assert!(!is_begin_frame(b"BEGIN but not really a chunk"));
    }

    #[test]
    fn test_every_bit_flip_is_detected() {
        let chunk = compress(&pattern(300)).unwrap();
        let frame = chunk.encode();

        // chunk_length is framing only; everything after it is covered
        for byte in 4..frame.len() {
            for bit in 0..8 {
                let mut bad = frame.clone();
                bad[byte] ^= 1 << bit;
                let parsed = Chunk::decode(&bad).unwrap();
                assert!(
                    matches!(validate(&parsed), Err(ChunkError::CorruptChunk(_))),
                    "byte {byte} bit {bit}"
                );
            }
        }
    }

    #[test]
    fn test_length_mismatch() {
        let mut chunk = compress(b"abcdefgh").unwrap();
        chunk.payload.push(0);
        assert_eq!(
            validate(&chunk).unwrap_err(),
            ChunkError::CorruptChunk(CorruptReason::LengthMismatch)
        );

        let frame = Chunk::begin(1).encode();
        assert_eq!(
            Chunk::decode(&frame[..HEADER_SIZE - 1]).unwrap_err(),
            ChunkError::TruncatedHeader { needed: 17, available: 16 }
        );
        let mut long = frame.clone();
        long.push(0);
        assert_eq!(
            Chunk::decode(&long).unwrap_err(),
            ChunkError::CorruptChunk(CorruptReason::LengthMismatch)
        );
    }

    #[test]
    fn test_declared_size_outside_bound() {
        let raw = vec![0u8; 64];
        let mut chunk = compress(&raw).unwrap();
        chunk.uncompressed_length = u32::MAX / 2;
        chunk.checksum = checksum(&chunk.algorithm_id, chunk.uncompressed_length, &chunk.payload);
        assert_eq!(
            validate(&chunk).unwrap_err(),
            ChunkError::CorruptChunk(CorruptReason::BoundExceeded)
        );
    }

    #[test]
    fn test_unknown_and_unexpected_algorithm() {
        let mut chunk = compress(b"payload").unwrap();
        chunk.algorithm_id = *b"ZSTD!";
        assert_eq!(
            validate(&chunk).unwrap_err(),
            ChunkError::CorruptChunk(CorruptReason::UnknownAlgorithm)
        );

        assert_eq!(
            decompress(&Chunk::begin(3)).unwrap_err(),
            ChunkError::CorruptChunk(CorruptReason::UnexpectedAlgorithm)
        );
    }
}
