//! Error types for the wire, chunk and stream layers
//!
//! "Need more data" is never an error here. Partial input is reported through
//! [`Progress`](crate::wire::Progress) and [`StreamStep`](crate::stream::StreamStep);
//! the variants below are the fatal paths that end a stream.

use thiserror::Error;

/// Result type for wire primitive operations
pub type WireResult<T> = Result<T, WireError>;

/// Result type for chunk codec operations
pub type ChunkResult<T> = Result<T, ChunkError>;

/// Result type for array stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Malformed wire input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Declared array length is above the receiver's limit
    #[error("array length {declared} exceeds limit {limit}")]
    LengthLimit { declared: u64, limit: u64 },

    /// Array is too long to be described by the length prefix
    #[error("array length {0} does not fit the length prefix")]
    LengthOverflow(u64),
}

/// Why a chunk was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptReason {
    /// `chunk_length` disagrees with the bytes actually present
    LengthMismatch,
    /// Algorithm tag is not one we know
    UnknownAlgorithm,
    /// Algorithm tag is valid but not the one expected here
    UnexpectedAlgorithm,
    /// Declared uncompressed length is impossible for the payload size
    BoundExceeded,
    /// Stored CRC-32 disagrees with the recomputed one
    ChecksumMismatch,
    /// Compressed stream references data outside the block
    MalformedPayload,
    /// Decompressed size differs from `uncompressed_length`
    SizeMismatch,
}

impl std::fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CorruptReason::LengthMismatch => "length mismatch",
            CorruptReason::UnknownAlgorithm => "unknown algorithm id",
            CorruptReason::UnexpectedAlgorithm => "unexpected algorithm id",
            CorruptReason::BoundExceeded => "uncompressed length outside codec bound",
            CorruptReason::ChecksumMismatch => "checksum mismatch",
            CorruptReason::MalformedPayload => "malformed compressed payload",
            CorruptReason::SizeMismatch => "decompressed size mismatch",
        };
        f.write_str(s)
    }
}

/// Chunk codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// Not enough bytes for a chunk header. Recoverable: supply more data.
    #[error("truncated chunk header: need {needed} bytes, have {available}")]
    TruncatedHeader { needed: usize, available: usize },

    /// Chunk failed validation. Fatal to the stream carrying it.
    #[error("corrupt chunk: {0}")]
    CorruptChunk(CorruptReason),

    /// Input block cannot be described by a 32-bit length
    #[error("block of {0} bytes is too large for one chunk")]
    TooLarge(usize),
}

impl ChunkError {
    /// True if more input could turn this into a success
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChunkError::TruncatedHeader { .. })
    }
}

/// Array stream protocol errors. All of them are fatal to the stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// A chunk of the wrong kind showed up inside a chunked array
    #[error("invalid chunk type {found:?} while {state}")]
    InvalidChunkType { found: String, state: &'static str },

    /// END marker declared a different total than what was assembled
    #[error("chunked array declared {declared} bytes, assembled {assembled}")]
    TotalMismatch { declared: u64, assembled: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ChunkError::TruncatedHeader { needed: 17, available: 3 };
        assert_eq!(e.to_string(), "truncated chunk header: need 17 bytes, have 3");

        let e = ChunkError::CorruptChunk(CorruptReason::ChecksumMismatch);
        assert_eq!(e.to_string(), "corrupt chunk: checksum mismatch");
    }

    #[test]
    fn test_error_conversion() {
        let e: StreamError = ChunkError::CorruptChunk(CorruptReason::BoundExceeded).into();
        assert!(matches!(
            e,
            StreamError::Chunk(ChunkError::CorruptChunk(CorruptReason::BoundExceeded))
        ));
        assert!(ChunkError::TruncatedHeader { needed: 1, available: 0 }.is_recoverable());
        assert!(!ChunkError::CorruptChunk(CorruptReason::LengthMismatch).is_recoverable());
    }
}
