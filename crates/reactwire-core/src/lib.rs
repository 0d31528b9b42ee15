//! # reactwire-core
//!
//! Platform-agnostic half of reactwire: everything that turns partial byte
//! buffers into typed values and arrays and back, without ever blocking.
//!
//! This crate contains no OS-specific code. The reactor and timeout registry
//! live in `reactwire-runtime`.
//!
//! ## Modules
//!
//! - `wire` - resumable scalar / length-prefixed array encoding
//! - `lzo` - LZO1X-style block codec
//! - `chunk` - checksummed, self-describing compression frames
//! - `terminator` - end-of-sequence predicates for streamed arrays
//! - `stream` - array serializer / deserializer state machines
//! - `config` - stream configuration
//! - `error` - error types
//! - `env` - environment variable utilities

pub mod chunk;
pub mod config;
pub mod env;
pub mod error;
pub mod lzo;
pub mod stream;
pub mod terminator;
pub mod wire;

// Re-exports for convenience
pub use chunk::{Chunk, ChunkHeader, ChunkKind};
pub use config::StreamConfig;
pub use error::{ChunkError, CorruptReason, StreamError, WireError};
pub use stream::{ArrayDeserializer, ArraySerializer, ChunkMode, StreamStep};
pub use terminator::{Terminator, TransmitPolicy};
pub use wire::{Cursor, LengthPrefix, Progress, Scalar};
