//! Array stream configuration
//!
//! Library defaults with `REACTWIRE_*` environment overrides, in the same
//! spirit as the runtime's `ReactorConfig`.
//!
//! ```rust,ignore
//! use reactwire_core::config::StreamConfig;
//!
//! let config = StreamConfig::from_env().compress(true).chunk_size(4096);
//! ```

use crate::env::{env_get, env_get_bool};
use crate::stream::ChunkMode;

/// Compile-time defaults
pub mod defaults {
    /// Input bytes per compressed chunk
    pub const CHUNK_SIZE: usize = 1024;
    /// Largest array a receiver accepts, in elements
    pub const MAX_ARRAY_LEN: u64 = 64 * 1024 * 1024;
    pub const COMPRESS: bool = false;
    pub const DECOMPRESS: bool = true;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Serializer: input bytes per compressed chunk
    pub chunk_size: usize,
    /// Serializer: compress arrays that are not already chunked
    pub compress: bool,
    /// Deserializer: decompress chunked arrays or pass the chunks through
    pub chunk_mode: ChunkMode,
    /// Deserializer: reject arrays declaring more elements than this
    pub max_array_len: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            compress: defaults::COMPRESS,
            chunk_mode: ChunkMode::Decompress,
            max_array_len: defaults::MAX_ARRAY_LEN,
        }
    }
}

impl StreamConfig {
    /// Defaults with environment overrides.
    ///
    /// - `REACTWIRE_CHUNK_SIZE` - input bytes per chunk
    /// - `REACTWIRE_COMPRESS` - compress outgoing arrays (0/1)
    /// - `REACTWIRE_DECOMPRESS` - decompress incoming chunked arrays (0/1);
    ///   when off, chunked arrays are passed on still chunked
    /// - `REACTWIRE_MAX_ARRAY_LEN` - receive limit in elements
    pub fn from_env() -> Self {
        let chunk_mode = if env_get_bool("REACTWIRE_DECOMPRESS", defaults::DECOMPRESS) {
            ChunkMode::Decompress
        } else {
            ChunkMode::Forward
        };
        Self {
            chunk_size: env_get("REACTWIRE_CHUNK_SIZE", defaults::CHUNK_SIZE).max(1),
            compress: env_get_bool("REACTWIRE_COMPRESS", defaults::COMPRESS),
            chunk_mode,
            max_array_len: env_get("REACTWIRE_MAX_ARRAY_LEN", defaults::MAX_ARRAY_LEN),
        }
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    pub fn compress(mut self, on: bool) -> Self {
        self.compress = on;
        self
    }

    pub fn chunk_mode(mut self, mode: ChunkMode) -> Self {
        self.chunk_mode = mode;
        self
    }

    pub fn max_array_len(mut self, elements: u64) -> Self {
        self.max_array_len = elements;
        self
    }
}
