//! # reactwire - non-blocking arrays over a single-threaded reactor
//!
//! A small event-driven I/O core plus a wire protocol that moves typed
//! arrays (optionally LZO-compressed in checksummed chunks) across
//! non-blocking descriptors, resuming exactly where each partial read or
//! write left off.
//!
//! ## Quick Start
//!
//! ```ignore
//! use reactwire::{ArraySerializer, StreamConfig, TransmitPolicy};
//!
//! let config = StreamConfig::from_env().compress(true);
//! let mut ser = ArraySerializer::new(TransmitPolicy::List, config);
//! let mut window = [0u8; 4096];
//!
//! // inside a Client::handle when the socket is writable
//! let step = ser.serialize(&mut window, || queue.pop_front().unwrap_or_default())?;
//! let written = socket.write(&window[..step.bytes])?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       User clients                          │
//! │          impl Client { handle(events, ctx) ... }            │
//! └─────────────────────────────────────────────────────────────┘
//!                │                              │
//!                ▼                              ▼
//! ┌──────────────────────────────┐ ┌────────────────────────────┐
//! │      reactwire-runtime       │ │       reactwire-core       │
//! │  Reactor (epoll, 1 thread)   │ │  ArraySerializer / -Deser. │
//! │  TimeoutRegistry + Clock     │ │  Terminator, Chunk, LZO    │
//! │  ReactorConfig               │ │  wire primitives, config   │
//! └──────────────────────────────┘ └────────────────────────────┘
//! ```
//!
//! The core crate never touches the OS; the runtime crate is Linux only.

// Platform-agnostic protocol
pub use reactwire_core::{chunk, env, lzo, stream, terminator, wire};
pub use reactwire_core::{
    ArrayDeserializer, ArraySerializer, Chunk, ChunkError, ChunkHeader, ChunkKind, ChunkMode, CorruptReason,
    Cursor, LengthPrefix, Progress, Scalar, StreamConfig, StreamError, StreamStep, Terminator, TransmitPolicy,
    WireError,
};

// Reactor and timeouts
pub use reactwire_runtime::{reactor, timeout};
pub use reactwire_runtime::{
    BoxError, Client, Clock, Context, Events, ExpiryConfig, ExpiryOwners, ExpiryRegistration, Flow, HandlerResult,
    ManualClock, MonotonicClock, Reactor, ReactorConfig, ReactorError, ReactorResult, ReactorStats,
    TimeoutRegistry, Token,
};

/// Error types of both layers
pub mod error {
    pub use reactwire_core::error::*;
    pub use reactwire_runtime::error::*;
}

/// Configuration of both layers
pub mod config {
    pub use reactwire_core::config::StreamConfig;
    pub use reactwire_runtime::config::ReactorConfig;
}
