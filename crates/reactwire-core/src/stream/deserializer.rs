//! Array deserializer state machine

use tracing::{debug, trace};

use crate::chunk::{self, Chunk, ChunkKind};
use crate::config::StreamConfig;
use crate::error::{ChunkError, StreamError, StreamResult, WireError};
use crate::terminator::{Terminator, TransmitPolicy};
use crate::wire::{receive_array, Cursor};

use super::{ChunkMode, StreamStep};

/// Where the deserializer is between calls
#[derive(Debug)]
enum DeserializeState {
    Idle,
    /// Receiving the first wire array of a logical array
    GetFirstArray,
    /// First wire array complete: plain array or BEGIN marker?
    HandleArray,
    /// Inside a chunked array, receiving the next chunk frame
    GetNextArray(Assembly),
    /// A chunk frame is complete
    HandleChunk(Assembly),
    /// Hand a logical array to the output callback
    TransmitArray(Vec<u8>),
    Done,
    Failed(StreamError),
}

/// A chunked array being put back together
#[derive(Debug)]
struct Assembly {
    /// Total from the BEGIN marker
    declared: u32,
    /// Decompressed bytes, or raw frames in forward mode
    bytes: Vec<u8>,
    chunks: usize,
}

/// Consumes caller-supplied input fragments and emits whole arrays through
/// an output callback.
///
/// Input beyond the end of the transmit operation is left unconsumed, so
/// the caller can hand it to the next operation after [`reset`](Self::reset).
#[derive(Debug)]
pub struct ArrayDeserializer {
    config: StreamConfig,
    terminator: Terminator,
    state: DeserializeState,
    cursor: Cursor,
    current: Vec<u8>,
}

impl ArrayDeserializer {
    pub fn new(policy: TransmitPolicy, config: StreamConfig) -> Self {
        Self {
            config,
            terminator: Terminator::new(policy),
            state: DeserializeState::Idle,
            cursor: Cursor::new(),
            current: Vec::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self.state, DeserializeState::Done)
    }

    /// Start a new transmit operation.
    pub fn reset(&mut self) {
        self.terminator.reset();
        self.state = DeserializeState::Idle;
        self.cursor.reset();
        self.current.clear();
    }

    /// Consume as much of `input` as the current operation needs.
    ///
    /// `output` is called once per completed logical array. Returns the
    /// bytes consumed from `input`. After an error the deserializer keeps
    /// failing until [`reset`](Self::reset).
    pub fn deserialize<F>(&mut self, input: &[u8], output: F) -> StreamResult<StreamStep>
    where
        F: FnMut(Vec<u8>),
    {
        if let DeserializeState::Failed(err) = &self.state {
            return Err(err.clone());
        }
        match self.drive(input, output) {
            Ok(step) => Ok(step),
            Err(err) => {
                self.state = DeserializeState::Failed(err.clone());
                Err(err)
            }
        }
    }

    fn drive<F>(&mut self, input: &[u8], mut output: F) -> StreamResult<StreamStep>
    where
        F: FnMut(Vec<u8>),
    {
        let limit = self.config.max_array_len;
        let mut pos = 0usize;

        loop {
            let state = std::mem::replace(&mut self.state, DeserializeState::Done);
            let (next, stop) = match state {
                DeserializeState::Idle => {
                    self.cursor.reset();
                    (DeserializeState::GetFirstArray, false)
                }

                DeserializeState::GetFirstArray => {
                    if pos == input.len() {
                        (DeserializeState::GetFirstArray, true)
                    } else {
                        let p = receive_array(&mut self.current, &input[pos..], &mut self.cursor, limit)?;
                        pos += p.moved;
                        if p.complete {
                            (DeserializeState::HandleArray, false)
                        } else {
                            (DeserializeState::GetFirstArray, true)
                        }
                    }
                }

                DeserializeState::HandleArray => {
                    if chunk::is_begin_frame(&self.current) {
                        let assembly = self.open_assembly()?;
                        self.cursor.reset();
                        (DeserializeState::GetNextArray(assembly), false)
                    } else {
                        (DeserializeState::TransmitArray(std::mem::take(&mut self.current)), false)
                    }
                }

                DeserializeState::GetNextArray(assembly) => {
                    if pos == input.len() {
                        (DeserializeState::GetNextArray(assembly), true)
                    } else {
                        let p = receive_array(&mut self.current, &input[pos..], &mut self.cursor, limit)?;
                        pos += p.moved;
                        if p.complete {
                            (DeserializeState::HandleChunk(assembly), false)
                        } else {
                            (DeserializeState::GetNextArray(assembly), true)
                        }
                    }
                }

                DeserializeState::HandleChunk(assembly) => {
                    let next = self.absorb_chunk(assembly)?;
                    self.cursor.reset();
                    (next, false)
                }

                DeserializeState::TransmitArray(array) => {
                    let len = array.len();
                    trace!(len, "array delivered");
                    output(array);
                    if self.terminator.observe(len) {
                        debug!(arrays = self.terminator.transmitted(), "receive complete");
                        (DeserializeState::Done, true)
                    } else {
                        (DeserializeState::Idle, false)
                    }
                }

                DeserializeState::Done => (DeserializeState::Done, true),

                DeserializeState::Failed(err) => return Err(err),
            };
            self.state = next;
            if stop {
                break;
            }
        }

        Ok(StreamStep {
            bytes: pos,
            done: self.is_done(),
        })
    }

    /// `current` holds a valid BEGIN marker.
    fn open_assembly(&mut self) -> StreamResult<Assembly> {
        let begin = Chunk::decode(&self.current)?;
        let declared = begin.uncompressed_length;
        if u64::from(declared) > self.config.max_array_len {
            return Err(WireError::LengthLimit {
                declared: u64::from(declared),
                limit: self.config.max_array_len,
            }
            .into());
        }
        debug!(declared, mode = ?self.config.chunk_mode, "chunked array started");

        let bytes = match self.config.chunk_mode {
            ChunkMode::Decompress => Vec::with_capacity(declared as usize),
            ChunkMode::Forward => std::mem::take(&mut self.current),
        };
        Ok(Assembly {
            declared,
            bytes,
            chunks: 0,
        })
    }

    /// `current` holds a complete frame inside a chunked array.
    fn absorb_chunk(&mut self, mut assembly: Assembly) -> StreamResult<DeserializeState> {
        let chunk = match Chunk::decode(&self.current) {
            Ok(chunk) => chunk,
            Err(ChunkError::TruncatedHeader { .. }) => {
                return Err(StreamError::InvalidChunkType {
                    found: format!("{}-byte plain array", self.current.len()),
                    state: "reading a chunked array",
                });
            }
            Err(err) => return Err(err.into()),
        };

        let kind = match chunk.kind() {
            Some(ChunkKind::Begin) | None => {
                return Err(StreamError::InvalidChunkType {
                    found: String::from_utf8_lossy(&chunk.algorithm_id).into_owned(),
                    state: "reading a chunked array",
                });
            }
            Some(kind) => kind,
        };

        match (kind, self.config.chunk_mode) {
            (ChunkKind::Lzo1x, ChunkMode::Decompress) => {
                let raw = chunk::decompress(&chunk)?;
                assembly.bytes.extend_from_slice(&raw);
                if assembly.bytes.len() as u64 > u64::from(assembly.declared) {
                    return Err(StreamError::TotalMismatch {
                        declared: u64::from(assembly.declared),
                        assembled: assembly.bytes.len() as u64,
                    });
                }
            }
            (ChunkKind::Lzo1x, ChunkMode::Forward) => {
                chunk::validate(&chunk)?;
                assembly.bytes.extend_from_slice(&self.current);
            }
            (_, mode) => {
                chunk::validate(&chunk)?;
                if chunk.uncompressed_length != assembly.declared {
                    return Err(StreamError::TotalMismatch {
                        declared: u64::from(assembly.declared),
                        assembled: u64::from(chunk.uncompressed_length),
                    });
                }
                if mode == ChunkMode::Decompress && assembly.bytes.len() as u64 != u64::from(assembly.declared) {
                    return Err(StreamError::TotalMismatch {
                        declared: u64::from(assembly.declared),
                        assembled: assembly.bytes.len() as u64,
                    });
                }
                if mode == ChunkMode::Forward {
                    assembly.bytes.extend_from_slice(&self.current);
                }
                debug!(chunks = assembly.chunks, bytes = assembly.bytes.len(), "chunked array complete");
                return Ok(DeserializeState::TransmitArray(assembly.bytes));
            }
        }

        assembly.chunks += 1;
        trace!(chunks = assembly.chunks, "chunk absorbed");
        Ok(DeserializeState::GetNextArray(assembly))
    }
}
