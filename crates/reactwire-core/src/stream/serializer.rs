//! Array serializer state machine

use tracing::{debug, trace};

use crate::chunk::{self, Chunk, ChunkKind};
use crate::config::StreamConfig;
use crate::error::{ChunkError, CorruptReason, StreamError, StreamResult};
use crate::terminator::{Terminator, TransmitPolicy};
use crate::wire::{send_array, Cursor};

use super::StreamStep;

/// Where the serializer is between calls
#[derive(Debug)]
enum SerializeState {
    /// Next call pulls a new array from the input callback
    Idle,
    /// Frames of one logical array are going out
    Sending { frames: Frames, logical_len: usize },
    /// Last frame is out; consult the terminator
    Terminating { logical_len: usize },
    Done,
    Failed(StreamError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Begin,
    Content,
    End,
    Finished,
}

/// Frame source for one logical array. `current()` is the frame in flight.
#[derive(Debug)]
enum Frames {
    /// The array itself, once
    Plain { data: Vec<u8>, started: bool },
    /// Pre-chunked array: each embedded chunk verbatim
    Forward { data: Vec<u8>, start: usize, end: usize },
    /// Compress `chunk_size` slices on demand
    Compress {
        data: Vec<u8>,
        offset: usize,
        phase: Phase,
        frame: Vec<u8>,
    },
}

impl Frames {
    fn for_array(data: Vec<u8>, compress: bool) -> Self {
        if chunk::starts_with_begin_frame(&data) {
            Frames::Forward { data, start: 0, end: 0 }
        } else if compress && !data.is_empty() {
            Frames::Compress {
                data,
                offset: 0,
                phase: Phase::Begin,
                frame: Vec::new(),
            }
        } else {
            Frames::Plain { data, started: false }
        }
    }

    fn current(&self) -> &[u8] {
        match self {
            Frames::Plain { data, .. } => data,
            Frames::Forward { data, start, end } => &data[*start..*end],
            Frames::Compress { frame, .. } => frame,
        }
    }

    /// Move to the next frame; false once the array is exhausted.
    fn advance(&mut self, chunk_size: usize) -> StreamResult<bool> {
        match self {
            Frames::Plain { started, .. } => Ok(!std::mem::replace(started, true)),

            Frames::Forward { data, start, end } => {
                if *end == data.len() {
                    // a receiver only leaves chunk mode on END__
                    let last = Chunk::decode(&data[*start..*end])?;
                    if last.kind() != Some(ChunkKind::End) {
                        return Err(StreamError::InvalidChunkType {
                            found: String::from_utf8_lossy(&last.algorithm_id).into_owned(),
                            state: "closing a pre-chunked array",
                        });
                    }
                    return Ok(false);
                }
                *start = *end;
                let len = chunk::frame_len(&data[*start..])?;
                if *start + len > data.len() {
                    return Err(ChunkError::CorruptChunk(CorruptReason::LengthMismatch).into());
                }
                *end = *start + len;
                Ok(true)
            }

            Frames::Compress {
                data,
                offset,
                phase,
                frame,
            } => {
                let total = u32::try_from(data.len()).map_err(|_| ChunkError::TooLarge(data.len()))?;
                match *phase {
                    Phase::Begin => {
                        *frame = Chunk::begin(total).encode();
                        *phase = Phase::Content;
                    }
                    Phase::Content => {
                        let stop = (*offset + chunk_size).min(data.len());
                        *frame = chunk::compress(&data[*offset..stop])?.encode();
                        trace!(offset = *offset, raw = stop - *offset, framed = frame.len(), "chunk compressed");
                        *offset = stop;
                        if *offset == data.len() {
                            *phase = Phase::End;
                        }
                    }
                    Phase::End => {
                        *frame = Chunk::end(total).encode();
                        *phase = Phase::Finished;
                    }
                    Phase::Finished => return Ok(false),
                }
                Ok(true)
            }
        }
    }
}

/// Streams arrays pulled from an input callback into caller-supplied
/// output windows.
///
/// ```rust,ignore
/// let mut ser = ArraySerializer::new(TransmitPolicy::List, StreamConfig::default());
/// loop {
///     let step = ser.serialize(&mut socket_buf, || next_array())?;
///     socket.write_all(&socket_buf[..step.bytes])?;
///     if step.done { break; }
/// }
/// ```
#[derive(Debug)]
pub struct ArraySerializer {
    config: StreamConfig,
    terminator: Terminator,
    state: SerializeState,
    cursor: Cursor,
    frame_open: bool,
}

impl ArraySerializer {
    pub fn new(policy: TransmitPolicy, config: StreamConfig) -> Self {
        Self {
            config,
            terminator: Terminator::new(policy),
            state: SerializeState::Idle,
            cursor: Cursor::new(),
            frame_open: false,
        }
    }

    #[inline]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self.state, SerializeState::Done)
    }

    /// Start a new transmit operation.
    pub fn reset(&mut self) {
        self.terminator.reset();
        self.state = SerializeState::Idle;
        self.cursor.reset();
        self.frame_open = false;
    }

    /// Fill as much of `out` as possible.
    ///
    /// `input` is called once per logical array, and only when there is room
    /// in `out` to start sending it. Returns the bytes written into `out`.
    /// After an error the serializer keeps failing until [`reset`](Self::reset).
    pub fn serialize<F>(&mut self, out: &mut [u8], input: F) -> StreamResult<StreamStep>
    where
        F: FnMut() -> Vec<u8>,
    {
        if let SerializeState::Failed(err) = &self.state {
            return Err(err.clone());
        }
        match self.drive(out, input) {
            Ok(step) => Ok(step),
            Err(err) => {
                self.state = SerializeState::Failed(err.clone());
                Err(err)
            }
        }
    }

    fn drive<F>(&mut self, out: &mut [u8], mut input: F) -> StreamResult<StreamStep>
    where
        F: FnMut() -> Vec<u8>,
    {
        let mut pos = 0usize;

        loop {
            let state = std::mem::replace(&mut self.state, SerializeState::Done);
            let (next, stop) = match state {
                SerializeState::Idle => {
                    if pos == out.len() {
                        (SerializeState::Idle, true)
                    } else {
                        let data = input();
                        let logical_len = data.len();
                        let frames = Frames::for_array(data, self.config.compress);
                        trace!(len = logical_len, kind = frames_kind(&frames), "array pulled");
                        self.frame_open = false;
                        (SerializeState::Sending { frames, logical_len }, false)
                    }
                }

                SerializeState::Sending {
                    mut frames,
                    logical_len,
                } => {
                    if !self.frame_open {
                        if !frames.advance(self.config.chunk_size)? {
                            self.state = SerializeState::Terminating { logical_len };
                            continue;
                        }
                        self.cursor.reset();
                        self.frame_open = true;
                    }
                    if pos == out.len() {
                        (SerializeState::Sending { frames, logical_len }, true)
                    } else {
                        let p = send_array(frames.current(), &mut out[pos..], &mut self.cursor)?;
                        pos += p.moved;
                        if p.complete {
                            self.frame_open = false;
                        }
                        (SerializeState::Sending { frames, logical_len }, false)
                    }
                }

                SerializeState::Terminating { logical_len } => {
                    if self.terminator.observe(logical_len) {
                        debug!(arrays = self.terminator.transmitted(), "transmit complete");
                        (SerializeState::Done, true)
                    } else {
                        (SerializeState::Idle, false)
                    }
                }

                SerializeState::Done => (SerializeState::Done, true),

                SerializeState::Failed(err) => return Err(err),
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
}

fn frames_kind(frames: &Frames) -> &'static str {
    match frames {
        Frames::Plain { .. } => "plain",
        Frames::Forward { .. } => "pre-chunked",
        Frames::Compress { .. } => "compressed",
    }
}
