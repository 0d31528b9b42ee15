//! Array stream protocol
//!
//! Serializer and deserializer state machines that move one array, a pair,
//! a list of arrays or a list of pairs across any number of partial I/O
//! calls. Each call gets whatever window the socket offered; the machines
//! remember exactly where they stopped.
//!
//! ```text
//!  plain array:      [len][bytes.....]
//!
//!  chunked array:    [len][BEGIN total]           start marker
//!                    [len][LZO1X chunk 0]         <= chunk_size input bytes each
//!                    [len][LZO1X chunk 1]
//!                    [len][END__ total]           stop marker
//! ```
//!
//! Every frame is an ordinary wire array of bytes, so a chunked array is
//! recognised by the shape of its first array: a lone, valid `BEGIN` chunk.
//! Zero-length arrays are always sent plain since they terminate lists.

mod deserializer;
mod serializer;

pub use deserializer::ArrayDeserializer;
pub use serializer::ArraySerializer;

use crate::error::StreamResult;

/// What the deserializer does with a chunked array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChunkMode {
    /// Validate and expand the chunks, deliver the original bytes
    #[default]
    Decompress,
    /// Deliver the chunk frames back to back (BEGIN .. END__) untouched
    Forward,
}

/// Outcome of one serialize / deserialize call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStep {
    /// Bytes produced into / consumed from the caller's buffer by this call
    pub bytes: usize,
    /// The whole transmit operation has finished
    pub done: bool,
}

/// Serialize a whole transmit operation into one buffer.
///
/// Arrays are taken from `arrays` in order; once it runs dry the serializer
/// is fed empty arrays, which is what terminates lists.
pub fn serialize_all<I>(ser: &mut ArraySerializer, arrays: I) -> StreamResult<Vec<u8>>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    let mut arrays = arrays.into_iter();
    let mut wire = Vec::new();
    let mut window = vec![0u8; 4096];
    loop {
        let step = ser.serialize(&mut window, || arrays.next().unwrap_or_default())?;
        wire.extend_from_slice(&window[..step.bytes]);
        if step.done {
            return Ok(wire);
        }
    }
}

/// Deserialize from one buffer, returning the arrays delivered and the bytes
/// consumed. Stops early if the operation completes before `wire` runs out.
pub fn deserialize_all(de: &mut ArrayDeserializer, wire: &[u8]) -> StreamResult<(Vec<Vec<u8>>, StreamStep)> {
    let mut arrays = Vec::new();
    let step = de.deserialize(wire, |arr| arrays.push(arr))?;
    Ok((arrays, step))
}
