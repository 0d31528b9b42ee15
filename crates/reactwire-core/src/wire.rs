//! Resumable scalar and array encoding against fixed-size buffer windows
//!
//! Every call moves as many bytes as the caller's window allows and records
//! how far it got in a [`Cursor`]. Calling again with the same value and the
//! same cursor picks up at exactly that byte, including in the middle of a
//! length prefix or of a multi-byte element.
//!
//! All multi-byte integers are little-endian.
//!
//! ```text
//!   array on the wire:  [len: u32 LE][elem 0][elem 1]...[elem len-1]
//!                        ^ cursor 0   ^ cursor 4
//! ```
//!
//! A zero-length array is a bare prefix; lists use it as their terminator.

use std::fmt;

use crate::error::{WireError, WireResult};

/// Widest scalar the primitives know about (u64 / i64 / f64)
pub const MAX_SCALAR_WIDTH: usize = 8;

/// Fixed-width value with a little-endian wire form
pub trait Scalar: Copy + Default + PartialEq + fmt::Debug {
    /// Bytes on the wire
    const WIDTH: usize;

    /// Write the wire form into `dst` (exactly `WIDTH` bytes)
    fn put_le(self, dst: &mut [u8]);

    /// Read the wire form from `src` (exactly `WIDTH` bytes)
    fn get_le(src: &[u8]) -> Self;
}

macro_rules! impl_scalar {
    ($($t:ty),* $(,)?) => {
        $(
            impl Scalar for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                #[inline]
                fn put_le(self, dst: &mut [u8]) {
                    dst.copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn get_le(src: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(src);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Integer type usable as an array length prefix
pub trait LengthPrefix: Scalar {
    /// Encode an element count, `None` if it does not fit
    fn from_len(len: u64) -> Option<Self>;

    /// Decode an element count
    fn to_len(self) -> u64;
}

impl LengthPrefix for u32 {
    #[inline]
    fn from_len(len: u64) -> Option<Self> {
        u32::try_from(len).ok()
    }

    #[inline]
    fn to_len(self) -> u64 {
        u64::from(self)
    }
}

impl LengthPrefix for u64 {
    #[inline]
    fn from_len(len: u64) -> Option<Self> {
        Some(len)
    }

    #[inline]
    fn to_len(self) -> u64 {
        self
    }
}

/// Outcome of one resumable call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes written to / read from the caller's window in this call
    pub moved: usize,
    /// Whole value transferred
    pub complete: bool,
}

impl Progress {
    #[inline]
    pub fn more_pending(&self) -> bool {
        !self.complete
    }
}

/// Progress through one in-flight value.
///
/// `offset` only grows and never passes the value's encoded length. The
/// staging area holds a partially received prefix or element between calls.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    offset: u64,
    staged: [u8; MAX_SCALAR_WIDTH],
    target: Option<u64>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the current value moved so far
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Encoded length of the current value, once known
    #[inline]
    pub fn target(&self) -> Option<u64> {
        self.target
    }

    /// True once any byte of the current value has moved
    #[inline]
    pub fn is_started(&self) -> bool {
        self.offset > 0
    }

    /// Forget the current value; the next call starts a new one
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Wire size of an `len`-element array with a `u32` prefix
#[inline]
pub fn encoded_len<T: Scalar>(len: usize) -> u64 {
    encoded_len_prefixed::<u32, T>(len)
}

/// Wire size of an `len`-element array with prefix `P`
#[inline]
pub fn encoded_len_prefixed<P: LengthPrefix, T: Scalar>(len: usize) -> u64 {
    P::WIDTH as u64 + len as u64 * T::WIDTH as u64
}

// ============================================================================
// Send
// ============================================================================

/// Write the next bytes of `value` into `out`.
///
/// Returns how many bytes went out and whether the scalar is finished.
pub fn send_scalar<T: Scalar>(value: T, out: &mut [u8], cursor: &mut Cursor) -> Progress {
    let width = T::WIDTH;
    cursor.target = Some(width as u64);

    let start = cursor.offset as usize;
    if start >= width {
        return Progress { moved: 0, complete: true };
    }

    let mut raw = [0u8; MAX_SCALAR_WIDTH];
    value.put_le(&mut raw[..width]);

    let n = (width - start).min(out.len());
    out[..n].copy_from_slice(&raw[start..start + n]);
    cursor.offset += n as u64;

    Progress {
        moved: n,
        complete: cursor.offset == width as u64,
    }
}

/// Write the next bytes of `arr` (u32 prefix, then elements) into `out`.
#[inline]
pub fn send_array<T: Scalar>(arr: &[T], out: &mut [u8], cursor: &mut Cursor) -> WireResult<Progress> {
    send_array_prefixed::<u32, T>(arr, out, cursor)
}

/// Write the next bytes of `arr` with an explicit prefix type.
///
/// The prefix and the elements share one cursor: offsets below
/// `P::WIDTH` address the prefix, the rest address element bytes.
pub fn send_array_prefixed<P: LengthPrefix, T: Scalar>(
    arr: &[T],
    out: &mut [u8],
    cursor: &mut Cursor,
) -> WireResult<Progress> {
    let len = arr.len() as u64;
    let prefix = P::from_len(len).ok_or(WireError::LengthOverflow(len))?;
    let pw = P::WIDTH as u64;
    let tw = T::WIDTH;
    let total = encoded_len_prefixed::<P, T>(arr.len());
    cursor.target = Some(total);

    let mut moved = 0usize;

    if cursor.offset < pw {
        let mut raw = [0u8; MAX_SCALAR_WIDTH];
        prefix.put_le(&mut raw[..P::WIDTH]);
        let start = cursor.offset as usize;
        let n = (P::WIDTH - start).min(out.len());
        out[..n].copy_from_slice(&raw[start..start + n]);
        moved += n;
        cursor.offset += n as u64;
    }

    while cursor.offset < total && moved < out.len() {
        let body = cursor.offset - pw;
        let idx = (body / tw as u64) as usize;
        let within = (body % tw as u64) as usize;
        let room = out.len() - moved;

        if within == 0 && room >= tw {
            // whole elements
            let count = (room / tw).min(arr.len() - idx);
            for (slot, elem) in out[moved..moved + count * tw]
                .chunks_exact_mut(tw)
                .zip(&arr[idx..idx + count])
            {
                elem.put_le(slot);
            }
            moved += count * tw;
            cursor.offset += (count * tw) as u64;
            continue;
        }

        // element straddles the window edge
        let mut raw = [0u8; MAX_SCALAR_WIDTH];
        arr[idx].put_le(&mut raw[..tw]);
        let n = (tw - within).min(room);
        out[moved..moved + n].copy_from_slice(&raw[within..within + n]);
        moved += n;
        cursor.offset += n as u64;
    }

    Ok(Progress {
        moved,
        complete: cursor.offset == total,
    })
}

// ============================================================================
// Receive
// ============================================================================

/// Consume the next bytes of a scalar from `input`.
///
/// `dst` is only written once the final byte arrives.
pub fn receive_scalar<T: Scalar>(dst: &mut T, input: &[u8], cursor: &mut Cursor) -> Progress {
    let width = T::WIDTH;
    cursor.target = Some(width as u64);

    let start = cursor.offset as usize;
    if start >= width {
        return Progress { moved: 0, complete: true };
    }

    let n = (width - start).min(input.len());
    cursor.staged[start..start + n].copy_from_slice(&input[..n]);
    cursor.offset += n as u64;

    let complete = cursor.offset == width as u64;
    if complete {
        *dst = T::get_le(&cursor.staged[..width]);
    }
    Progress { moved: n, complete }
}

/// Consume the next bytes of a u32-prefixed array from `input`.
///
/// Arrays declaring more than `limit` elements are rejected.
#[inline]
pub fn receive_array<T: Scalar>(
    dst: &mut Vec<T>,
    input: &[u8],
    cursor: &mut Cursor,
    limit: u64,
) -> WireResult<Progress> {
    receive_array_prefixed::<u32, T>(dst, input, cursor, limit)
}

/// Consume the next bytes of an array with an explicit prefix type.
///
/// The prefix is staged inside the cursor. `dst` is left untouched until the
/// whole prefix has arrived; at that point it is cleared and sized for the
/// declared length, and elements are appended as their bytes complete.
pub fn receive_array_prefixed<P: LengthPrefix, T: Scalar>(
    dst: &mut Vec<T>,
    input: &[u8],
    cursor: &mut Cursor,
    limit: u64,
) -> WireResult<Progress> {
    let pw = P::WIDTH;
    let tw = T::WIDTH;
    let mut used = 0usize;

    if cursor.offset < pw as u64 {
        let start = cursor.offset as usize;
        let n = (pw - start).min(input.len());
        cursor.staged[start..start + n].copy_from_slice(&input[..n]);
        used += n;
        cursor.offset += n as u64;

        if cursor.offset < pw as u64 {
            return Ok(Progress { moved: used, complete: false });
        }

        let declared = P::get_le(&cursor.staged[..pw]).to_len();
        if declared > limit {
            return Err(WireError::LengthLimit { declared, limit });
        }
        let body = declared
            .checked_mul(tw as u64)
            .and_then(|b| b.checked_add(pw as u64))
            .ok_or(WireError::LengthOverflow(declared))?;
        cursor.target = Some(body);

        dst.clear();
        dst.reserve(declared as usize);
    }

    let total = cursor.target.unwrap_or(pw as u64);

    while cursor.offset < total && used < input.len() {
        let within = ((cursor.offset - pw as u64) % tw as u64) as usize;
        let avail = input.len() - used;

        if within == 0 && avail >= tw {
            let remaining = ((total - cursor.offset) / tw as u64) as usize;
            let count = (avail / tw).min(remaining);
            dst.extend(
                input[used..used + count * tw]
                    .chunks_exact(tw)
                    .map(T::get_le),
            );
            used += count * tw;
            cursor.offset += (count * tw) as u64;
            continue;
        }

        let n = (tw - within).min(avail);
        cursor.staged[within..within + n].copy_from_slice(&input[used..used + n]);
        used += n;
        cursor.offset += n as u64;
        if within + n == tw {
            dst.push(T::get_le(&cursor.staged[..tw]));
        }
    }

    Ok(Progress {
        moved: used,
        complete: cursor.offset == total,
    })
}
