//! FAST wire primitives
//!
//! Every integer on the wire is a big-endian run of 7-bit groups. The high bit
//! of each byte is the stop bit and is set only on the final byte of the run.
//! Signed integers are two's complement, with bit 0x40 of the first byte
//! carrying the sign.
//!
//! ASCII strings use the same stop-bit framing. Unicode strings and byte
//! vectors are length-prefixed.

use arrayvec::ArrayVec;

use crate::decoder::{DecodeError, DecodeResult};

pub const STOP_BIT: u8 = 0x80;
pub const SIGN_BIT: u8 = 0x40;
pub const DATA_BITS: u8 = 0x7f;

/// Presence map capacity in bytes (7 usable bits each)
pub const PMAP_MAX_BYTES: usize = 8;
/// Bound on a single encoded integer (64 bits / 7 rounded up)
pub const INT_MAX_BYTES: usize = 10;
pub const STRING_MAX_BYTES: usize = 256;
pub const BYTES_MAX_LEN: usize = 1024;
pub const MESSAGE_MAX_SIZE: usize = 2048;
pub const TEMPLATE_MAX_NUMBER: usize = 128;
pub const SEQUENCE_MAX_ROWS: usize = 64;
/// Decimal exponents must stay inside this range after any delta
pub const DECIMAL_EXPONENT_MIN: i64 = -63;
pub const DECIMAL_EXPONENT_MAX: i64 = 63;

pub const RECV_BUFFER_SIZE: usize = 2 * MESSAGE_MAX_SIZE;
/// Largest UDP payload
pub const DATAGRAM_MAX_SIZE: usize = 65536;

/// Read cursor over a borrowed byte slice.
///
/// Running dry yields `DecodeError::Partial`; callers roll the position back
/// to the start of the unfinished token before retrying.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    #[inline]
    pub fn peek(&self) -> DecodeResult<u8> {
        self.buf.get(self.pos).copied().ok_or(DecodeError::Partial)
    }

    #[inline]
    pub fn next_byte(&mut self) -> DecodeResult<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Ok(c)
    }

    pub fn take(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(DecodeError::Partial);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read one indivisible token. On `Partial` the position is restored so
    /// a retry with more bytes starts from the same byte.
    pub fn token<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> DecodeResult<T>,
    ) -> DecodeResult<T> {
        let start = self.pos;
        let result = read(self);
        if matches!(result, Err(DecodeError::Partial)) {
            self.pos = start;
        }
        result
    }
}

/// FIX `MsgType` values carried in the `MessageType` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Heartbeat,
    SequenceReset,
    SessionStatus,
    SnapshotRefresh,
    IncrementalRefresh,
}

impl MessageType {
    pub fn from_bytes(value: &[u8]) -> Option<Self> {
        match value {
            b"0" => Some(MessageType::Heartbeat),
            b"4" => Some(MessageType::SequenceReset),
            b"h" => Some(MessageType::SessionStatus),
            b"W" => Some(MessageType::SnapshotRefresh),
            b"X" => Some(MessageType::IncrementalRefresh),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Heartbeat => "0",
            MessageType::SequenceReset => "4",
            MessageType::SessionStatus => "h",
            MessageType::SnapshotRefresh => "W",
            MessageType::IncrementalRefresh => "X",
        }
    }
}

pub fn read_uint(r: &mut Reader<'_>) -> DecodeResult<u64> {
    let mut value: u64 = 0;

    for _ in 0..INT_MAX_BYTES {
        let c = r.next_byte()?;

        if value > (u64::MAX >> 7) {
            return Err(DecodeError::IntegerOverflow);
        }
        value = (value << 7) | u64::from(c & DATA_BITS);

        if c & STOP_BIT != 0 {
            return Ok(value);
        }
    }

    Err(DecodeError::IntegerOverflow)
}

pub fn read_int(r: &mut Reader<'_>) -> DecodeResult<i64> {
    const LIMIT: i64 = 1 << 56;

    let mut value: i64 = if r.peek()? & SIGN_BIT != 0 { -1 } else { 0 };

    for _ in 0..INT_MAX_BYTES {
        let c = r.next_byte()?;

        if !(-LIMIT..LIMIT).contains(&value) {
            return Err(DecodeError::IntegerOverflow);
        }
        value = (value << 7) | i64::from(c & DATA_BITS);

        if c & STOP_BIT != 0 {
            return Ok(value);
        }
    }

    Err(DecodeError::IntegerOverflow)
}

/// Read a stop-bit terminated ASCII run into `out`, stop bit stripped.
pub fn read_ascii(r: &mut Reader<'_>, out: &mut ArrayVec<u8, STRING_MAX_BYTES>) -> DecodeResult<()> {
    out.clear();

    loop {
        let c = r.next_byte()?;
        out.push(c & DATA_BITS);

        if c & STOP_BIT != 0 {
            return Ok(());
        }
        if out.len() >= STRING_MAX_BYTES {
            return Err(DecodeError::StringOverflow { max: STRING_MAX_BYTES });
        }
    }
}

/// Number of 7-bit groups needed for an unsigned value
pub fn uint_size(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Number of 7-bit groups needed for a signed value, sign bit included
pub fn int_size(value: i64) -> usize {
    let magnitude = if value >= 0 { value } else { !value };
    let bits = 64 - magnitude.leading_zeros() as usize + 1;
    bits.div_ceil(7).max(1)
}

pub fn write_uint(out: &mut Vec<u8>, value: u64) {
    let groups = uint_size(value);

    for i in (0..groups).rev() {
        let mut c = ((value >> (7 * i)) as u8) & DATA_BITS;
        if i == 0 {
            c |= STOP_BIT;
        }
        out.push(c);
    }
}

pub fn write_int(out: &mut Vec<u8>, value: i64) {
    let groups = int_size(value);

    for i in (0..groups).rev() {
        let mut c = ((value >> (7 * i)) as u8) & DATA_BITS;
        if i == 0 {
            c |= STOP_BIT;
        }
        out.push(c);
    }
}

/// Write raw ASCII bytes with the stop bit on the last one.
/// An empty slice becomes the single byte 0x80.
pub fn write_ascii(out: &mut Vec<u8>, bytes: &[u8]) {
    match bytes.split_last() {
        None => out.push(STOP_BIT),
        Some((last, head)) => {
            out.extend(head.iter().map(|c| c & DATA_BITS));
            out.push((last & DATA_BITS) | STOP_BIT);
        }
    }
}
