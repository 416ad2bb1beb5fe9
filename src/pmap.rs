//! Presence map
//!
//! A stop-bit terminated bitset in front of every message (and every sequence
//! row that needs one). Bit 0 is the most significant data bit of the first
//! byte. Bits beyond the transmitted bytes read as unset.

use crate::decoder::{DecodeError, DecodeResult};
use crate::protocol::{Reader, DATA_BITS, PMAP_MAX_BYTES, STOP_BIT};

/// Largest bit index a presence map can carry
pub const PMAP_MAX_BITS: usize = PMAP_MAX_BYTES * 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceMap {
    bytes: [u8; PMAP_MAX_BYTES],
    len: usize,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a presence map. On `Partial` the reader is left where it was.
    pub fn decode(r: &mut Reader<'_>) -> DecodeResult<Self> {
        let start = r.position();
        let mut pmap = PresenceMap::new();

        while pmap.len < PMAP_MAX_BYTES {
            let c = match r.next_byte() {
                Ok(c) => c,
                Err(e) => {
                    r.set_position(start);
                    return Err(e);
                }
            };

            pmap.bytes[pmap.len] = c & DATA_BITS;
            pmap.len += 1;

            if c & STOP_BIT != 0 {
                return Ok(pmap);
            }
        }

        Err(DecodeError::PmapOverflow { max: PMAP_MAX_BYTES })
    }

    /// Append the minimal encoding: trailing zero bytes trimmed, at least one
    /// byte, stop bit on the last byte only.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let used = self.encoded_len();

        for (i, &b) in self.bytes[..used].iter().enumerate() {
            if i + 1 == used {
                out.push(b | STOP_BIT);
            } else {
                out.push(b);
            }
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.bytes[..self.len]
            .iter()
            .rposition(|&b| b != 0)
            .map_or(1, |i| i + 1)
    }

    #[inline]
    pub fn is_set(&self, bit: usize) -> bool {
        let byte = bit / 7;
        byte < self.len && self.bytes[byte] & (1 << (6 - bit % 7)) != 0
    }

    /// Set a bit, growing the map as needed. Returns false past capacity.
    pub fn set(&mut self, bit: usize) -> bool {
        let byte = bit / 7;
        if byte >= PMAP_MAX_BYTES {
            return false;
        }

        if byte >= self.len {
            self.len = byte + 1;
        }
        self.bytes[byte] |= 1 << (6 - bit % 7);
        true
    }

    pub fn clear(&mut self) {
        self.bytes = [0; PMAP_MAX_BYTES];
        self.len = 0;
    }

    /// Number of bytes read from the wire (or touched while encoding)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.bytes[..self.len].iter().all(|&b| b == 0)
    }
}
