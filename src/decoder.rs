//! Resumable message decoder
//!
//! `Decoder` holds the cursor of the message currently being decoded (its
//! presence map, template slot, next field and sequence progress). A call
//! that runs out of bytes returns `DecodeError::Partial` and reports how many
//! bytes of completed tokens it used; the next call continues from there with
//! the remaining bytes and yields the same message as a single call would.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::codec::{decode_field, encode_field};
use crate::field::Operator;
use crate::message::Message;
use crate::pmap::PresenceMap;
use crate::protocol::{read_uint, write_uint, Reader};
use crate::sequence::SequenceCursor;
use crate::template::TemplateSet;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("incomplete message: more bytes needed")]
    Partial,

    #[error("unknown template id: {0}")]
    UnknownTemplate(u64),

    #[error("template id omitted with no previous template")]
    MissingTemplateId,

    #[error("presence map longer than {max} bytes")]
    PmapOverflow { max: usize },

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("string longer than {max} bytes")]
    StringOverflow { max: usize },

    #[error("operator {op:?} not valid for field {field}")]
    InvalidOperator { field: u32, op: Operator },

    #[error("mandatory field {field} has no value")]
    MandatoryMissing { field: u32 },

    #[error("decimal exponent {0} out of range")]
    ExponentOutOfRange(i64),

    #[error("sequence length {len} exceeds capacity {max}")]
    SequenceTooLong { len: u64, max: usize },

    #[error("nested sequences are not supported")]
    NestedSequence,

    #[error("invalid UTF-8 in unicode string")]
    InvalidUtf8,
}

impl DecodeError {
    /// Not enough bytes yet; retry once more arrive
    pub fn is_partial(&self) -> bool {
        matches!(self, DecodeError::Partial)
    }

    /// Permanent protocol violation; the message is dropped
    pub fn is_garbled(&self) -> bool {
        !self.is_partial()
    }
}

pub type DecodeResult<T> = Result<T, DecodeError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("unknown template id: {0}")]
    UnknownTemplate(u32),

    #[error("value of field {field} cannot be represented")]
    ValueOutOfRange { field: u32 },

    #[error("mandatory field {field} has no value")]
    MandatoryMissing { field: u32 },

    #[error("operator {op:?} not valid for field {field}")]
    InvalidOperator { field: u32, op: Operator },

    #[error("value of field {field} does not match its type")]
    TypeMismatch { field: u32 },

    #[error("decimal exponent {0} out of range")]
    ExponentOutOfRange(i64),

    #[error("sequence length {len} exceeds capacity {max}")]
    SequenceTooLong { len: u64, max: usize },

    #[error("presence map has no room for field {field}")]
    PmapOverflow { field: u32 },

    #[error("nested sequences are not supported")]
    NestedSequence,
}

pub type EncodeResult<T> = Result<T, EncodeError>;

#[derive(Debug, Clone, Default)]
pub struct Decoder {
    index: FxHashMap<u32, usize>,

    // in-flight message
    pmap: Option<PresenceMap>,
    slot: Option<usize>,
    field: usize,
    seq: SequenceCursor,

    last_slot: Option<usize>,
    last_tid: Option<u32>,
    consumed: usize,
}

impl Decoder {
    pub fn new(templates: &TemplateSet) -> Self {
        Decoder {
            index: templates.index().clone(),
            ..Default::default()
        }
    }

    /// Message slot for a template id
    pub fn slot(&self, template_id: u32) -> Option<usize> {
        self.index.get(&template_id).copied()
    }

    /// Decode the next message from `buf` into its slot in `messages`.
    ///
    /// Returns the slot index. After every call, successful or not,
    /// `consumed()` tells how many bytes of `buf` must be dropped: the whole
    /// message, the completed tokens of a partial one, or (for a garbled one)
    /// the bytes the failed attempt read, at least one.
    pub fn decode(&mut self, messages: &mut [Message], buf: &[u8]) -> DecodeResult<usize> {
        let mut r = Reader::new(buf);
        let result = self.resume(messages, &mut r);

        self.consumed = match result {
            Ok(_) | Err(DecodeError::Partial) => r.position(),
            Err(_) => {
                self.abandon();
                r.position().max(1).min(buf.len())
            }
        };

        result
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Whether a message is partially decoded
    pub fn in_progress(&self) -> bool {
        self.pmap.is_some()
    }

    pub fn last_template_id(&self) -> Option<u32> {
        self.last_tid
    }

    /// Drop the in-flight message and forget the last template
    pub fn reset(&mut self) {
        self.abandon();
        self.last_slot = None;
        self.last_tid = None;
    }

    /// Drop the in-flight message
    pub fn abandon(&mut self) {
        self.pmap = None;
        self.slot = None;
        self.field = 0;
        self.seq = SequenceCursor::default();
    }

    fn resume(&mut self, messages: &mut [Message], r: &mut Reader<'_>) -> DecodeResult<usize> {
        let pmap = match self.pmap {
            Some(pmap) => pmap,
            None => {
                let pmap = PresenceMap::decode(r)?;
                self.pmap = Some(pmap);
                pmap
            }
        };

        let slot = match self.slot {
            Some(slot) => slot,
            None => {
                let slot = if pmap.is_set(0) {
                    let tid = r.token(read_uint)?;
                    u32::try_from(tid)
                        .ok()
                        .and_then(|tid| self.slot(tid))
                        .ok_or(DecodeError::UnknownTemplate(tid))?
                } else {
                    self.last_slot.ok_or(DecodeError::MissingTemplateId)?
                };
                self.slot = Some(slot);
                slot
            }
        };

        let message = messages
            .get_mut(slot)
            .ok_or(DecodeError::UnknownTemplate(slot as u64))?;

        while let Some(field) = message.fields.get_mut(self.field) {
            match field.group.as_deref_mut() {
                Some(group) => group.decode(r, &pmap, &mut self.seq)?,
                None => decode_field(r, &pmap, field)?,
            }
            self.field += 1;
            self.seq = SequenceCursor::default();
        }

        // a reset template also resets the template id history
        if message.is_reset() {
            self.last_slot = None;
            self.last_tid = None;
        } else {
            self.last_slot = Some(slot);
            self.last_tid = Some(message.template_id());
        }
        self.abandon();

        Ok(slot)
    }
}

/// Message encoder; omits the template id when it repeats
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    last_tid: Option<u32>,
    body: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` to `out` using the current values of its fields.
    pub fn encode(&mut self, message: &mut Message, out: &mut Vec<u8>) -> EncodeResult<()> {
        let tid = message.template_id();
        let mut pmap = PresenceMap::new();
        self.body.clear();

        if self.last_tid != Some(tid) {
            pmap.set(0);
            write_uint(&mut self.body, u64::from(tid));
        }

        for field in message.fields.iter_mut() {
            match field.group.as_deref_mut() {
                Some(group) => group.encode(&mut self.body, &mut pmap)?,
                None => encode_field(&mut self.body, &mut pmap, field)?,
            }
        }

        pmap.encode(out);
        out.extend_from_slice(&self.body);
        self.last_tid = if message.is_reset() { None } else { Some(tid) };
        Ok(())
    }

    pub fn reset(&mut self) {
        self.last_tid = None;
    }
}
