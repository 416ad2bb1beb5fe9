//! Repeating groups
//!
//! Row fields share one operator dictionary: row N's previous value is row
//! N-1's value. Decoded rows are copied out of the dictionary into
//! per-row slots, which are allocated on first use and reused afterwards.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::codec::{decode_field, encode_field};
use crate::decoder::{DecodeError, DecodeResult, EncodeError, EncodeResult};
use crate::field::{Field, FieldState, FieldType};
use crate::pmap::PresenceMap;
use crate::protocol::{Reader, SEQUENCE_MAX_ROWS};

/// Progress through a partially decoded sequence
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SequenceCursor {
    length_done: bool,
    row: usize,
    row_pmap: Option<PresenceMap>,
    field: usize,
}

#[derive(Debug, Clone)]
pub struct Sequence {
    pub(crate) length: Field,
    dictionary: Vec<Field>,
    rows: Vec<Vec<Field>>,
    len: usize,
    needs_pmap: bool,
    names: Arc<FxHashMap<Arc<str>, usize>>,
}

impl Sequence {
    pub(crate) fn new(length: Field, mut row: Vec<Field>) -> Self {
        let mut bit = 0;
        for field in row.iter_mut() {
            if field.requires_pmap_bit() {
                field.assign_pmap_bit(bit);
                bit += 1;
            }
        }

        let names = row
            .iter()
            .enumerate()
            .map(|(i, f)| (Arc::from(f.name()), i))
            .collect();

        Sequence {
            length,
            dictionary: row,
            rows: Vec::new(),
            len: 0,
            needs_pmap: bit > 0,
            names: Arc::new(names),
        }
    }

    pub fn length(&self) -> &Field {
        &self.length
    }

    /// Active row count
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        SEQUENCE_MAX_ROWS
    }

    /// Whether every row carries its own presence map
    pub fn needs_pmap(&self) -> bool {
        self.needs_pmap
    }

    /// Row field declarations with their operator state
    pub fn dictionary(&self) -> &[Field] {
        &self.dictionary
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn row(&self, i: usize) -> Option<Row<'_>> {
        if i >= self.len {
            return None;
        }
        self.rows.get(i).map(|fields| Row {
            fields,
            names: &self.names,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows[..self.len].iter().map(|fields| Row {
            fields,
            names: &self.names,
        })
    }

    /// Mutable row slots, for filling a sequence before encoding
    pub fn row_mut(&mut self, i: usize) -> Option<&mut [Field]> {
        if i >= self.len {
            return None;
        }
        self.rows.get_mut(i).map(Vec::as_mut_slice)
    }

    /// Set the outgoing row count. Returns false past capacity.
    pub fn set_len(&mut self, len: usize) -> bool {
        if len > SEQUENCE_MAX_ROWS {
            return false;
        }
        self.ensure_rows(len);
        self.len = len;
        self.length.set_uint(len as u64);
        true
    }

    /// Send an optional sequence as absent
    pub fn set_empty(&mut self) {
        self.length.set_empty();
        self.len = 0;
    }

    fn ensure_rows(&mut self, len: usize) {
        while self.rows.len() < len {
            self.rows.push(self.dictionary.clone());
        }
    }

    fn transmitted_len(&self) -> u64 {
        match self.length.state() {
            FieldState::Assigned => self.length.value().as_uint().unwrap_or(0),
            FieldState::Empty | FieldState::Undefined => 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.length.reset();
        self.dictionary.iter_mut().for_each(Field::reset);
        self.rows.iter_mut().flatten().for_each(Field::reset);
        self.len = 0;
    }

    pub(crate) fn decode(
        &mut self,
        r: &mut Reader<'_>,
        pmap: &PresenceMap,
        cursor: &mut SequenceCursor,
    ) -> DecodeResult<()> {
        if !cursor.length_done {
            decode_field(r, pmap, &mut self.length)?;

            let len = self.transmitted_len();
            if len > SEQUENCE_MAX_ROWS as u64 {
                return Err(DecodeError::SequenceTooLong {
                    len,
                    max: SEQUENCE_MAX_ROWS,
                });
            }

            self.ensure_rows(len as usize);
            self.len = len as usize;
            cursor.length_done = true;
        }

        while cursor.row < self.len {
            let row_pmap = match cursor.row_pmap {
                Some(row_pmap) => row_pmap,
                None if self.needs_pmap => {
                    let row_pmap = PresenceMap::decode(r)?;
                    cursor.row_pmap = Some(row_pmap);
                    row_pmap
                }
                None => PresenceMap::new(),
            };

            let row = &mut self.rows[cursor.row];
            while let Some(field) = self.dictionary.get_mut(cursor.field) {
                if field.kind() == FieldType::Sequence {
                    return Err(DecodeError::NestedSequence);
                }
                decode_field(r, &row_pmap, field)?;
                row[cursor.field].copy_slot_from(field);
                cursor.field += 1;
            }

            cursor.row += 1;
            cursor.field = 0;
            cursor.row_pmap = None;
        }

        Ok(())
    }

    pub(crate) fn encode(&mut self, out: &mut Vec<u8>, pmap: &mut PresenceMap) -> EncodeResult<()> {
        let len = self.transmitted_len();
        if len > SEQUENCE_MAX_ROWS as u64 || len > self.rows.len() as u64 {
            return Err(EncodeError::SequenceTooLong {
                len,
                max: SEQUENCE_MAX_ROWS,
            });
        }

        encode_field(out, pmap, &mut self.length)?;

        let mut body = Vec::new();
        for row in self.rows.iter().take(len as usize) {
            let mut row_pmap = PresenceMap::new();
            body.clear();

            for (field, slot) in self.dictionary.iter_mut().zip(row) {
                if field.kind() == FieldType::Sequence {
                    return Err(EncodeError::NestedSequence);
                }
                field.copy_slot_from(slot);
                encode_field(&mut body, &mut row_pmap, field)?;
            }

            if self.needs_pmap {
                row_pmap.encode(out);
            }
            out.extend_from_slice(&body);
        }

        Ok(())
    }
}

/// Read-only view of one decoded row
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    fields: &'a [Field],
    names: &'a FxHashMap<Arc<str>, usize>,
}

impl<'a> Row<'a> {
    pub fn field(&self, name: &str) -> Option<&'a Field> {
        self.names.get(name).and_then(|&i| self.fields.get(i))
    }

    pub fn field_at(&self, pos: usize) -> Option<&'a Field> {
        self.fields.get(pos)
    }

    pub fn fields(&self) -> &'a [Field] {
        self.fields
    }
}
