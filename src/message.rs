//! Reusable per-template message slot
//!
//! A session owns one `Message` per template. Each decode overwrites the
//! slot in place, so references handed out by a session are only valid until
//! the next decode of the same template.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::field::Field;
use crate::sequence::Sequence;
use crate::template::Template;

#[derive(Debug, Clone)]
pub struct Message {
    template_id: u32,
    name: Arc<str>,
    reset: bool,
    pub(crate) fields: Vec<Field>,
    names: Arc<FxHashMap<Arc<str>, usize>>,
}

impl Message {
    pub(crate) fn from_template(template: &Template) -> Self {
        let names = template
            .fields()
            .iter()
            .enumerate()
            .map(|(i, f)| (Arc::from(f.name()), i))
            .collect();

        Message {
            template_id: template.id(),
            name: Arc::from(template.name()),
            reset: template.is_reset(),
            fields: template.fields().to_vec(),
            names: Arc::new(names),
        }
    }

    pub fn template_id(&self) -> u32 {
        self.template_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_reset(&self) -> bool {
        self.reset
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a top-level field, for lookups resolved once up front
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.position(name).and_then(|i| self.fields.get(i))
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        let i = self.position(name)?;
        self.fields.get_mut(i)
    }

    pub fn field_at(&self, pos: usize) -> Option<&Field> {
        self.fields.get(pos)
    }

    pub fn field_at_mut(&mut self, pos: usize) -> Option<&mut Field> {
        self.fields.get_mut(pos)
    }

    pub fn group(&self, name: &str) -> Option<&Sequence> {
        self.field(name).and_then(Field::group)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut Sequence> {
        self.field_mut(name).and_then(Field::group_mut)
    }

    /// Every field back to undefined / initial value, sequence rows included
    pub fn reset(&mut self) {
        self.fields.iter_mut().for_each(Field::reset);
    }
}
