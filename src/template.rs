//! Template field-metadata model
//!
//! Templates arrive already parsed (the XML loader lives outside this crate)
//! and are checked once here before any message slot is built from them.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::codec::operator_allowed;
use crate::field::{Field, FieldType, Operator};
use crate::message::Message;
use crate::pmap::PMAP_MAX_BITS;
use crate::protocol::TEMPLATE_MAX_NUMBER;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("duplicate template id {0}")]
    DuplicateId(u32),

    #[error("too many templates: {count} exceeds {max}")]
    TooMany { count: usize, max: usize },

    #[error("template {template}: operator {op:?} is not valid on {kind:?} field {field}")]
    InvalidOperator {
        template: u32,
        field: String,
        op: Operator,
        kind: FieldType,
    },

    #[error("template {template}: constant field {field} has no value")]
    MissingConstant { template: u32, field: String },

    #[error("template {template}: initial value of {field} does not match its type")]
    ResetTypeMismatch { template: u32, field: String },

    #[error("template {template}: sequence {field} length must be an unsigned integer")]
    InvalidLength { template: u32, field: String },

    #[error("template {template}: nested sequence {field}")]
    NestedSequence { template: u32, field: String },

    #[error("template {template}: presence map needs more than {max} bits")]
    PmapOverflow { template: u32, max: usize },

    #[error("template {template}: duplicate field name {field}")]
    DuplicateField { template: u32, field: String },
}

#[derive(Debug, Clone)]
pub struct Template {
    id: u32,
    name: String,
    reset: bool,
    fields: Vec<Field>,
    next_bit: usize,
}

impl Template {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Template {
            id,
            name: name.into(),
            reset: false,
            fields: Vec::new(),
            // bit 0 carries the template id
            next_bit: 1,
        }
    }

    /// Append a field, assigning the next message pmap bit if it needs one.
    pub fn field(mut self, mut field: Field) -> Self {
        if field.requires_pmap_bit() {
            field.assign_pmap_bit(self.next_bit);
            self.next_bit += 1;
        }
        self.fields.push(field);
        self
    }

    /// Decoding this template resets every dictionary of the session.
    pub fn resets_session(mut self) -> Self {
        self.reset = true;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
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

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.next_bit > PMAP_MAX_BITS {
            return Err(TemplateError::PmapOverflow {
                template: self.id,
                max: PMAP_MAX_BITS,
            });
        }

        check_unique_names(self.id, &self.fields)?;

        for field in &self.fields {
            self.validate_field(field)?;

            let Some(group) = field.group() else {
                continue;
            };

            if group.length().kind() != FieldType::UInt {
                return Err(TemplateError::InvalidLength {
                    template: self.id,
                    field: field.name().to_string(),
                });
            }
            self.validate_field(group.length())?;

            let row_bits = group.dictionary().iter().filter(|f| f.requires_pmap_bit()).count();
            if row_bits > PMAP_MAX_BITS {
                return Err(TemplateError::PmapOverflow {
                    template: self.id,
                    max: PMAP_MAX_BITS,
                });
            }

            check_unique_names(self.id, group.dictionary())?;

            for row_field in group.dictionary() {
                if row_field.kind() == FieldType::Sequence {
                    return Err(TemplateError::NestedSequence {
                        template: self.id,
                        field: row_field.name().to_string(),
                    });
                }
                self.validate_field(row_field)?;
            }
        }

        Ok(())
    }

    fn validate_field(&self, field: &Field) -> Result<(), TemplateError> {
        if field.kind() == FieldType::Sequence {
            return Ok(());
        }

        if !operator_allowed(field.kind(), field.operator()) {
            return Err(TemplateError::InvalidOperator {
                template: self.id,
                field: field.name().to_string(),
                op: field.operator(),
                kind: field.kind(),
            });
        }

        match field.reset_value() {
            Some(value) if !value.matches(field.kind()) => Err(TemplateError::ResetTypeMismatch {
                template: self.id,
                field: field.name().to_string(),
            }),
            None if field.operator() == Operator::Constant => Err(TemplateError::MissingConstant {
                template: self.id,
                field: field.name().to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn check_unique_names(template: u32, fields: &[Field]) -> Result<(), TemplateError> {
    for (i, field) in fields.iter().enumerate() {
        if fields[..i].iter().any(|f| f.name() == field.name()) {
            return Err(TemplateError::DuplicateField {
                template,
                field: field.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Validated templates of one session, indexed by id
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<Template>,
    index: FxHashMap<u32, usize>,
}

impl TemplateSet {
    pub fn new(templates: Vec<Template>) -> Result<Self, TemplateError> {
        if templates.len() > TEMPLATE_MAX_NUMBER {
            return Err(TemplateError::TooMany {
                count: templates.len(),
                max: TEMPLATE_MAX_NUMBER,
            });
        }

        let mut index = FxHashMap::default();
        for (slot, template) in templates.iter().enumerate() {
            template.validate()?;
            if index.insert(template.id(), slot).is_some() {
                return Err(TemplateError::DuplicateId(template.id()));
            }
        }

        Ok(TemplateSet { templates, index })
    }

    pub fn get(&self, id: u32) -> Option<&Template> {
        self.index.get(&id).map(|&slot| &self.templates[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub(crate) fn index(&self) -> &FxHashMap<u32, usize> {
        &self.index
    }

    /// One fresh message slot per template, in template order
    pub fn messages(&self) -> Vec<Message> {
        self.templates.iter().map(Message::from_template).collect()
    }
}
