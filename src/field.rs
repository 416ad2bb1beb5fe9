//! Field data model
//!
//! A `Field` pairs template metadata (type, operator, presence, pmap bit,
//! reset value) with the operator state that survives from one message to
//! the next. `value` is what the last decode produced (or what the next
//! encode will send); `previous` is the dictionary entry the operators read.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::sequence::Sequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int,
    UInt,
    Ascii,
    Unicode,
    Decimal,
    Bytes,
    Sequence,
}

impl FieldType {
    pub fn is_byte_like(self) -> bool {
        matches!(self, FieldType::Ascii | FieldType::Unicode | FieldType::Bytes)
    }
}

/// Transmission operator. Declaration order is the dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    None,
    Copy,
    Increment,
    Delta,
    Constant,
}

impl Operator {
    /// Operators that read or write the previous value
    pub fn is_stateful(self) -> bool {
        matches!(self, Operator::Copy | Operator::Increment | Operator::Delta)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Presence {
    Mandatory,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldState {
    Undefined,
    Assigned,
    Empty,
}

/// Scaled decimal: `mantissa * 10^exponent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Decimal {
    pub exponent: i64,
    pub mantissa: i64,
}

impl Decimal {
    pub const fn new(mantissa: i64, exponent: i64) -> Self {
        Decimal { exponent, mantissa }
    }

    pub fn has_valid_exponent(&self) -> bool {
        (crate::protocol::DECIMAL_EXPONENT_MIN..=crate::protocol::DECIMAL_EXPONENT_MAX)
            .contains(&self.exponent)
    }

    /// Mantissa expressed at `exponent`. `None` when digits would be lost or
    /// the result overflows.
    pub fn rescale(&self, exponent: i64) -> Option<i64> {
        let mut mantissa = self.mantissa;
        let mut exp = self.exponent;

        while exp > exponent {
            mantissa = mantissa.checked_mul(10)?;
            exp -= 1;
        }
        while exp < exponent {
            if mantissa % 10 != 0 {
                return None;
            }
            mantissa /= 10;
            exp += 1;
        }

        Some(mantissa)
    }

    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 * 10f64.powi(self.exponent as i32)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}e{}", self.mantissa, self.exponent)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Decimal(Decimal),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn zero(kind: FieldType) -> Value {
        match kind {
            FieldType::Int => Value::Int(0),
            FieldType::UInt | FieldType::Sequence => Value::UInt(0),
            FieldType::Decimal => Value::Decimal(Decimal::default()),
            FieldType::Ascii | FieldType::Unicode | FieldType::Bytes => Value::Bytes(Vec::new()),
        }
    }

    pub fn matches(&self, kind: FieldType) -> bool {
        matches!(
            (self, kind),
            (Value::Int(_), FieldType::Int)
                | (Value::UInt(_), FieldType::UInt | FieldType::Sequence)
                | (Value::Decimal(_), FieldType::Decimal)
                | (Value::Bytes(_), FieldType::Ascii | FieldType::Unicode | FieldType::Bytes)
        )
    }

    /// Copy `other` into `self`, reusing the byte buffer when both are bytes.
    pub fn assign_from(&mut self, other: &Value) {
        match (&mut *self, other) {
            (Value::Bytes(dst), Value::Bytes(src)) => {
                dst.clear();
                dst.extend_from_slice(src);
            }
            (dst, src) => *dst = src.clone(),
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut Vec<u8> {
        if !matches!(self, Value::Bytes(_)) {
            *self = Value::Bytes(Vec::new());
        }
        match self {
            Value::Bytes(bytes) => bytes,
            _ => unreachable!("value was just converted to bytes"),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match *self {
            Value::UInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match *self {
            Value::Decimal(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Bytes(v.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    name: Arc<str>,
    id: u32,
    kind: FieldType,
    op: Operator,
    presence: Presence,

    pub(crate) reset: Option<Value>,

    pub(crate) pmap_bit: Option<usize>,
    pub(crate) state: FieldState,
    pub(crate) value: Value,
    pub(crate) previous_state: FieldState,
    pub(crate) previous: Value,
    pub(crate) group: Option<Box<Sequence>>,
}

impl Field {
    pub fn new(kind: FieldType, name: impl Into<Arc<str>>, id: u32) -> Self {
        Field {
            name: name.into(),
            id,
            kind,
            op: Operator::None,
            presence: Presence::Mandatory,
            reset: None,
            pmap_bit: None,
            state: FieldState::Undefined,
            value: Value::zero(kind),
            previous_state: FieldState::Undefined,
            previous: Value::zero(kind),
            group: None,
        }
    }

    pub fn int(name: impl Into<Arc<str>>, id: u32) -> Self {
        Self::new(FieldType::Int, name, id)
    }

    pub fn uint(name: impl Into<Arc<str>>, id: u32) -> Self {
        Self::new(FieldType::UInt, name, id)
    }

    pub fn ascii(name: impl Into<Arc<str>>, id: u32) -> Self {
        Self::new(FieldType::Ascii, name, id)
    }

    pub fn unicode(name: impl Into<Arc<str>>, id: u32) -> Self {
        Self::new(FieldType::Unicode, name, id)
    }

    pub fn decimal(name: impl Into<Arc<str>>, id: u32) -> Self {
        Self::new(FieldType::Decimal, name, id)
    }

    pub fn bytes(name: impl Into<Arc<str>>, id: u32) -> Self {
        Self::new(FieldType::Bytes, name, id)
    }

    /// Repeating group. Its presence follows the length field.
    pub fn sequence(name: impl Into<Arc<str>>, id: u32, length: Field, row: Vec<Field>) -> Self {
        let mut field = Self::new(FieldType::Sequence, name, id);
        field.presence = length.presence;
        field.group = Some(Box::new(Sequence::new(length, row)));
        field
    }

    pub fn optional(mut self) -> Self {
        self.presence = Presence::Optional;
        if let Some(group) = self.group.as_mut() {
            group.length.presence = Presence::Optional;
        }
        self
    }

    pub fn with_operator(mut self, op: Operator) -> Self {
        self.op = op;
        self
    }

    /// Declared initial value, used before the first assignment and by
    /// `constant`.
    pub fn with_reset(mut self, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.value = value.clone();
        self.previous = value.clone();
        self.reset = Some(value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> FieldType {
        self.kind
    }

    pub fn operator(&self) -> Operator {
        self.op
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn is_optional(&self) -> bool {
        self.presence == Presence::Optional
    }

    pub fn is_mandatory(&self) -> bool {
        self.presence == Presence::Mandatory
    }

    pub fn reset_value(&self) -> Option<&Value> {
        self.reset.as_ref()
    }

    pub fn pmap_bit(&self) -> Option<usize> {
        match self.group.as_ref() {
            Some(group) => group.length.pmap_bit,
            None => self.pmap_bit,
        }
    }

    pub fn state(&self) -> FieldState {
        self.state
    }

    pub fn previous_state(&self) -> FieldState {
        self.previous_state
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn previous(&self) -> &Value {
        &self.previous
    }

    pub fn requires_pmap_bit(&self) -> bool {
        if let Some(group) = self.group.as_ref() {
            return group.length.requires_pmap_bit();
        }

        match self.op {
            Operator::Copy | Operator::Increment => true,
            Operator::Constant => self.is_optional(),
            Operator::None | Operator::Delta => false,
        }
    }

    pub(crate) fn assign_pmap_bit(&mut self, bit: usize) {
        match self.group.as_mut() {
            Some(group) => group.length.pmap_bit = Some(bit),
            None => self.pmap_bit = Some(bit),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state == FieldState::Empty
    }

    pub fn is_assigned(&self) -> bool {
        self.state == FieldState::Assigned
    }

    fn assigned(&self) -> Option<&Value> {
        (self.state == FieldState::Assigned).then_some(&self.value)
    }

    pub fn as_int(&self) -> Option<i64> {
        self.assigned().and_then(Value::as_int)
    }

    pub fn as_uint(&self) -> Option<u64> {
        self.assigned().and_then(Value::as_uint)
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        self.assigned().and_then(Value::as_decimal)
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.assigned().and_then(Value::as_bytes)
    }

    /// String view of an ASCII or unicode field
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn group(&self) -> Option<&Sequence> {
        self.group.as_deref()
    }

    pub fn group_mut(&mut self) -> Option<&mut Sequence> {
        self.group.as_deref_mut()
    }

    pub fn set_int(&mut self, v: i64) {
        self.value = Value::Int(v);
        self.state = FieldState::Assigned;
    }

    pub fn set_uint(&mut self, v: u64) {
        self.value = Value::UInt(v);
        self.state = FieldState::Assigned;
    }

    pub fn set_decimal(&mut self, v: Decimal) {
        self.value = Value::Decimal(v);
        self.state = FieldState::Assigned;
    }

    pub fn set_bytes(&mut self, v: &[u8]) {
        let bytes = self.value.bytes_mut();
        bytes.clear();
        bytes.extend_from_slice(v);
        self.state = FieldState::Assigned;
    }

    pub fn set_str(&mut self, v: &str) {
        self.set_bytes(v.as_bytes());
    }

    pub fn set_value(&mut self, v: &Value) {
        self.value.assign_from(v);
        self.state = FieldState::Assigned;
    }

    pub fn set_empty(&mut self) {
        self.state = FieldState::Empty;
    }

    /// Back to the freshly loaded state, nested rows included
    pub fn reset(&mut self) {
        let initial = self.reset.clone().unwrap_or_else(|| Value::zero(self.kind));
        self.state = FieldState::Undefined;
        self.previous_state = FieldState::Undefined;
        self.value.assign_from(&initial);
        self.previous.assign_from(&initial);

        if let Some(group) = self.group.as_mut() {
            group.reset();
        }
    }

    pub(crate) fn copy_slot_from(&mut self, other: &Field) {
        self.state = other.state;
        self.value.assign_from(&other.value);
    }
}
