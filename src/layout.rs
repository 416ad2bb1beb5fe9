//! Book field positions
//!
//! Book synchronization reads a fixed set of FIX fields out of decoded
//! messages. Their positions are resolved once per template when the book set
//! is built; a template whose `MessageType` is a constant `X` or `W` must carry
//! every field the book logic needs, with the right type.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::book::{BookError, Entry, EntryType, UpdateAction};
use crate::field::{Field, FieldType, Operator, Value};
use crate::message::Message;
use crate::protocol::MessageType;
use crate::sequence::{Row, Sequence};
use crate::template::{Template, TemplateSet};

const UINT: &[FieldType] = &[FieldType::UInt];
const STRING: &[FieldType] = &[FieldType::Ascii, FieldType::Unicode];
const DECIMAL: &[FieldType] = &[FieldType::Decimal];
const SIZE: &[FieldType] = &[FieldType::Int, FieldType::UInt, FieldType::Decimal];
const SEQUENCE: &[FieldType] = &[FieldType::Sequence];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("template {template}: missing field {field}")]
    MissingField { template: u32, field: &'static str },

    #[error("template {template}: field {field} cannot be {kind:?}")]
    WrongType {
        template: u32,
        field: &'static str,
        kind: FieldType,
    },
}

struct Resolver<'a> {
    template: u32,
    fields: &'a [Field],
}

impl Resolver<'_> {
    fn find(&self, name: &'static str, kinds: &[FieldType]) -> Result<Option<usize>, LayoutError> {
        let Some(pos) = self.fields.iter().position(|f| f.name() == name) else {
            return Ok(None);
        };

        let kind = self.fields[pos].kind();
        if !kinds.contains(&kind) {
            return Err(LayoutError::WrongType {
                template: self.template,
                field: name,
                kind,
            });
        }
        Ok(Some(pos))
    }
}

fn require(template: u32, field: &'static str, pos: Option<usize>) -> Result<(), LayoutError> {
    match pos {
        Some(_) => Ok(()),
        None => Err(LayoutError::MissingField { template, field }),
    }
}

fn uint(field: Option<&Field>) -> Option<u64> {
    field.and_then(Field::as_uint)
}

fn bytes(field: Option<&Field>) -> Option<&[u8]> {
    field.and_then(Field::as_bytes)
}

/// Positions inside one `MDEntries` row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowLayout {
    pub entry_type: Option<usize>,
    pub price: Option<usize>,
    pub size: Option<usize>,
    pub action: Option<usize>,
    pub rptseq: Option<usize>,
    pub security_id: Option<usize>,
    pub symbol: Option<usize>,
    pub trading_session: Option<usize>,
    pub price_level: Option<usize>,
}

impl RowLayout {
    fn resolve(template: u32, fields: &[Field]) -> Result<Self, LayoutError> {
        let r = Resolver { template, fields };
        Ok(RowLayout {
            entry_type: r.find("MDEntryType", STRING)?,
            price: r.find("MDEntryPx", DECIMAL)?,
            size: r.find("MDEntrySize", SIZE)?,
            action: r.find("MDUpdateAction", UINT)?,
            rptseq: r.find("RptSeq", UINT)?,
            security_id: r.find("SecurityID", UINT)?,
            symbol: r.find("Symbol", STRING)?,
            trading_session: r.find("TradingSessionID", STRING)?,
            price_level: r.find("MDPriceLevel", UINT)?,
        })
    }

    fn field<'a>(row: &Row<'a>, pos: Option<usize>) -> Option<&'a Field> {
        pos.and_then(|i| row.field_at(i))
    }

    pub fn security_id(&self, row: &Row<'_>) -> Option<u64> {
        uint(Self::field(row, self.security_id))
    }

    pub fn symbol<'a>(&self, row: &Row<'a>) -> Option<&'a [u8]> {
        bytes(Self::field(row, self.symbol))
    }

    pub fn trading_session<'a>(&self, row: &Row<'a>) -> Option<&'a [u8]> {
        bytes(Self::field(row, self.trading_session))
    }

    /// Whether the template declares a `TradingSessionID` in its rows
    pub fn has_trading_session(&self) -> bool {
        self.trading_session.is_some()
    }

    pub fn rptseq(&self, row: &Row<'_>) -> Option<u64> {
        uint(Self::field(row, self.rptseq))
    }

    /// Extract the book entry of one row. Snapshot rows carry no update
    /// action and are always inserts.
    pub fn entry(&self, row: &Row<'_>, snapshot: bool) -> Result<Entry, BookError> {
        let kind = bytes(Self::field(row, self.entry_type)).ok_or(BookError::MissingField("MDEntryType"))?;
        let kind = EntryType::from_bytes(kind).ok_or(BookError::InvalidField("MDEntryType"))?;

        if kind == EntryType::EmptyBook {
            return Ok(Entry {
                kind,
                action: UpdateAction::New,
                price: None,
                size: 0,
                level: None,
            });
        }

        let action = if snapshot {
            UpdateAction::New
        } else {
            let action = uint(Self::field(row, self.action)).ok_or(BookError::MissingField("MDUpdateAction"))?;
            UpdateAction::from_u64(action).ok_or(BookError::InvalidField("MDUpdateAction"))?
        };

        let size = match Self::field(row, self.size).filter(|f| f.is_assigned()) {
            Some(field) => entry_size(field.value())?,
            None if action == UpdateAction::Delete => 0,
            None => return Err(BookError::MissingField("MDEntrySize")),
        };

        let level = match uint(Self::field(row, self.price_level)) {
            Some(level) => Some(
                usize::try_from(level)
                    .ok()
                    .and_then(|level| level.checked_sub(1))
                    .ok_or(BookError::InvalidField("MDPriceLevel"))?,
            ),
            None => None,
        };

        Ok(Entry {
            kind,
            action,
            price: Self::field(row, self.price).and_then(Field::as_decimal),
            size,
            level,
        })
    }
}

fn entry_size(value: &Value) -> Result<i64, BookError> {
    let size = match *value {
        Value::Int(v) => Some(v),
        Value::UInt(v) => i64::try_from(v).ok(),
        Value::Decimal(d) => d.rescale(0),
        Value::Bytes(_) => None,
    };
    size.ok_or(BookError::InvalidField("MDEntrySize"))
}

/// Top-level positions of one template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLayout {
    pub template_id: u32,
    /// `MessageType` when declared as a constant
    pub fixed_type: Option<MessageType>,
    pub msg_type: Option<usize>,
    pub seq_num: Option<usize>,
    pub last_processed: Option<usize>,
    pub rptseq: Option<usize>,
    pub security_id: Option<usize>,
    pub symbol: Option<usize>,
    pub trading_session: Option<usize>,
    pub entries: Option<usize>,
    pub row: RowLayout,
}

impl MessageLayout {
    pub fn resolve(template: &Template) -> Result<Self, LayoutError> {
        let id = template.id();
        let fields = template.fields();
        let r = Resolver { template: id, fields };

        let msg_type = r.find("MessageType", STRING)?;
        let fixed_type = msg_type
            .map(|i| &fields[i])
            .filter(|f| f.operator() == Operator::Constant)
            .and_then(Field::reset_value)
            .and_then(Value::as_bytes)
            .and_then(MessageType::from_bytes);

        let entries = match r.find("MDEntries", SEQUENCE)? {
            Some(pos) => Some(pos),
            None => r.find("GroupMDEntries", SEQUENCE)?,
        };
        let row = match entries.and_then(|i| fields[i].group()) {
            Some(group) => RowLayout::resolve(id, group.dictionary())?,
            None => RowLayout::default(),
        };

        let layout = MessageLayout {
            template_id: id,
            fixed_type,
            msg_type,
            seq_num: r.find("MsgSeqNum", UINT)?,
            last_processed: r.find("LastMsgSeqNumProcessed", UINT)?,
            rptseq: r.find("RptSeq", UINT)?,
            security_id: r.find("SecurityID", UINT)?,
            symbol: r.find("Symbol", STRING)?,
            trading_session: r.find("TradingSessionID", STRING)?,
            entries,
            row,
        };

        match fixed_type {
            Some(MessageType::IncrementalRefresh) => layout.check_increment()?,
            Some(MessageType::SnapshotRefresh) => layout.check_snapshot()?,
            _ => {}
        }
        Ok(layout)
    }

    fn check_increment(&self) -> Result<(), LayoutError> {
        let t = self.template_id;
        require(t, "MsgSeqNum", self.seq_num)?;
        require(t, "MDEntries", self.entries)?;
        require(t, "MDEntryType", self.row.entry_type)?;
        require(t, "MDUpdateAction", self.row.action)?;
        require(t, "MDEntryPx", self.row.price)?;
        require(t, "MDEntrySize", self.row.size)?;
        require(t, "RptSeq", self.row.rptseq)?;
        require(t, "SecurityID", self.row.security_id.or(self.row.symbol))
    }

    fn check_snapshot(&self) -> Result<(), LayoutError> {
        let t = self.template_id;
        require(t, "MsgSeqNum", self.seq_num)?;
        require(t, "LastMsgSeqNumProcessed", self.last_processed)?;
        require(t, "RptSeq", self.rptseq)?;
        require(t, "SecurityID", self.security_id.or(self.symbol))?;
        require(t, "MDEntries", self.entries)?;
        require(t, "MDEntryType", self.row.entry_type)?;
        require(t, "MDEntryPx", self.row.price)?;
        require(t, "MDEntrySize", self.row.size)
    }

    fn field<'m>(msg: &'m Message, pos: Option<usize>) -> Option<&'m Field> {
        pos.and_then(|i| msg.field_at(i))
    }

    pub fn message_type(&self, msg: &Message) -> Option<MessageType> {
        self.fixed_type
            .or_else(|| bytes(Self::field(msg, self.msg_type)).and_then(MessageType::from_bytes))
    }

    pub fn seq_num(&self, msg: &Message) -> Option<u64> {
        uint(Self::field(msg, self.seq_num))
    }

    pub fn last_processed(&self, msg: &Message) -> Option<u64> {
        uint(Self::field(msg, self.last_processed))
    }

    pub fn rptseq(&self, msg: &Message) -> Option<u64> {
        uint(Self::field(msg, self.rptseq))
    }

    pub fn security_id(&self, msg: &Message) -> Option<u64> {
        uint(Self::field(msg, self.security_id))
    }

    pub fn symbol<'m>(&self, msg: &'m Message) -> Option<&'m [u8]> {
        bytes(Self::field(msg, self.symbol))
    }

    pub fn trading_session<'m>(&self, msg: &'m Message) -> Option<&'m [u8]> {
        bytes(Self::field(msg, self.trading_session))
    }

    /// The `MDEntries` group, unless absent or sent as null
    pub fn entries<'m>(&self, msg: &'m Message) -> Option<&'m Sequence> {
        Self::field(msg, self.entries)
            .and_then(Field::group)
            .filter(|group| group.length().is_assigned())
    }
}

pub type Layouts = FxHashMap<u32, MessageLayout>;

/// Resolve the layout of every non-reset template
pub fn build_layouts(templates: &TemplateSet) -> Result<Layouts, LayoutError> {
    templates
        .iter()
        .filter(|t| !t.is_reset())
        .map(|t| MessageLayout::resolve(t).map(|layout| (t.id(), layout)))
        .collect()
}
