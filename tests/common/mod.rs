//! Shared templates and stream builders for the integration tests

#![allow(dead_code)]

use std::io;
use std::path::Path;

use fast_feed::{Decimal, Field, Operator, Session, Template, TemplateSet};

pub const INCREMENT: u32 = 1;
pub const SNAPSHOT: u32 = 2;
pub const HEARTBEAT: u32 = 3;
pub const RESET: u32 = 120;

pub const GAZP: u64 = 1001;
pub const SBER: u64 = 1002;

/// Incremental refresh, snapshot, heartbeat and reset templates laid out like
/// a MICEX-style order-book feed
pub fn templates() -> TemplateSet {
    let increment = Template::new(INCREMENT, "X-OLR")
        .field(Field::ascii("MessageType", 35).with_operator(Operator::Constant).with_reset("X"))
        .field(Field::uint("MsgSeqNum", 34).with_operator(Operator::Increment))
        .field(Field::sequence(
            "MDEntries",
            268,
            Field::uint("NoMDEntries", 268),
            vec![
                Field::uint("MDUpdateAction", 279).with_operator(Operator::Copy),
                Field::ascii("MDEntryType", 269).with_operator(Operator::Copy),
                Field::uint("SecurityID", 48).with_operator(Operator::Copy),
                Field::uint("RptSeq", 83).with_operator(Operator::Increment),
                Field::decimal("MDEntryPx", 270).optional().with_operator(Operator::Copy),
                Field::decimal("MDEntrySize", 271).optional().with_operator(Operator::Delta),
            ],
        ));

    let snapshot = Template::new(SNAPSHOT, "W-OLS")
        .field(Field::ascii("MessageType", 35).with_operator(Operator::Constant).with_reset("W"))
        .field(Field::uint("MsgSeqNum", 34))
        .field(Field::uint("LastMsgSeqNumProcessed", 369))
        .field(Field::uint("RptSeq", 83))
        .field(Field::uint("SecurityID", 48))
        .field(Field::sequence(
            "MDEntries",
            268,
            Field::uint("NoMDEntries", 268),
            vec![
                Field::ascii("MDEntryType", 269),
                Field::decimal("MDEntryPx", 270).optional(),
                Field::decimal("MDEntrySize", 271).optional(),
            ],
        ));

    let heartbeat = Template::new(HEARTBEAT, "Heartbeat")
        .field(Field::ascii("MessageType", 35).with_operator(Operator::Constant).with_reset("0"))
        .field(Field::uint("MsgSeqNum", 34));

    TemplateSet::new(vec![
        increment,
        snapshot,
        heartbeat,
        Template::new(RESET, "Reset").resets_session(),
    ])
    .unwrap()
}

/// One increment row
#[derive(Debug, Clone, Copy)]
pub struct Inc {
    pub action: u64,
    pub kind: &'static str,
    pub security_id: u64,
    pub rptseq: u64,
    pub price: i64,
    pub size: i64,
}

pub fn inc(action: u64, kind: &'static str, rptseq: u64, price: i64, size: i64) -> Inc {
    Inc {
        action,
        kind,
        security_id: GAZP,
        rptseq,
        price,
        size,
    }
}

/// Price with two decimals, as the venue quotes it
pub fn px(price: i64) -> Decimal {
    Decimal::new(price, -2)
}

/// Encodes messages into one byte stream the way a publisher would
pub struct StreamWriter {
    session: Session<io::Empty>,
    pub out: Vec<u8>,
}

impl StreamWriter {
    pub fn new(templates: &TemplateSet) -> Self {
        StreamWriter {
            session: Session::new(io::empty(), templates),
            out: Vec::new(),
        }
    }

    pub fn increment(&mut self, seq: u64, rows: &[Inc]) {
        let msg = self.session.outgoing_mut(INCREMENT).unwrap();
        msg.field_mut("MsgSeqNum").unwrap().set_uint(seq);

        let group = msg.group_mut("MDEntries").unwrap();
        assert!(group.set_len(rows.len()));
        for (i, inc) in rows.iter().enumerate() {
            let row = group.row_mut(i).unwrap();
            row[0].set_uint(inc.action);
            row[1].set_str(inc.kind);
            row[2].set_uint(inc.security_id);
            row[3].set_uint(inc.rptseq);
            row[4].set_decimal(px(inc.price));
            row[5].set_decimal(Decimal::new(inc.size, 0));
        }

        self.session.encode(INCREMENT, &mut self.out).unwrap();
    }

    /// Snapshot of one book; `levels` are (entry type, price, size)
    pub fn snapshot(&mut self, seq: u64, last_processed: u64, rptseq: u64, security_id: u64, levels: &[(&str, i64, i64)]) {
        let msg = self.session.outgoing_mut(SNAPSHOT).unwrap();
        msg.field_mut("MsgSeqNum").unwrap().set_uint(seq);
        msg.field_mut("LastMsgSeqNumProcessed").unwrap().set_uint(last_processed);
        msg.field_mut("RptSeq").unwrap().set_uint(rptseq);
        msg.field_mut("SecurityID").unwrap().set_uint(security_id);

        let group = msg.group_mut("MDEntries").unwrap();
        assert!(group.set_len(levels.len()));
        for (i, &(kind, price, size)) in levels.iter().enumerate() {
            let row = group.row_mut(i).unwrap();
            row[0].set_str(kind);
            row[1].set_decimal(px(price));
            row[2].set_decimal(Decimal::new(size, 0));
        }

        self.session.encode(SNAPSHOT, &mut self.out).unwrap();
    }

    pub fn heartbeat(&mut self, seq: u64) {
        let msg = self.session.outgoing_mut(HEARTBEAT).unwrap();
        msg.field_mut("MsgSeqNum").unwrap().set_uint(seq);
        self.session.encode(HEARTBEAT, &mut self.out).unwrap();
    }

    pub fn reset(&mut self) {
        self.session.encode(RESET, &mut self.out).unwrap();
    }

    pub fn write_to(&self, path: &Path) {
        std::fs::write(path, &self.out).unwrap();
    }
}

/// YAML for one book (GAZP, tick 0.01) fed from files
pub fn config_yaml(increments: &[&Path], snapshot: &Path, auto_recover: bool) -> String {
    let mut yaml = String::from("feeds:\n");
    for (i, path) in increments.iter().enumerate() {
        yaml.push_str(&format!(
            "  - name: inc-{i}\n    kind: increment\n    transport: {{ type: file, path: {} }}\n",
            path.display()
        ));
    }
    yaml.push_str(&format!(
        "  - name: snap\n    kind: snapshot\n    transport: {{ type: file, path: {} }}\n",
        snapshot.display()
    ));
    yaml.push_str(&format!(
        "books:\n  - symbol: GAZP\n    security_id: {GAZP}\n    depth: 10\n    tick: {{ mantissa: 1, exponent: -2 }}\n  - symbol: SBER\n    security_id: {SBER}\n    tick: {{ mantissa: 1, exponent: -2 }}\nsync:\n  auto_recover: {auto_recover}\n  max_join_polls: 100000\n"
    ));
    yaml
}
