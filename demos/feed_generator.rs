//! Synthetic FAST feed generator
//!
//! Writes a random increment stream for one book, a snapshot feed taken
//! halfway through it and a config replaying both from files:
//!
//! ```text
//! cargo run --example feed_generator -- /tmp/fast-demo 10000
//! ```

use std::env;
use std::error::Error;
use std::fs;
use std::io;
use std::path::PathBuf;

use fast_feed::{Book, Decimal, Field, Operator, PriceLevel, Session, Side, Template, TemplateSet};
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

const INCREMENT: u32 = 1;
const SNAPSHOT: u32 = 2;
const HEARTBEAT: u32 = 3;
const SECURITY_ID: u64 = 1001;

fn templates() -> Result<TemplateSet, Box<dyn Error>> {
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

    Ok(TemplateSet::new(vec![increment, snapshot, heartbeat])?)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let output_dir = PathBuf::from(args.get(1).map(String::as_str).unwrap_or("/tmp/fast-demo"));
    let message_count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10000);
    let snapshot_at = message_count / 2;

    fs::create_dir_all(&output_dir)?;
    let set = templates()?;
    let tick = Decimal::new(1, -2);

    let mut increments = Session::new(io::empty(), &set);
    let mut snapshots = Session::new(io::empty(), &set);
    let mut inc_out = Vec::new();
    let mut snap_out = Vec::new();

    // mirror of the published book, used to cut the snapshot
    let mut book = Book::new("GAZP", SECURITY_ID, tick, 20);
    let mut rng = rand::thread_rng();

    info!(messages = message_count, dir = %output_dir.display(), "generating feed");

    for seq in 1..=message_count {
        let side = if rng.gen_bool(0.5) { Side::Bid } else { Side::Ask };
        let levels = book.levels(side);

        let (action, price, size) = if !levels.is_empty() && rng.gen_bool(0.3) {
            let price = levels[rng.gen_range(0..levels.len())].price;
            book.delete_price(side, price)?;
            (2, price, 0)
        } else {
            let price = match side {
                Side::Bid => rng.gen_range(9900..=10000),
                Side::Ask => rng.gen_range(10001..=10100),
            };
            let exists = levels.iter().any(|l| l.price == price);
            let size = rng.gen_range(1..1000);
            book.set_level(side, PriceLevel { price, size })?;
            (u64::from(exists), price, size)
        };

        let msg = increments.outgoing_mut(INCREMENT).ok_or("increment template")?;
        msg.field_mut("MsgSeqNum").ok_or("MsgSeqNum")?.set_uint(seq);
        let group = msg.group_mut("MDEntries").ok_or("MDEntries")?;
        group.set_len(1);
        let row = group.row_mut(0).ok_or("MDEntries row")?;
        row[0].set_uint(action);
        row[1].set_str(if side == Side::Bid { "0" } else { "1" });
        row[2].set_uint(SECURITY_ID);
        row[3].set_uint(seq);
        row[4].set_decimal(book.to_price(price));
        row[5].set_decimal(Decimal::new(size, 0));
        increments.encode(INCREMENT, &mut inc_out)?;

        if seq == snapshot_at {
            let depth = book.depth(book.max_depth());
            let rows: Vec<_> = depth
                .bids
                .iter()
                .map(|level| ("0", level))
                .chain(depth.asks.iter().map(|level| ("1", level)))
                .collect();

            let msg = snapshots.outgoing_mut(SNAPSHOT).ok_or("snapshot template")?;
            msg.field_mut("MsgSeqNum").ok_or("MsgSeqNum")?.set_uint(1);
            msg.field_mut("LastMsgSeqNumProcessed").ok_or("LastMsgSeqNumProcessed")?.set_uint(seq);
            msg.field_mut("RptSeq").ok_or("RptSeq")?.set_uint(seq);
            msg.field_mut("SecurityID").ok_or("SecurityID")?.set_uint(SECURITY_ID);
            let group = msg.group_mut("MDEntries").ok_or("MDEntries")?;
            group.set_len(rows.len());
            for (i, (kind, &(price, size))) in rows.into_iter().enumerate() {
                let row = group.row_mut(i).ok_or("MDEntries row")?;
                row[0].set_str(kind);
                row[1].set_decimal(price);
                row[2].set_decimal(Decimal::new(size, 0));
            }
            snapshots.encode(SNAPSHOT, &mut snap_out)?;
        }

        if seq % 1000 == 0 {
            info!(seq, bids = book.bid_levels(), asks = book.ask_levels(), "generated");
        }
    }

    let inc_path = output_dir.join("inc.fast");
    let snap_path = output_dir.join("snap.fast");
    fs::write(&inc_path, &inc_out)?;
    fs::write(&snap_path, &snap_out)?;

    let config = format!(
        "feeds:\n  - name: inc\n    kind: increment\n    transport: {{ type: file, path: {} }}\n  - name: snap\n    kind: snapshot\n    transport: {{ type: file, path: {} }}\nbooks:\n  - symbol: GAZP\n    security_id: {SECURITY_ID}\n    depth: 20\n    tick: {{ mantissa: 1, exponent: -2 }}\n",
        inc_path.display(),
        snap_path.display(),
    );
    fs::write(output_dir.join("config.yaml"), config)?;

    info!(
        increment_bytes = inc_out.len(),
        snapshot_bytes = snap_out.len(),
        snapshot_at,
        best_bid = ?book.best_bid(),
        best_ask = ?book.best_ask(),
        "feed generation complete"
    );

    Ok(())
}
