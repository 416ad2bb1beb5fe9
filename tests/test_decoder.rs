//! Wire format conformance and resumable decoding tests

mod common;

use std::io::{self, Read};

use fast_feed::{
    DecodeError, Decimal, Decoder, Encoder, Field, Message, Operator, Session, Template, TemplateSet,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ALL_TYPES: u32 = 10;
const OPT_CONSTANT: u32 = 11;
const ROWS: u32 = 12;
const COPY: u32 = 1;
const INCREMENT: u32 = 2;
const DELTA: u32 = 3;
const OPT_DELTA: u32 = 4;
const PX_DELTA: u32 = 5;
const PX: u32 = 6;

fn templates() -> TemplateSet {
    TemplateSet::new(vec![
        Template::new(COPY, "Copy").field(Field::uint("V", 1).with_operator(Operator::Copy)),
        Template::new(INCREMENT, "Increment").field(Field::uint("V", 1).with_operator(Operator::Increment)),
        Template::new(DELTA, "Delta")
            .field(Field::int("I", 1).with_operator(Operator::Delta))
            .field(Field::uint("U", 2).with_operator(Operator::Delta)),
        Template::new(OPT_DELTA, "OptDelta")
            .field(Field::int("OI", 1).optional().with_operator(Operator::Delta))
            .field(Field::uint("OU", 2).optional().with_operator(Operator::Delta)),
        Template::new(PX_DELTA, "PxDelta").field(Field::decimal("Px", 270).with_operator(Operator::Delta)),
        Template::new(PX, "Px").field(Field::decimal("Px", 270)),
        Template::new(ALL_TYPES, "AllTypes")
            .field(Field::uint("U", 1))
            .field(Field::int("I", 2))
            .field(Field::ascii("A", 3))
            .field(Field::unicode("S", 4))
            .field(Field::decimal("D", 5))
            .field(Field::bytes("B", 6))
            .field(Field::uint("OU", 7).optional())
            .field(Field::int("OI", 8).optional())
            .field(Field::ascii("OA", 9).optional())
            .field(Field::decimal("OD", 10).optional()),
        Template::new(OPT_CONSTANT, "OptConstant")
            .field(Field::uint("C", 1).optional().with_operator(Operator::Constant).with_reset(7u64))
            .field(Field::uint("N", 2)),
        Template::new(ROWS, "Rows").field(Field::uint("Seq", 1)).field(Field::sequence(
            "Rows",
            2,
            Field::uint("NoRows", 2),
            vec![Field::uint("V", 3)],
        )),
    ])
    .unwrap()
}

fn slot_mut(messages: &mut [Message], id: u32) -> &mut Message {
    messages.iter_mut().find(|m| m.template_id() == id).unwrap()
}

fn fill_all_types(msg: &mut Message) {
    msg.field_mut("U").unwrap().set_uint(300);
    msg.field_mut("I").unwrap().set_int(-5);
    msg.field_mut("A").unwrap().set_str("GAZP");
    msg.field_mut("S").unwrap().set_str("Газпром");
    msg.field_mut("D").unwrap().set_decimal(Decimal::new(15075, -2));
    msg.field_mut("B").unwrap().set_bytes(&[0x00, 0x01, 0xff]);
    msg.field_mut("OU").unwrap().set_uint(0);
    msg.field_mut("OI").unwrap().set_int(-1);
    msg.field_mut("OA").unwrap().set_empty();
    msg.field_mut("OD").unwrap().set_decimal(Decimal::new(-3, 1));
}

fn assert_all_types(msg: &Message) {
    assert_eq!(msg.template_id(), ALL_TYPES);
    assert_eq!(msg.field("U").unwrap().as_uint(), Some(300));
    assert_eq!(msg.field("I").unwrap().as_int(), Some(-5));
    assert_eq!(msg.field("A").unwrap().as_str(), Some("GAZP"));
    assert_eq!(msg.field("S").unwrap().as_str(), Some("Газпром"));
    assert_eq!(msg.field("D").unwrap().as_decimal(), Some(Decimal::new(15075, -2)));
    assert_eq!(msg.field("B").unwrap().as_bytes(), Some(&[0x00, 0x01, 0xff][..]));
    assert_eq!(msg.field("OU").unwrap().as_uint(), Some(0));
    assert_eq!(msg.field("OI").unwrap().as_int(), Some(-1));
    assert!(!msg.field("OA").unwrap().is_assigned());
    assert_eq!(msg.field("OD").unwrap().as_decimal(), Some(Decimal::new(-3, 1)));
}

fn encoded_all_types(set: &TemplateSet) -> Vec<u8> {
    let mut messages = set.messages();
    let msg = slot_mut(&mut messages, ALL_TYPES);
    fill_all_types(msg);

    let mut out = Vec::new();
    Encoder::new().encode(msg, &mut out).unwrap();
    out
}

/// Decode `values` of the single-field templates and return the bytes
fn encode_values(set: &TemplateSet, id: u32, values: &[u64]) -> Vec<u8> {
    let mut messages = set.messages();
    let mut encoder = Encoder::new();
    let mut out = Vec::new();
    for &v in values {
        let msg = slot_mut(&mut messages, id);
        msg.field_mut("V").unwrap().set_uint(v);
        encoder.encode(msg, &mut out).unwrap();
    }
    out
}

fn decode_all(set: &TemplateSet, mut buf: &[u8]) -> Vec<Result<u64, DecodeError>> {
    let mut decoder = Decoder::new(set);
    let mut messages = set.messages();
    let mut values = Vec::new();

    while !buf.is_empty() {
        let result = decoder
            .decode(&mut messages, buf)
            .map(|slot| messages[slot].field("V").unwrap().as_uint().unwrap());
        buf = &buf[decoder.consumed()..];
        values.push(result);
    }
    values
}

#[test]
fn test_operator_none_round_trip() {
    let set = templates();
    let bytes = encoded_all_types(&set);

    let mut decoder = Decoder::new(&set);
    let mut messages = set.messages();
    let slot = decoder.decode(&mut messages, &bytes).unwrap();
    assert_eq!(decoder.consumed(), bytes.len());
    assert_all_types(&messages[slot]);

    let mut again = Vec::new();
    Encoder::new().encode(&mut messages[slot], &mut again).unwrap();
    assert_eq!(again, bytes);
}

#[test]
fn test_copy_omits_repeated_value() {
    let set = templates();
    let bytes = encode_values(&set, COPY, &[5, 5, 6]);
    assert_eq!(bytes, vec![0xe0, 0x81, 0x85, 0x80, 0xa0, 0x86]);

    let values: Vec<u64> = decode_all(&set, &bytes).into_iter().map(Result::unwrap).collect();
    assert_eq!(values, vec![5, 5, 6]);
}

#[test]
fn test_increment_omits_next_value() {
    let set = templates();
    let bytes = encode_values(&set, INCREMENT, &[5, 6, 8]);
    assert_eq!(bytes, vec![0xe0, 0x82, 0x85, 0x80, 0xa0, 0x88]);

    let values: Vec<u64> = decode_all(&set, &bytes).into_iter().map(Result::unwrap).collect();
    assert_eq!(values, vec![5, 6, 8]);
}

#[test]
fn test_integer_delta_round_trip() {
    let set = templates();
    let mut messages = set.messages();
    let mut encoder = Encoder::new();
    let mut bytes = Vec::new();

    let values = [(10, 100), (7, 90), (-3, 90)];
    for (i, u) in values {
        let msg = slot_mut(&mut messages, DELTA);
        msg.field_mut("I").unwrap().set_int(i);
        msg.field_mut("U").unwrap().set_uint(u);
        encoder.encode(msg, &mut bytes).unwrap();
    }
    // deltas against a zero base: +10 +100, then -3 -10, then -10 0
    assert_eq!(
        bytes,
        vec![0xc0, 0x83, 0x8a, 0x00, 0xe4, 0x80, 0xfd, 0xf6, 0x80, 0xf6, 0x80]
    );

    let mut decoder = Decoder::new(&set);
    let mut decoded = set.messages();
    let mut buf = &bytes[..];
    for (i, u) in values {
        let slot = decoder.decode(&mut decoded, buf).unwrap();
        buf = &buf[decoder.consumed()..];
        assert_eq!(decoded[slot].field("I").unwrap().as_int(), Some(i));
        assert_eq!(decoded[slot].field("U").unwrap().as_uint(), Some(u));
    }
    assert!(buf.is_empty());
}

#[test]
fn test_optional_delta_null_keeps_base() {
    let set = templates();
    let mut writer = Session::new(io::empty(), &set);
    let mut bytes = Vec::new();

    let values = [(Some(-2), Some(5)), (None, None), (Some(-4), Some(3))];
    for (i, u) in values {
        let msg = writer.outgoing_mut(OPT_DELTA).unwrap();
        match i {
            Some(i) => msg.field_mut("OI").unwrap().set_int(i),
            None => msg.field_mut("OI").unwrap().set_empty(),
        }
        match u {
            Some(u) => msg.field_mut("OU").unwrap().set_uint(u),
            None => msg.field_mut("OU").unwrap().set_empty(),
        }
        writer.encode(OPT_DELTA, &mut bytes).unwrap();
    }

    let mut session = Session::new(&bytes[..], &set);
    for (i, u) in values {
        let msg = session.recv().unwrap().unwrap();
        assert_eq!(msg.field("OI").unwrap().as_int(), i);
        assert_eq!(msg.field("OU").unwrap().as_uint(), u);
    }
    assert!(session.recv().unwrap().is_none());
    assert_eq!(session.stats().garbled(), 0);
}

#[test]
fn test_split_at_every_offset() {
    let set = templates();
    let bytes = encoded_all_types(&set);

    for split in 1..bytes.len() {
        let mut decoder = Decoder::new(&set);
        let mut messages = set.messages();

        let first = decoder.decode(&mut messages, &bytes[..split]);
        assert_eq!(first, Err(DecodeError::Partial), "split at {split}");
        assert!(decoder.in_progress());

        let consumed = decoder.consumed();
        assert!(consumed <= split);

        let slot = decoder.decode(&mut messages, &bytes[consumed..]).unwrap();
        assert_eq!(consumed + decoder.consumed(), bytes.len(), "split at {split}");
        assert_all_types(&messages[slot]);
    }
}

/// Hands out the stream in random short reads
struct Chunked {
    data: Vec<u8>,
    pos: usize,
    rng: StdRng,
}

impl Read for Chunked {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .rng
            .gen_range(1..=7)
            .min(buf.len())
            .min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[test]
fn test_session_random_chunking() {
    let set = templates();
    let mut writer = Session::new(io::empty(), &set);
    let mut stream = Vec::new();

    for seq in 0..200u64 {
        let msg = writer.outgoing_mut(ROWS).unwrap();
        msg.field_mut("Seq").unwrap().set_uint(seq);
        let rows = msg.group_mut("Rows").unwrap();
        let len = (seq % 4) as usize;
        assert!(rows.set_len(len));
        for i in 0..len {
            rows.row_mut(i).unwrap()[0].set_uint(seq * 10 + i as u64);
        }
        writer.encode(ROWS, &mut stream).unwrap();
    }

    let source = Chunked {
        data: stream,
        pos: 0,
        rng: StdRng::seed_from_u64(7),
    };
    let mut session = Session::new(source, &set);

    let mut seen = 0;
    while let Some(msg) = session.recv().unwrap() {
        let seq = msg.field("Seq").unwrap().as_uint().unwrap();
        assert_eq!(seq, seen);

        let rows = msg.group("Rows").unwrap();
        assert_eq!(rows.len(), (seq % 4) as usize);
        for (i, row) in rows.rows().enumerate() {
            assert_eq!(row.field("V").unwrap().as_uint(), Some(seq * 10 + i as u64));
        }
        seen += 1;
    }

    assert_eq!(seen, 200);
    assert!(session.is_eof());
    assert_eq!(session.stats().garbled(), 0);
    assert_eq!(session.buffered(), 0);
}

#[test]
fn test_optional_constant() {
    let set = templates();
    let mut decoder = Decoder::new(&set);
    let mut messages = set.messages();

    // bit clear: absent, no bytes read for it
    let bytes = [0xc0, 0x8b, 0x81];
    let slot = decoder.decode(&mut messages, &bytes).unwrap();
    assert_eq!(decoder.consumed(), 3);
    assert!(messages[slot].field("C").unwrap().is_empty());
    assert_eq!(messages[slot].field("N").unwrap().as_uint(), Some(1));

    let bytes = [0xe0, 0x8b, 0x82];
    let slot = decoder.decode(&mut messages, &bytes).unwrap();
    assert_eq!(messages[slot].field("C").unwrap().as_uint(), Some(7));
    assert_eq!(messages[slot].field("N").unwrap().as_uint(), Some(2));
}

#[test]
fn test_exponent_out_of_range() {
    let set = templates();
    let mut decoder = Decoder::new(&set);
    let mut messages = set.messages();

    assert_eq!(
        decoder.decode(&mut messages, &[0xc0, 0x86, 0x00, 0xc0, 0x81]),
        Err(DecodeError::ExponentOutOfRange(64))
    );
    assert_eq!(
        decoder.decode(&mut messages, &[0xc0, 0x86, 0xc0, 0x81]),
        Err(DecodeError::ExponentOutOfRange(-64))
    );

    let slot = decoder.decode(&mut messages, &[0xc0, 0x86, 0xbf, 0x81]).unwrap();
    assert_eq!(messages[slot].field("Px").unwrap().as_decimal(), Some(Decimal::new(1, 63)));
}

#[test]
fn test_delta_exponent_out_of_range_keeps_state() {
    let set = templates();
    let mut decoder = Decoder::new(&set);
    let mut messages = set.messages();
    let px = |messages: &[Message], slot: usize| messages[slot].field("Px").unwrap().as_decimal();

    // exponent delta 63, mantissa delta 1
    let slot = decoder.decode(&mut messages, &[0xc0, 0x85, 0xbf, 0x81]).unwrap();
    assert_eq!(px(&messages, slot), Some(Decimal::new(1, 63)));

    // exponent delta 1 would reach 64
    assert_eq!(
        decoder.decode(&mut messages, &[0xc0, 0x85, 0x81, 0x80]),
        Err(DecodeError::ExponentOutOfRange(64))
    );

    // mantissa delta 2 applies to the last good value
    let slot = decoder.decode(&mut messages, &[0xc0, 0x85, 0x80, 0x82]).unwrap();
    assert_eq!(px(&messages, slot), Some(Decimal::new(3, 63)));
}

#[test]
fn test_zero_length_sequence() {
    let set = templates();
    let mut decoder = Decoder::new(&set);
    let mut messages = set.messages();

    let slot = decoder.decode(&mut messages, &[0xc0, 0x8c, 0x81, 0x80]).unwrap();
    assert_eq!(decoder.consumed(), 4);
    let rows = messages[slot].group("Rows").unwrap();
    assert!(rows.is_empty());
    assert!(rows.length().is_assigned());
    assert_eq!(rows.rows().count(), 0);

    let slot = decoder.decode(&mut messages, &[0xc0, 0x8c, 0x82, 0x81, 0x85]).unwrap();
    let rows = messages[slot].group("Rows").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.row(0).unwrap().field("V").unwrap().as_uint(), Some(5));
}

#[test]
fn test_unknown_template_skips_message() {
    let set = templates();
    let mut decoder = Decoder::new(&set);
    let mut messages = set.messages();

    assert_eq!(
        decoder.decode(&mut messages, &[0xc0, 0xe3, 0x81]),
        Err(DecodeError::UnknownTemplate(99))
    );
    assert!(decoder.consumed() >= 1);
    assert!(!decoder.in_progress());
}

#[test]
fn test_stream_of_mixed_templates() {
    let set = templates();
    let mut stream = encode_values(&set, COPY, &[9]);
    stream.extend(encoded_all_types(&set));

    let mut session = Session::new(&stream[..], &set);
    assert_eq!(session.recv().unwrap().unwrap().field("V").unwrap().as_uint(), Some(9));
    assert_all_types(session.recv().unwrap().unwrap());
    assert!(session.recv().unwrap().is_none());
    assert!(session.is_eof());

    // the shared helpers drive the same session type
    let book_templates = common::templates();
    let mut writer = common::StreamWriter::new(&book_templates);
    writer.heartbeat(1);
    assert!(!writer.out.is_empty());
}
