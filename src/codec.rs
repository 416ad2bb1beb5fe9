//! Field codec
//!
//! Operators are dispatched in the order none, copy, increment, delta,
//! constant. Nothing is written to a field until its whole token has been
//! read and validated: the value first, then the field state and the
//! `previous` dictionary entry. A `Partial` or garbled result leaves the
//! field as it was.

use arrayvec::ArrayVec;

use crate::decoder::{DecodeError, DecodeResult, EncodeError, EncodeResult};
use crate::field::{Decimal, Field, FieldState, FieldType, Operator, Value};
use crate::pmap::PresenceMap;
use crate::protocol::{
    read_ascii, read_int, read_uint, write_ascii, write_int, write_uint, Reader, BYTES_MAX_LEN,
    STOP_BIT, STRING_MAX_BYTES,
};

/// Whether `op` may be declared on a field of type `kind`
pub fn operator_allowed(kind: FieldType, op: Operator) -> bool {
    match op {
        Operator::Increment => matches!(kind, FieldType::Int | FieldType::UInt),
        Operator::Delta => matches!(kind, FieldType::Int | FieldType::UInt | FieldType::Decimal),
        Operator::None | Operator::Copy | Operator::Constant => kind != FieldType::Sequence,
    }
}

/// Decode one scalar field. On `Partial` the reader is rolled back to the
/// start of the field.
pub fn decode_field(r: &mut Reader<'_>, pmap: &PresenceMap, f: &mut Field) -> DecodeResult<()> {
    if !operator_allowed(f.kind(), f.operator()) {
        return Err(DecodeError::InvalidOperator {
            field: f.id(),
            op: f.operator(),
        });
    }

    r.token(|r| match f.operator() {
        Operator::None => {
            let present = read_value(r, f)?;
            f.state = if present {
                FieldState::Assigned
            } else {
                FieldState::Empty
            };
            Ok(())
        }
        Operator::Copy | Operator::Increment => {
            if bit_set(pmap, f) {
                let present = read_value(r, f)?;
                store_previous(f, present);
                Ok(())
            } else {
                inherit(f)
            }
        }
        Operator::Delta => read_delta(r, f),
        Operator::Constant => constant(pmap, f),
    })
}

fn bit_set(pmap: &PresenceMap, f: &Field) -> bool {
    f.pmap_bit.is_some_and(|bit| pmap.is_set(bit))
}

fn nullable_int(v: i64) -> Option<i64> {
    match v {
        0 => None,
        v if v > 0 => Some(v - 1),
        v => Some(v),
    }
}

fn nullable_uint(v: u64) -> Option<u64> {
    v.checked_sub(1)
}

fn read_nullable_int(r: &mut Reader<'_>, optional: bool) -> DecodeResult<Option<i64>> {
    let v = read_int(r)?;
    Ok(if optional { nullable_int(v) } else { Some(v) })
}

fn read_nullable_uint(r: &mut Reader<'_>, optional: bool) -> DecodeResult<Option<u64>> {
    let v = read_uint(r)?;
    Ok(if optional { nullable_uint(v) } else { Some(v) })
}

fn incremented(v: &Value) -> Option<Value> {
    match *v {
        Value::Int(x) => x.checked_add(1).map(Value::Int),
        Value::UInt(x) => x.checked_add(1).map(Value::UInt),
        _ => None,
    }
}

/// Read the raw value into `f.value`. Returns false for a NULL.
fn read_value(r: &mut Reader<'_>, f: &mut Field) -> DecodeResult<bool> {
    let optional = f.is_optional();

    match f.kind() {
        FieldType::Int => match read_nullable_int(r, optional)? {
            Some(v) => {
                f.value = Value::Int(v);
                Ok(true)
            }
            None => Ok(false),
        },
        FieldType::UInt => match read_nullable_uint(r, optional)? {
            Some(v) => {
                f.value = Value::UInt(v);
                Ok(true)
            }
            None => Ok(false),
        },
        FieldType::Decimal => {
            let Some(exponent) = read_nullable_int(r, optional)? else {
                return Ok(false);
            };
            let mantissa = read_int(r)?;

            let decimal = Decimal::new(mantissa, exponent);
            if !decimal.has_valid_exponent() {
                return Err(DecodeError::ExponentOutOfRange(exponent));
            }
            f.value = Value::Decimal(decimal);
            Ok(true)
        }
        FieldType::Ascii => read_ascii_value(r, &mut f.value, optional),
        FieldType::Unicode => read_vector(r, &mut f.value, optional, true),
        FieldType::Bytes => read_vector(r, &mut f.value, optional, false),
        FieldType::Sequence => Err(DecodeError::NestedSequence),
    }
}

/// ASCII with the NULL conventions: a run made only of zero bytes encodes
/// one zero less (mandatory) or two zeros less (optional) than it carries,
/// and a single zero byte in an optional field is NULL.
fn read_ascii_value(r: &mut Reader<'_>, value: &mut Value, optional: bool) -> DecodeResult<bool> {
    let mut chars = ArrayVec::new();
    read_ascii(r, &mut chars)?;

    if chars.iter().all(|&c| c == 0) {
        let zeros = match (optional, chars.len()) {
            (true, 1) => return Ok(false),
            (true, n) => n - 2,
            (false, n) => n - 1,
        };
        chars.truncate(zeros);
    }

    let out = value.bytes_mut();
    out.clear();
    out.extend_from_slice(&chars);
    Ok(true)
}

fn read_vector(
    r: &mut Reader<'_>,
    value: &mut Value,
    optional: bool,
    unicode: bool,
) -> DecodeResult<bool> {
    let Some(len) = read_nullable_uint(r, optional)? else {
        return Ok(false);
    };
    if len > BYTES_MAX_LEN as u64 {
        return Err(DecodeError::StringOverflow { max: BYTES_MAX_LEN });
    }

    let data = r.take(len as usize)?;
    if unicode && std::str::from_utf8(data).is_err() {
        return Err(DecodeError::InvalidUtf8);
    }

    let out = value.bytes_mut();
    out.clear();
    out.extend_from_slice(data);
    Ok(true)
}

fn store_previous(f: &mut Field, present: bool) {
    if present {
        f.previous.assign_from(&f.value);
        f.state = FieldState::Assigned;
        f.previous_state = FieldState::Assigned;
    } else {
        f.state = FieldState::Empty;
        f.previous_state = FieldState::Empty;
    }
}

/// Pmap bit unset for copy/increment: take the value the dictionary implies.
fn inherit(f: &mut Field) -> DecodeResult<()> {
    match f.previous_state {
        FieldState::Assigned => {
            if f.operator() == Operator::Increment {
                f.previous = incremented(&f.previous).ok_or(DecodeError::IntegerOverflow)?;
            }
            f.value.assign_from(&f.previous);
            f.state = FieldState::Assigned;
        }
        FieldState::Empty => {
            if f.is_mandatory() {
                return Err(DecodeError::MandatoryMissing { field: f.id() });
            }
            f.state = FieldState::Empty;
        }
        FieldState::Undefined => match f.reset.as_ref() {
            Some(initial) => {
                f.value.assign_from(initial);
                f.previous.assign_from(initial);
                f.state = FieldState::Assigned;
                f.previous_state = FieldState::Assigned;
            }
            None if f.is_optional() => {
                f.state = FieldState::Empty;
                f.previous_state = FieldState::Empty;
            }
            None => return Err(DecodeError::MandatoryMissing { field: f.id() }),
        },
    }

    Ok(())
}

fn read_delta(r: &mut Reader<'_>, f: &mut Field) -> DecodeResult<()> {
    let optional = f.is_optional();

    let next = match f.kind() {
        FieldType::Int | FieldType::UInt => {
            let Some(delta) = read_nullable_int(r, optional)? else {
                f.state = FieldState::Empty;
                return Ok(());
            };

            match f.previous {
                Value::Int(base) => {
                    Value::Int(base.checked_add(delta).ok_or(DecodeError::IntegerOverflow)?)
                }
                Value::UInt(base) => {
                    let sum = i128::from(base) + i128::from(delta);
                    Value::UInt(u64::try_from(sum).map_err(|_| DecodeError::IntegerOverflow)?)
                }
                _ => return Err(DecodeError::IntegerOverflow),
            }
        }
        FieldType::Decimal => {
            let Some(exponent_delta) = read_nullable_int(r, optional)? else {
                f.state = FieldState::Empty;
                return Ok(());
            };
            let mantissa_delta = read_int(r)?;

            let base = f.previous.as_decimal().unwrap_or_default();
            let exponent = base
                .exponent
                .checked_add(exponent_delta)
                .ok_or(DecodeError::IntegerOverflow)?;
            let mantissa = base
                .mantissa
                .checked_add(mantissa_delta)
                .ok_or(DecodeError::IntegerOverflow)?;

            let decimal = Decimal::new(mantissa, exponent);
            if !decimal.has_valid_exponent() {
                return Err(DecodeError::ExponentOutOfRange(exponent));
            }
            Value::Decimal(decimal)
        }
        _ => {
            return Err(DecodeError::InvalidOperator {
                field: f.id(),
                op: f.operator(),
            })
        }
    };

    f.previous.assign_from(&next);
    f.value = next;
    f.state = FieldState::Assigned;
    f.previous_state = FieldState::Assigned;
    Ok(())
}

fn constant(pmap: &PresenceMap, f: &mut Field) -> DecodeResult<()> {
    if f.is_optional() && !bit_set(pmap, f) {
        f.state = FieldState::Empty;
        return Ok(());
    }

    match f.reset.as_ref() {
        Some(initial) => {
            f.value.assign_from(initial);
            f.state = FieldState::Assigned;
            Ok(())
        }
        None => Err(DecodeError::MandatoryMissing { field: f.id() }),
    }
}

/// Encode one scalar field from its current value and state, updating the
/// dictionary exactly as the receiving decoder will.
pub fn encode_field(out: &mut Vec<u8>, pmap: &mut PresenceMap, f: &mut Field) -> EncodeResult<()> {
    let field = f.id();

    if !operator_allowed(f.kind(), f.operator()) {
        return Err(EncodeError::InvalidOperator {
            field,
            op: f.operator(),
        });
    }
    if f.state == FieldState::Assigned && !f.value.matches(f.kind()) {
        return Err(EncodeError::TypeMismatch { field });
    }
    if f.is_mandatory() && f.state != FieldState::Assigned && f.operator() != Operator::Constant {
        return Err(EncodeError::MandatoryMissing { field });
    }

    match f.operator() {
        Operator::None => write_value(out, f),
        Operator::Copy | Operator::Increment => {
            if !can_omit(f) {
                set_bit(pmap, f)?;
                write_value(out, f)?;
            }

            if f.state == FieldState::Assigned {
                f.previous.assign_from(&f.value);
                f.previous_state = FieldState::Assigned;
            } else {
                f.previous_state = FieldState::Empty;
            }
            Ok(())
        }
        Operator::Delta => write_delta(out, f),
        Operator::Constant => {
            if f.is_optional() && f.state == FieldState::Assigned {
                set_bit(pmap, f)?;
            }
            Ok(())
        }
    }
}

/// True when the receiver would infer exactly the outgoing value (or
/// emptiness) with the pmap bit unset.
fn can_omit(f: &Field) -> bool {
    let assigned = f.state == FieldState::Assigned;

    match f.previous_state {
        FieldState::Assigned if f.operator() == Operator::Increment => {
            assigned && incremented(&f.previous).as_ref() == Some(&f.value)
        }
        FieldState::Assigned => assigned && f.previous == f.value,
        FieldState::Empty => !assigned,
        FieldState::Undefined => match f.reset.as_ref() {
            Some(initial) => assigned && *initial == f.value,
            None => !assigned && f.is_optional(),
        },
    }
}

fn set_bit(pmap: &mut PresenceMap, f: &Field) -> EncodeResult<()> {
    match f.pmap_bit {
        Some(bit) if pmap.set(bit) => Ok(()),
        _ => Err(EncodeError::PmapOverflow { field: f.id() }),
    }
}

fn nullable_int_wire(v: i64, field: u32) -> EncodeResult<i64> {
    if v >= 0 {
        v.checked_add(1).ok_or(EncodeError::ValueOutOfRange { field })
    } else {
        Ok(v)
    }
}

fn write_value(out: &mut Vec<u8>, f: &Field) -> EncodeResult<()> {
    let field = f.id();
    let optional = f.is_optional();

    if f.state != FieldState::Assigned {
        // NULL is 0x80 for every nullable type
        out.push(STOP_BIT);
        return Ok(());
    }

    match &f.value {
        Value::Int(v) => {
            let wire = if optional { nullable_int_wire(*v, field)? } else { *v };
            write_int(out, wire);
        }
        Value::UInt(v) => {
            let wire = if optional {
                v.checked_add(1).ok_or(EncodeError::ValueOutOfRange { field })?
            } else {
                *v
            };
            write_uint(out, wire);
        }
        Value::Decimal(d) => {
            if !d.has_valid_exponent() {
                return Err(EncodeError::ExponentOutOfRange(d.exponent));
            }
            let exponent = if optional {
                nullable_int_wire(d.exponent, field)?
            } else {
                d.exponent
            };
            write_int(out, exponent);
            write_int(out, d.mantissa);
        }
        Value::Bytes(bytes) => match f.kind() {
            FieldType::Ascii => write_ascii_value(out, bytes, optional, field)?,
            _ => write_vector(out, bytes, optional, field)?,
        },
    }

    Ok(())
}

fn write_ascii_value(out: &mut Vec<u8>, bytes: &[u8], optional: bool, field: u32) -> EncodeResult<()> {
    if bytes.iter().any(|c| !c.is_ascii()) {
        return Err(EncodeError::ValueOutOfRange { field });
    }

    if bytes.iter().all(|&c| c == 0) {
        let zeros = bytes.len() + if optional { 2 } else { 1 };
        if zeros > STRING_MAX_BYTES {
            return Err(EncodeError::ValueOutOfRange { field });
        }
        out.extend(std::iter::repeat(0).take(zeros - 1));
        out.push(STOP_BIT);
    } else {
        if bytes.len() > STRING_MAX_BYTES {
            return Err(EncodeError::ValueOutOfRange { field });
        }
        write_ascii(out, bytes);
    }

    Ok(())
}

fn write_vector(out: &mut Vec<u8>, bytes: &[u8], optional: bool, field: u32) -> EncodeResult<()> {
    if bytes.len() > BYTES_MAX_LEN {
        return Err(EncodeError::ValueOutOfRange { field });
    }

    write_uint(out, bytes.len() as u64 + u64::from(optional));
    out.extend_from_slice(bytes);
    Ok(())
}

fn write_delta(out: &mut Vec<u8>, f: &mut Field) -> EncodeResult<()> {
    let field = f.id();
    let optional = f.is_optional();

    if f.state != FieldState::Assigned {
        out.push(STOP_BIT);
        return Ok(());
    }

    match (&f.value, &f.previous) {
        (Value::Int(v), Value::Int(base)) => {
            let delta = v.checked_sub(*base).ok_or(EncodeError::ValueOutOfRange { field })?;
            write_int(out, if optional { nullable_int_wire(delta, field)? } else { delta });
        }
        (Value::UInt(v), Value::UInt(base)) => {
            let delta = i64::try_from(i128::from(*v) - i128::from(*base))
                .map_err(|_| EncodeError::ValueOutOfRange { field })?;
            write_int(out, if optional { nullable_int_wire(delta, field)? } else { delta });
        }
        (Value::Decimal(v), Value::Decimal(base)) => {
            if !v.has_valid_exponent() {
                return Err(EncodeError::ExponentOutOfRange(v.exponent));
            }
            let exponent_delta = v
                .exponent
                .checked_sub(base.exponent)
                .ok_or(EncodeError::ValueOutOfRange { field })?;
            let mantissa_delta = v
                .mantissa
                .checked_sub(base.mantissa)
                .ok_or(EncodeError::ValueOutOfRange { field })?;
            let exponent_delta = if optional {
                nullable_int_wire(exponent_delta, field)?
            } else {
                exponent_delta
            };
            write_int(out, exponent_delta);
            write_int(out, mantissa_delta);
        }
        _ => return Err(EncodeError::TypeMismatch { field }),
    }

    f.previous.assign_from(&f.value);
    f.previous_state = FieldState::Assigned;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pmap_with(bits: &[usize]) -> PresenceMap {
        let mut pmap = PresenceMap::new();
        for &bit in bits {
            pmap.set(bit);
        }
        pmap
    }

    fn with_bit(mut f: Field, bit: usize) -> Field {
        f.assign_pmap_bit(bit);
        f
    }

    #[test]
    fn test_none_optional_uint_offsets_by_one() {
        let mut f = Field::uint("Qty", 1).optional();
        let pmap = PresenceMap::new();

        let mut r = Reader::new(&[0x80, 0x81]);
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert!(f.is_empty());
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert_eq!(f.as_uint(), Some(0));
    }

    #[test]
    fn test_copy_inherits_when_bit_unset() {
        let mut f = with_bit(Field::uint("Px", 1).with_operator(Operator::Copy), 1);

        let mut r = Reader::new(&[0x85]);
        decode_field(&mut r, &pmap_with(&[1]), &mut f).unwrap();
        assert_eq!(f.as_uint(), Some(5));

        let mut r = Reader::new(&[]);
        decode_field(&mut r, &PresenceMap::new(), &mut f).unwrap();
        assert_eq!(f.as_uint(), Some(5));
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_copy_mandatory_without_reset_is_garbled() {
        let mut f = with_bit(Field::uint("Px", 9).with_operator(Operator::Copy), 1);
        let mut r = Reader::new(&[]);
        assert_eq!(
            decode_field(&mut r, &PresenceMap::new(), &mut f),
            Err(DecodeError::MandatoryMissing { field: 9 })
        );
    }

    #[test]
    fn test_increment_from_previous() {
        let mut f = with_bit(Field::uint("Seq", 1).with_operator(Operator::Increment), 1);

        let mut r = Reader::new(&[0x8a]);
        decode_field(&mut r, &pmap_with(&[1]), &mut f).unwrap();
        assert_eq!(f.as_uint(), Some(10));

        for expected in 11..14 {
            decode_field(&mut r, &PresenceMap::new(), &mut f).unwrap();
            assert_eq!(f.as_uint(), Some(expected));
        }
    }

    #[test]
    fn test_delta_optional_null_keeps_previous() {
        let mut f = Field::int("Px", 1).with_operator(Operator::Delta).optional();
        let pmap = PresenceMap::new();

        // +5 is sent as 6 in a nullable delta
        let mut r = Reader::new(&[0x86, 0x80, 0x82]);
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert_eq!(f.as_int(), Some(5));
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert!(f.is_empty());
        assert_eq!(f.previous(), &Value::Int(5));
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert_eq!(f.as_int(), Some(6));
    }

    #[test]
    fn test_decimal_delta_out_of_range_keeps_state() {
        let mut f = Field::decimal("Px", 1).with_operator(Operator::Delta);
        let pmap = PresenceMap::new();

        let mut out = Vec::new();
        write_int(&mut out, 60);
        write_int(&mut out, 1);
        let mut r = Reader::new(&out);
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert_eq!(f.as_decimal(), Some(Decimal::new(1, 60)));

        let mut out = Vec::new();
        write_int(&mut out, 4);
        write_int(&mut out, 1);
        let mut r = Reader::new(&out);
        assert_eq!(
            decode_field(&mut r, &pmap, &mut f),
            Err(DecodeError::ExponentOutOfRange(64))
        );
        assert_eq!(f.previous(), &Value::Decimal(Decimal::new(1, 60)));
        assert_eq!(f.state(), FieldState::Assigned);
    }

    #[test]
    fn test_optional_constant_reads_no_bytes() {
        let mut f = with_bit(
            Field::ascii("Type", 1)
                .with_operator(Operator::Constant)
                .with_reset("X")
                .optional(),
            1,
        );

        let bytes = [0xff];
        let mut r = Reader::new(&bytes);
        decode_field(&mut r, &PresenceMap::new(), &mut f).unwrap();
        assert!(f.is_empty());
        assert_eq!(r.position(), 0);

        decode_field(&mut r, &pmap_with(&[1]), &mut f).unwrap();
        assert_eq!(f.as_str(), Some("X"));
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_ascii_null_conventions() {
        let pmap = PresenceMap::new();

        let mut f = Field::ascii("S", 1).optional();
        let mut r = Reader::new(&[0x80, 0x00, 0x80, 0x00, 0x00, 0x80]);
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert!(f.is_empty());
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert_eq!(f.as_bytes(), Some(&b""[..]));
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert_eq!(f.as_bytes(), Some(&b"\0"[..]));

        let mut f = Field::ascii("S", 1);
        let mut r = Reader::new(&[0x80, 0x00, 0x80]);
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert_eq!(f.as_bytes(), Some(&b""[..]));
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert_eq!(f.as_bytes(), Some(&b"\0"[..]));
    }

    #[test]
    fn test_increment_on_string_is_garbled() {
        let mut f = Field::ascii("S", 3).with_operator(Operator::Increment);
        let mut r = Reader::new(&[0xc1]);
        assert!(matches!(
            decode_field(&mut r, &PresenceMap::new(), &mut f),
            Err(DecodeError::InvalidOperator { field: 3, .. })
        ));
    }

    #[test]
    fn test_partial_rolls_back_to_field_start() {
        let mut f = Field::decimal("Px", 1);
        let mut r = Reader::new(&[0xfe, 0x39]);
        assert_eq!(
            decode_field(&mut r, &PresenceMap::new(), &mut f),
            Err(DecodeError::Partial)
        );
        assert_eq!(r.position(), 0);
        assert_eq!(f.state(), FieldState::Undefined);
    }

    #[test]
    fn test_copy_encode_omits_inferred_value() {
        let mut f = with_bit(Field::uint("Px", 1).with_operator(Operator::Copy), 1);

        let mut out = Vec::new();
        let mut pmap = PresenceMap::new();
        f.set_uint(7);
        encode_field(&mut out, &mut pmap, &mut f).unwrap();
        assert_eq!(out, vec![0x87]);
        assert!(pmap.is_set(1));

        let mut out = Vec::new();
        let mut pmap = PresenceMap::new();
        encode_field(&mut out, &mut pmap, &mut f).unwrap();
        assert!(out.is_empty());
        assert!(!pmap.is_set(1));
    }

    #[test]
    fn test_increment_encode_omits_next_value() {
        let mut f = with_bit(Field::uint("Seq", 1).with_operator(Operator::Increment), 1);
        let mut out = Vec::new();

        let mut pmap = PresenceMap::new();
        f.set_uint(1);
        encode_field(&mut out, &mut pmap, &mut f).unwrap();
        assert!(pmap.is_set(1));

        let mut pmap = PresenceMap::new();
        f.set_uint(2);
        encode_field(&mut out, &mut pmap, &mut f).unwrap();
        assert!(!pmap.is_set(1));

        let mut pmap = PresenceMap::new();
        f.set_uint(5);
        encode_field(&mut out, &mut pmap, &mut f).unwrap();
        assert!(pmap.is_set(1));
        assert_eq!(out, vec![0x81, 0x85]);
    }

    #[test]
    fn test_encode_mandatory_missing() {
        let mut f = Field::int("Px", 4);
        let mut out = Vec::new();
        assert_eq!(
            encode_field(&mut out, &mut PresenceMap::new(), &mut f),
            Err(EncodeError::MandatoryMissing { field: 4 })
        );
    }

    #[test]
    fn test_short_or_oversized_string_keeps_value() {
        let mut f = Field::ascii("Symbol", 55);
        let pmap = PresenceMap::new();

        let mut r = Reader::new(&[0x47, 0x41, 0x5a, 0xd0]);
        decode_field(&mut r, &pmap, &mut f).unwrap();
        assert_eq!(f.as_str(), Some("GAZP"));

        let mut r = Reader::new(&[0x53, 0x42]);
        assert_eq!(decode_field(&mut r, &pmap, &mut f), Err(DecodeError::Partial));
        assert_eq!(r.position(), 0);
        assert_eq!(f.as_str(), Some("GAZP"));

        let long = vec![0x41; STRING_MAX_BYTES + 1];
        let mut r = Reader::new(&long);
        assert_eq!(
            decode_field(&mut r, &pmap, &mut f),
            Err(DecodeError::StringOverflow { max: STRING_MAX_BYTES })
        );
        assert_eq!(f.as_str(), Some("GAZP"));

        let mut f = Field::bytes("Data", 96);
        let mut r = Reader::new(&[0x82, 0x01, 0x02]);
        decode_field(&mut r, &pmap, &mut f).unwrap();
        let mut r = Reader::new(&[0x83, 0x07]);
        assert_eq!(decode_field(&mut r, &pmap, &mut f), Err(DecodeError::Partial));
        assert_eq!(f.as_bytes(), Some(&[0x01, 0x02][..]));
    }
}
