// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Schema-driven binary encoding (`application/sep-exi`).
//!
//! Every object is encoded as: a varint element count, then for each
//! present element a varint schema element index followed by its
//! value. Primitive values are length-prefixed byte strings in their
//! natural text-free form (fixed-width for integers, raw bytes for
//! hexBinary/string/anyURI); children are nested recursively; unbounded
//! children are a varint item count followed by that many child
//! encodings. This keeps the format self-describing enough to skip an
//! element whose schema element index isn't recognized by an older
//! reader, while still being driven entirely by element offsets rather
//! than by name strings.

use super::{Buffer, Decoder, EmitStep, Encoder, ParseStep};
use crate::schema::{ElementKind, Schema, SchemaElement, TypeId, TypedObject, Value, XsType};
use crate::Error;

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut v: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        v |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((v, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
    None
}

fn encode_primitive(out: &mut Vec<u8>, xs: XsType, v: &Value) {
    match (xs, v) {
        (XsType::String, Value::Str(s)) | (XsType::AnyUri, Value::AnyUri(s)) => {
            write_varint(out, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        (XsType::HexBinary, Value::HexBinary(b)) => {
            write_varint(out, b.len() as u64);
            out.extend_from_slice(b);
        }
        (XsType::Boolean, Value::Bool(b)) => out.push(*b as u8),
        (XsType::Long, Value::I64(n)) => out.extend_from_slice(&n.to_be_bytes()),
        (XsType::Int, Value::I32(n)) => out.extend_from_slice(&n.to_be_bytes()),
        (XsType::Short, Value::I16(n)) => out.extend_from_slice(&n.to_be_bytes()),
        (XsType::Byte, Value::I8(n)) => out.push(*n as u8),
        (XsType::ULong, Value::U64(n)) => out.extend_from_slice(&n.to_be_bytes()),
        (XsType::UInt, Value::U32(n)) => out.extend_from_slice(&n.to_be_bytes()),
        (XsType::UShort, Value::U16(n)) => out.extend_from_slice(&n.to_be_bytes()),
        (XsType::UByte, Value::U8(n)) => out.push(*n),
        _ => {}
    }
}

fn primitive_width(xs: XsType) -> Option<usize> {
    match xs {
        XsType::Boolean | XsType::Byte | XsType::UByte => Some(1),
        XsType::Short | XsType::UShort => Some(2),
        XsType::Int | XsType::UInt => Some(4),
        XsType::Long | XsType::ULong => Some(8),
        XsType::String | XsType::AnyUri | XsType::HexBinary => None,
    }
}

fn decode_primitive(xs: XsType, data: &[u8]) -> Result<(Value, usize), Error> {
    let too_short = || Error::Truncated;
    if let Some(width) = primitive_width(xs) {
        if data.len() < width {
            return Err(too_short());
        }
        let bytes = &data[..width];
        let v = match xs {
            XsType::Boolean => Value::Bool(bytes[0] != 0),
            XsType::Byte => Value::I8(bytes[0] as i8),
            XsType::UByte => Value::U8(bytes[0]),
            XsType::Short => Value::I16(i16::from_be_bytes(bytes.try_into().unwrap())),
            XsType::UShort => Value::U16(u16::from_be_bytes(bytes.try_into().unwrap())),
            XsType::Int => Value::I32(i32::from_be_bytes(bytes.try_into().unwrap())),
            XsType::UInt => Value::U32(u32::from_be_bytes(bytes.try_into().unwrap())),
            XsType::Long => Value::I64(i64::from_be_bytes(bytes.try_into().unwrap())),
            XsType::ULong => Value::U64(u64::from_be_bytes(bytes.try_into().unwrap())),
            _ => unreachable!(),
        };
        Ok((v, width))
    } else {
        let (len, used) = read_varint(data).ok_or_else(too_short)?;
        let len = len as usize;
        if data.len() < used + len {
            return Err(too_short());
        }
        let bytes = &data[used..used + len];
        let v = match xs {
            XsType::String => Value::Str(String::from_utf8_lossy(bytes).into_owned()),
            XsType::AnyUri => Value::AnyUri(String::from_utf8_lossy(bytes).into_owned()),
            XsType::HexBinary => Value::HexBinary(bytes.to_vec()),
            _ => unreachable!(),
        };
        Ok((v, used + len))
    }
}

fn encode_object(schema: &Schema, obj: &TypedObject, out: &mut Vec<u8>) {
    let elements = schema.all_elements(obj.type_id);
    let present: Vec<(u16, &SchemaElement)> = elements
        .iter()
        .enumerate()
        .filter(|(_, el)| el.min > 0 || obj.is_set(el.bit))
        .map(|(idx, el)| (idx as u16, el))
        .collect();
    write_varint(out, present.len() as u64);
    for (idx, el) in present {
        write_varint(out, idx as u64);
        match el.kind {
            ElementKind::Primitive(xs) => {
                if let Some(v) = obj.get(el.offset) {
                    encode_primitive(out, xs, v);
                }
            }
            ElementKind::Child(_) => {
                if el.unbounded {
                    if let Some(Value::List(items)) = obj.get(el.offset) {
                        write_varint(out, items.len() as u64);
                        for item in items {
                            encode_object(schema, item, out);
                        }
                    } else {
                        write_varint(out, 0);
                    }
                } else if let Some(Value::Child(child)) = obj.get(el.offset) {
                    encode_object(schema, child, out);
                }
            }
        }
    }
}

/// Decode one object of `type_id` starting at `data[0..]`, returning
/// the object and the number of bytes consumed.
fn decode_object(schema: &Schema, type_id: TypeId, data: &[u8]) -> Result<(TypedObject, usize), Error> {
    let elements = schema.all_elements(type_id);
    let mut obj = TypedObject::new(type_id);
    let mut pos = 0usize;
    let (count, used) = read_varint(data).ok_or(Error::Truncated)?;
    pos += used;
    for _ in 0..count {
        let (idx, used) = read_varint(&data[pos..]).ok_or(Error::Truncated)?;
        pos += used;
        let el = elements
            .get(idx as usize)
            .copied()
            .ok_or_else(|| Error::SchemaViolation(format!("element index {idx} out of range for decoded type")))?;
        match el.kind {
            ElementKind::Primitive(xs) => {
                let (v, used) = decode_primitive(xs, &data[pos..])?;
                pos += used;
                obj.put(el.offset, v);
                obj.set_bit(el.bit);
            }
            ElementKind::Child(child_type) => {
                if el.unbounded {
                    let (n, used) = read_varint(&data[pos..]).ok_or(Error::Truncated)?;
                    pos += used;
                    let mut items = Vec::with_capacity(n as usize);
                    for _ in 0..n {
                        let (child, used) = decode_object(schema, child_type, &data[pos..])?;
                        pos += used;
                        items.push(child);
                    }
                    obj.put(el.offset, Value::List(items));
                } else {
                    let (child, used) = decode_object(schema, child_type, &data[pos..])?;
                    pos += used;
                    obj.put(el.offset, Value::Child(Box::new(child)));
                }
                obj.set_bit(el.bit);
            }
        }
    }
    Ok((obj, pos))
}

pub struct BinaryDecoder<'s> {
    schema: &'s Schema,
    root_type: TypeId,
    scratch: Vec<u8>,
    done: bool,
}

impl<'s> BinaryDecoder<'s> {
    pub fn new(schema: &'s Schema, root_type: TypeId) -> Self {
        Self {
            schema,
            root_type,
            scratch: Vec::new(),
            done: false,
        }
    }
}

impl<'s> Decoder for BinaryDecoder<'s> {
    fn step(&mut self, buf: &mut Buffer) -> ParseStep {
        if self.done {
            return ParseStep::Failed(Error::MalformedDocument("decoder reused after completion".into()));
        }
        let avail = buf.remaining();
        self.scratch.extend_from_slice(avail);
        buf.advance(avail.len());

        match decode_object(self.schema, self.root_type, &self.scratch) {
            Ok((obj, _used)) => {
                self.done = true;
                ParseStep::Done(obj)
            }
            Err(Error::Truncated) => ParseStep::Suspended,
            Err(e) => {
                self.done = true;
                ParseStep::Failed(e)
            }
        }
    }
}

pub struct BinaryEncoder {
    bytes: Vec<u8>,
    pos: usize,
    item_counts: Vec<usize>,
}

impl BinaryEncoder {
    pub fn new(schema: &Schema, obj: &TypedObject) -> Self {
        let mut bytes = Vec::new();
        encode_object(schema, obj, &mut bytes);
        let mut item_counts = Vec::new();
        count_items(schema, obj, 0, &mut item_counts);
        Self {
            bytes,
            pos: 0,
            item_counts,
        }
    }
}

fn count_items(schema: &Schema, obj: &TypedObject, depth: usize, counts: &mut Vec<usize>) {
    for el in schema.all_elements(obj.type_id) {
        if let ElementKind::Child(_) = el.kind {
            if el.unbounded {
                if let Some(Value::List(items)) = obj.get(el.offset) {
                    while counts.len() <= depth {
                        counts.push(0);
                    }
                    counts[depth] += items.len();
                    for item in items {
                        count_items(schema, item, depth + 1, counts);
                    }
                }
            } else if let Some(Value::Child(child)) = obj.get(el.offset) {
                count_items(schema, child, depth + 1, counts);
            }
        }
    }
}

impl Encoder for BinaryEncoder {
    fn step(&mut self, out: &mut [u8], pos: &mut usize) -> EmitStep {
        let remaining = &self.bytes[self.pos..];
        let room = out.len() - *pos;
        if remaining.len() <= room {
            out[*pos..*pos + remaining.len()].copy_from_slice(remaining);
            *pos += remaining.len();
            self.pos += remaining.len();
            EmitStep::Done
        } else {
            out[*pos..].copy_from_slice(&remaining[..room]);
            *pos += room;
            self.pos += room;
            EmitStep::Suspended
        }
    }

    fn output_item_count(&self, level: usize) -> usize {
        self.item_counts.get(level).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::registry::{build_registry, type_ids};

    #[test]
    fn round_trips_nested_object() {
        let reg = build_registry();
        let schema = &reg.schema;

        let mut status = TypedObject::new(type_ids::EVENT_STATUS);
        let cs_el = schema.find_element(type_ids::EVENT_STATUS, "currentStatus").unwrap();
        status.put(cs_el.offset, Value::U8(3));
        status.set_bit(cs_el.bit);

        let mut control = TypedObject::new(type_ids::DER_CONTROL);
        let ct_el = schema.find_element(type_ids::DER_CONTROL, "creationTime").unwrap();
        control.put(ct_el.offset, Value::I64(1_700_000_000));
        control.set_bit(ct_el.bit);
        let is_el = schema.find_element(type_ids::DER_CONTROL, "intervalStart").unwrap();
        control.put(is_el.offset, Value::I64(1_700_000_100));
        control.set_bit(is_el.bit);
        let id_el = schema.find_element(type_ids::DER_CONTROL, "intervalDuration").unwrap();
        control.put(id_el.offset, Value::U32(900));
        control.set_bit(id_el.bit);
        let status_el = schema.find_element(type_ids::DER_CONTROL, "EventStatus").unwrap();
        control.put(status_el.offset, Value::Child(Box::new(status)));
        control.set_bit(status_el.bit);

        let mut bytes = Vec::new();
        encode_object(schema, &control, &mut bytes);
        let (decoded, used) = decode_object(schema, type_ids::DER_CONTROL, &bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded.get(ct_el.offset), Some(&Value::I64(1_700_000_000)));
        assert_eq!(decoded.get(id_el.offset), Some(&Value::U32(900)));
        match decoded.get(status_el.offset) {
            Some(Value::Child(s)) => assert_eq!(s.get(cs_el.offset), Some(&Value::U8(3))),
            other => panic!("expected EventStatus child, got {other:?}"),
        }
    }

    #[test]
    fn suspends_until_full_buffer_available() {
        let reg = build_registry();
        let schema = &reg.schema;
        let mut time = TypedObject::new(type_ids::TIME);
        let el = schema.find_element(type_ids::TIME, "currentTime").unwrap();
        time.put(el.offset, Value::I64(55));
        time.set_bit(el.bit);

        let mut bytes = Vec::new();
        encode_object(schema, &time, &mut bytes);

        let mut decoder = BinaryDecoder::new(schema, type_ids::TIME);
        let mut buf = Buffer::new(bytes.len());
        // feed one byte short of complete, expect suspension
        buf.fill_from(&bytes[..bytes.len() - 1]);
        assert!(matches!(decoder.step(&mut buf), ParseStep::Suspended));
        buf.fill_from(&bytes[bytes.len() - 1..]);
        match decoder.step(&mut buf) {
            ParseStep::Done(obj) => assert_eq!(obj.get(el.offset), Some(&Value::I64(55))),
            other => panic!("expected Done, got a different outcome: {}", matches!(other, ParseStep::Done(_))),
        }
    }
}
