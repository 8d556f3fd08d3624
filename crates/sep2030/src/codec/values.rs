// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Parsing/formatting of schema primitive leaf values
//! (`string`, `boolean`, `hexBinary`, `anyURI`, signed/unsigned
//! 8/16/32/64-bit integers), shared by the XML and binary codecs.

use crate::schema::{Value, XsType};
use crate::Error;

pub fn parse_text(xs: XsType, text: &str) -> Result<Value, Error> {
    let bad = |msg: &str| Error::MalformedDocument(format!("{msg}: {text:?}"));
    Ok(match xs {
        XsType::String => Value::Str(text.to_string()),
        XsType::AnyUri => Value::AnyUri(text.to_string()),
        XsType::Boolean => match text {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => return Err(bad("invalid boolean")),
        },
        XsType::HexBinary => Value::HexBinary(parse_hex(text).map_err(|_| bad("invalid hexBinary"))?),
        XsType::Long => Value::I64(text.parse().map_err(|_| bad("invalid long"))?),
        XsType::Int => Value::I32(text.parse().map_err(|_| bad("invalid int"))?),
        XsType::Short => Value::I16(text.parse().map_err(|_| bad("invalid short"))?),
        XsType::Byte => Value::I8(text.parse().map_err(|_| bad("invalid byte"))?),
        XsType::ULong => Value::U64(text.parse().map_err(|_| bad("invalid unsignedLong"))?),
        XsType::UInt => Value::U32(text.parse().map_err(|_| bad("invalid unsignedInt"))?),
        XsType::UShort => Value::U16(text.parse().map_err(|_| bad("invalid unsignedShort"))?),
        XsType::UByte => Value::U8(text.parse().map_err(|_| bad("invalid unsignedByte"))?),
    })
}

pub fn format_value(v: &Value) -> String {
    match v {
        Value::Str(s) | Value::AnyUri(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::HexBinary(b) => to_hex(b),
        Value::I64(n) => n.to_string(),
        Value::I32(n) => n.to_string(),
        Value::I16(n) => n.to_string(),
        Value::I8(n) => n.to_string(),
        Value::U64(n) => n.to_string(),
        Value::U32(n) => n.to_string(),
        Value::U16(n) => n.to_string(),
        Value::U8(n) => n.to_string(),
        Value::Child(_) | Value::List(_) => String::new(),
    }
}

fn parse_hex(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

fn to_hex(b: &[u8]) -> String {
    b.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let v = parse_text(XsType::HexBinary, "deadbeef").unwrap();
        assert_eq!(format_value(&v), "deadbeef");
    }

    #[test]
    fn integers_round_trip() {
        let v = parse_text(XsType::Long, "-123456789").unwrap();
        assert_eq!(format_value(&v), "-123456789");
    }
}
