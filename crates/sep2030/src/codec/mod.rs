// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Schema-driven codec.
//!
//! A single schema drives both the XML (`application/sep+xml`) and
//! binary (`application/sep-exi`) encodings of the same object graph.
//! Both directions are incremental: the caller supplies a fixed buffer,
//! and parsing/emitting suspends rather than blocks when the buffer is
//! exhausted. The only requirement on the buffer is that it be larger
//! than the longest single token in the document.

pub mod binary;
pub mod buffer;
pub mod values;
pub mod xml;

pub use buffer::Buffer;

use crate::schema::{Schema, TypeId, TypedObject};

/// Negotiated IEEE 2030.5 media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Xml,
    Exi,
}

impl ContentType {
    pub fn media_type(self) -> &'static str {
        match self {
            ContentType::Xml => "application/sep+xml",
            ContentType::Exi => "application/sep-exi",
        }
    }

    pub fn from_media_type(s: &str) -> Option<ContentType> {
        match s.trim() {
            "application/sep+xml" => Some(ContentType::Xml),
            "application/sep-exi" => Some(ContentType::Exi),
            _ => None,
        }
    }
}

/// Outcome of one parser step.
pub enum ParseStep {
    /// Not enough buffered bytes to complete the current token; feed more
    /// bytes and call `step` again.
    Suspended,
    /// The document finished parsing; returns the root object.
    Done(TypedObject),
    /// The document was malformed or violated the schema.
    Failed(crate::Error),
}

/// Outcome of one emitter step.
pub enum EmitStep {
    /// The caller's output buffer filled up before the object finished
    /// emitting; call `step` again once the buffer has been drained.
    Suspended,
    /// The object finished emitting.
    Done,
}

/// Schema-driven incremental parser, shared shape for XML and binary.
pub trait Decoder {
    /// Advance parsing using whatever bytes are currently buffered.
    fn step(&mut self, buf: &mut Buffer) -> ParseStep;
}

/// Schema-driven incremental emitter, shared shape for XML and binary.
pub trait Encoder {
    /// Write as many bytes as fit into `out`, starting at `out[pos..]`;
    /// returns the new write position and whether emission is complete.
    fn step(&mut self, out: &mut [u8], pos: &mut usize) -> EmitStep;

    /// Number of children at the given stack depth that have been fully
    /// written so far; used by the retrieval engine to resume a
    /// truncated list emission at the right paging offset.
    fn output_item_count(&self, level: usize) -> usize;
}

/// Parse a complete in-memory document in one shot; convenience for
/// tests and small fixed documents. Returns an error if the document
/// does not finish parsing within the given buffer capacity times a
/// generous retry budget.
pub fn parse_complete(
    schema: &Schema,
    root_type: TypeId,
    content_type: ContentType,
    data: &[u8],
    buffer_capacity: usize,
) -> Result<TypedObject, crate::Error> {
    let mut decoder: Box<dyn Decoder> = match content_type {
        ContentType::Xml => Box::new(xml::XmlDecoder::new(schema, root_type)),
        ContentType::Exi => Box::new(binary::BinaryDecoder::new(schema, root_type)),
    };
    let mut buf = Buffer::new(buffer_capacity);
    let mut cursor = 0usize;
    loop {
        let n = buf.fill_from(&data[cursor..]);
        cursor += n;
        match decoder.step(&mut buf) {
            ParseStep::Done(obj) => return Ok(obj),
            ParseStep::Failed(e) => return Err(e),
            ParseStep::Suspended => {
                if n == 0 && cursor >= data.len() {
                    return Err(crate::Error::Truncated);
                }
                buf.compact();
            }
        }
    }
}

/// Emit a complete document in one shot into a growable `Vec<u8>`,
/// driving the incremental emitter with a fixed-size scratch buffer.
pub fn emit_complete(
    schema: &Schema,
    content_type: ContentType,
    obj: &TypedObject,
    buffer_capacity: usize,
) -> Vec<u8> {
    let mut encoder: Box<dyn Encoder> = match content_type {
        ContentType::Xml => Box::new(xml::XmlEncoder::new(schema, obj)),
        ContentType::Exi => Box::new(binary::BinaryEncoder::new(schema, obj)),
    };
    let mut out = vec![0u8; buffer_capacity];
    let mut result = Vec::new();
    loop {
        let mut pos = 0usize;
        match encoder.step(&mut out, &mut pos) {
            EmitStep::Done => {
                result.extend_from_slice(&out[..pos]);
                break;
            }
            EmitStep::Suspended => {
                result.extend_from_slice(&out[..pos]);
            }
        }
    }
    result
}
