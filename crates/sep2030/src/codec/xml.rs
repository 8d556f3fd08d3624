// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Schema-driven XML encoding (`application/sep+xml`).
//!
//! The tokenizer accumulates raw bytes into a scratch buffer until a
//! complete token (start tag, end tag, or text run) is available, then
//! hands it to a non-recursive parser state machine whose stack mirrors
//! the call stack a recursive-descent parser would use - so suspension
//! between tokens requires no special unwinding.

use std::collections::{HashMap, VecDeque};

use super::{Buffer, Decoder, EmitStep, Encoder, ParseStep};
use crate::schema::{ElementKind, Schema, SchemaElement, TypeId, TypedObject, Value};
use crate::Error;

// ---------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Token {
    Start {
        name: String,
        /// This element's namespace prefix, if it was qualified
        /// (`ns:Foo`); resolved against the in-scope `xmlns`
        /// declarations by the parser, not here.
        prefix: Option<String>,
        attrs: Vec<(String, String)>,
        /// `xmlns`/`xmlns:prefix` declarations carried on this start
        /// tag, `None` keying the default namespace.
        ns_decls: Vec<(Option<String>, String)>,
        self_closing: bool,
    },
    End(String),
    Text(String),
}

/// Strips a namespace prefix (`ns:Foo` -> `Foo`) for schema name
/// lookups; the prefix itself is resolved against in-scope `xmlns`
/// declarations and checked against the schema's namespace by
/// [`XmlDecoder::resolve_namespace`].
fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Splits a possibly-qualified name into its prefix and local part.
fn split_qname(name: &str) -> (Option<String>, String) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.to_string()),
    }
}

struct Tokenizer {
    scratch: Vec<u8>,
}

impl Tokenizer {
    fn new() -> Self {
        Self { scratch: Vec::new() }
    }

    /// Pull every available byte out of `buf` into scratch, then try to
    /// carve a complete token out of scratch. Returns `None` when more
    /// bytes are needed.
    fn next(&mut self, buf: &mut Buffer) -> Result<Option<Token>, Error> {
        let avail = buf.remaining();
        self.scratch.extend_from_slice(avail);
        buf.advance(avail.len());

        let text = std::str::from_utf8(&self.scratch)
            .map_err(|_| Error::MalformedDocument("non-UTF8 byte in document".into()))?;

        if text.is_empty() {
            return Ok(None);
        }

        if text.starts_with('<') {
            let Some(end) = text.find('>') else {
                return Ok(None);
            };
            let tag = &text[1..end];
            let used = end + 1;
            let token = if let Some(name) = tag.strip_prefix('/') {
                Token::End(local_name(name.trim()).to_string())
            } else {
                let self_closing = tag.ends_with('/');
                let body = tag.strip_suffix('/').unwrap_or(tag).trim();
                let mut parts = body.split_whitespace();
                let raw_name = parts.next().unwrap_or("").to_string();
                let rest: String = body[raw_name.len()..].to_string();
                let (attrs, ns_decls) = parse_attrs(&rest)?;
                let (prefix, name) = split_qname(&raw_name);
                Token::Start {
                    name,
                    prefix,
                    attrs,
                    ns_decls,
                    self_closing,
                }
            };
            self.scratch.drain(0..used);
            Ok(Some(token))
        } else {
            let Some(end) = text.find('<') else {
                return Ok(None);
            };
            let used = end;
            let content = text[..end].to_string();
            self.scratch.drain(0..used);
            Ok(Some(Token::Text(content)))
        }
    }
}

/// Splits a start tag's attribute text into ordinary (local-named)
/// attributes and `xmlns`/`xmlns:prefix` namespace declarations, kept
/// separate so the parser can resolve element/attribute prefixes
/// against the declarations actually in scope.
fn parse_attrs(s: &str) -> Result<(Vec<(String, String)>, Vec<(Option<String>, String)>), Error> {
    let mut attrs = Vec::new();
    let mut ns_decls = Vec::new();
    let mut rest = s.trim();
    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| Error::MalformedDocument("malformed attribute".into()))?;
        let name = rest[..eq].trim().to_string();
        rest = rest[eq + 1..].trim_start();
        let quote = rest
            .chars()
            .next()
            .ok_or_else(|| Error::MalformedDocument("unterminated attribute".into()))?;
        if quote != '"' && quote != '\'' {
            return Err(Error::MalformedDocument("attribute value not quoted".into()));
        }
        let close = rest[1..]
            .find(quote)
            .ok_or_else(|| Error::MalformedDocument("unterminated attribute value".into()))?;
        let value = rest[1..1 + close].to_string();
        rest = rest[1 + close + 1..].trim_start();

        if name == "xmlns" {
            ns_decls.push((None, value));
        } else if let Some(prefix) = name.strip_prefix("xmlns:") {
            ns_decls.push((Some(prefix.to_string()), value));
        } else {
            attrs.push((local_name(&name).to_string(), value));
        }
    }
    Ok((attrs, ns_decls))
}

// ---------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------

/// One open element: the object being assembled, the schema element
/// that introduced it in its parent (root has none), and - for a
/// primitive child still awaiting its text - which element that is.
struct Frame {
    type_id: TypeId,
    obj: TypedObject,
    introduced_by: Option<SchemaElement>,
    awaiting_text: Option<SchemaElement>,
    /// Namespace declarations in scope at this element: inherited from
    /// the parent frame, overlaid with this element's own `xmlns`
    /// attributes. `None` keys the default (unprefixed) namespace.
    ns_scope: HashMap<Option<String>, String>,
}

pub struct XmlDecoder<'s> {
    schema: &'s Schema,
    root_type: TypeId,
    tokenizer: Tokenizer,
    stack: Vec<Frame>,
    done: bool,
}

impl<'s> XmlDecoder<'s> {
    pub fn new(schema: &'s Schema, root_type: TypeId) -> Self {
        Self {
            schema,
            root_type,
            tokenizer: Tokenizer::new(),
            stack: Vec::new(),
            done: false,
        }
    }

    /// Build the namespace scope in effect for a new element: the
    /// parent's scope overlaid with this tag's own `xmlns` declarations.
    fn child_scope(
        parent: Option<&HashMap<Option<String>, String>>,
        ns_decls: &[(Option<String>, String)],
    ) -> HashMap<Option<String>, String> {
        let mut scope = parent.cloned().unwrap_or_default();
        for (prefix, uri) in ns_decls {
            scope.insert(prefix.clone(), uri.clone());
        }
        scope
    }

    /// Check `name`'s namespace prefix against what's actually in
    /// scope. An explicit prefix with no matching declaration is
    /// always an error; an unprefixed name with no default `xmlns`
    /// declared in scope is accepted without a namespace check at all
    /// (documents that never declare one rely solely on the schema).
    fn resolve_namespace(
        &self,
        name: &str,
        prefix: &Option<String>,
        scope: &HashMap<Option<String>, String>,
    ) -> Result<(), Error> {
        match scope.get(prefix) {
            Some(uri) if uri.as_str() == self.schema.namespace => Ok(()),
            Some(uri) => Err(Error::SchemaViolation(format!(
                "element {name} in namespace {uri}, expected {}",
                self.schema.namespace
            ))),
            None => match prefix {
                Some(p) => Err(Error::SchemaViolation(format!(
                    "element {name} uses undeclared namespace prefix {p}"
                ))),
                None => Ok(()),
            },
        }
    }

    fn apply_attrs(&self, type_id: TypeId, obj: &mut TypedObject, attrs: &[(String, String)]) -> Result<(), Error> {
        for (name, value) in attrs {
            if let Some(el) = self.schema.find_element(type_id, name) {
                if let ElementKind::Primitive(xs) = el.kind {
                    let v = super::values::parse_text(xs, value)?;
                    obj.put(el.offset, v);
                    obj.set_bit(el.bit);
                }
            }
        }
        Ok(())
    }

    /// Attach a just-closed frame's object into its parent, or - if the
    /// stack is now empty - return it as the finished document.
    fn close_top(&mut self) -> Result<Option<TypedObject>, Error> {
        let Frame {
            obj, introduced_by, ..
        } = self.stack.pop().expect("close_top called with empty stack");
        match self.stack.last_mut() {
            None => Ok(Some(obj)),
            Some(parent) => {
                let el = introduced_by.expect("non-root frame always has introduced_by");
                if el.unbounded {
                    let mut items = match parent.obj.get(el.offset) {
                        Some(Value::List(items)) => items.clone(),
                        _ => Vec::new(),
                    };
                    items.push(obj);
                    parent.obj.put(el.offset, Value::List(items));
                } else {
                    parent.obj.put(el.offset, Value::Child(Box::new(obj)));
                }
                parent.obj.set_bit(el.bit);
                Ok(None)
            }
        }
    }
}

impl<'s> Decoder for XmlDecoder<'s> {
    fn step(&mut self, buf: &mut Buffer) -> ParseStep {
        if self.done {
            return ParseStep::Failed(Error::MalformedDocument("parser reused after completion".into()));
        }
        loop {
            let token = match self.tokenizer.next(buf) {
                Ok(Some(t)) => t,
                Ok(None) => return ParseStep::Suspended,
                Err(e) => {
                    self.done = true;
                    return ParseStep::Failed(e);
                }
            };

            let result = self.handle_token(token);
            match result {
                Ok(Some(obj)) => {
                    self.done = true;
                    return ParseStep::Done(obj);
                }
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return ParseStep::Failed(e);
                }
            }
        }
    }
}

impl<'s> XmlDecoder<'s> {
    fn handle_token(&mut self, token: Token) -> Result<Option<TypedObject>, Error> {
        match token {
            Token::Start {
                name,
                prefix,
                attrs,
                ns_decls,
                self_closing,
            } => {
                if let Some(top) = self.stack.last() {
                    if let Some(el) = top.awaiting_text.clone() {
                        let _ = el; // a primitive element cannot contain a child element
                        return Err(Error::SchemaViolation(format!(
                            "unexpected child element inside primitive leaf {name}"
                        )));
                    }
                }
                let scope = Self::child_scope(self.stack.last().map(|f| &f.ns_scope), &ns_decls);
                self.resolve_namespace(&name, &prefix, &scope)?;

                if self.stack.is_empty() {
                    let type_id = self
                        .schema
                        .type_by_name(&name)
                        .ok_or_else(|| Error::SchemaViolation(format!("unknown root element {name}")))?;
                    if type_id != self.root_type && !self.schema.type_is_a(type_id, self.root_type) {
                        return Err(Error::SchemaViolation(format!(
                            "root element {name} is not of the expected type"
                        )));
                    }
                    let mut obj = TypedObject::new(type_id);
                    self.apply_attrs(type_id, &mut obj, &attrs)?;
                    self.stack.push(Frame {
                        type_id,
                        obj,
                        introduced_by: None,
                        awaiting_text: None,
                        ns_scope: scope,
                    });
                } else {
                    let parent_type = self.stack.last().unwrap().type_id;
                    let el = self
                        .schema
                        .find_element(parent_type, &name)
                        .ok_or_else(|| Error::SchemaViolation(format!("unknown element {name}")))?;
                    match el.kind {
                        ElementKind::Primitive(_) => {
                            let top = self.stack.last_mut().unwrap();
                            top.awaiting_text = Some(el);
                            if self_closing {
                                top.awaiting_text = None;
                                let v = super::values::parse_text(
                                    match el.kind {
                                        ElementKind::Primitive(xs) => xs,
                                        _ => unreachable!(),
                                    },
                                    "",
                                )
                                .unwrap_or(Value::Str(String::new()));
                                top.obj.put(el.offset, v);
                                top.obj.set_bit(el.bit);
                            }
                        }
                        ElementKind::Child(child_type) => {
                            let mut obj = TypedObject::new(child_type);
                            self.apply_attrs(child_type, &mut obj, &attrs)?;
                            self.stack.push(Frame {
                                type_id: child_type,
                                obj,
                                introduced_by: Some(el),
                                awaiting_text: None,
                                ns_scope: scope,
                            });
                            if self_closing {
                                if let Some(done) = self.close_top()? {
                                    return Ok(Some(done));
                                }
                            }
                        }
                    }
                }
                Ok(None)
            }
            Token::Text(text) => {
                if let Some(top) = self.stack.last_mut() {
                    if let Some(el) = top.awaiting_text.take() {
                        if let ElementKind::Primitive(xs) = el.kind {
                            let v = super::values::parse_text(xs, text.trim())?;
                            top.obj.put(el.offset, v);
                            top.obj.set_bit(el.bit);
                        }
                    }
                    // whitespace between structural elements is ignored
                }
                Ok(None)
            }
            Token::End(name) => {
                let top = self
                    .stack
                    .last()
                    .ok_or_else(|| Error::MalformedDocument(format!("unmatched end tag {name}")))?;
                let expected = self.schema.type_name(top.type_id);
                if local_name(&name) != expected && top.introduced_by.is_none() {
                    return Err(Error::MalformedDocument(format!(
                        "end tag {name} does not match open root {expected}"
                    )));
                }
                self.close_top()
            }
        }
    }
}

// ---------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------

/// Flattens the object tree into a queue of raw XML fragments ahead of
/// time; `step` then copies from the queue into the caller's buffer,
/// suspending whenever the buffer fills mid-fragment.
pub struct XmlEncoder {
    fragments: VecDeque<String>,
    /// Count of list items fully flushed at each nesting depth so far,
    /// keyed by depth; mirrors `output_item_count`.
    item_counts: Vec<usize>,
    partial: Option<(Vec<u8>, usize)>,
    done: bool,
}

impl XmlEncoder {
    pub fn new(schema: &Schema, obj: &TypedObject) -> Self {
        let mut fragments = VecDeque::new();
        let mut item_counts = Vec::new();
        emit_object(schema, obj, 0, &mut fragments, &mut item_counts);
        Self {
            fragments,
            item_counts,
            partial: None,
            done: false,
        }
    }
}

fn emit_object(
    schema: &Schema,
    obj: &TypedObject,
    depth: usize,
    out: &mut VecDeque<String>,
    item_counts: &mut Vec<usize>,
) {
    let name = schema.type_name(obj.type_id);
    let elements = schema.all_elements(obj.type_id);
    let mut attr_str = String::new();
    for el in &elements {
        if el.attribute {
            if let Some(v) = obj.get(el.offset) {
                if el.min > 0 || obj.is_set(el.bit) {
                    attr_str.push(' ');
                    attr_str.push_str(el.name);
                    attr_str.push_str("=\"");
                    attr_str.push_str(&super::values::format_value(v));
                    attr_str.push('"');
                }
            }
        }
    }
    out.push_back(format!("<{name}{attr_str}>"));
    for el in &elements {
        if el.attribute {
            continue;
        }
        if el.min == 0 && !obj.is_set(el.bit) && !el.unbounded {
            continue;
        }
        match el.kind {
            ElementKind::Primitive(_) => {
                if let Some(v) = obj.get(el.offset) {
                    out.push_back(format!("<{}>{}</{}>", el.name, super::values::format_value(v), el.name));
                }
            }
            ElementKind::Child(_) => {
                if el.unbounded {
                    if let Some(Value::List(items)) = obj.get(el.offset) {
                        while item_counts.len() <= depth {
                            item_counts.push(0);
                        }
                        for item in items {
                            emit_object(schema, item, depth + 1, out, item_counts);
                            item_counts[depth] += 1;
                        }
                    }
                } else if let Some(Value::Child(child)) = obj.get(el.offset) {
                    emit_object(schema, child, depth + 1, out, item_counts);
                }
            }
        }
    }
    out.push_back(format!("</{name}>"));
}

impl Encoder for XmlEncoder {
    fn step(&mut self, out: &mut [u8], pos: &mut usize) -> EmitStep {
        loop {
            if let Some((bytes, offset)) = self.partial.take() {
                let remaining = &bytes[offset..];
                let room = out.len() - *pos;
                if remaining.len() <= room {
                    out[*pos..*pos + remaining.len()].copy_from_slice(remaining);
                    *pos += remaining.len();
                } else {
                    out[*pos..].copy_from_slice(&remaining[..room]);
                    *pos += room;
                    self.partial = Some((bytes, offset + room));
                    return EmitStep::Suspended;
                }
            }
            let Some(frag) = self.fragments.pop_front() else {
                self.done = true;
                return EmitStep::Done;
            };
            let bytes = frag.into_bytes();
            let room = out.len() - *pos;
            if bytes.len() <= room {
                out[*pos..*pos + bytes.len()].copy_from_slice(&bytes);
                *pos += bytes.len();
            } else {
                out[*pos..].copy_from_slice(&bytes[..room]);
                *pos += room;
                self.partial = Some((bytes, room));
                return EmitStep::Suspended;
            }
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
    fn round_trips_simple_object() {
        let reg = build_registry();
        let mut time = TypedObject::new(type_ids::TIME);
        let href_el = reg.schema.find_element(type_ids::TIME, "href").unwrap();
        time.put(href_el.offset, Value::AnyUri("/tm".into()));
        let ct_el = reg.schema.find_element(type_ids::TIME, "currentTime").unwrap();
        time.put(ct_el.offset, Value::I64(1_700_000_000));
        time.set_bit(ct_el.bit);

        let xml = super::super::emit_complete(&reg.schema, super::super::ContentType::Xml, &time, 64);
        let parsed = super::super::parse_complete(
            &reg.schema,
            type_ids::TIME,
            super::super::ContentType::Xml,
            &xml,
            64,
        )
        .unwrap();
        assert_eq!(parsed.get(ct_el.offset), Some(&Value::I64(1_700_000_000)));
    }

    #[test]
    fn splitting_input_across_chunks_yields_same_result() {
        let reg = build_registry();
        let mut time = TypedObject::new(type_ids::TIME);
        let href_el = reg.schema.find_element(type_ids::TIME, "href").unwrap();
        time.put(href_el.offset, Value::AnyUri("/tm".into()));
        let ct_el = reg.schema.find_element(type_ids::TIME, "currentTime").unwrap();
        time.put(ct_el.offset, Value::I64(42));
        time.set_bit(ct_el.bit);
        let xml = super::super::emit_complete(&reg.schema, super::super::ContentType::Xml, &time, 64);

        // feed one byte at a time
        let mut decoder = XmlDecoder::new(&reg.schema, type_ids::TIME);
        let mut buf = Buffer::new(8);
        let mut i = 0;
        let parsed = loop {
            if i < xml.len() {
                i += buf.fill_from(&xml[i..i + 1]);
            }
            match decoder.step(&mut buf) {
                ParseStep::Done(obj) => break obj,
                ParseStep::Suspended => buf.compact(),
                ParseStep::Failed(e) => panic!("parse failed: {e}"),
            }
        };
        assert_eq!(parsed.get(ct_el.offset), Some(&Value::I64(42)));
    }

    #[test]
    fn element_declaring_the_schema_namespace_parses_successfully() {
        let reg = build_registry();
        let xml = b"<Time xmlns=\"urn:ieee:std:2030.5:ns\"><currentTime>42</currentTime></Time>".to_vec();
        let parsed =
            super::super::parse_complete(&reg.schema, type_ids::TIME, super::super::ContentType::Xml, &xml, 128)
                .unwrap();
        let ct_el = reg.schema.find_element(type_ids::TIME, "currentTime").unwrap();
        assert_eq!(parsed.get(ct_el.offset), Some(&Value::I64(42)));
    }

    #[test]
    fn element_declaring_a_foreign_default_namespace_is_rejected() {
        let reg = build_registry();
        let xml = b"<Time xmlns=\"urn:example:other\"><currentTime>42</currentTime></Time>".to_vec();
        let err =
            super::super::parse_complete(&reg.schema, type_ids::TIME, super::super::ContentType::Xml, &xml, 128)
                .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }

    #[test]
    fn undeclared_namespace_prefix_is_rejected() {
        let reg = build_registry();
        let xml = b"<x:Time><x:currentTime>42</x:currentTime></x:Time>".to_vec();
        let err =
            super::super::parse_complete(&reg.schema, type_ids::TIME, super::super::ContentType::Xml, &xml, 128)
                .unwrap_err();
        assert!(matches!(err, Error::SchemaViolation(_)));
    }
}
