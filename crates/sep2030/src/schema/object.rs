// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The typed object: the codec's and retrieval engine's common currency.
//!
//! A `TypedObject` is a sparse, schema-addressed field map: values are
//! keyed by the owning schema element's offset, and a `u64` "exists"
//! bitmap tracks which optional elements are actually present so
//! presence tests stay O(1) without scanning the field map.

use std::collections::BTreeMap;

use super::{Schema, TypeId};

/// A parsed leaf or child value, keyed by schema element offset inside
/// its owning [`TypedObject`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Bool(bool),
    HexBinary(Vec<u8>),
    AnyUri(String),
    I64(i64),
    I32(i32),
    I16(i16),
    I8(i8),
    U64(u64),
    U32(u32),
    U16(u16),
    U8(u8),
    /// A single nested schema-typed child.
    Child(Box<TypedObject>),
    /// An unbounded child element, held as an ordered list.
    List(Vec<TypedObject>),
}

/// A schema-typed object: the root type, the "exists" bitmap, and a
/// sparse map from schema element offset to value.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedObject {
    pub type_id: TypeId,
    exists: u64,
    fields: BTreeMap<u16, Value>,
}

impl TypedObject {
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            exists: 0,
            fields: BTreeMap::new(),
        }
    }

    /// Is the optional element at `bit` present?
    pub fn is_set(&self, bit: u8) -> bool {
        self.exists & (1u64 << bit) != 0
    }

    pub fn set_bit(&mut self, bit: u8) {
        self.exists |= 1u64 << bit;
    }

    pub fn clear_bit(&mut self, bit: u8) {
        self.exists &= !(1u64 << bit);
    }

    pub fn get(&self, offset: u16) -> Option<&Value> {
        self.fields.get(&offset)
    }

    pub fn put(&mut self, offset: u16, value: Value) {
        self.fields.insert(offset, value);
    }

    /// Drop every field and clear the bitmap, but keep the object's
    /// type, so a stub's storage can be refreshed in place without
    /// reallocating its slot.
    pub fn clear_elements(&mut self) {
        self.exists = 0;
        self.fields.clear();
    }

    // -- Resource convenience accessors --

    pub fn href(&self, schema: &Schema) -> Option<&str> {
        let el = schema.find_element(self.type_id, "href")?;
        match self.get(el.offset) {
            Some(Value::AnyUri(s)) | Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn mrid(&self, schema: &Schema) -> Option<&[u8]> {
        let el = schema.find_element(self.type_id, "mRID")?;
        match self.get(el.offset) {
            Some(Value::HexBinary(b)) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn subscribable(&self, schema: &Schema) -> bool {
        schema
            .find_element(self.type_id, "subscribable")
            .and_then(|el| self.get(el.offset))
            .map(|v| matches!(v, Value::Bool(true)))
            .unwrap_or(false)
    }

    pub fn poll_rate(&self, schema: &Schema) -> Option<u32> {
        let el = schema.find_element(self.type_id, "pollRate")?;
        match self.get(el.offset) {
            Some(Value::U32(n)) => Some(*n),
            Some(Value::I32(n)) if *n >= 0 => Some(*n as u32),
            _ => None,
        }
    }

    /// Read a `FooLink`'s `href` child field, e.g. `link(schema,
    /// "EndDeviceListLink")`.
    pub fn link_href(&self, schema: &Schema, link_name: &str) -> Option<&str> {
        let el = schema.find_element(self.type_id, link_name)?;
        match self.get(el.offset) {
            Some(Value::Child(obj)) => obj.href(schema),
            _ => None,
        }
    }

    /// Read a `FooListLink`'s `all` attribute, the total item count
    /// reported for a paged list.
    pub fn link_all(&self, schema: &Schema, link_name: &str) -> Option<u32> {
        let el = schema.find_element(self.type_id, link_name)?;
        match self.get(el.offset) {
            Some(Value::Child(obj)) => obj.list_all(schema),
            _ => None,
        }
    }

    /// Read this object's own `all` attribute (the total item count of
    /// a List resource, or the `all` count carried by a `FooListLink`
    /// itself).
    pub fn list_all(&self, schema: &Schema) -> Option<u32> {
        let el = schema.find_element(self.type_id, "all")?;
        match self.get(el.offset) {
            Some(Value::U64(n)) => Some((*n).min(u32::MAX as u64) as u32),
            Some(Value::U32(n)) => Some(*n),
            _ => None,
        }
    }
}
