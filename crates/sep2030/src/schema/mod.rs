// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Schema registry.
//!
//! A flat description shared by the codec and the retrieval engine: an
//! ordered sequence of [`SchemaElement`]s, each carrying the offset into
//! its owning object, a child-type or primitive-type index, occurrence
//! bounds, a bit position inside the "exists" bitmap, and attribute/
//! simple/unbounded flags. Types are numeric and each spans a contiguous
//! range of element indices (derived types extend their base type's
//! range).

pub mod object;
pub mod registry;

pub use object::{TypedObject, Value};
pub use registry::{build_registry, DepEntry};

/// Index of a schema type within a [`Schema`].
pub type TypeId = u16;

/// Primitive leaf types the codec can parse/emit directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XsType {
    String,
    Boolean,
    HexBinary,
    AnyUri,
    Long,
    Int,
    Short,
    Byte,
    ULong,
    UInt,
    UShort,
    UByte,
}

/// What an element's value actually is: either a primitive leaf or a
/// nested schema-typed child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Primitive(XsType),
    Child(TypeId),
}

/// One element (attribute or child) of a schema type.
#[derive(Debug, Clone, Copy)]
pub struct SchemaElement {
    /// Stable name as it appears in the wire format (element or
    /// attribute local name).
    pub name: &'static str,
    /// Offset into the owning object; used as the key into
    /// [`TypedObject`]'s field map.
    pub offset: u16,
    pub kind: ElementKind,
    /// Minimum occurrences (0 = optional).
    pub min: u8,
    /// Maximum occurrences; ignored when `unbounded` is set.
    pub max: u8,
    /// Bit position inside the owning object's "exists" bitmap.
    pub bit: u8,
    pub attribute: bool,
    pub simple: bool,
    pub unbounded: bool,
}

/// A schema type: a contiguous run of elements plus an optional base
/// type it derives from.
#[derive(Debug, Clone, Copy)]
pub struct TypeDescriptor {
    pub id: TypeId,
    pub name: &'static str,
    pub base: Option<TypeId>,
    /// Index of the first element in `Schema::elements` owned by this
    /// type (not inherited from `base`).
    pub element_start: u16,
    pub element_count: u16,
}

/// The complete schema: every type and every element, plus the
/// namespace used for XML parsing/emission.
pub struct Schema {
    pub namespace: &'static str,
    pub schema_id: &'static str,
    pub elements: Vec<SchemaElement>,
    pub types: Vec<TypeDescriptor>,
}

impl Schema {
    fn type_desc(&self, type_id: TypeId) -> Option<&TypeDescriptor> {
        self.types.iter().find(|t| t.id == type_id)
    }

    /// Elements owned directly by `type_id` (not inherited).
    pub fn own_elements(&self, type_id: TypeId) -> &[SchemaElement] {
        match self.type_desc(type_id) {
            Some(t) => {
                let start = t.element_start as usize;
                let end = start + t.element_count as usize;
                &self.elements[start..end]
            }
            None => &[],
        }
    }

    /// All elements visible on `type_id`, base-first, own-elements last.
    pub fn all_elements(&self, type_id: TypeId) -> Vec<SchemaElement> {
        let mut chain = Vec::new();
        let mut cur = Some(type_id);
        while let Some(id) = cur {
            chain.push(id);
            cur = self.type_desc(id).and_then(|t| t.base);
        }
        chain.reverse();
        chain
            .into_iter()
            .flat_map(|id| self.own_elements(id).iter().copied())
            .collect()
    }

    /// Is `type_id` derived from (or equal to) `base`?
    ///
    /// Follows the base-type chain up from `type_id` looking for `base`.
    pub fn type_is_a(&self, type_id: TypeId, base: TypeId) -> bool {
        let mut cur = Some(type_id);
        while let Some(id) = cur {
            if id == base {
                return true;
            }
            cur = self.type_desc(id).and_then(|t| t.base);
        }
        false
    }

    /// Display name of a type.
    pub fn type_name(&self, type_id: TypeId) -> &'static str {
        self.type_desc(type_id).map(|t| t.name).unwrap_or("?")
    }

    /// Number of elements (own + inherited) of an object of this type.
    pub fn object_size(&self, type_id: TypeId) -> usize {
        self.all_elements(type_id).len()
    }

    /// Find a visible element by name for a type (own or inherited).
    pub fn find_element(&self, type_id: TypeId, name: &str) -> Option<SchemaElement> {
        self.all_elements(type_id).into_iter().find(|e| e.name == name)
    }

    /// Look up a type by its wire name.
    pub fn type_by_name(&self, name: &str) -> Option<TypeId> {
        self.types.iter().find(|t| t.name == name).map(|t| t.id)
    }

    /// The element on `type_id` carrying its unbounded run of items, if
    /// this type has one (i.e. it's a List-derived type).
    pub fn unbounded_element(&self, type_id: TypeId) -> Option<SchemaElement> {
        self.all_elements(type_id).into_iter().find(|e| e.unbounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_is_a_follows_base_chain() {
        let schema = build_registry().schema;
        let resource = schema.type_by_name("Resource").unwrap();
        let edev = schema.type_by_name("EndDevice").unwrap();
        assert!(schema.type_is_a(edev, resource));
        assert!(!schema.type_is_a(resource, edev));
        assert!(schema.type_is_a(edev, edev));
    }

    #[test]
    fn object_size_counts_inherited_elements() {
        let schema = build_registry().schema;
        let resource = schema.type_by_name("Resource").unwrap();
        let edev = schema.type_by_name("EndDevice").unwrap();
        assert!(schema.object_size(edev) > schema.object_size(resource));
    }
}
