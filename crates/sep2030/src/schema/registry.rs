// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A small, hand-built schema registry covering enough of the IEEE
//! 2030.5 object model to exercise device capability discovery, paged
//! lists, and DER program/control scheduling end to end. The full
//! ~300-type catalogue is out of scope here; the codec and retrieval
//! engine are generic over any table built the same way, so a
//! generated full registry can be dropped in without touching either.

use super::{ElementKind, Schema, SchemaElement, TypeDescriptor, TypeId, XsType};

/// A link declared statically on a type, used by the retrieval engine's
/// `DepFunc` dispatch: "FooLink" on `owner`, pointing at resources of
/// type `target`.
#[derive(Debug, Clone, Copy)]
pub struct DepEntry {
    pub owner: &'static str,
    pub link_name: &'static str,
    pub target: &'static str,
}

/// The schema plus the static per-type dependency declarations.
pub struct Registry {
    pub schema: Schema,
    pub deps: Vec<DepEntry>,
}

fn el(
    name: &'static str,
    offset: u16,
    kind: ElementKind,
    min: u8,
    max: u8,
    bit: u8,
    attribute: bool,
    unbounded: bool,
) -> SchemaElement {
    SchemaElement {
        name,
        offset,
        kind,
        min,
        max,
        bit,
        attribute,
        simple: matches!(kind, ElementKind::Primitive(_)),
        unbounded,
    }
}

/// Build the registry used throughout the crate's tests and as the
/// default schema for an [`crate::engine::Engine`] that hasn't been
/// given a generated, full IEEE 2030.5 schema.
pub fn build_registry() -> Registry {
    let mut elements = Vec::new();
    let mut types = Vec::new();
    let mut deps = Vec::new();

    macro_rules! type_block {
        ($name:expr, $base:expr, $id:expr, [$($el:expr),* $(,)?]) => {{
            let start = elements.len() as u16;
            $(elements.push($el);)*
            let count = elements.len() as u16 - start;
            types.push(TypeDescriptor {
                id: $id,
                name: $name,
                base: $base,
                element_start: start,
                element_count: count,
            });
        }};
    }

    // 0: Link - base of every FooLink
    type_block!("Link", None, 0, [
        el("href", 0, ElementKind::Primitive(XsType::AnyUri), 1, 1, 0, false, false),
    ]);
    // 1: ListLink - adds the paging "all" count
    type_block!("ListLink", Some(0), 1, [
        el("all", 1, ElementKind::Primitive(XsType::ULong), 1, 1, 0, true, false),
    ]);
    // 2: Resource - base of every addressable object
    type_block!("Resource", None, 2, [
        el("href", 0, ElementKind::Primitive(XsType::AnyUri), 1, 1, 0, true, false),
        el("mRID", 1, ElementKind::Primitive(XsType::HexBinary), 0, 1, 0, false, false),
        el("subscribable", 2, ElementKind::Primitive(XsType::Boolean), 0, 1, 1, false, false),
        el("pollRate", 3, ElementKind::Primitive(XsType::UInt), 0, 1, 2, false, false),
    ]);
    // 3: List - a Resource that carries an unbounded run of items and a total count
    type_block!("List", Some(2), 3, [
        el("all", 4, ElementKind::Primitive(XsType::ULong), 1, 1, 3, true, false),
        el("results", 5, ElementKind::Primitive(XsType::UShort), 0, 1, 4, true, false),
    ]);
    // 4: DeviceCapability
    type_block!("DeviceCapability", Some(2), 4, [
        el("EndDeviceListLink", 6, ElementKind::Child(1), 0, 1, 5, false, false),
        el("TimeLink", 7, ElementKind::Child(0), 0, 1, 6, false, false),
        el("SelfDeviceLink", 8, ElementKind::Child(0), 0, 1, 7, false, false),
    ]);
    deps.push(DepEntry { owner: "DeviceCapability", link_name: "EndDeviceListLink", target: "EndDeviceList" });
    deps.push(DepEntry { owner: "DeviceCapability", link_name: "TimeLink", target: "Time" });
    deps.push(DepEntry { owner: "DeviceCapability", link_name: "SelfDeviceLink", target: "EndDevice" });

    // 5: Time
    type_block!("Time", Some(2), 5, [
        el("currentTime", 9, ElementKind::Primitive(XsType::Long), 1, 1, 8, false, false),
    ]);

    // 6: EndDevice
    type_block!("EndDevice", Some(2), 6, [
        el("sFDI", 10, ElementKind::Primitive(XsType::ULong), 1, 1, 9, false, false),
        el("DERListLink", 11, ElementKind::Child(0), 0, 1, 10, false, false),
    ]);
    deps.push(DepEntry { owner: "EndDevice", link_name: "DERListLink", target: "DERProgramList" });

    // 7: EndDeviceList
    type_block!("EndDeviceList", Some(3), 7, [
        el("EndDevice", 12, ElementKind::Child(6), 0, 0, 11, false, true),
    ]);

    // 8: DERProgramList
    type_block!("DERProgramList", Some(3), 8, [
        el("DERProgram", 13, ElementKind::Child(9), 0, 0, 12, false, true),
    ]);

    // 9: DERProgram
    type_block!("DERProgram", Some(2), 9, [
        el("primacy", 14, ElementKind::Primitive(XsType::UByte), 1, 1, 13, false, false),
        el("DERControlListLink", 15, ElementKind::Child(1), 0, 1, 14, false, false),
    ]);
    deps.push(DepEntry { owner: "DERProgram", link_name: "DERControlListLink", target: "DERControlList" });

    // 10: DERControlList
    type_block!("DERControlList", Some(3), 10, [
        el("DERControl", 16, ElementKind::Child(11), 0, 0, 15, false, true),
    ]);

    // 11: EventStatus
    type_block!("EventStatus", None, 11, [
        el("currentStatus", 17, ElementKind::Primitive(XsType::UByte), 1, 1, 0, false, false),
    ]);

    // 12: DERControl
    type_block!("DERControl", Some(2), 12, [
        el("creationTime", 18, ElementKind::Primitive(XsType::Long), 1, 1, 16, false, false),
        el("intervalStart", 19, ElementKind::Primitive(XsType::Long), 1, 1, 17, false, false),
        el("intervalDuration", 20, ElementKind::Primitive(XsType::UInt), 1, 1, 18, false, false),
        el("EventStatus", 21, ElementKind::Child(11), 1, 1, 19, false, false),
    ]);

    let schema = Schema {
        namespace: "urn:ieee:std:2030.5:ns",
        schema_id: "sep2030-minimal",
        elements,
        types,
    };

    Registry { schema, deps }
}

/// Well-known type ids, stable across calls to [`build_registry`].
pub mod type_ids {
    use super::TypeId;
    pub const LINK: TypeId = 0;
    pub const LIST_LINK: TypeId = 1;
    pub const RESOURCE: TypeId = 2;
    pub const LIST: TypeId = 3;
    pub const DEVICE_CAPABILITY: TypeId = 4;
    pub const TIME: TypeId = 5;
    pub const END_DEVICE: TypeId = 6;
    pub const END_DEVICE_LIST: TypeId = 7;
    pub const DER_PROGRAM_LIST: TypeId = 8;
    pub const DER_PROGRAM: TypeId = 9;
    pub const DER_CONTROL_LIST: TypeId = 10;
    pub const EVENT_STATUS: TypeId = 11;
    pub const DER_CONTROL: TypeId = 12;
}
