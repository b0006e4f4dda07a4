//! Target schema model.
//!
//! A converted schema is a [`SchemaNode`]: common annotations ([`SchemaMeta`]) plus exactly one
//! structural shape ([`SchemaKind`]). The shape set is closed, so everything that consumes a
//! node (serialization, merging) matches on it exhaustively.
//!
//! Serialization emits keys in a fixed order, independent of the key order of the source
//! document. Two sources that normalize to the same tree therefore produce identical bytes.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Prefix of the reference form used in the output document (`#/schemas/<id>`).
pub const OUTPUT_REF_PREFIX: &str = "#/schemas/";

/// Validation keywords copied verbatim onto converted nodes.
pub const CONSTRAINT_KEYWORDS: &[&str] = &[
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "pattern",
    "minItems",
    "maxItems",
    "uniqueItems",
    "minProperties",
    "maxProperties",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaMeta {
    /// Target type name (always set on primitives, objects and arrays).
    pub type_name: Option<String>,
    pub format: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub nullable: Option<bool>,
    pub deprecated: Option<bool>,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    pub constraints: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub meta: SchemaMeta,
    pub kind: SchemaKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    Primitive,
    Object(ObjectShape),
    Array(Box<SchemaNode>),
    Composition(Composition),
    /// Bare reference to a registry schema id. Only produced when a cycle is re-entered.
    Reference(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectShape {
    /// Properties in source order.
    pub properties: Vec<(String, SchemaNode)>,
    /// Required property names in source order, without duplicates.
    pub required: Vec<String>,
    pub additional: Option<AdditionalProperties>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalProperties {
    Allowed(bool),
    Schema(Box<SchemaNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionKind {
    OneOf,
    AnyOf,
    AllOf,
}

impl CompositionKind {
    /// Keywords in the order they are considered when a node carries more than one.
    pub const ALL: [CompositionKind; 3] = [
        CompositionKind::OneOf,
        CompositionKind::AnyOf,
        CompositionKind::AllOf,
    ];

    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            CompositionKind::OneOf => "oneOf",
            CompositionKind::AnyOf => "anyOf",
            CompositionKind::AllOf => "allOf",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub kind: CompositionKind,
    pub members: Vec<SchemaNode>,
    pub discriminator: Option<Discriminator>,
    /// Object structure declared next to the composition keyword.
    pub object: Option<ObjectShape>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discriminator {
    pub property_name: String,
    /// Discriminator value -> target schema id, copied verbatim. `None` when the source has no
    /// mapping.
    pub mapping: Option<Map<String, Value>>,
}

impl SchemaNode {
    #[must_use]
    pub fn new(meta: SchemaMeta, kind: SchemaKind) -> Self {
        Self { meta, kind }
    }

    /// A bare reference stub for a registry id.
    #[must_use]
    pub fn reference(id: impl Into<String>) -> Self {
        Self {
            meta: SchemaMeta::default(),
            kind: SchemaKind::Reference(id.into()),
        }
    }

    /// An object node with the given shape.
    #[must_use]
    pub fn object(shape: ObjectShape) -> Self {
        Self {
            meta: SchemaMeta {
                type_name: Some("object".to_string()),
                ..SchemaMeta::default()
            },
            kind: SchemaKind::Object(shape),
        }
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self.kind, SchemaKind::Reference(_))
    }

    /// Object structure of this node, if it has one.
    #[must_use]
    pub fn object_shape(&self) -> Option<&ObjectShape> {
        match &self.kind {
            SchemaKind::Object(shape) => Some(shape),
            SchemaKind::Composition(c) => c.object.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&SchemaNode> {
        self.object_shape().and_then(|shape| shape.property(name))
    }
}

impl ObjectShape {
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&SchemaNode> {
        self.properties
            .iter()
            .find_map(|(n, node)| (n == name).then_some(node))
    }

    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|(n, _)| n == name)
    }

    /// Insert a property unless one with the same name exists. Returns whether it was inserted.
    pub fn insert_property(&mut self, name: impl Into<String>, node: SchemaNode) -> bool {
        let name = name.into();
        if self.has_property(&name) {
            return false;
        }
        self.properties.push((name, node));
        true
    }

    pub fn require(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name);
        }
    }
}

// ============================================================================
// Serialization
// ============================================================================

impl Serialize for SchemaNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;

        if let SchemaKind::Reference(id) = &self.kind {
            map.serialize_entry("$ref", &format!("{OUTPUT_REF_PREFIX}{id}"))?;
        }

        let meta = &self.meta;
        if let Some(t) = &meta.type_name {
            map.serialize_entry("type", t)?;
        }
        if let Some(format) = &meta.format {
            map.serialize_entry("format", format)?;
        }
        if let Some(title) = &meta.title {
            map.serialize_entry("title", title)?;
        }
        if let Some(desc) = &meta.description {
            map.serialize_entry("description", desc)?;
        }
        if let Some(nullable) = meta.nullable {
            map.serialize_entry("nullable", &nullable)?;
        }
        if let Some(deprecated) = meta.deprecated {
            map.serialize_entry("deprecated", &deprecated)?;
        }
        if let Some(values) = &meta.enum_values {
            map.serialize_entry("enum", values)?;
        }
        if let Some(default) = &meta.default {
            map.serialize_entry("default", default)?;
        }
        for (k, v) in &meta.constraints {
            map.serialize_entry(k, v)?;
        }

        match &self.kind {
            SchemaKind::Primitive | SchemaKind::Reference(_) => {}
            SchemaKind::Object(shape) => serialize_object_shape(&mut map, shape)?,
            SchemaKind::Array(items) => map.serialize_entry("items", items.as_ref())?,
            SchemaKind::Composition(c) => {
                if let Some(shape) = &c.object {
                    serialize_object_shape(&mut map, shape)?;
                }
                map.serialize_entry(c.kind.keyword(), &c.members)?;
                if let Some(d) = &c.discriminator {
                    map.serialize_entry("discriminator", d)?;
                }
            }
        }

        map.end()
    }
}

fn serialize_object_shape<M: SerializeMap>(map: &mut M, shape: &ObjectShape) -> Result<(), M::Error> {
    map.serialize_entry("properties", &Properties(&shape.properties))?;
    if !shape.required.is_empty() {
        map.serialize_entry("required", &shape.required)?;
    }
    match &shape.additional {
        Some(AdditionalProperties::Allowed(b)) => map.serialize_entry("additionalProperties", b)?,
        Some(AdditionalProperties::Schema(node)) => {
            map.serialize_entry("additionalProperties", node.as_ref())?;
        }
        None => {}
    }
    Ok(())
}

struct Properties<'a>(&'a [(String, SchemaNode)]);

impl Serialize for Properties<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, node) in self.0 {
            map.serialize_entry(name, node)?;
        }
        map.end()
    }
}

impl Serialize for Discriminator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("propertyName", &self.property_name)?;
        if let Some(mapping) = &self.mapping {
            map.serialize_entry("mapping", mapping)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn string_node() -> SchemaNode {
        SchemaNode::new(
            SchemaMeta {
                type_name: Some("string".to_string()),
                ..SchemaMeta::default()
            },
            SchemaKind::Primitive,
        )
    }

    #[test]
    fn reference_serializes_as_output_ref() {
        let v = serde_json::to_value(SchemaNode::reference("Pet")).unwrap();
        assert_eq!(v, json!({"$ref": "#/schemas/Pet"}));
    }

    #[test]
    fn object_keeps_property_order_and_omits_empty_required() {
        let mut shape = ObjectShape::default();
        assert!(shape.insert_property("zeta", string_node()));
        assert!(shape.insert_property("alpha", string_node()));
        assert!(!shape.insert_property("zeta", string_node()));

        let s = serde_json::to_string(&SchemaNode::object(shape)).unwrap();
        assert_eq!(
            s,
            r#"{"type":"object","properties":{"zeta":{"type":"string"},"alpha":{"type":"string"}}}"#
        );
    }

    #[test]
    fn require_deduplicates() {
        let mut shape = ObjectShape::default();
        shape.require("id");
        shape.require("id");
        shape.require("name");
        assert_eq!(shape.required, vec!["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn discriminator_without_mapping_has_no_mapping_key() {
        let node = SchemaNode::new(
            SchemaMeta::default(),
            SchemaKind::Composition(Composition {
                kind: CompositionKind::OneOf,
                members: vec![string_node()],
                discriminator: Some(Discriminator {
                    property_name: "petType".to_string(),
                    mapping: None,
                }),
                object: None,
            }),
        );
        let v = serde_json::to_value(&node).unwrap();
        assert_eq!(v["discriminator"], json!({"propertyName": "petType"}));
    }

    #[test]
    fn meta_keys_are_emitted_in_fixed_order() {
        let mut meta = SchemaMeta {
            type_name: Some("integer".to_string()),
            description: Some("count".to_string()),
            nullable: Some(true),
            ..SchemaMeta::default()
        };
        meta.constraints.insert("minimum".to_string(), json!(0));
        let s = serde_json::to_string(&SchemaNode::new(meta, SchemaKind::Primitive)).unwrap();
        assert_eq!(
            s,
            r#"{"type":"integer","description":"count","nullable":true,"minimum":0}"#
        );
    }
}
