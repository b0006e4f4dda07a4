//! Version normalizer.
//!
//! Rewrites a decoded document so the resolver only ever sees one canonical shape for
//! constructs that differ between Swagger 2.0, `OpenAPI` 3.0 and 3.1:
//! - `type: [T, "null"]` (3.1) becomes `type: T, nullable: true`
//! - `x-nullable` (2.0 vendor extension) becomes `nullable`
//! - `$ref` with sibling keys (legal in 3.1) becomes a tagged two-member `allOf`
//!
//! Normalization works on a copy and never fails. Malformed nodes are skipped and reported as
//! warnings.

use crate::diagnostics::{Warning, pointer_from_tokens};
use crate::resolver::{RefTarget, SchemaRegistry, classify_ref};
use serde_json::{Map, Value, json};

/// Marks an `allOf` produced from a `$ref` with siblings. The resolver folds such a
/// composition back onto the referenced schema.
pub const SIBLINGS_MARKER: &str = "x-ref-siblings";

/// Keys whose values are data, not schemas. Never descended into.
const VALUE_KEYWORDS: &[&str] = &["example", "examples", "default", "enum", "const"];

/// Keys whose value maps names to nodes (rather than being a node itself).
const NAMED_MAP_KEYWORDS: &[&str] = &[
    "properties",
    "patternProperties",
    "definitions",
    "schemas",
    "parameters",
    "responses",
    "requestBodies",
    "headers",
    "securitySchemes",
    "content",
    "callbacks",
    "links",
    "paths",
    "encoding",
];

#[derive(Debug, Clone)]
pub struct Normalized {
    pub document: Value,
    pub warnings: Vec<Warning>,
}

/// Normalize a whole decoded document.
#[must_use]
pub fn normalize_document(document: &Value) -> Normalized {
    let registry = SchemaRegistry::from_document(document);
    let mut normalizer = Normalizer::new(&registry);
    let mut copy = document.clone();
    normalizer.normalize(&mut copy);
    Normalized {
        document: copy,
        warnings: normalizer.into_warnings(),
    }
}

/// Tree walker. The registry decides whether a `$ref` with siblings can be kept.
pub struct Normalizer<'r> {
    registry: &'r SchemaRegistry,
    path: Vec<String>,
    warnings: Vec<Warning>,
}

impl<'r> Normalizer<'r> {
    #[must_use]
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            path: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Normalize `value` in place.
    pub fn normalize(&mut self, value: &mut Value) {
        self.visit(value, false);
    }

    #[must_use]
    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }

    fn warn(&mut self, message: String) {
        let location = pointer_from_tokens(&self.path);
        tracing::debug!(location = %location, warning = %message, "normalization warning");
        self.warnings.push(Warning::new(location, message));
    }

    fn visit(&mut self, value: &mut Value, named_map: bool) {
        match value {
            Value::Object(map) => {
                if !named_map {
                    self.rewrite_node(map);
                }
                for (key, child) in map.iter_mut() {
                    if !named_map && (VALUE_KEYWORDS.contains(&key.as_str()) || key.starts_with("x-")) {
                        continue;
                    }
                    let child_named = !named_map && NAMED_MAP_KEYWORDS.contains(&key.as_str());
                    self.path.push(key.clone());
                    self.visit(child, child_named);
                    self.path.pop();
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.path.push(i.to_string());
                    self.visit(item, false);
                    self.path.pop();
                }
            }
            _ => {}
        }
    }

    fn rewrite_node(&mut self, map: &mut Map<String, Value>) {
        self.rewrite_type_array(map);
        self.rewrite_vendor_nullable(map);
        self.rewrite_reference(map);
    }

    /// `type` as a list: `[T, "null"]` is the canonical 3.1 nullable form.
    ///
    /// Longer lists keep their first non-null entry (the rest are reported). A list holding only
    /// `"null"` drops `type` entirely.
    fn rewrite_type_array(&mut self, map: &mut Map<String, Value>) {
        let Some(Value::Array(types)) = map.get("type") else {
            return;
        };

        let Some(names) = types.iter().map(Value::as_str).collect::<Option<Vec<&str>>>() else {
            map.remove("type");
            self.warn("malformed type list (non-string entry), type dropped".to_string());
            return;
        };

        let has_null = names.contains(&"null");
        let mut non_null = names.iter().copied().filter(|t| *t != "null");
        let first = non_null.next().map(str::to_string);
        let dropped: Vec<&str> = non_null.collect();

        if !dropped.is_empty() {
            self.warn(format!(
                "type list {names:?} narrowed to '{}', dropped {dropped:?}",
                first.as_deref().unwrap_or_default()
            ));
        }

        match first {
            Some(t) => {
                map.insert("type".to_string(), Value::String(t));
            }
            None => {
                map.remove("type");
            }
        }
        if has_null {
            map.insert("nullable".to_string(), Value::Bool(true));
        }
    }

    fn rewrite_vendor_nullable(&mut self, map: &mut Map<String, Value>) {
        if let Some(Value::Bool(b)) = map.get("x-nullable")
            && !map.contains_key("nullable")
        {
            let b = *b;
            map.insert("nullable".to_string(), Value::Bool(b));
        }
    }

    fn rewrite_reference(&mut self, map: &mut Map<String, Value>) {
        let reference = match map.get("$ref") {
            None => return,
            Some(Value::String(r)) => r.clone(),
            // A property literally named `$ref` inside a name map; not a reference.
            Some(Value::Object(_)) => return,
            Some(other) => {
                let kind = json_kind(other);
                map.remove("$ref");
                self.warn(format!("malformed $ref ({kind}), dropped"));
                return;
            }
        };
        let has_siblings = map.len() > 1;

        match classify_ref(&reference) {
            RefTarget::External => {
                map.remove("$ref");
                self.warn(format!(
                    "external reference '{reference}' is not resolved, dropped"
                ));
            }
            RefTarget::Schema(id) if has_siblings => {
                if self.registry.lookup(id).is_none() {
                    map.remove("$ref");
                    self.warn(format!(
                        "unresolvable reference '{reference}' with sibling keys, dropped"
                    ));
                    return;
                }
                map.remove("$ref");
                let siblings = std::mem::take(map);
                map.insert(
                    "allOf".to_string(),
                    json!([{ "$ref": reference }, Value::Object(siblings)]),
                );
                map.insert(SIBLINGS_MARKER.to_string(), Value::Bool(true));
            }
            // Pure schema references are resolved later; references to other components keep
            // their siblings as annotations.
            RefTarget::Schema(_) | RefTarget::Local(_) => {}
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize_schema(schema: Value) -> Normalized {
        normalize_document(&json!({
            "openapi": "3.1.0",
            "components": {"schemas": {
                "Base": {"type": "object"},
                "Subject": schema
            }}
        }))
    }

    fn subject(n: &Normalized) -> &Value {
        &n.document["components"]["schemas"]["Subject"]
    }

    #[test]
    fn nullable_type_list_becomes_nullable_flag() {
        let n = normalize_schema(json!({"type": ["string", "null"], "format": "date"}));
        assert_eq!(
            subject(&n),
            &json!({"type": "string", "format": "date", "nullable": true})
        );
        assert!(n.warnings.is_empty());

        let n = normalize_schema(json!({"type": ["null", "integer"]}));
        assert_eq!(subject(&n), &json!({"type": "integer", "nullable": true}));
    }

    #[test]
    fn long_type_list_keeps_first_non_null_entry() {
        let n = normalize_schema(json!({"type": ["integer", "null", "string"]}));
        assert_eq!(subject(&n), &json!({"type": "integer", "nullable": true}));
        assert_eq!(n.warnings.len(), 1);
        assert_eq!(n.warnings[0].location, "/components/schemas/Subject");
    }

    #[test]
    fn null_only_and_malformed_type_lists() {
        let n = normalize_schema(json!({"type": ["null"]}));
        assert_eq!(subject(&n), &json!({"nullable": true}));

        let n = normalize_schema(json!({"type": ["string", 3]}));
        assert_eq!(subject(&n), &json!({}));
        assert_eq!(n.warnings.len(), 1);
    }

    #[test]
    fn reference_with_siblings_becomes_tagged_all_of() {
        let n = normalize_schema(json!({
            "$ref": "#/components/schemas/Base",
            "description": "described"
        }));
        assert_eq!(
            subject(&n),
            &json!({
                "allOf": [
                    {"$ref": "#/components/schemas/Base"},
                    {"description": "described"}
                ],
                SIBLINGS_MARKER: true
            })
        );
    }

    #[test]
    fn siblings_moved_into_all_of_are_normalized_too() {
        let n = normalize_schema(json!({
            "$ref": "#/components/schemas/Base",
            "type": ["object", "null"]
        }));
        assert_eq!(
            subject(&n)["allOf"][1],
            json!({"type": "object", "nullable": true})
        );
    }

    #[test]
    fn unresolvable_and_external_references_are_dropped() {
        let n = normalize_schema(json!({
            "$ref": "#/components/schemas/Nope",
            "description": "kept"
        }));
        assert_eq!(subject(&n), &json!({"description": "kept"}));
        assert_eq!(n.warnings.len(), 1);

        let n = normalize_schema(json!({"$ref": "https://example.com/pet.json"}));
        assert_eq!(subject(&n), &json!({}));
        assert_eq!(n.warnings.len(), 1);
    }

    #[test]
    fn pure_and_component_references_are_untouched() {
        let doc = json!({
            "components": {
                "schemas": {"A": {"$ref": "#/components/schemas/Missing"}},
                "parameters": {"P": {"name": "p", "in": "query"}}
            },
            "paths": {"/x": {"get": {"parameters": [
                {"$ref": "#/components/parameters/P", "description": "override"}
            ]}}}
        });
        let n = normalize_document(&doc);
        assert_eq!(n.document, doc);
        assert!(n.warnings.is_empty());
    }

    #[test]
    fn value_keywords_and_named_maps_are_respected() {
        let doc = json!({
            "components": {"schemas": {"S": {
                "type": "object",
                "example": {"type": ["string", "null"]},
                "properties": {
                    "$ref": {"type": ["integer", "null"]},
                    "default": {"type": ["boolean", "null"]}
                }
            }}}
        });
        let n = normalize_document(&doc);
        let s = &n.document["components"]["schemas"]["S"];
        assert_eq!(s["example"], json!({"type": ["string", "null"]}));
        assert_eq!(
            s["properties"]["$ref"],
            json!({"type": "integer", "nullable": true})
        );
        assert_eq!(
            s["properties"]["default"],
            json!({"type": "boolean", "nullable": true})
        );
    }

    #[test]
    fn swagger_vendor_nullable_is_recognized() {
        let n = normalize_schema(json!({"type": "string", "x-nullable": true}));
        assert_eq!(subject(&n)["nullable"], json!(true));
    }

    #[test]
    fn malformed_reference_value_is_dropped() {
        let n = normalize_schema(json!({"$ref": 42, "type": "string"}));
        assert_eq!(subject(&n), &json!({"type": "string"}));
        assert_eq!(n.warnings.len(), 1);
    }

    #[test]
    fn input_document_is_not_mutated() {
        let doc = json!({"components": {"schemas": {"S": {"type": ["string", "null"]}}}});
        let before = doc.clone();
        let _ = normalize_document(&doc);
        assert_eq!(doc, before);
    }
}
