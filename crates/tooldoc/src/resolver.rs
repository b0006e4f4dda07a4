//! Schema resolver / converter.
//!
//! Converts raw (already normalized) schema trees into [`SchemaNode`]s. Same-document schema
//! references are inlined by registry lookup:
//! - `#/components/schemas/<id>` (`OpenAPI` 3.x)
//! - `#/definitions/<id>` (Swagger 2.0)
//! - deeper pointers into a registry schema (`#/components/schemas/Pet/properties/tag`)
//!
//! Cycle protection: every reference being resolved on the active call path is held in a
//! [`RefGuard`]. Re-entering an id that is already held yields a bare [`SchemaKind::Reference`]
//! stub instead of recursing. The guard lives in the [`ConversionContext`] that is threaded by
//! `&mut` through the whole descent, so sibling branches (properties, members) share it and a
//! cycle through a common ancestor is caught no matter which branch closes it. Entries are
//! released by [`GuardScope`] on drop, which covers early returns and `?` propagation.
//!
//! Cross-document references are not resolved.

use crate::diagnostics::Warning;
use crate::error::{Result, ToolDocError};
use crate::normalize::SIBLINGS_MARKER;
use crate::schema::{
    AdditionalProperties, CONSTRAINT_KEYWORDS, Composition, CompositionKind, Discriminator,
    ObjectShape, SchemaKind, SchemaMeta, SchemaNode,
};
use crate::type_map::map_type;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

const COMPONENTS_SCHEMAS_PREFIX: &str = "#/components/schemas/";
const DEFINITIONS_PREFIX: &str = "#/definitions/";

/// Where a `$ref` string points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget<'a> {
    /// A schema in the document's registry. The id keeps JSON pointer escaping.
    Schema(&'a str),
    /// Any other same-document JSON pointer (without the leading `#`).
    Local(&'a str),
    /// Another document or URL.
    External,
}

#[must_use]
pub fn classify_ref(reference: &str) -> RefTarget<'_> {
    if let Some(id) = reference
        .strip_prefix(COMPONENTS_SCHEMAS_PREFIX)
        .or_else(|| reference.strip_prefix(DEFINITIONS_PREFIX))
        && !id.is_empty()
    {
        return RefTarget::Schema(id);
    }
    match reference.strip_prefix('#') {
        Some(pointer) => RefTarget::Local(pointer),
        None => RefTarget::External,
    }
}

/// Document-scoped schema registry (schema name -> raw schema). Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: Map<String, Value>,
}

impl SchemaRegistry {
    /// Collect `components.schemas` (3.x) and `definitions` (2.0) from a decoded document.
    #[must_use]
    pub fn from_document(document: &Value) -> Self {
        let mut schemas = Map::new();
        let sources = [
            document.pointer("/components/schemas"),
            document.get("definitions"),
        ];
        for source in sources.into_iter().flatten() {
            let Some(obj) = source.as_object() else {
                continue;
            };
            for (name, schema) in obj {
                if !schemas.contains_key(name) {
                    schemas.insert(name.clone(), schema.clone());
                }
            }
        }
        Self { schemas }
    }

    #[must_use]
    pub fn from_schemas(schemas: Map<String, Value>) -> Self {
        Self { schemas }
    }

    /// Schema names in document order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schemas.get(name)
    }

    /// Look up a (pointer-escaped) schema id, optionally pointing inside the named schema.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<&Value> {
        let (name, rest) = match id.split_once('/') {
            Some((name, rest)) => (name, Some(rest)),
            None => (id, None),
        };
        let schema = self
            .schemas
            .get(&crate::diagnostics::unescape_pointer_token(name))?;
        match rest {
            Some(rest) => schema.pointer(&format!("/{rest}")),
            None => Some(schema),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Reference ids currently being resolved on the active call path.
#[derive(Debug, Default)]
pub struct RefGuard {
    active: Vec<String>,
}

impl RefGuard {
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.active.iter().any(|a| a == id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.active.len()
    }
}

/// Default bound on nested reference resolution (`limits.maxReferenceDepth`).
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 32;

/// Registry plus the mutable per-run state of one conversion.
#[derive(Debug)]
pub struct ConversionContext<'r> {
    registry: &'r SchemaRegistry,
    guard: RefGuard,
    max_reference_depth: usize,
    warnings: Vec<Warning>,
}

impl<'r> ConversionContext<'r> {
    #[must_use]
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self {
            registry,
            guard: RefGuard::default(),
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            warnings: Vec::new(),
        }
    }

    /// Fail with [`ToolDocError::ReferenceTooDeep`] once more than `limit` references are held.
    #[must_use]
    pub fn with_max_reference_depth(mut self, limit: usize) -> Self {
        self.max_reference_depth = limit;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &'r SchemaRegistry {
        self.registry
    }

    #[must_use]
    pub fn guard(&self) -> &RefGuard {
        &self.guard
    }

    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn warn(&mut self, location: &str, message: String) {
        tracing::debug!(location, warning = %message, "schema conversion warning");
        self.warnings.push(Warning::new(location, message));
    }

    /// Hold `id` for the lifetime of the returned scope. `None` if it is already held.
    fn enter(&mut self, id: &str) -> Result<Option<GuardScope<'_, 'r>>> {
        if self.guard.contains(id) {
            return Ok(None);
        }
        if self.guard.depth() >= self.max_reference_depth {
            return Err(ToolDocError::ReferenceTooDeep {
                reference: id.to_string(),
                limit: self.max_reference_depth,
            });
        }
        self.guard.active.push(id.to_string());
        Ok(Some(GuardScope { ctx: self }))
    }
}

/// Releases the most recently entered reference id when dropped.
pub struct GuardScope<'c, 'r> {
    ctx: &'c mut ConversionContext<'r>,
}

impl Drop for GuardScope<'_, '_> {
    fn drop(&mut self) {
        self.ctx.guard.active.pop();
    }
}

impl<'r> Deref for GuardScope<'_, 'r> {
    type Target = ConversionContext<'r>;

    fn deref(&self) -> &Self::Target {
        &*self.ctx
    }
}

impl DerefMut for GuardScope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.ctx
    }
}

// ============================================================================
// Conversion
// ============================================================================

/// Convert one raw schema node.
///
/// # Errors
///
/// Returns [`ToolDocError::UnresolvableReference`] when a reference points outside the
/// registry, and [`ToolDocError::ReferenceTooDeep`] when references nest past the context's
/// limit.
pub fn convert(node: &Value, ctx: &mut ConversionContext<'_>) -> Result<SchemaNode> {
    let Some(map) = node.as_object() else {
        // Boolean schemas (`true`/`false`) and malformed scalars.
        return Ok(primitive(SchemaMeta::default(), None));
    };

    if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
        let siblings: Map<String, Value> = map
            .iter()
            .filter(|(k, _)| k.as_str() != "$ref")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let siblings = (!siblings.is_empty()).then_some(siblings);
        return convert_reference(reference, siblings.as_ref(), ctx);
    }

    if let Some((reference, siblings)) = sibling_composition(map) {
        return convert_reference(reference, Some(siblings), ctx);
    }

    convert_inline(map, ctx)
}

/// Convert the registry schema `id` as if it were reached through a reference to it.
///
/// # Errors
///
/// Returns [`ToolDocError::UnresolvableReference`] if `id` (or anything it references) is not in
/// the registry.
/// Returns [`ToolDocError::ReferenceTooDeep`] if resolving it holds more references than the
/// context allows.
pub fn convert_schema_id(id: &str, ctx: &mut ConversionContext<'_>) -> Result<SchemaNode> {
    let Some(mut scope) = ctx.enter(id)? else {
        tracing::debug!(reference = id, "circular reference, emitting stub");
        return Ok(SchemaNode::reference(id));
    };
    let registry = scope.registry;
    let target = registry
        .lookup(id)
        .ok_or_else(|| ToolDocError::unresolvable(id))?;
    convert(target, &mut scope)
}

fn convert_reference(
    reference: &str,
    siblings: Option<&Map<String, Value>>,
    ctx: &mut ConversionContext<'_>,
) -> Result<SchemaNode> {
    let RefTarget::Schema(id) = classify_ref(reference) else {
        return Err(ToolDocError::unresolvable(reference));
    };

    let Some(mut scope) = ctx.enter(id)? else {
        tracing::debug!(reference, "circular reference, emitting stub");
        return Ok(SchemaNode::reference(id));
    };

    let registry = scope.registry;
    let target = registry
        .lookup(id)
        .ok_or_else(|| ToolDocError::unresolvable(id))?;
    let mut resolved = convert(target, &mut scope)?;

    // A target that is itself only a reference resolved to a stub: keep following until a
    // concrete node or an id that is held (or already followed here).
    let mut followed: HashSet<String> = HashSet::new();
    while let SchemaKind::Reference(next) = &resolved.kind {
        if scope.guard.contains(next) || !followed.insert(next.clone()) {
            break;
        }
        let next = next.clone();
        resolved = convert_schema_id(&next, &mut scope)?;
    }

    if let Some(siblings) = siblings {
        merge_siblings(&mut resolved, siblings, reference, &mut scope)?;
    }

    Ok(resolved)
}

/// Recognize the `allOf: [{$ref}, {siblings}]` shape the normalizer produces for references
/// with sibling keys.
fn sibling_composition(map: &Map<String, Value>) -> Option<(&str, &Map<String, Value>)> {
    if map.get(SIBLINGS_MARKER).and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let [pure_ref, siblings] = map.get("allOf")?.as_array()?.as_slice() else {
        return None;
    };
    let pure_ref = pure_ref.as_object()?;
    if pure_ref.len() != 1 {
        return None;
    }
    let reference = pure_ref.get("$ref")?.as_str()?;
    Some((reference, siblings.as_object()?))
}

fn convert_inline(map: &Map<String, Value>, ctx: &mut ConversionContext<'_>) -> Result<SchemaNode> {
    if let Some(node) = convert_nullable_union(map, ctx)? {
        return Ok(node);
    }

    let mut meta = convert_meta(map);
    let explicit_type = map.get("type").and_then(Value::as_str);
    if explicit_type == Some("null") && meta.nullable.is_none() {
        meta.nullable = Some(true);
    }

    let mut present = CompositionKind::ALL
        .into_iter()
        .filter(|k| map.get(k.keyword()).is_some_and(Value::is_array));
    if let Some(kind) = present.next() {
        let ignored: Vec<&str> = present.map(CompositionKind::keyword).collect();
        if !ignored.is_empty() {
            ctx.warn(
                kind.keyword(),
                format!(
                    "multiple composition keywords; kept '{}', ignored {}",
                    kind.keyword(),
                    ignored.join(", ")
                ),
            );
        }

        let raw_members = map
            .get(kind.keyword())
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let mut members = Vec::with_capacity(raw_members.len());
        for member in raw_members {
            members.push(convert(member, ctx)?);
        }

        let object = if has_object_structure(map) {
            Some(convert_object_shape(map, ctx)?)
        } else {
            None
        };

        meta.type_name = explicit_type.map(|t| map_type(Some(t)).to_string());
        return Ok(SchemaNode::new(
            meta,
            SchemaKind::Composition(Composition {
                kind,
                members,
                discriminator: parse_discriminator(map),
                object,
            }),
        ));
    }

    let object_typed = match explicit_type {
        Some("object") => true,
        None => has_object_structure(map),
        Some(_) => false,
    };
    if object_typed && has_object_structure(map) {
        meta.type_name = Some("object".to_string());
        let shape = convert_object_shape(map, ctx)?;
        return Ok(SchemaNode::new(meta, SchemaKind::Object(shape)));
    }

    if explicit_type == Some("array")
        && let Some(items) = map.get("items")
    {
        meta.type_name = Some("array".to_string());
        let items = convert(items, ctx)?;
        return Ok(SchemaNode::new(meta, SchemaKind::Array(Box::new(items))));
    }

    Ok(primitive(meta, explicit_type))
}

fn primitive(mut meta: SchemaMeta, source_type: Option<&str>) -> SchemaNode {
    meta.type_name = Some(map_type(source_type).to_string());
    SchemaNode::new(meta, SchemaKind::Primitive)
}

/// `anyOf`/`oneOf` of exactly `{type: null}` and one other schema collapses to the other
/// schema, marked nullable.
fn convert_nullable_union(
    map: &Map<String, Value>,
    ctx: &mut ConversionContext<'_>,
) -> Result<Option<SchemaNode>> {
    for kind in [CompositionKind::AnyOf, CompositionKind::OneOf] {
        let Some([a, b]) = map
            .get(kind.keyword())
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .and_then(|m| <&[Value; 2]>::try_from(m).ok())
        else {
            continue;
        };
        let other = match (is_null_schema(a), is_null_schema(b)) {
            (true, false) => b,
            (false, true) => a,
            _ => continue,
        };

        let mut node = convert(other, ctx)?;
        if node.is_reference() {
            // Keep cycle stubs bare.
            return Ok(Some(node));
        }
        let outer = convert_meta(map);
        node.meta.nullable = Some(true);
        if outer.description.is_some() {
            node.meta.description = outer.description;
        }
        if outer.title.is_some() {
            node.meta.title = outer.title;
        }
        if outer.deprecated.is_some() {
            node.meta.deprecated = outer.deprecated;
        }
        if outer.default.is_some() {
            node.meta.default = outer.default;
        }
        return Ok(Some(node));
    }
    Ok(None)
}

fn is_null_schema(v: &Value) -> bool {
    v.get("type").and_then(Value::as_str) == Some("null") && v.get("$ref").is_none()
}

fn has_object_structure(map: &Map<String, Value>) -> bool {
    map.get("properties").is_some_and(Value::is_object)
        || map
            .get("additionalProperties")
            .is_some_and(|v| v.is_object() || v.is_boolean())
}

/// Annotations shared by every node kind. `type_name` is left for the caller.
fn convert_meta(map: &Map<String, Value>) -> SchemaMeta {
    let string = |k: &str| map.get(k).and_then(Value::as_str).map(str::to_string);
    let boolean = |k: &str| map.get(k).and_then(Value::as_bool);

    let mut constraints = Map::new();
    for key in CONSTRAINT_KEYWORDS {
        if let Some(v) = map.get(*key) {
            constraints.insert((*key).to_string(), v.clone());
        }
    }

    SchemaMeta {
        type_name: None,
        format: string("format"),
        title: string("title"),
        description: string("description"),
        nullable: boolean("nullable"),
        deprecated: boolean("deprecated"),
        default: map.get("default").cloned(),
        enum_values: map.get("enum").and_then(Value::as_array).cloned(),
        constraints,
    }
}

fn convert_object_shape(
    map: &Map<String, Value>,
    ctx: &mut ConversionContext<'_>,
) -> Result<ObjectShape> {
    let mut shape = ObjectShape::default();

    if let Some(props) = map.get("properties").and_then(Value::as_object) {
        for (name, prop) in props {
            let node = convert(prop, ctx)?;
            shape.insert_property(name.clone(), node);
        }
    }

    for name in required_names(map) {
        shape.require(name);
    }

    shape.additional = match map.get("additionalProperties") {
        Some(Value::Bool(b)) => Some(AdditionalProperties::Allowed(*b)),
        Some(v @ Value::Object(_)) => Some(AdditionalProperties::Schema(Box::new(convert(v, ctx)?))),
        _ => None,
    };

    Ok(shape)
}

fn required_names(map: &Map<String, Value>) -> impl Iterator<Item = &str> {
    map.get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

fn parse_discriminator(map: &Map<String, Value>) -> Option<Discriminator> {
    match map.get("discriminator")? {
        // Swagger 2.0: the discriminator is just the property name.
        Value::String(name) => Some(Discriminator {
            property_name: name.clone(),
            mapping: None,
        }),
        Value::Object(d) => Some(Discriminator {
            property_name: d.get("propertyName")?.as_str()?.to_string(),
            mapping: d.get("mapping").and_then(Value::as_object).cloned(),
        }),
        _ => None,
    }
}

// ============================================================================
// Sibling merge
// ============================================================================

/// Merge the sibling keys of a reference onto its resolved content.
///
/// Only keys absent from the resolved content are added. `nullable` and `deprecated` on the
/// referencing node override the target's values. Structural keys that collide with the
/// resolved structure are dropped with a warning.
fn merge_siblings(
    resolved: &mut SchemaNode,
    siblings: &Map<String, Value>,
    location: &str,
    ctx: &mut ConversionContext<'_>,
) -> Result<()> {
    if resolved.is_reference() {
        if siblings.keys().any(|k| !is_ignored_sibling(k)) {
            ctx.warn(
                location,
                "sibling keys of a circular reference were dropped".to_string(),
            );
        }
        return Ok(());
    }

    let extra = convert_meta(siblings);
    let meta = &mut resolved.meta;
    if meta.description.is_none() {
        meta.description = extra.description;
    }
    if meta.title.is_none() {
        meta.title = extra.title;
    }
    if meta.format.is_none() {
        meta.format = extra.format;
    }
    if meta.default.is_none() {
        meta.default = extra.default;
    }
    if meta.enum_values.is_none() {
        meta.enum_values = extra.enum_values;
    }
    if extra.nullable.is_some() {
        meta.nullable = extra.nullable;
    }
    if extra.deprecated.is_some() {
        meta.deprecated = extra.deprecated;
    }
    for (k, v) in extra.constraints {
        meta.constraints.entry(k).or_insert(v);
    }

    if let Some(t) = siblings.get("type").and_then(Value::as_str) {
        let mapped = map_type(Some(t));
        match &resolved.meta.type_name {
            None => resolved.meta.type_name = Some(mapped.to_string()),
            Some(existing) if existing != mapped => ctx.warn(
                location,
                format!("sibling type '{t}' conflicts with resolved type '{existing}', dropped"),
            ),
            Some(_) => {}
        }
    }

    merge_sibling_structure(resolved, siblings, location, ctx)
}

fn merge_sibling_structure(
    resolved: &mut SchemaNode,
    siblings: &Map<String, Value>,
    location: &str,
    ctx: &mut ConversionContext<'_>,
) -> Result<()> {
    if has_object_structure(siblings) {
        // A bare `type: object` primitive has no properties yet: give it a shape to merge into.
        if matches!(resolved.kind, SchemaKind::Primitive)
            && resolved.meta.type_name.as_deref() == Some("object")
        {
            resolved.kind = SchemaKind::Object(ObjectShape::default());
        }
        let extra = convert_object_shape(siblings, ctx)?;
        let shape = match &mut resolved.kind {
            SchemaKind::Object(shape) => Some(shape),
            SchemaKind::Composition(c) => Some(c.object.get_or_insert_with(ObjectShape::default)),
            _ => None,
        };
        match shape {
            Some(shape) => {
                for (name, node) in extra.properties {
                    if !shape.insert_property(name.clone(), node) {
                        ctx.warn(
                            location,
                            format!("sibling property '{name}' collides with resolved property, dropped"),
                        );
                    }
                }
                for name in extra.required {
                    shape.require(name);
                }
                if shape.additional.is_none() {
                    shape.additional = extra.additional;
                }
            }
            None => ctx.warn(
                location,
                "sibling object structure on a non-object reference target, dropped".to_string(),
            ),
        }
    } else if let Some(shape) = match &mut resolved.kind {
        SchemaKind::Object(shape) => Some(shape),
        SchemaKind::Composition(c) => c.object.as_mut(),
        _ => None,
    } {
        for name in required_names(siblings) {
            shape.require(name);
        }
    }

    if let Some(items) = siblings.get("items") {
        let untyped_array = matches!(resolved.kind, SchemaKind::Primitive)
            && resolved.meta.type_name.as_deref() == Some("array");
        if untyped_array {
            let items = convert(items, ctx)?;
            resolved.kind = SchemaKind::Array(Box::new(items));
        } else {
            ctx.warn(
                location,
                "sibling 'items' collides with resolved structure, dropped".to_string(),
            );
        }
    }

    for kind in CompositionKind::ALL {
        if siblings.contains_key(kind.keyword()) {
            ctx.warn(
                location,
                format!("sibling '{}' cannot be merged onto a resolved reference, dropped", kind.keyword()),
            );
        }
    }

    if let Some(d) = parse_discriminator(siblings)
        && let SchemaKind::Composition(c) = &mut resolved.kind
        && c.discriminator.is_none()
    {
        c.discriminator = Some(d);
    }

    Ok(())
}

fn is_ignored_sibling(key: &str) -> bool {
    key == "$ref" || key.starts_with("x-")
}

/// Follow same-document `$ref`s for non-schema components (parameters, request bodies).
///
/// # Errors
///
/// Returns [`ToolDocError::UnresolvableReference`] for external references, missing pointers and
/// reference cycles.
pub fn resolve_component<'d>(document: &'d Value, node: &'d Value) -> Result<&'d Value> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut cur = node;

    loop {
        let Some(reference) = cur.get("$ref").and_then(Value::as_str) else {
            return Ok(cur);
        };
        if !seen.insert(reference) {
            return Err(ToolDocError::unresolvable(reference));
        }
        let Some(pointer) = reference.strip_prefix('#') else {
            return Err(ToolDocError::unresolvable(reference));
        };
        cur = document
            .pointer(pointer)
            .ok_or_else(|| ToolDocError::unresolvable(reference))?;
    }
}
