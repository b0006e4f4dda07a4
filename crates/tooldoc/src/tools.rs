//! Operation -> tool mapping.
//!
//! Every `(path, method)` pair of the document becomes one [`ToolDescriptor`], in document
//! order. Path and query parameters become properties of the tool's parameter object; a JSON
//! request body becomes the reserved `body` property.

use crate::config::{ConversionConfig, EndpointConfig, FailurePolicy};
use crate::diagnostics::{Diagnostics, OperationFailure, pointer_from_tokens};
use crate::error::{Result, ToolDocError};
use crate::resolver::{ConversionContext, convert, resolve_component};
use crate::schema::{ObjectShape, SchemaNode};
use mime::Mime;
use regex::Regex;
use rmcp::model::ToolAnnotations;
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Reserved parameter name for the request body.
pub const BODY_PARAMETER: &str = "body";

const HTTP_METHODS: &[&str] = &[
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Keys beside a parameter or request body `$ref` that replace the referenced values.
const REFERENCE_OVERRIDE_KEYS: &[&str] = &["description", "deprecated", "required"];

/// Parameter keys that describe the schema inline in Swagger 2.0 (no `schema` object).
const INLINE_PARAMETER_SCHEMA_KEYS: &[&str] = &[
    "type",
    "format",
    "items",
    "enum",
    "default",
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
];

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("static regex"));

/// A callable operation in the output document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Always object-shaped; carries the required-name list.
    pub parameters: SchemaNode,
    pub http: HttpBinding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
    pub annotations: ToolAnnotations,
}

impl ToolDescriptor {
    /// Names of the required parameters.
    #[must_use]
    pub fn required(&self) -> &[String] {
        self.parameters
            .object_shape()
            .map(|shape| shape.required.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpBinding {
    /// Uppercase HTTP method.
    pub method: String,
    /// Path template (e.g., /pet/{petId})
    pub path: String,
}

struct OperationInput<'a> {
    path: &'a str,
    method: &'a str,
    operation: &'a Map<String, Value>,
    path_item_params: &'a [Value],
}

/// Map all operations of a normalized document to tools.
///
/// Operation failures are handled per [`FailurePolicy`]: isolated failures are recorded in
/// `diagnostics.failures`.
///
/// # Errors
///
/// Returns [`ToolDocError::OperationFailed`] for the first failing operation when the abort
/// policy is configured.
pub fn map_operations(
    document: &Value,
    ctx: &mut ConversionContext<'_>,
    config: &ConversionConfig,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<ToolDescriptor>> {
    let mut tools = Vec::new();
    let mut tool_names: HashSet<String> = HashSet::new();

    let Some(paths) = document.get("paths").and_then(Value::as_object) else {
        tracing::info!("document has no paths");
        return Ok(tools);
    };

    for (path, path_item) in paths {
        let location = pointer_from_tokens(["paths", path.as_str()]);
        let path_item = match resolve_component(document, path_item) {
            Ok(v) => v,
            Err(e) => {
                diagnostics.warn(location, format!("Skipping path '{path}': {e}"));
                continue;
            }
        };
        let Some(item) = path_item.as_object() else {
            diagnostics.warn(location, format!("Skipping path '{path}': not an object"));
            continue;
        };
        let path_item_params = item
            .get("parameters")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for (method, operation) in item {
            if !HTTP_METHODS.contains(&method.as_str()) {
                continue;
            }
            let Some(operation) = operation.as_object() else {
                diagnostics.warn(
                    pointer_from_tokens(["paths", path.as_str(), method.as_str()]),
                    "operation is not an object, skipped",
                );
                continue;
            };
            if !should_convert(config, method, path) {
                tracing::debug!(method = %method.to_uppercase(), path = %path, "operation filtered out");
                continue;
            }

            let input = OperationInput {
                path,
                method,
                operation,
                path_item_params,
            };
            let result = generate_tool(document, ctx, config, &input, &mut tool_names);
            diagnostics.warnings.extend(ctx.take_warnings());

            match result {
                Ok(tool) => tools.push(tool),
                Err(e) => match config.failure_policy {
                    FailurePolicy::Isolate => {
                        tracing::warn!(
                            "Skipping {} {}: {}",
                            method.to_uppercase(),
                            path,
                            e
                        );
                        diagnostics.failures.push(OperationFailure {
                            method: method.to_uppercase(),
                            path: path.clone(),
                            message: e.to_string(),
                        });
                    }
                    FailurePolicy::Abort => {
                        return Err(ToolDocError::OperationFailed {
                            method: method.to_uppercase(),
                            path: path.clone(),
                            message: e.to_string(),
                        });
                    }
                },
            }
        }
    }

    Ok(tools)
}

fn generate_tool(
    document: &Value,
    ctx: &mut ConversionContext<'_>,
    config: &ConversionConfig,
    input: &OperationInput<'_>,
    tool_names: &mut HashSet<String>,
) -> Result<ToolDescriptor> {
    let endpoint = config.endpoint(input.path, input.method);
    let operation_id = input
        .operation
        .get("operationId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let parameters = collect_tool_parameters(document, ctx, input)?;

    let tool_name = base_tool_name(endpoint, operation_id.as_deref(), input.method, input.path);
    let name = reserve_unique_tool_name(tool_names, &tool_name);

    Ok(ToolDescriptor {
        name,
        description: tool_description(endpoint, input.operation, input.method, input.path),
        parameters: SchemaNode::object(parameters),
        http: HttpBinding {
            method: input.method.to_uppercase(),
            path: input.path.to_string(),
        },
        operation_id,
        deprecated: input
            .operation
            .get("deprecated")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        annotations: annotations_for_method(input.method),
    })
}

fn base_tool_name(
    endpoint: Option<&EndpointConfig>,
    operation_id: Option<&str>,
    method: &str,
    path: &str,
) -> String {
    if let Some(tool) = endpoint.and_then(|c| c.tool.clone()) {
        tool
    } else if let Some(op_id) = operation_id {
        op_id.to_string()
    } else {
        generate_canonical_name(method, path)
    }
}

fn tool_description(
    endpoint: Option<&EndpointConfig>,
    operation: &Map<String, Value>,
    method: &str,
    path: &str,
) -> String {
    let text = |k: &str| {
        operation
            .get(k)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };
    endpoint
        .and_then(|c| c.description.clone())
        .or_else(|| text("summary"))
        .or_else(|| text("description"))
        .unwrap_or_else(|| format!("Calls {} {}", method.to_uppercase(), path))
}

fn collect_tool_parameters(
    document: &Value,
    ctx: &mut ConversionContext<'_>,
    input: &OperationInput<'_>,
) -> Result<ObjectShape> {
    let op_params = input
        .operation
        .get("parameters")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let merged = merge_parameters(document, input.path_item_params, op_params)?;
    let location = pointer_from_tokens(["paths", input.path, input.method]);

    let mut shape = ObjectShape::default();
    let mut body_param: Option<&Map<String, Value>> = None;

    for param in &merged {
        let (Some(name), Some(loc)) = (
            param.get("name").and_then(Value::as_str),
            param.get("in").and_then(Value::as_str),
        ) else {
            ctx.warn(&location, "parameter without name or location, skipped".to_string());
            continue;
        };

        match loc {
            "path" | "query" => {}
            "body" => {
                body_param = Some(&**param);
                continue;
            }
            other => {
                tracing::debug!(parameter = name, location = other, "parameter location not exposed");
                continue;
            }
        }

        let schema = parameter_schema(param);
        let mut node = convert(&schema, ctx)?;
        annotate_from(&mut node, param);

        if !shape.insert_property(name, node) {
            ctx.warn(
                &location,
                format!("parameter '{name}' appears more than once, kept the first"),
            );
            continue;
        }
        if param.get("required").and_then(Value::as_bool) == Some(true) {
            shape.require(name);
        }
    }

    let body = match body_param {
        Some(param) => swagger_body(document, input.operation, param, &location, ctx),
        None => request_body(document, input.operation, &location, ctx)?,
    };
    if let Some((schema, required, description)) = body {
        if shape.has_property(BODY_PARAMETER) {
            ctx.warn(
                &location,
                "request body collides with a parameter named 'body', body skipped".to_string(),
            );
        } else {
            let mut node = convert(&schema, ctx)?;
            if node.meta.description.is_none() {
                node.meta.description = description;
            }
            shape.insert_property(BODY_PARAMETER, node);
            if required {
                shape.require(BODY_PARAMETER);
            }
        }
    }

    Ok(shape)
}

type BodySchema = (Value, bool, Option<String>);

/// `OpenAPI` 3.x `requestBody` with a JSON-compatible media type.
fn request_body(
    document: &Value,
    operation: &Map<String, Value>,
    location: &str,
    ctx: &mut ConversionContext<'_>,
) -> Result<Option<BodySchema>> {
    let Some(body_ref) = operation.get("requestBody") else {
        return Ok(None);
    };
    let Some(body) = resolve_with_overrides(document, body_ref)? else {
        return Ok(None);
    };
    let Some(content) = body.get("content").and_then(Value::as_object) else {
        return Ok(None);
    };

    let media = content.get("application/json").or_else(|| {
        content
            .iter()
            .find_map(|(k, v)| is_json_media_type(k).then_some(v))
    });
    let Some(media) = media else {
        tracing::debug!(location, "request body has no JSON media type");
        return Ok(None);
    };
    let Some(schema) = media.get("schema") else {
        ctx.warn(location, "JSON request body without a schema, skipped".to_string());
        return Ok(None);
    };

    let required = body.get("required").and_then(Value::as_bool).unwrap_or(false);
    let description = body
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Some((schema.clone(), required, description)))
}

/// Swagger 2.0 `in: body` parameter.
fn swagger_body(
    document: &Value,
    operation: &Map<String, Value>,
    param: &Map<String, Value>,
    location: &str,
    ctx: &mut ConversionContext<'_>,
) -> Option<BodySchema> {
    let consumes = operation
        .get("consumes")
        .or_else(|| document.get("consumes"))
        .and_then(Value::as_array);
    if let Some(consumes) = consumes
        && !consumes
            .iter()
            .filter_map(Value::as_str)
            .any(is_json_media_type)
    {
        tracing::debug!(location, "operation does not consume JSON, body skipped");
        return None;
    }

    let Some(schema) = param.get("schema") else {
        ctx.warn(location, "body parameter without a schema, skipped".to_string());
        return None;
    };
    let required = param.get("required").and_then(Value::as_bool).unwrap_or(false);
    let description = param
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some((schema.clone(), required, description))
}

fn is_json_media_type(media_type: &str) -> bool {
    let Ok(m) = media_type.parse::<Mime>() else {
        return false;
    };
    m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON)
}

/// The raw schema of a path/query parameter.
fn parameter_schema(param: &Map<String, Value>) -> Value {
    if let Some(schema) = param.get("schema") {
        return schema.clone();
    }
    if let Some(content) = param.get("content").and_then(Value::as_object) {
        return content
            .values()
            .find_map(|media| media.get("schema").cloned())
            .unwrap_or_else(|| Value::Object(Map::new()));
    }
    // Swagger 2.0 describes the schema inline on the parameter.
    let inline: Map<String, Value> = INLINE_PARAMETER_SCHEMA_KEYS
        .iter()
        .filter_map(|k| param.get(*k).map(|v| ((*k).to_string(), v.clone())))
        .collect();
    Value::Object(inline)
}

/// Fill description/deprecated from the parameter when the schema has none.
fn annotate_from(node: &mut SchemaNode, param: &Map<String, Value>) {
    if node.is_reference() {
        return;
    }
    if node.meta.description.is_none() {
        node.meta.description = param
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
    }
    if node.meta.deprecated.is_none() && param.get("deprecated").and_then(Value::as_bool) == Some(true)
    {
        node.meta.deprecated = Some(true);
    }
}

/// Path-item parameters overridden by operation parameters with the same `(in, name)`.
fn merge_parameters<'d>(
    document: &'d Value,
    path_item_params: &'d [Value],
    operation_params: &'d [Value],
) -> Result<Vec<Cow<'d, Map<String, Value>>>> {
    fn key_for(p: &Map<String, Value>) -> Option<(String, String)> {
        let loc = p.get("in")?.as_str()?;
        let name = p.get("name")?.as_str()?;
        Some((loc.to_string(), name.to_string()))
    }

    let mut merged: Vec<Cow<'d, Map<String, Value>>> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for p in path_item_params.iter().chain(operation_params) {
        let Some(param) = resolve_with_overrides(document, p)? else {
            continue;
        };
        match key_for(&param) {
            Some(key) => match index.get(&key) {
                Some(&i) => merged[i] = param,
                None => {
                    index.insert(key, merged.len());
                    merged.push(param);
                }
            },
            None => merged.push(param),
        }
    }

    Ok(merged)
}

/// Resolve a parameter or request body that may be a component `$ref`.
///
/// `description`, `deprecated` and `required` written beside the `$ref` replace the values of
/// the referenced component. `None` when the target is not an object.
fn resolve_with_overrides<'d>(
    document: &'d Value,
    node: &'d Value,
) -> Result<Option<Cow<'d, Map<String, Value>>>> {
    let Some(target) = resolve_component(document, node)?.as_object() else {
        return Ok(None);
    };
    let overrides: Vec<(&String, &Value)> = match node.as_object() {
        Some(map) if map.contains_key("$ref") => map
            .iter()
            .filter(|(k, _)| REFERENCE_OVERRIDE_KEYS.contains(&k.as_str()))
            .collect(),
        _ => Vec::new(),
    };
    if overrides.is_empty() {
        return Ok(Some(Cow::Borrowed(target)));
    }

    let mut merged = target.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    Ok(Some(Cow::Owned(merged)))
}

fn should_convert(config: &ConversionConfig, method: &str, path: &str) -> bool {
    if config.endpoint(path, method).is_some() {
        return true;
    }
    if !config.operations.is_enabled() {
        return false;
    }

    let operation_str = format!("{} {}", method.to_uppercase(), path);

    // Exclude patterns win.
    if config
        .operations
        .exclude_patterns()
        .iter()
        .any(|p| glob_match(p, &operation_str))
    {
        return false;
    }

    let include = config.operations.include_patterns();
    include.is_empty() || include.iter().any(|p| glob_match(p, &operation_str))
}

/// Synthesize a tool name from method and path: `get` + `/items/{id}` -> `getItemsById`.
fn generate_canonical_name(method: &str, path: &str) -> String {
    let method = method.to_lowercase();
    let mut name = method.clone();

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if let Some(param) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            name.push_str("By");
            name.push_str(&pascal_case(param));
        } else {
            name.push_str(&pascal_case(segment));
        }
    }

    if name.len() == method.len() {
        name.push_str("Root");
    }
    name
}

fn pascal_case(s: &str) -> String {
    NON_ALNUM
        .split(s)
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// `base`, or the first free `base_<n>` when the name is taken.
fn reserve_unique_tool_name(tool_names: &mut HashSet<String>, base: &str) -> String {
    let name = if tool_names.contains(base) {
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !tool_names.contains(candidate))
            .unwrap_or_default()
    } else {
        base.to_string()
    };
    tool_names.insert(name.clone());
    name
}

/// Tool annotations from HTTP method semantics.
///
/// `openWorldHint` is always set: every tool calls an external API.
#[must_use]
pub fn annotations_for_method(method: &str) -> ToolAnnotations {
    let (read_only, destructive, idempotent) = match method.to_ascii_lowercase().as_str() {
        "get" | "head" | "options" => (Some(true), Some(false), Some(true)),
        "post" => (Some(false), Some(false), Some(false)),
        "put" | "delete" => (Some(false), Some(true), Some(true)),
        // PATCH may or may not be idempotent; do not guess.
        "patch" => (Some(false), Some(true), None),
        _ => (None, None, None),
    };
    ToolAnnotations {
        title: None,
        read_only_hint: read_only,
        destructive_hint: destructive,
        idempotent_hint: idempotent,
        open_world_hint: Some(true),
    }
}

/// Operation pattern match: `*` spans any run of characters, `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    // reachable[j]: the pattern consumed so far matches `text[..j]`.
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;

    for p in pattern.chars() {
        let mut next = vec![false; text.len() + 1];
        for j in 0..=text.len() {
            next[j] = match p {
                '*' => reachable[j] || (j > 0 && next[j - 1]),
                '?' => j > 0 && reachable[j - 1],
                c => j > 0 && reachable[j - 1] && text[j - 1] == c,
            };
        }
        reachable = next;
    }

    reachable[text.len()]
}

// ============================================================================
// Tests
// ============================================================================
