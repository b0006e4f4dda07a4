//! Output document assembly.

use crate::diagnostics::{Diagnostics, escape_pointer_token};
use crate::error::{self, ToolDocError};
use crate::resolver::{ConversionContext, convert_schema_id};
use crate::schema::SchemaNode;
use crate::tools::ToolDescriptor;
use serde::Serialize;
use serde_json::Value;

/// Format discriminator of the output document.
pub const OUTPUT_FORMAT: &str = "tooldoc";
/// Version of the output format.
pub const OUTPUT_FORMAT_VERSION: &str = "1.0";

const DEFAULT_TITLE: &str = "Untitled API";
const DEFAULT_API_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, Serialize)]
pub struct OutputDocument {
    pub schema: &'static str,
    pub version: &'static str,
    pub metadata: Metadata,
    pub tools: Vec<ToolDescriptor>,
    /// Converted top-level schemas, in source order.
    #[serde(serialize_with = "schemas_as_map::serialize")]
    pub schemas: Vec<(String, SchemaEntry)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub title: String,
    pub description: String,
    pub version: String,
}

/// One entry of the output schema registry.
#[derive(Debug, Clone)]
pub enum SchemaEntry {
    Converted(SchemaNode),
    Error(SchemaError),
}

/// Explicit error node for a schema that could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaError {
    pub kind: &'static str,
    pub reference: String,
    pub message: String,
}

impl OutputDocument {
    #[must_use]
    pub fn schema(&self, name: &str) -> Option<&SchemaEntry> {
        self.schemas
            .iter()
            .find_map(|(n, entry)| (n == name).then_some(entry))
    }

    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Serialize as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_string(&self, pretty: bool) -> error::Result<String> {
        let text = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(text)
    }
}

impl SchemaEntry {
    #[must_use]
    pub fn as_converted(&self) -> Option<&SchemaNode> {
        match self {
            SchemaEntry::Converted(node) => Some(node),
            SchemaEntry::Error(_) => None,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, SchemaEntry::Error(_))
    }
}

impl Serialize for SchemaEntry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        match self {
            SchemaEntry::Converted(node) => node.serialize(serializer),
            SchemaEntry::Error(error) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", error)?;
                map.end()
            }
        }
    }
}

/// Metadata from the document's `info` object, with defaults for missing fields.
#[must_use]
pub fn metadata(document: &Value) -> Metadata {
    let info = document.get("info");
    let text = |key: &str| {
        info.and_then(|i| i.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    Metadata {
        title: text("title").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        description: text("description").unwrap_or_default(),
        version: text("version").unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
    }
}

/// Convert every registry schema. Failures become error nodes; they never fail the run.
pub fn convert_schemas(
    ctx: &mut ConversionContext<'_>,
    diagnostics: &mut Diagnostics,
) -> Vec<(String, SchemaEntry)> {
    let registry = ctx.registry();
    let mut schemas = Vec::with_capacity(registry.len());

    for name in registry.names() {
        let id = escape_pointer_token(name);
        let entry = match convert_schema_id(&id, ctx) {
            Ok(node) => SchemaEntry::Converted(node),
            Err(ToolDocError::UnresolvableReference { reference }) => {
                diagnostics.warn(
                    format!("/schemas/{id}"),
                    format!("schema '{name}' references missing '{reference}'"),
                );
                SchemaEntry::Error(SchemaError {
                    kind: "unresolvableReference",
                    message: format!("Unresolvable reference: {reference}"),
                    reference,
                })
            }
            Err(e @ ToolDocError::ReferenceTooDeep { .. }) => {
                diagnostics.warn(format!("/schemas/{id}"), e.to_string());
                SchemaEntry::Error(SchemaError {
                    kind: "referenceTooDeep",
                    reference: id.clone(),
                    message: e.to_string(),
                })
            }
            Err(e) => {
                diagnostics.warn(format!("/schemas/{id}"), e.to_string());
                SchemaEntry::Error(SchemaError {
                    kind: "conversionFailed",
                    reference: id.clone(),
                    message: e.to_string(),
                })
            }
        };
        diagnostics.warnings.extend(ctx.take_warnings());
        schemas.push((name.to_string(), entry));
    }

    schemas
}

/// Aggregate metadata, tools and converted schemas into the output document.
#[must_use]
pub fn assemble(
    document: &Value,
    tools: Vec<ToolDescriptor>,
    schemas: Vec<(String, SchemaEntry)>,
) -> OutputDocument {
    OutputDocument {
        schema: OUTPUT_FORMAT,
        version: OUTPUT_FORMAT_VERSION,
        metadata: metadata(document),
        tools,
        schemas,
    }
}

mod schemas_as_map {
    use super::SchemaEntry;
    use serde::Serializer;
    use serde::ser::SerializeMap;

    pub(super) fn serialize<S: Serializer>(
        schemas: &[(String, SchemaEntry)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(schemas.len()))?;
        for (name, entry) in schemas {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}
