//! Source type name -> target type name mapping.

/// Map a source primitive type name onto the target type vocabulary.
///
/// Unknown or absent types fall back to `"string"` so every emitted schema carries a concrete
/// type.
#[must_use]
pub fn map_type(source: Option<&str>) -> &'static str {
    match source {
        Some("integer") => "integer",
        Some("number") => "number",
        Some("boolean") => "boolean",
        Some("array") => "array",
        Some("object") => "object",
        _ => "string",
    }
}
