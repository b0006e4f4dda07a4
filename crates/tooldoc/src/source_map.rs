//! Provenance map from output locations back to the source document.
//!
//! Line numbers are found by scanning the source text for the path key and then the method key
//! that follows it. This is best effort: it works for block YAML and for JSON (pretty or
//! minified), and leaves the line out when the keys cannot be found.

use crate::diagnostics::pointer_from_tokens;
use crate::tools::ToolDescriptor;
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    /// JSON pointer of the operation in the source document.
    pub source_path: String,
    /// 1-based line of the operation's method key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_line: Option<usize>,
}

/// Output pointer (`/tools/<i>`) -> source location, in tool order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    entries: Vec<(String, SourceLocation)>,
}

impl SourceMap {
    #[must_use]
    pub fn build(source: &str, tools: &[ToolDescriptor]) -> Self {
        let paths_start = find_key(source, "paths", 0).unwrap_or(0);
        let entries = tools
            .iter()
            .enumerate()
            .map(|(i, tool)| {
                let method = tool.http.method.to_lowercase();
                let path = tool.http.path.as_str();
                let location = SourceLocation {
                    source_path: pointer_from_tokens(["paths", path, method.as_str()]),
                    source_line: locate_operation(source, paths_start, path, &method),
                };
                (format!("/tools/{i}"), location)
            })
            .collect();
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, output_pointer: &str) -> Option<&SourceLocation> {
        self.entries
            .iter()
            .find_map(|(p, loc)| (p == output_pointer).then_some(loc))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for SourceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (pointer, location) in &self.entries {
            map.serialize_entry(pointer, location)?;
        }
        map.end()
    }
}

fn locate_operation(source: &str, from: usize, path: &str, method: &str) -> Option<usize> {
    let path_at = find_key(source, path, from)?;
    let method_at = find_key(source, method, path_at + path.len())?;
    Some(line_of(source, method_at))
}

/// Byte offset of the first mapping key `key` at or after `from`.
///
/// A key is the bare, single- or double-quoted token followed (after optional spaces) by `:`.
fn find_key(source: &str, key: &str, from: usize) -> Option<usize> {
    let candidates = [format!("\"{key}\""), format!("'{key}'"), key.to_string()];
    candidates
        .iter()
        .filter_map(|needle| {
            let mut start = from;
            while let Some(found) = source.get(start..)?.find(needle.as_str()) {
                let at = start + found;
                let after = &source[at + needle.len()..];
                if after.trim_start_matches([' ', '\t']).starts_with(':')
                    && is_key_boundary(source, at)
                {
                    return Some(at);
                }
                start = at + needle.len();
            }
            None
        })
        .min()
}

/// The token at `at` starts a key: it is preceded by whitespace, `{`, `,` or the start of input.
fn is_key_boundary(source: &str, at: usize) -> bool {
    source[..at]
        .chars()
        .next_back()
        .is_none_or(|c| c.is_whitespace() || c == '{' || c == ',')
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}
