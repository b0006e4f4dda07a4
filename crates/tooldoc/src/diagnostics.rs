//! Diagnostic trace collected during a conversion run.

use serde::Serialize;

/// A non-fatal problem found while converting. `location` is a JSON pointer into the source
/// document when one is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub location: String,
    pub message: String,
}

impl Warning {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// An operation that was left out of the output because it failed to convert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
    pub method: String,
    pub path: String,
    pub message: String,
}

/// One completed processing step and how long it took.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: &'static str,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub steps: Vec<Step>,
    pub warnings: Vec<Warning>,
    pub failures: Vec<OperationFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_ms: f64,
}

impl Diagnostics {
    pub fn warn(&mut self, location: impl Into<String>, message: impl Into<String>) {
        let warning = Warning::new(location, message);
        tracing::warn!(
            location = %warning.location,
            warning = %warning.message,
            "conversion warning"
        );
        self.warnings.push(warning);
    }
}

/// Escape one JSON pointer reference token (RFC 6901).
#[must_use]
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Unescape one JSON pointer reference token (RFC 6901).
#[must_use]
pub fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Build a JSON pointer from raw (unescaped) tokens.
#[must_use]
pub fn pointer_from_tokens<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for t in tokens {
        out.push('/');
        out.push_str(&escape_pointer_token(t.as_ref()));
    }
    out
}
