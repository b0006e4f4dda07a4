//! Conversion run: source text in, output document and diagnostics out.
//!
//! [`convert_document`] never panics and never returns an error. Any failing step ends the run
//! with `success = false`, no document, and the error message in [`Diagnostics::error`].

use crate::config::{ConversionConfig, HashPolicy};
use crate::diagnostics::{Diagnostics, Step};
use crate::document::{OutputDocument, assemble, convert_schemas};
use crate::error::{Result, ToolDocError};
use crate::normalize::normalize_document;
use crate::resolver::{ConversionContext, SchemaRegistry};
use crate::source_map::SourceMap;
use crate::tools::map_operations;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Instant;

/// Document family detected from the `swagger` / `openapi` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceVersion {
    Swagger2,
    OpenApi30,
    OpenApi31,
    Unknown,
}

impl SourceVersion {
    #[must_use]
    pub fn detect(document: &Value) -> Self {
        if let Some(v) = document.get("swagger").and_then(version_text)
            && v.starts_with("2.")
        {
            return SourceVersion::Swagger2;
        }
        match document.get("openapi").and_then(version_text) {
            Some(v) if v.starts_with("3.0") => SourceVersion::OpenApi30,
            Some(v) if v.starts_with("3.1") => SourceVersion::OpenApi31,
            _ => SourceVersion::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceVersion::Swagger2 => "2.0",
            SourceVersion::OpenApi30 => "3.0",
            SourceVersion::OpenApi31 => "3.1",
            SourceVersion::Unknown => "unknown",
        }
    }
}

/// `openapi: 3.0` is a YAML float when unquoted.
fn version_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Outcome of one [`convert_document`] call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRun {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<OutputDocument>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_map: Option<SourceMap>,
    pub diagnostics: Diagnostics,
}

impl ConversionRun {
    /// The output document, or the run's error.
    ///
    /// # Errors
    ///
    /// Returns [`ToolDocError::RunFailed`] carrying the recorded message if the run failed.
    pub fn into_document(self) -> Result<OutputDocument> {
        match self.document {
            Some(doc) => Ok(doc),
            None => Err(ToolDocError::RunFailed(
                self.diagnostics
                    .error
                    .unwrap_or_else(|| "conversion failed".to_string()),
            )),
        }
    }
}

/// Convert source text (YAML or JSON) into the output document.
#[must_use]
pub fn convert_document(source: &str, config: &ConversionConfig) -> ConversionRun {
    let started = Instant::now();
    let mut diagnostics = Diagnostics::default();

    let result = run(source, config, &mut diagnostics);
    diagnostics.total_ms = elapsed_ms(started);

    match result {
        Ok((document, source_map)) => {
            tracing::info!(
                tools = document.tools.len(),
                schemas = document.schemas.len(),
                warnings = diagnostics.warnings.len(),
                failures = diagnostics.failures.len(),
                total_ms = diagnostics.total_ms,
                "conversion finished"
            );
            ConversionRun {
                success: true,
                document: Some(document),
                source_map,
                diagnostics,
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "conversion failed");
            diagnostics.error = Some(e.to_string());
            ConversionRun {
                success: false,
                document: None,
                source_map: None,
                diagnostics,
            }
        }
    }
}

/// Read a source document from disk and convert it.
///
/// # Errors
///
/// Returns an error only if the file cannot be read; conversion failures are reported in the
/// returned run.
pub fn convert_file(path: &Path, config: &ConversionConfig) -> Result<ConversionRun> {
    tracing::info!("Loading API document from {}", path.display());
    let source = std::fs::read_to_string(path)?;
    Ok(convert_document(&source, config))
}

/// Convert an already decoded document tree. No size, hash or depth checks are applied.
///
/// # Errors
///
/// Returns an error if an operation fails under the abort policy.
pub fn convert_tree(
    document: &Value,
    config: &ConversionConfig,
    diagnostics: &mut Diagnostics,
) -> Result<OutputDocument> {
    let version = step(diagnostics, "version", |d| {
        let version = SourceVersion::detect(document);
        if version == SourceVersion::Unknown {
            d.warn("", "no recognizable 'swagger' or 'openapi' version marker");
        }
        d.source_version = Some(version.as_str().to_string());
        Ok(version)
    })?;
    tracing::debug!(version = version.as_str(), "detected document version");

    let normalized = step(diagnostics, "normalize", |d| {
        let normalized = normalize_document(document);
        d.warnings.extend(normalized.warnings.iter().cloned());
        Ok(normalized.document)
    })?;

    let registry = step(diagnostics, "registry", |_| {
        Ok(SchemaRegistry::from_document(&normalized))
    })?;
    tracing::debug!(schemas = registry.len(), "schema registry built");

    let mut ctx = ConversionContext::new(&registry)
        .with_max_reference_depth(config.limits.max_reference_depth);
    let tools = step(diagnostics, "tools", |d| {
        map_operations(&normalized, &mut ctx, config, d)
    })?;
    let schemas = step(diagnostics, "schemas", |d| Ok(convert_schemas(&mut ctx, d)))?;

    step(diagnostics, "assemble", |_| {
        Ok(assemble(&normalized, tools, schemas))
    })
}

fn run(
    source: &str,
    config: &ConversionConfig,
    diagnostics: &mut Diagnostics,
) -> Result<(OutputDocument, Option<SourceMap>)> {
    step(diagnostics, "config", |_| config.validate())?;

    step(diagnostics, "limits", |_| {
        let limit = config.limits.max_input_bytes;
        if source.len() > limit {
            return Err(ToolDocError::InputTooLarge {
                size: source.len(),
                limit,
            });
        }
        Ok(())
    })?;

    step(diagnostics, "hash", |d| verify_hash(source, config, d))?;

    let document = step(diagnostics, "parse", |_| parse_source(source))?;

    step(diagnostics, "depth", |_| {
        let limit = config.limits.max_depth;
        if exceeds_depth(&document, limit) {
            return Err(ToolDocError::InputTooDeep { limit });
        }
        Ok(())
    })?;

    let output = convert_tree(&document, config, diagnostics)?;

    let source_map = if config.source_map {
        Some(step(diagnostics, "sourceMap", |_| {
            Ok(SourceMap::build(source, &output.tools))
        })?)
    } else {
        None
    };

    Ok((output, source_map))
}

/// Run one named step, recording its duration when it succeeds.
fn step<T>(
    diagnostics: &mut Diagnostics,
    name: &'static str,
    f: impl FnOnce(&mut Diagnostics) -> Result<T>,
) -> Result<T> {
    let started = Instant::now();
    let out = f(diagnostics)?;
    let elapsed_ms = elapsed_ms(started);
    tracing::debug!(step = name, elapsed_ms, "step finished");
    diagnostics.steps.push(Step { name, elapsed_ms });
    Ok(out)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// `sha256:<hex>` of the source text.
#[must_use]
pub fn source_hash(source: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(source.as_bytes())))
}

fn verify_hash(source: &str, config: &ConversionConfig, diagnostics: &mut Diagnostics) -> Result<()> {
    let actual_hash = source_hash(source);
    diagnostics.source_hash = Some(actual_hash.clone());

    let Some(expected_hash) = &config.source_hash else {
        return Ok(());
    };
    if actual_hash.eq_ignore_ascii_case(expected_hash) {
        return Ok(());
    }
    match config.source_hash_policy {
        HashPolicy::Fail => Err(ToolDocError::HashMismatch {
            expected: expected_hash.clone(),
            actual: actual_hash,
        }),
        HashPolicy::Warn => {
            diagnostics.warn(
                "",
                format!("Source hash mismatch. Expected: {expected_hash}, Got: {actual_hash}"),
            );
            Ok(())
        }
        HashPolicy::Ignore => Ok(()),
    }
}

/// Decode YAML or JSON (JSON is a valid subset of YAML, so `serde_yaml` alone is enough).
fn parse_source(source: &str) -> Result<Value> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(source).map_err(|e| ToolDocError::Parse {
            location: "input".to_string(),
            source: e,
        })?;
    Ok(yaml_to_json(yaml))
}

/// YAML allows non-string mapping keys (`200:` response codes); they become strings here.
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Yaml;

    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map_or(Value::Null, Value::Number)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        Yaml::Mapping(mapping) => {
            let mut map = Map::with_capacity(mapping.len());
            for (k, v) in mapping {
                map.insert(yaml_key(k), yaml_to_json(v));
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Null => "null".to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => match yaml_to_json(other) {
            Value::String(s) => s,
            v => v.to_string(),
        },
    }
}

fn exceeds_depth(value: &Value, limit: usize) -> bool {
    let mut stack: Vec<(&Value, usize)> = vec![(value, 1)];
    while let Some((v, depth)) = stack.pop() {
        let children: Box<dyn Iterator<Item = &Value>> = match v {
            Value::Object(map) => Box::new(map.values()),
            Value::Array(items) => Box::new(items.iter()),
            _ => continue,
        };
        if depth > limit {
            return true;
        }
        stack.extend(children.map(|c| (c, depth + 1)));
    }
    false
}
