use crate::error::{Result, ToolDocError};
use crate::resolver::DEFAULT_MAX_REFERENCE_DEPTH;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for one document conversion run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionConfig {
    /// Optional expected content hash of the source document (`sha256:<hex>`).
    #[serde(default)]
    pub source_hash: Option<String>,

    /// Hash policy: warn, fail, or ignore.
    #[serde(default)]
    pub source_hash_policy: HashPolicy,

    /// Which operations become tools.
    #[serde(default)]
    pub operations: OperationFilterConfig,

    /// Per-operation overrides, keyed by path then lowercase method.
    #[serde(default)]
    pub endpoints: HashMap<String, HashMap<String, EndpointConfig>>,

    /// What happens when a single operation fails to convert.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Input bounds enforced before conversion starts.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Emit a provenance map alongside the output document.
    #[serde(default)]
    pub source_map: bool,
}

/// Hash verification policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log warning if hash doesn't match.
    #[default]
    Warn,
    /// Fail the run if hash doesn't match.
    Fail,
    /// Ignore hash verification.
    Ignore,
}

/// Per-operation failure handling.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Skip the failing operation, record it, keep converting the rest.
    #[default]
    Isolate,
    /// Fail the whole run on the first operation error.
    Abort,
}

/// Operation selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OperationFilterConfig {
    /// Simple boolean: true = convert all, false = only operations with an explicit endpoint config.
    Enabled(bool),
    /// Include/exclude glob patterns matched against `"METHOD /path"`.
    Detailed {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

impl Default for OperationFilterConfig {
    fn default() -> Self {
        OperationFilterConfig::Enabled(true)
    }
}

impl OperationFilterConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            OperationFilterConfig::Enabled(b) => *b,
            OperationFilterConfig::Detailed { .. } => true,
        }
    }

    #[must_use]
    pub fn include_patterns(&self) -> &[String] {
        match self {
            OperationFilterConfig::Enabled(_) => &[],
            OperationFilterConfig::Detailed { include, .. } => include,
        }
    }

    #[must_use]
    pub fn exclude_patterns(&self) -> &[String] {
        match self {
            OperationFilterConfig::Enabled(_) => &[],
            OperationFilterConfig::Detailed { exclude, .. } => exclude,
        }
    }
}

/// Override for a specific operation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Tool name to emit instead of the operationId / synthesized name.
    #[serde(default)]
    pub tool: Option<String>,

    /// Override description.
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Longest chain of schema references followed while converting one node.
    #[serde(default = "default_max_reference_depth")]
    pub max_reference_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input_bytes(),
            max_depth: default_max_depth(),
            max_reference_depth: default_max_reference_depth(),
        }
    }
}

fn default_max_input_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_max_depth() -> usize {
    256
}

fn default_max_reference_depth() -> usize {
    DEFAULT_MAX_REFERENCE_DEPTH
}

impl ConversionConfig {
    /// Parse a configuration from YAML (or JSON) text and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not parse or the configuration is invalid.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot reject on its own.
    ///
    /// # Errors
    ///
    /// Returns [`ToolDocError::Config`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if let Some(hash) = &self.source_hash {
            let digest = hash.strip_prefix("sha256:").ok_or_else(|| {
                ToolDocError::Config(format!("sourceHash must start with 'sha256:' (got '{hash}')"))
            })?;
            if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ToolDocError::Config(
                    "sourceHash must be 'sha256:' followed by 64 hex digits".to_string(),
                ));
            }
        }
        if self.limits.max_input_bytes == 0 {
            return Err(ToolDocError::Config(
                "limits.maxInputBytes must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_depth == 0 {
            return Err(ToolDocError::Config(
                "limits.maxDepth must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_reference_depth == 0 {
            return Err(ToolDocError::Config(
                "limits.maxReferenceDepth must be greater than zero".to_string(),
            ));
        }
        for (path, methods) in &self.endpoints {
            if let Some(method) = methods.keys().find(|m| !is_http_method(m)) {
                return Err(ToolDocError::Config(format!(
                    "endpoints.{path}: unknown HTTP method '{method}'"
                )));
            }
        }
        Ok(())
    }

    /// Look up the endpoint override for an operation.
    #[must_use]
    pub fn endpoint(&self, path: &str, method: &str) -> Option<&EndpointConfig> {
        self.endpoints.get(path).and_then(|methods| methods.get(method))
    }
}

fn is_http_method(method: &str) -> bool {
    matches!(
        method,
        "get" | "put" | "post" | "delete" | "options" | "head" | "patch" | "trace"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: ConversionConfig = serde_yaml::from_str("{}").unwrap();
        assert!(cfg.operations.is_enabled());
        assert_eq!(cfg.failure_policy, FailurePolicy::Isolate);
        assert_eq!(cfg.source_hash_policy, HashPolicy::Warn);
        assert_eq!(cfg.limits, LimitsConfig::default());
        assert!(!cfg.source_map);
    }

    #[test]
    fn parses_detailed_filters_and_overrides() {
        let cfg: ConversionConfig = serde_yaml::from_str(
            r#"
failurePolicy: abort
operations:
  include: ["GET *"]
  exclude: ["GET /internal/*"]
endpoints:
  /items/{id}:
    get:
      tool: fetchItem
      description: Fetch one item
limits:
  maxDepth: 32
  maxReferenceDepth: 8
"#,
        )
        .unwrap();
        assert_eq!(cfg.failure_policy, FailurePolicy::Abort);
        assert_eq!(cfg.operations.include_patterns(), ["GET *".to_string()]);
        assert_eq!(
            cfg.operations.exclude_patterns(),
            ["GET /internal/*".to_string()]
        );
        let ep = cfg.endpoint("/items/{id}", "get").unwrap();
        assert_eq!(ep.tool.as_deref(), Some("fetchItem"));
        assert_eq!(cfg.limits.max_depth, 32);
        assert_eq!(cfg.limits.max_reference_depth, 8);
        assert_eq!(cfg.limits.max_input_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn boolean_operation_filter() {
        let cfg: ConversionConfig = serde_yaml::from_str("operations: false").unwrap();
        assert!(!cfg.operations.is_enabled());
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let err = ConversionConfig::from_yaml_str("sourceHash: md5:abc").unwrap_err();
        assert!(matches!(err, ToolDocError::Config(_)));

        let err = ConversionConfig::from_yaml_str("limits: { maxDepth: 0 }").unwrap_err();
        assert!(err.to_string().contains("maxDepth"));

        let err = ConversionConfig::from_yaml_str("limits: { maxReferenceDepth: 0 }").unwrap_err();
        assert!(err.to_string().contains("maxReferenceDepth"));

        let err = ConversionConfig::from_yaml_str(
            "endpoints:\n  /a:\n    GET:\n      tool: x\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("GET"));

        let hash = format!("sha256:{}", "ab".repeat(32));
        let cfg = ConversionConfig::from_yaml_str(&format!("sourceHash: '{hash}'")).unwrap();
        assert_eq!(cfg.source_hash.as_deref(), Some(hash.as_str()));
    }

    #[test]
    fn malformed_yaml_is_a_yaml_error() {
        let err = ConversionConfig::from_yaml_str("failurePolicy: [").unwrap_err();
        assert!(matches!(err, ToolDocError::Yaml(_)));
    }
}
