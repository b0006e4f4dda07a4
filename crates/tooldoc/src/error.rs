//! Error types for `unrelated-tooldoc`.

use thiserror::Error;

/// Main error type for document conversion.
#[derive(Error, Debug)]
pub enum ToolDocError {
    /// Configuration errors (invalid config, conflicting options).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The source document exceeds the configured byte limit.
    #[error("Input too large: {size} bytes (limit {limit})")]
    InputTooLarge { size: usize, limit: usize },

    /// The decoded document nests deeper than the configured limit.
    #[error("Input too deep: nesting exceeds {limit} levels")]
    InputTooDeep { limit: usize },

    #[error("Source hash mismatch. Expected: {expected}, Got: {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Failed to parse API document from '{location}': {source}")]
    Parse {
        location: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A reference id is absent from the schema registry.
    #[error("Unresolvable reference: {reference}")]
    UnresolvableReference { reference: String },

    /// Reference resolution nests deeper than the configured limit.
    #[error("Reference too deep: resolving '{reference}' exceeds {limit} nested references")]
    ReferenceTooDeep { reference: String, limit: usize },

    /// A conversion run ended without a document; carries the run's recorded error.
    #[error("{0}")]
    RunFailed(String),

    /// An operation failed to convert while the abort policy is active.
    #[error("Failed to convert {method} {path}: {message}")]
    OperationFailed {
        method: String,
        path: String,
        message: String,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML errors.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ToolDocError {
    pub(crate) fn unresolvable(reference: impl Into<String>) -> Self {
        ToolDocError::UnresolvableReference {
            reference: reference.into(),
        }
    }
}

/// Result type alias for conversion operations.
pub type Result<T> = std::result::Result<T, ToolDocError>;
