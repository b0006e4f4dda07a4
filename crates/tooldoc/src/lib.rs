//! OpenAPI/Swagger -> tool-description document conversion.
//!
//! Accepts Swagger 2.0, `OpenAPI` 3.0 and 3.1 documents (YAML or JSON). Each operation becomes a
//! tool descriptor with an object-shaped parameter schema; named schemas are converted into the
//! output schema registry with circular references emitted as `{"$ref": "#/schemas/<id>"}`.
//!
//! Entry point for most callers is [`runtime::convert_document`].
//!
//! It intentionally contains **no** network fetching and **no** result caching.

pub mod config;
pub mod diagnostics;
pub mod document;
pub mod error;
pub mod normalize;
pub mod resolver;
pub mod runtime;
pub mod schema;
pub mod source_map;
pub mod tools;
pub mod type_map;

pub use config::ConversionConfig;
pub use document::OutputDocument;
pub use error::{Result, ToolDocError};
pub use runtime::{ConversionRun, convert_document};
