//! Layered configuration for askr.
//!
//! Ordered YAML documents are deep-merged into one effective
//! [`MergedConfig`]: later documents override scalars, mappings merge
//! key-by-key and sequences are replaced wholesale. The model descriptor's
//! credential reference (`env:`, `file:`, literal) is resolved once, when
//! [`MergedConfig::model_descriptor`] materializes it.

/// Document composition entry point.
pub mod composer;
/// Deep merge of YAML value trees.
pub mod merge;
/// `provider:model` parsing and the materialized model descriptor.
pub mod provider;
/// Typed configuration schema.
pub mod schema;
/// Secret references and their resolution.
pub mod secret;
/// Document sources (files and in-memory documents).
pub mod source;

pub use composer::{compose, merge_sources};
pub use merge::{merge_documents, merge_values};
pub use provider::{ModelDescriptor, Provider};
pub use schema::{AgentConfig, LlmConfig, MergedConfig, ServerConfig, Transport, TransportKind};
pub use secret::SecretRef;
pub use source::ConfigSource;
