use crate::merge::merge_documents;
use crate::schema::MergedConfig;
use crate::source::ConfigSource;
use askr_core::{AskrError, AskrResult};
use serde_yaml::Value;
use tracing::{debug, info};

/// Merge `sources` left to right into one untyped document.
pub fn merge_sources(sources: &[ConfigSource]) -> AskrResult<Value> {
    if sources.is_empty() {
        return Err(AskrError::Config("No configuration sources given".into()));
    }
    let documents = sources
        .iter()
        .map(ConfigSource::load)
        .collect::<AskrResult<Vec<_>>>()?;
    Ok(merge_documents(documents))
}

/// Compose ordered configuration sources into the effective configuration.
///
/// Later sources override scalars and sequences of earlier ones; mappings
/// merge key by key. A server name present in several sources is an
/// override, not a conflict.
pub fn compose(sources: &[ConfigSource]) -> AskrResult<MergedConfig> {
    let merged = merge_sources(sources)?;
    let config = MergedConfig::from_value(merged)?;
    debug!(
        sources = sources.len(),
        servers = config.servers.len(),
        "configuration composed"
    );
    info!(
        agent = %config.agent.name,
        provider = %config.llm.provider,
        model = %config.llm.model,
        "configuration ready"
    );
    Ok(config)
}
