//! Builds the backend pair (and the optional search backend) from configuration.

use crate::fallback::{Backend, BackendPair};
use crate::openai_compat::OpenAiCompatProvider;
use cadence_config::{BackendConfig, BackendsConfig};
use cadence_core::error::ProviderError;
use std::sync::Arc;

/// Turn one backend section into a callable [`Backend`].
pub fn backend_from_config(config: &BackendConfig) -> Result<Backend, ProviderError> {
    let provider = OpenAiCompatProvider::new(
        &config.name,
        &config.api_url,
        config.api_key.clone().unwrap_or_default(),
    )?;
    Ok(Backend::new(Arc::new(provider), &config.model)
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens)
        .with_timeout(config.timeout()))
}

/// Build the primary/secondary pair.
pub fn build_from_config(config: &BackendsConfig) -> Result<BackendPair, ProviderError> {
    if config.primary.api_key.is_none() {
        tracing::warn!(backend = %config.primary.name, "Primary backend has no API key");
    }
    let mut pair = BackendPair::new(backend_from_config(&config.primary)?);
    if let Some(secondary) = &config.secondary {
        pair = pair.with_secondary(backend_from_config(secondary)?);
    }
    Ok(pair)
}

/// The search-capable backend used for web lookups, if configured.
pub fn search_backend(config: &BackendsConfig) -> Result<Option<BackendPair>, ProviderError> {
    config
        .search
        .as_ref()
        .map(|c| backend_from_config(c).map(BackendPair::new))
        .transpose()
}
