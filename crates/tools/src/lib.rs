//! Built-in tools for Cadence.
//!
//! Tools let the persona reach outside the conversation mid-reply:
//! look something up on the web, search the reference library, or
//! draw a digest from random library fragments.

pub mod index_search;
pub mod resonance_digest;
pub mod web_lookup;

#[cfg(test)]
mod test_support;

use cadence_core::index::TextIndex;
use cadence_core::provider::Provider;
use cadence_core::tool::ToolRegistry;
use std::sync::Arc;

pub use index_search::IndexSearchTool;
pub use resonance_digest::ResonanceDigestTool;
pub use web_lookup::WebLookupTool;

/// Build the registry from whatever collaborators are available.
///
/// - `index_search` needs the index
/// - `web_lookup` needs a search backend
/// - `resonance_digest` needs both
pub fn default_registry(
    index: Option<Arc<dyn TextIndex>>,
    search_backend: Option<Arc<dyn Provider>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    if let Some(index) = &index {
        registry.register(Arc::new(IndexSearchTool::new(index.clone())));
    }
    if let Some(backend) = &search_backend {
        registry.register(Arc::new(WebLookupTool::new(backend.clone())));
    }
    if let (Some(index), Some(backend)) = (index, search_backend) {
        registry.register(Arc::new(ResonanceDigestTool::new(index, backend)));
    }
    registry
}
