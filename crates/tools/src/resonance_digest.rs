//! Resonance digest: an impressionistic take on random library fragments.
//!
//! Samples a few chunks from the index, gathers passages related to the
//! first one, and asks a backend to weave them into a short digest.

use async_trait::async_trait;
use cadence_core::error::ToolError;
use cadence_core::index::{SearchHit, TextIndex};
use cadence_core::message::Message;
use cadence_core::provider::{Provider, ProviderRequest};
use cadence_core::tool::{Tool, ToolCall, ToolResult};
use std::sync::Arc;
use tracing::debug;

/// Words of the seed fragment used to look up related passages.
const SEED_WORDS: usize = 12;

pub struct ResonanceDigestTool {
    index: Arc<dyn TextIndex>,
    backend: Arc<dyn Provider>,
    fragments: usize,
    related: usize,
    digest_words: usize,
}

impl ResonanceDigestTool {
    pub fn new(index: Arc<dyn TextIndex>, backend: Arc<dyn Provider>) -> Self {
        Self {
            index,
            backend,
            fragments: 2,
            related: 3,
            digest_words: 150,
        }
    }

    pub fn with_digest_words(mut self, words: usize) -> Self {
        self.digest_words = words;
        self
    }

    fn instructions(&self) -> String {
        format!(
            "You write impressionistic digests. Given a found fragment and related material, \
             write about {} words of associative, poetic prose that weaves connections between \
             them. Reply in the fragment's language. Return only the digest.",
            self.digest_words
        )
    }

    fn failure(&self, reason: impl ToString) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.name().into(),
            reason: reason.to_string(),
        }
    }
}

fn seed_query(fragment: &str) -> String {
    fragment
        .split_whitespace()
        .take(SEED_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

fn compose(fragments: &[SearchHit], related: &[SearchHit]) -> String {
    let mut body = String::from("Fragments:\n");
    for f in fragments {
        body.push_str(&format!("- ({}) {}\n", f.path, f.content.trim()));
    }
    if !related.is_empty() {
        body.push_str("\nRelated material:\n");
        for r in related {
            body.push_str(&format!("- ({}) {}\n", r.path, r.content.trim()));
        }
    }
    body
}

#[async_trait]
impl Tool for ResonanceDigestTool {
    fn name(&self) -> &str {
        "resonance_digest"
    }

    fn description(&self) -> &str {
        "Draw random fragments from the library and return a short impressionistic digest of them."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let fragments = self
            .index
            .sample(self.fragments)
            .await
            .map_err(|e| self.failure(e))?;
        let Some(seed) = fragments.first() else {
            return Ok(ToolResult::failed(&call.id, "The library is empty."));
        };

        let related: Vec<SearchHit> = self
            .index
            .search(&seed_query(&seed.content), self.related + fragments.len())
            .await
            .map_err(|e| self.failure(e))?
            .into_iter()
            .filter(|hit| {
                !fragments
                    .iter()
                    .any(|f| f.path == hit.path && f.chunk_index == hit.chunk_index)
            })
            .take(self.related)
            .collect();

        debug!(fragments = fragments.len(), related = related.len(), "Composing digest");
        let request = ProviderRequest::new(vec![
            Message::system(self.instructions()),
            Message::user(compose(&fragments, &related)),
        ]);
        let response = self
            .backend
            .complete(request)
            .await
            .map_err(|e| self.failure(e))?;

        Ok(ToolResult::ok(&call.id, response.message.content.trim()))
    }
}
