//! Web lookup tool: delegates the query to a search-capable model backend.
//!
//! The backend is any [`Provider`]; in practice a `BackendPair` built from
//! the `[backends.search]` config section.

use async_trait::async_trait;
use cadence_core::error::ToolError;
use cadence_core::message::Message;
use cadence_core::provider::{Provider, ProviderRequest};
use cadence_core::tool::{Tool, ToolCall, ToolResult};
use std::sync::Arc;
use tracing::debug;

const LOOKUP_INSTRUCTIONS: &str = "You are a research assistant. Answer the query with concise, \
factual findings. Mention sources by name when you know them. If you are unsure, say so.";

pub struct WebLookupTool {
    backend: Arc<dyn Provider>,
}

impl WebLookupTool {
    pub fn new(backend: Arc<dyn Provider>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for WebLookupTool {
    fn name(&self) -> &str {
        "web_lookup"
    }

    fn description(&self) -> &str {
        "Look something up on the web. Returns a short summary of what was found."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let query = call.arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        debug!(backend = %self.backend.name(), query, "Web lookup");
        let request = ProviderRequest::new(vec![
            Message::system(LOOKUP_INSTRUCTIONS),
            Message::user(query),
        ]);
        let response = self
            .backend
            .complete(request)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        Ok(ToolResult::ok(&call.id, response.message.content.trim()))
    }
}
