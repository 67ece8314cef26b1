//! Index search tool: lets the model query the reference index itself.

use async_trait::async_trait;
use cadence_core::error::ToolError;
use cadence_core::index::TextIndex;
use cadence_core::tool::{Tool, ToolCall, ToolResult};
use std::sync::Arc;

const MAX_TOP_K: u64 = 10;

pub struct IndexSearchTool {
    index: Arc<dyn TextIndex>,
    default_top_k: usize,
}

impl IndexSearchTool {
    pub fn new(index: Arc<dyn TextIndex>) -> Self {
        Self {
            index,
            default_top_k: 3,
        }
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }
}

#[derive(serde::Serialize)]
struct Passage<'a> {
    source: &'a str,
    chunk: usize,
    text: &'a str,
}

#[async_trait]
impl Tool for IndexSearchTool {
    fn name(&self) -> &str {
        "index_search"
    }

    fn description(&self) -> &str {
        "Search the reference library for passages matching a query. Returns passages sorted by relevance."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keywords to look for"
                },
                "top_k": {
                    "type": "integer",
                    "description": "Maximum number of passages to return (default 3)",
                    "default": 3
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let query = call.arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let top_k = call.arguments["top_k"]
            .as_u64()
            .map(|k| k.clamp(1, MAX_TOP_K) as usize)
            .unwrap_or(self.default_top_k);

        let hits = self
            .index
            .search(query, top_k)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        if hits.is_empty() {
            return Ok(ToolResult::ok(&call.id, "No matching passages."));
        }

        let passages: Vec<Passage<'_>> = hits
            .iter()
            .map(|h| Passage {
                source: &h.path,
                chunk: h.chunk_index,
                text: &h.content,
            })
            .collect();
        let output = serde_json::to_string_pretty(&passages).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            }
        })?;
        Ok(ToolResult::ok(&call.id, output))
    }
}
