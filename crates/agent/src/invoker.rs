//! Model invoker: one reply from the backend pair, with a bounded tool loop.
//!
//! A response that requests tools has them executed in order and their
//! results resubmitted. After `max_tool_rounds` round trips one last call is
//! made with no tools on offer, so the caller always ends up with text.

use cadence_core::error::ProviderError;
use cadence_core::event::{DomainEvent, EventBus};
use cadence_core::message::Message;
use cadence_core::provider::ProviderRequest;
use cadence_core::tool::{ToolCall, ToolRegistry};
use cadence_providers::{BackendPair, Route};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 3;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("No backend available for this route: {0}")]
    NoBackend(String),

    #[error("All backends failed: {0}")]
    Exhausted(#[source] ProviderError),

    #[error("Invocation cancelled")]
    Cancelled,
}

impl From<ProviderError> for InvokeError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::NotConfigured(reason) => Self::NoBackend(reason),
            other => Self::Exhausted(other),
        }
    }
}

/// The final reply and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub text: String,
    pub backend: String,
    pub tool_rounds: usize,
}

pub struct ModelInvoker {
    backends: BackendPair,
    tools: ToolRegistry,
    max_tool_rounds: usize,
    events: Option<Arc<EventBus>>,
}

impl ModelInvoker {
    pub fn new(backends: BackendPair, tools: ToolRegistry) -> Self {
        Self {
            backends,
            tools,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            events: None,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn backends(&self) -> &BackendPair {
        &self.backends
    }

    pub async fn invoke(
        &self,
        mut messages: Vec<Message>,
        tools_enabled: bool,
        route: Route,
    ) -> Result<Invocation, InvokeError> {
        let definitions = if tools_enabled {
            self.tools.definitions()
        } else {
            Vec::new()
        };
        let mut rounds = 0;

        loop {
            let offer_tools = !definitions.is_empty() && rounds < self.max_tool_rounds;
            let request = if offer_tools {
                ProviderRequest::new(messages.clone()).with_tools(definitions.clone())
            } else {
                ProviderRequest::new(messages.clone())
            };

            let completion = self.backends.complete(request, route).await.map_err(|e| {
                error!(error = %e, ?route, "Model invocation failed");
                InvokeError::from(e)
            })?;
            let reply = completion.response.message;

            if !offer_tools || !reply.requests_tools() {
                let text = reply.content.trim().to_string();
                if text.is_empty() {
                    return Err(InvokeError::Exhausted(ProviderError::EmptyResponse(
                        completion.backend,
                    )));
                }
                return Ok(Invocation {
                    text,
                    backend: completion.backend,
                    tool_rounds: rounds,
                });
            }

            rounds += 1;
            debug!(
                round = rounds,
                calls = reply.tool_calls.len(),
                backend = %completion.backend,
                "Executing tool calls"
            );

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in &calls {
                let call = ToolCall::from_message_call(call);
                let started = std::time::Instant::now();
                let outcome = self.tools.execute(&call).await;
                let duration_ms = started.elapsed().as_millis() as u64;

                let (success, output) = match outcome {
                    Ok(result) => (result.success, result.output),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool execution failed");
                        (false, format!("Error: {e}"))
                    }
                };
                if let Some(events) = &self.events {
                    events.publish(DomainEvent::ToolExecuted {
                        tool_name: call.name.clone(),
                        success,
                        duration_ms,
                        timestamp: chrono::Utc::now(),
                    });
                }
                messages.push(Message::tool_result(&call.id, output));
            }

            if rounds == self.max_tool_rounds {
                warn!(rounds, "Tool round limit reached, requesting a final reply without tools");
            }
        }
    }
}
