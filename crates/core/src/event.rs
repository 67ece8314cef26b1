//! Domain event system: decoupled diagnostics for the orchestration cycle.
//!
//! Events are published when a message is gated, a reply fires or is
//! superseded, a backend call fails, a tool runs, or the index is rebuilt.
//! Subscribers (the CLI's diagnostics, tests) react without coupling to
//! the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    Accepted,
    Skipped,
    Ignored,
    RateLimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    MessageGated {
        thread: String,
        actor_id: String,
        outcome: GateOutcome,
        delay_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    ReplyFired {
        thread: String,
        backend: String,
        followup: bool,
        timestamp: DateTime<Utc>,
    },

    /// A pending send was cancelled by newer activity on its thread.
    ReplySuperseded {
        thread: String,
        timestamp: DateTime<Utc>,
    },

    InvocationFailed {
        thread: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    Reindexed {
        updated: usize,
        unchanged: usize,
        removed: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
