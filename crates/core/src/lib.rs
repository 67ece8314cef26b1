//! # Cadence Core
//!
//! Domain types, traits, and error definitions for the Cadence conversational
//! runtime. This crate has **zero framework dependencies**: it defines the
//! domain model that all other crates implement against.
//!
//! ## Design
//!
//! Every external seam is a trait here: model backends ([`Provider`]), tools
//! ([`Tool`]), transports ([`Outbound`], [`Channel`]), the full-text index
//! ([`TextIndex`]), the chronicle ([`ChronicleStore`]) and the exchange journal
//! ([`Journal`]). Implementations live in their respective crates, and tests
//! swap in mocks.

pub mod channel;
pub mod chronicle;
pub mod error;
pub mod event;
pub mod index;
pub mod message;
pub mod provider;
pub mod thread;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use channel::{Channel, InboundMessage, Outbound, OutboundPayload, ReplyAnchor};
pub use chronicle::{
    ChronicleEvent, ChronicleStore, Direction, HistoryRecord, Journal, JournalEntry,
};
pub use error::{ChannelError, Error, ProviderError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use index::{ReindexReport, SearchHit, TextIndex};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use thread::{ChatScope, ScopeKind, ThreadKey};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
