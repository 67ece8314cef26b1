//! Chronicle and journal: what was said, and what was answered.
//!
//! The [`ChronicleStore`] is the append-only event log used for contextual
//! recall. It also keeps the raw per-chat message history that reply
//! windows are cut from. The [`Journal`] is the write-only durable record of
//! successfully answered exchanges.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const TAG_REPLY: &str = "reply";
pub const TAG_SKIPPED: &str = "skipped";
pub const TAG_FOLLOWUP: &str = "followup";

/// An immutable chronicle record of one gated exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChronicleEvent {
    /// Thread key (rendered) the exchange belongs to.
    pub thread: String,
    pub actor_id: String,
    pub tags: BTreeSet<String>,
    pub prompt: String,
    /// Empty for skipped messages.
    pub reply: String,
    pub created_at: DateTime<Utc>,
}

impl ChronicleEvent {
    pub fn new(
        thread: impl Into<String>,
        actor_id: impl Into<String>,
        prompt: impl Into<String>,
        reply: impl Into<String>,
    ) -> Self {
        Self {
            thread: thread.into(),
            actor_id: actor_id.into(),
            tags: BTreeSet::new(),
            prompt: prompt.into(),
            reply: reply.into(),
            created_at: Utc::now(),
        }
    }

    pub fn tagged<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Tag filter used by range queries. An empty filter matches everything.
    pub fn matches_tags(&self, filter: &BTreeSet<String>) -> bool {
        filter.is_empty() || !self.tags.is_disjoint(filter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// One raw message in a chat's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub chat_id: String,
    pub message_id: String,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_name: Option<String>,
    pub direction: Direction,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Render as a transcript line: `name: text`.
    pub fn transcript_line(&self) -> String {
        let who = self.actor_name.as_deref().unwrap_or(&self.actor_id);
        format!("{}: {}", who, self.text)
    }
}

#[async_trait]
pub trait ChronicleStore: Send + Sync {
    /// Append an event. Returns the event as stored, which may carry a
    /// later `created_at` than submitted: appends within one thread never
    /// go backwards in time.
    async fn append(&self, event: ChronicleEvent) -> Result<ChronicleEvent, StoreError>;

    /// Events with `created_at` in `[start, end]` whose tags intersect
    /// `tags`, oldest first.
    async fn query(
        &self,
        tags: &BTreeSet<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChronicleEvent>, StoreError>;

    /// Record a raw history message for later windowing.
    async fn record_message(&self, record: HistoryRecord) -> Result<(), StoreError>;

    /// A contiguous slice of a chat's history around `anchor_message_id`:
    /// up to `radius` messages before it, the anchor, and up to `radius`
    /// messages after it no later than `end`. Unknown anchors yield nothing.
    async fn window_around(
        &self,
        anchor_message_id: &str,
        chat_id: &str,
        radius: usize,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, StoreError>;

    /// When a recorded message was recorded, if known.
    async fn message_time(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// One successfully answered exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub actor_id: String,
    pub thread: String,
    pub prompt: String,
    pub reply: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable, write-only log of answered exchanges.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn record(&self, entry: JournalEntry) -> Result<(), StoreError>;
}
