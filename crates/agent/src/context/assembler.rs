//! Context assembly for one exchange.
//!
//! [`ContextAssembler::assemble`] queries the chronicle, the full-text index
//! and the artifact calendar concurrently. A source that fails or times out
//! leaves its field empty and logs a warning; assembly itself never fails.
//!
//! [`ContextBundle::render`] then lays the bundle out as labelled sections
//! appended to the system prompt, followed by as much recent history as the
//! budget allows and the current user message.
//!
//! # Determinism
//!
//! Rendering is deterministic: identical bundles always produce identical
//! prompts.

use crate::calendar::{Artifact, DailyArtifactScheduler};
use crate::context::token;
use crate::links::LinkExcerpt;
use crate::threads::ThreadState;
use cadence_config::ContextConfig;
use cadence_core::channel::InboundMessage;
use cadence_core::chronicle::{ChronicleEvent, ChronicleStore, HistoryRecord};
use cadence_core::error::StoreError;
use cadence_core::index::{SearchHit, TextIndex};
use cadence_core::message::{Message, Role};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

// ── Types ─────────────────────────────────────────────────────────────────

/// Everything gathered for one exchange, before rendering.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    /// Recent turns of the thread, oldest first.
    pub recent_history: Vec<Message>,
    /// Chronicle events within the reply window around the anchor.
    pub window_events: Vec<ChronicleEvent>,
    /// Messages surrounding the replied-to message.
    pub anchor_history: Vec<HistoryRecord>,
    /// Index hits for the inbound text, best first.
    pub search_hits: Vec<SearchHit>,
    pub daily_artifact: Option<Artifact>,
    pub link_excerpts: Vec<LinkExcerpt>,
}

/// A rendered prompt, ready for the invoker.
#[derive(Debug, Clone)]
pub struct PromptContext {
    /// System message first, then history, then the user message.
    pub messages: Vec<Message>,
    pub metadata: AssemblyMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub total_tokens: usize,
    pub budget: usize,
    /// Budget utilization percentage (0.0–100.0).
    pub utilization_pct: f32,
    pub per_layer: Vec<LayerStats>,
    pub drops: Vec<DropInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerStats {
    pub name: String,
    pub tokens: usize,
    pub items_included: usize,
    pub items_total: usize,
}

/// Items dropped from a layer during budget enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropInfo {
    pub layer: String,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
    pub reason: String,
}

/// Which end of a section survives when the budget runs out.
#[derive(Clone, Copy)]
enum Keep {
    /// Ranked items: the first ones win.
    Leading,
    /// Chronological items: the newest win.
    Trailing,
}

struct Section {
    text: String,
    stats: LayerStats,
    drop: Option<DropInfo>,
}

// ── Rendering ─────────────────────────────────────────────────────────────

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.recent_history.is_empty()
            && self.window_events.is_empty()
            && self.anchor_history.is_empty()
            && self.search_hits.is_empty()
            && self.daily_artifact.is_none()
            && self.link_excerpts.is_empty()
    }

    /// Render into prompt messages under `budget` tokens.
    ///
    /// The system prompt and the user message are always included, even if
    /// they alone exceed the budget. Sections are filled in the order they
    /// appear, then history takes whatever is left.
    pub fn render(&self, system_prompt: &str, user_text: &str, budget: usize) -> PromptContext {
        let mut stats = Vec::new();
        let mut drops = Vec::new();

        let system_tokens = token::estimate_tokens(system_prompt);
        let user_tokens = token::estimate_tokens(user_text) + 4;
        stats.push(single_layer("system", system_tokens));
        let mut remaining = budget.saturating_sub(system_tokens + user_tokens);

        let mut sections = Vec::new();
        let mut take = |section: Section, remaining: &mut usize| {
            *remaining = remaining.saturating_sub(section.stats.tokens);
            if !section.text.is_empty() {
                sections.push(section.text);
            }
            stats.push(section.stats);
            if let Some(d) = section.drop {
                drops.push(d);
            }
        };

        let chapter = self.render_chapter(remaining / 2);
        take(chapter, &mut remaining);

        let reference: Vec<String> = self
            .search_hits
            .iter()
            .map(|hit| format!("({} #{}) {}\n", hit.path, hit.chunk_index, hit.content.trim()))
            .collect();
        take(
            fill_section("reference", "[Reference]\n", &reference, remaining, Keep::Leading),
            &mut remaining,
        );

        let window: Vec<String> = self.window_events.iter().map(event_line).collect();
        take(
            fill_section("reply_window", "[Reply window]\n", &window, remaining, Keep::Trailing),
            &mut remaining,
        );

        let around: Vec<String> = self
            .anchor_history
            .iter()
            .map(|record| format!("{}\n", record.transcript_line()))
            .collect();
        take(
            fill_section(
                "anchor_history",
                "[Around the replied message]\n",
                &around,
                remaining,
                Keep::Trailing,
            ),
            &mut remaining,
        );

        let excerpts: Vec<String> = self
            .link_excerpts
            .iter()
            .map(|l| format!("{}\n{}\n", l.url, l.excerpt))
            .collect();
        take(
            fill_section("link_excerpts", "[Link excerpts]\n", &excerpts, remaining, Keep::Leading),
            &mut remaining,
        );

        let (history, history_stats, history_drop) = self.render_history(remaining);
        stats.push(history_stats);
        drops.extend(history_drop);
        stats.push(single_layer("user_message", user_tokens));

        let system = if sections.is_empty() {
            system_prompt.to_string()
        } else {
            format!("{}\n\n{}", system_prompt, sections.join("\n"))
        };
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(history);
        messages.push(Message::user(user_text));

        let total_tokens: usize = stats.iter().map(|s| s.tokens).sum();
        let utilization_pct = if budget == 0 {
            100.0
        } else {
            (total_tokens as f32 / budget as f32) * 100.0
        };

        PromptContext {
            messages,
            metadata: AssemblyMetadata {
                total_tokens,
                budget,
                utilization_pct,
                per_layer: stats,
                drops,
            },
        }
    }

    fn render_chapter(&self, budget: usize) -> Section {
        let layer = "chapter";
        let Some(artifact) = &self.daily_artifact else {
            return empty_section(layer, 0);
        };

        let header = "[Today's chapter]\n";
        let header_tokens = token::estimate_tokens(header);
        let body = artifact.content.trim();
        let body_tokens = token::estimate_tokens(body);
        if header_tokens >= budget {
            return Section {
                drop: maybe_drop(layer, 1, body_tokens, "No budget available for the chapter"),
                ..empty_section(layer, 1)
            };
        }

        let kept = token::truncate_to_tokens(body, budget - header_tokens);
        let kept_tokens = token::estimate_tokens(kept);
        let drop = (kept.len() < body.len()).then(|| DropInfo {
            layer: layer.into(),
            items_dropped: 0,
            tokens_dropped: body_tokens - kept_tokens,
            reason: "Chapter truncated".into(),
        });
        Section {
            text: format!("{header}{kept}\n"),
            stats: LayerStats {
                name: layer.into(),
                tokens: header_tokens + kept_tokens,
                items_included: 1,
                items_total: 1,
            },
            drop,
        }
    }

    fn render_history(&self, budget: usize) -> (Vec<Message>, LayerStats, Option<DropInfo>) {
        let layer = "conversation_history";
        let mut used = 0;
        let mut included = Vec::new();
        let mut dropped = 0;
        let mut dropped_tokens = 0;

        // Newest first, so the oldest turns are the ones dropped.
        for msg in self.recent_history.iter().rev() {
            if msg.role == Role::System {
                continue;
            }
            let msg_tokens = token::estimate_message_tokens(msg);
            if dropped == 0 && used + msg_tokens <= budget {
                included.push(msg.clone());
                used += msg_tokens;
            } else {
                dropped += 1;
                dropped_tokens += msg_tokens;
            }
        }
        included.reverse();

        let stats = LayerStats {
            name: layer.into(),
            tokens: used,
            items_included: included.len(),
            items_total: self.recent_history.len(),
        };
        (
            included,
            stats,
            maybe_drop(layer, dropped, dropped_tokens, "Oldest turns dropped"),
        )
    }
}

fn event_line(event: &ChronicleEvent) -> String {
    let at = event.created_at.format("%Y-%m-%d %H:%M");
    if event.reply.is_empty() {
        format!("{at} {}: {}\n", event.actor_id, event.prompt)
    } else {
        format!("{at} {}: {} / reply: {}\n", event.actor_id, event.prompt, event.reply)
    }
}

/// Fill one section from `items` under `budget`, keeping display order.
fn fill_section(layer: &str, header: &str, items: &[String], budget: usize, keep: Keep) -> Section {
    if items.is_empty() {
        return empty_section(layer, 0);
    }

    let header_tokens = token::estimate_tokens(header);
    let all_tokens = || items.iter().map(|i| token::estimate_tokens(i)).sum::<usize>();
    if header_tokens >= budget {
        return Section {
            drop: maybe_drop(layer, items.len(), all_tokens(), "No budget available"),
            ..empty_section(layer, items.len())
        };
    }

    let order: Vec<usize> = match keep {
        Keep::Leading => (0..items.len()).collect(),
        Keep::Trailing => (0..items.len()).rev().collect(),
    };
    let mut used = header_tokens;
    let mut kept = vec![false; items.len()];
    let mut dropped = 0;
    let mut dropped_tokens = 0;
    for idx in order {
        let item_tokens = token::estimate_tokens(&items[idx]);
        // Once one item misses, everything behind it goes too: no gaps.
        if dropped == 0 && used + item_tokens <= budget {
            kept[idx] = true;
            used += item_tokens;
        } else {
            dropped += 1;
            dropped_tokens += item_tokens;
        }
    }

    let included = kept.iter().filter(|k| **k).count();
    if included == 0 {
        return Section {
            drop: maybe_drop(layer, dropped, dropped_tokens, "No item fits"),
            ..empty_section(layer, items.len())
        };
    }

    let mut text = String::from(header);
    for (item, _) in items.iter().zip(&kept).filter(|(_, k)| **k) {
        text.push_str(item);
    }
    let reason = match keep {
        Keep::Leading => "Lowest-ranked items dropped",
        Keep::Trailing => "Oldest items dropped",
    };
    Section {
        text,
        stats: LayerStats {
            name: layer.into(),
            tokens: used,
            items_included: included,
            items_total: items.len(),
        },
        drop: maybe_drop(layer, dropped, dropped_tokens, reason),
    }
}

fn single_layer(name: &str, tokens: usize) -> LayerStats {
    LayerStats {
        name: name.into(),
        tokens,
        items_included: 1,
        items_total: 1,
    }
}

fn empty_section(layer: &str, total: usize) -> Section {
    Section {
        text: String::new(),
        stats: LayerStats {
            name: layer.into(),
            tokens: 0,
            items_included: 0,
            items_total: total,
        },
        drop: None,
    }
}

fn maybe_drop(layer: &str, count: usize, tokens: usize, reason: &str) -> Option<DropInfo> {
    (count > 0).then(|| DropInfo {
        layer: layer.into(),
        items_dropped: count,
        tokens_dropped: tokens,
        reason: reason.into(),
    })
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// Gathers a [`ContextBundle`] from the configured sources.
pub struct ContextAssembler {
    chronicle: Arc<dyn ChronicleStore>,
    index: Option<Arc<dyn TextIndex>>,
    calendar: Option<Arc<DailyArtifactScheduler>>,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(chronicle: Arc<dyn ChronicleStore>, config: ContextConfig) -> Self {
        Self {
            chronicle,
            index: None,
            calendar: None,
            config,
        }
    }

    pub fn with_index(mut self, index: Arc<dyn TextIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_calendar(mut self, calendar: Arc<DailyArtifactScheduler>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn token_budget(&self) -> usize {
        self.config.token_budget
    }

    /// Gather context for `message`. Link excerpts are fetched beforehand
    /// and passed in as-is.
    pub async fn assemble(
        &self,
        message: &InboundMessage,
        thread: &ThreadState,
        link_excerpts: Vec<LinkExcerpt>,
    ) -> ContextBundle {
        let today = message.timestamp.date_naive();
        let (window_events, anchor_history, search_hits, daily_artifact) = tokio::join!(
            self.guarded("reply_window", self.reply_window_events(message)),
            self.guarded("anchor_history", self.anchor_history(message)),
            self.guarded("index", self.search(&message.text)),
            self.guarded("calendar", self.todays_artifact(today)),
        );

        debug!(
            thread = %thread.key,
            window = window_events.len(),
            around = anchor_history.len(),
            hits = search_hits.len(),
            chapter = daily_artifact.is_some(),
            "Context assembled"
        );

        ContextBundle {
            recent_history: thread.recent(self.config.history_turns),
            window_events,
            anchor_history,
            search_hits,
            daily_artifact,
            link_excerpts,
        }
    }

    /// Bound one source by the source timeout; failures degrade to empty.
    async fn guarded<T, E>(&self, source: &'static str, fut: impl Future<Output = Result<T, E>>) -> T
    where
        T: Default,
        E: Display,
    {
        match tokio::time::timeout(self.config.source_timeout(), fut).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(source, error = %e, "Context source unavailable");
                T::default()
            }
            Err(_) => {
                warn!(
                    source,
                    timeout_ms = self.config.source_timeout().as_millis() as u64,
                    "Context source timed out"
                );
                T::default()
            }
        }
    }

    /// When the replied-to message was sent, if it can be known.
    async fn anchor_time(&self, message: &InboundMessage) -> Result<Option<DateTime<Utc>>, StoreError> {
        let Some(anchor) = &message.reply_to else {
            return Ok(None);
        };
        if let Some(at) = anchor.timestamp {
            return Ok(Some(at));
        }
        self.chronicle
            .message_time(&message.chat.id, &anchor.message_id)
            .await
    }

    async fn reply_window_events(
        &self,
        message: &InboundMessage,
    ) -> Result<Vec<ChronicleEvent>, StoreError> {
        let Some(at) = self.anchor_time(message).await? else {
            return Ok(Vec::new());
        };
        let radius = self.config.reply_window();
        self.chronicle
            .query(&BTreeSet::new(), at - radius, at + radius)
            .await
    }

    async fn anchor_history(&self, message: &InboundMessage) -> Result<Vec<HistoryRecord>, StoreError> {
        let Some(anchor) = &message.reply_to else {
            return Ok(Vec::new());
        };
        self.chronicle
            .window_around(
                &anchor.message_id,
                &message.chat.id,
                self.config.anchor_radius,
                message.timestamp,
            )
            .await
    }

    async fn search(&self, text: &str) -> Result<Vec<SearchHit>, StoreError> {
        match &self.index {
            Some(index) if !text.trim().is_empty() => index.search(text, self.config.search_top_k).await,
            _ => Ok(Vec::new()),
        }
    }

    async fn todays_artifact(
        &self,
        date: NaiveDate,
    ) -> Result<Option<Artifact>, crate::calendar::CalendarError> {
        match &self.calendar {
            Some(calendar) => calendar.load(date).await.map(Some),
            None => Ok(None),
        }
    }
}
