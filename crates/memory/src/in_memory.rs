//! In-memory chronicle: useful for testing and ephemeral sessions.

use crate::stamp::Stamper;
use async_trait::async_trait;
use cadence_core::chronicle::{ChronicleEvent, ChronicleStore, HistoryRecord};
use cadence_core::error::StoreError;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    events: Vec<ChronicleEvent>,
    messages: Vec<HistoryRecord>,
    stamper: Stamper,
}

/// A chronicle that keeps everything in a Vec.
#[derive(Clone, Default)]
pub struct InMemoryChronicle {
    state: Arc<RwLock<State>>,
}

impl InMemoryChronicle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Every event appended so far, in append order.
    pub async fn events(&self) -> Vec<ChronicleEvent> {
        self.state.read().await.events.clone()
    }
}

#[async_trait]
impl ChronicleStore for InMemoryChronicle {
    async fn append(&self, mut event: ChronicleEvent) -> Result<ChronicleEvent, StoreError> {
        let mut state = self.state.write().await;
        event.created_at = state
            .stamper
            .stamp(&event.thread, event.created_at, Utc::now());
        state.events.push(event.clone());
        Ok(event)
    }

    async fn query(
        &self,
        tags: &BTreeSet<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChronicleEvent>, StoreError> {
        let state = self.state.read().await;
        let mut hits: Vec<ChronicleEvent> = state
            .events
            .iter()
            .filter(|e| e.created_at >= start && e.created_at <= end && e.matches_tags(tags))
            .cloned()
            .collect();
        // Stable: equal stamps keep append order.
        hits.sort_by_key(|e| e.created_at);
        Ok(hits)
    }

    async fn record_message(&self, record: HistoryRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let duplicate = state
            .messages
            .iter()
            .any(|m| m.chat_id == record.chat_id && m.message_id == record.message_id);
        if !duplicate {
            state.messages.push(record);
        }
        Ok(())
    }

    async fn window_around(
        &self,
        anchor_message_id: &str,
        chat_id: &str,
        radius: usize,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        let state = self.state.read().await;
        let chat: Vec<&HistoryRecord> = state.messages.iter().filter(|m| m.chat_id == chat_id).collect();
        let Some(pos) = chat.iter().position(|m| m.message_id == anchor_message_id) else {
            return Ok(Vec::new());
        };

        let first = pos.saturating_sub(radius);
        let mut window: Vec<HistoryRecord> = chat[first..=pos].iter().map(|m| (*m).clone()).collect();
        window.extend(
            chat[pos + 1..]
                .iter()
                .filter(|m| m.recorded_at <= end)
                .take(radius)
                .map(|m| (*m).clone()),
        );
        Ok(window)
    }

    async fn message_time(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .find(|m| m.chat_id == chat_id && m.message_id == message_id)
            .map(|m| m.recorded_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::chronicle::Direction;
    use chrono::Duration;

    fn record(id: usize, at: DateTime<Utc>) -> HistoryRecord {
        HistoryRecord {
            chat_id: "chat".into(),
            message_id: id.to_string(),
            actor_id: "u1".into(),
            actor_name: None,
            direction: Direction::Inbound,
            text: format!("m{id}"),
            recorded_at: at,
        }
    }

    #[tokio::test]
    async fn appends_are_monotonic_per_thread() {
        let chronicle = InMemoryChronicle::new();
        let t0 = Utc::now();
        chronicle
            .append(ChronicleEvent::new("t", "u", "a", "x").at(t0))
            .await
            .unwrap();
        chronicle
            .append(ChronicleEvent::new("t", "u", "b", "y").at(t0 - Duration::minutes(1)))
            .await
            .unwrap();

        let events = chronicle.events().await;
        assert!(events.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn query_filters_tags_and_range() {
        let chronicle = InMemoryChronicle::new();
        let t0 = Utc::now() - Duration::hours(1);
        chronicle
            .append(ChronicleEvent::new("t1", "u", "a", "x").tagged(["cli"]).at(t0))
            .await
            .unwrap();
        chronicle
            .append(ChronicleEvent::new("t2", "u", "b", "y").tagged(["telegram"]).at(t0))
            .await
            .unwrap();

        let cli: BTreeSet<String> = ["cli".to_string()].into();
        let hits = chronicle
            .query(&cli, t0 - Duration::seconds(1), t0 + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].thread, "t1");
        assert_eq!(chronicle.event_count().await, 2);
    }

    #[tokio::test]
    async fn window_matches_sqlite_semantics() {
        let chronicle = InMemoryChronicle::new();
        let t0 = Utc::now() - Duration::hours(1);
        for i in 0..10 {
            chronicle
                .record_message(record(i, t0 + Duration::minutes(i as i64)))
                .await
                .unwrap();
        }

        let window = chronicle
            .window_around("5", "chat", 2, t0 + Duration::minutes(6))
            .await
            .unwrap();
        let ids: Vec<_> = window.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "4", "5", "6"]);

        assert!(chronicle
            .window_around("99", "chat", 2, Utc::now())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            chronicle.message_time("chat", "2").await.unwrap(),
            Some(t0 + Duration::minutes(2))
        );
    }
}
