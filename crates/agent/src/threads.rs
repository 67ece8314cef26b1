//! Per-thread conversation state.
//!
//! Each [`ThreadKey`] owns a bounded window of recent turns and a
//! last-activity time. Threads appear on first use and are only ever
//! removed by [`ThreadStore::evict_idle`].

use cadence_core::message::Message;
use cadence_core::thread::ThreadKey;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ThreadState {
    pub key: ThreadKey,
    pub history: VecDeque<Message>,
    pub last_activity: Instant,
}

impl ThreadState {
    fn new(key: ThreadKey) -> Self {
        Self {
            key,
            history: VecDeque::new(),
            last_activity: Instant::now(),
        }
    }

    /// The most recent `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Message> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }
}

pub struct ThreadStore {
    max_messages: usize,
    threads: RwLock<HashMap<ThreadKey, ThreadState>>,
}

impl ThreadStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            threads: RwLock::new(HashMap::new()),
        }
    }

    /// A copy of the thread's state; an empty state if it has never been seen.
    pub async fn snapshot(&self, key: &ThreadKey) -> ThreadState {
        self.threads
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_else(|| ThreadState::new(key.clone()))
    }

    /// Mark activity without adding history.
    pub async fn touch(&self, key: &ThreadKey) {
        let mut threads = self.threads.write().await;
        threads
            .entry(key.clone())
            .or_insert_with(|| ThreadState::new(key.clone()))
            .last_activity = Instant::now();
    }

    /// Append messages, trimming the oldest beyond the bound.
    pub async fn push(&self, key: &ThreadKey, messages: impl IntoIterator<Item = Message>) {
        let mut threads = self.threads.write().await;
        let state = threads
            .entry(key.clone())
            .or_insert_with(|| ThreadState::new(key.clone()));
        state.history.extend(messages);
        while state.history.len() > self.max_messages {
            state.history.pop_front();
        }
        state.last_activity = Instant::now();
    }

    /// Drop threads idle for longer than `older_than`. Returns how many.
    pub async fn evict_idle(&self, older_than: Duration) -> usize {
        let now = Instant::now();
        let mut threads = self.threads.write().await;
        let before = threads.len();
        threads.retain(|_, state| now.duration_since(state.last_activity) <= older_than);
        let evicted = before - threads.len();
        if evicted > 0 {
            debug!(evicted, "Idle threads evicted");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.threads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.threads.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_thread_is_empty() {
        let store = ThreadStore::new(10);
        let state = store.snapshot(&ThreadKey::chat("c")).await;
        assert!(state.history.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn history_is_bounded_oldest_dropped() {
        let store = ThreadStore::new(4);
        let key = ThreadKey::chat_actor("c", "u");
        for i in 0..6 {
            store.push(&key, [Message::user(format!("m{i}"))]).await;
        }
        let state = store.snapshot(&key).await;
        let texts: Vec<_> = state.history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4", "m5"]);
        assert_eq!(state.recent(2).len(), 2);
        assert_eq!(state.recent(2)[1].content, "m5");
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let store = ThreadStore::new(10);
        store.push(&ThreadKey::chat("a"), [Message::user("x")]).await;
        store.push(&ThreadKey::chat("b"), [Message::user("y"), Message::assistant("z")]).await;
        assert_eq!(store.snapshot(&ThreadKey::chat("a")).await.history.len(), 1);
        assert_eq!(store.snapshot(&ThreadKey::chat("b")).await.history.len(), 2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_idle_threads() {
        let store = ThreadStore::new(10);
        store.touch(&ThreadKey::chat("stale")).await;
        tokio::time::sleep(Duration::from_secs(5 * 3600)).await;
        store.touch(&ThreadKey::chat("fresh")).await;

        assert_eq!(store.evict_idle(Duration::from_secs(3600)).await, 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.evict_idle(Duration::from_secs(3600)).await, 0);
    }
}
