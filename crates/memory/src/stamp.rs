//! Per-thread monotonic timestamps for chronicle appends.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Tracks the last `created_at` written for each thread.
#[derive(Debug, Default)]
pub struct Stamper {
    last: HashMap<String, DateTime<Utc>>,
}

impl Stamper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, thread: &str) -> Option<DateTime<Utc>> {
        self.last.get(thread).copied()
    }

    /// Seed a thread's last stamp (e.g. from persisted rows).
    pub fn observe(&mut self, thread: &str, at: DateTime<Utc>) {
        let entry = self.last.entry(thread.to_string()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }

    /// Choose the stored time for an event submitted at `origin`.
    ///
    /// An event older than the thread's last append is a late arrival and
    /// gets its acceptance time instead, never earlier than that last stamp.
    pub fn stamp(&mut self, thread: &str, origin: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let stamped = match self.last(thread) {
            Some(last) if origin < last => now.max(last),
            _ => origin,
        };
        self.last.insert(thread.to_string(), stamped);
        stamped
    }
}
