//! Per-actor fixed-window rate limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Allows `max_messages` per actor in each `interval`-long window.
pub struct RateLimiter {
    max_messages: u32,
    interval: Duration,
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new(max_messages: u32, interval: Duration) -> Self {
        Self {
            max_messages,
            interval,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one message for `actor_id`. Returns `true` if it is allowed.
    pub fn check(&self, actor_id: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if windows.len() > 10_000 {
            windows.retain(|_, (start, _)| now.duration_since(*start) < self.interval);
        }

        let (start, count) = windows.entry(actor_id.to_string()).or_insert((now, 0));
        if now.duration_since(*start) >= self.interval {
            *start = now;
            *count = 0;
        }
        if *count >= self.max_messages {
            return false;
        }
        *count += 1;
        true
    }
}
