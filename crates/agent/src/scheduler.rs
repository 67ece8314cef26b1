//! Per-thread pending sends with supersede semantics.
//!
//! Installing a [`PendingSend`] for a thread key atomically cancels the
//! previous one for that key. Each install gets a fresh generation number,
//! and only the current generation may [`DelayScheduler::commit`]. Every
//! wait on a pending send is raced against its cancellation token, so a
//! superseded send stops at whichever await it was parked on.

use cadence_core::thread::ThreadKey;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Slot {
    generation: u64,
    token: CancellationToken,
}

/// Handle to one scheduled send.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub key: ThreadKey,
    pub generation: u64,
    pub followup: bool,
    /// When the gate accepted the message; delays count from here.
    pub accepted_at: Instant,
    token: CancellationToken,
}

impl PendingSend {
    pub fn fire_at(&self, delay: Duration) -> Instant {
        self.accepted_at + delay
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run `fut` unless the send is superseded first.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Sleep until `deadline`. Returns `false` if superseded meanwhile.
    pub async fn sleep_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep_until(deadline) => true,
        }
    }
}

#[derive(Default)]
pub struct DelayScheduler {
    slots: Mutex<HashMap<ThreadKey, Slot>>,
    next_generation: AtomicU64,
}

impl DelayScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new pending send for `key`, cancelling any prior one.
    pub fn install(&self, key: &ThreadKey) -> PendingSend {
        self.install_slot(key, false)
    }

    /// Like [`install`](Self::install), for an unprompted follow-up.
    pub fn install_followup(&self, key: &ThreadKey) -> PendingSend {
        self.install_slot(key, true)
    }

    fn install_slot(&self, key: &ThreadKey, followup: bool) -> PendingSend {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prior) = slots.insert(
            key.clone(),
            Slot {
                generation,
                token: token.clone(),
            },
        ) {
            prior.token.cancel();
            debug!(thread = %key, superseded = prior.generation, generation, "Pending send superseded");
        }

        PendingSend {
            key: key.clone(),
            generation,
            followup,
            accepted_at: Instant::now(),
            token,
        }
    }

    /// Claim the right to send. Succeeds at most once, and only for the
    /// current generation of the key.
    pub fn commit(&self, pending: &PendingSend) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get(&pending.key) {
            Some(slot) if slot.generation == pending.generation && !slot.token.is_cancelled() => {
                slots.remove(&pending.key);
                true
            }
            _ => false,
        }
    }

    pub fn is_current(&self, pending: &PendingSend) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get(&pending.key)
            .is_some_and(|slot| slot.generation == pending.generation)
    }

    /// Cancel whatever is pending for `key`. Returns whether anything was.
    pub fn cancel(&self, key: &ThreadKey) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.remove(key) {
            Some(slot) => {
                slot.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Release a pending send that ended without firing.
    pub fn release(&self, pending: &PendingSend) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots
            .get(&pending.key)
            .is_some_and(|slot| slot.generation == pending.generation)
        {
            slots.remove(&pending.key);
        }
    }

    /// Cancel everything (shutdown).
    pub fn cancel_all(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for (_, slot) in slots.drain() {
            slot.token.cancel();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
