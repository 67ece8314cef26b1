//! Intake gate: decides whether a message gets a reply, and when.
//!
//! The decision is a [`ReplyStrategy`] picked per actor by a
//! [`RoleLookup`]. Ordinary actors go through [`DefaultStrategy`], which
//! drops short messages with a configured probability and delays replies
//! by a scope-dependent random interval. Privileged actors go through
//! [`PrivilegedStrategy`]: always accepted, replied to almost at once.

use cadence_config::{DelayConfig, GateConfig, RangeConfig};
use cadence_core::channel::InboundMessage;
use cadence_core::thread::ScopeKind;
use rand::{Rng, RngCore};
use std::collections::HashSet;
use std::time::Duration;

/// Outcome of the gate for one message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    Accept { delay: Duration },
    Skip,
}

impl GateDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept { .. })
    }

    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Accept { delay } => Some(*delay),
            Self::Skip => None,
        }
    }
}

/// Which strategy an actor gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Default,
    Privileged,
}

pub trait ReplyStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn decide(&self, message: &InboundMessage, rng: &mut dyn RngCore) -> GateDecision;
}

/// Uniform draw from `[min, max]`.
pub fn draw_delay(range: &RangeConfig, rng: &mut dyn RngCore) -> Duration {
    if range.max_secs <= range.min_secs {
        return range.min();
    }
    Duration::from_secs_f64(rng.random_range(range.min_secs..=range.max_secs))
}

/// Short means too few words, or no question in it.
pub fn is_short(text: &str, min_words: usize, markers: &[String]) -> bool {
    let words = text.split_whitespace().count();
    words < min_words || !markers.iter().any(|m| text.contains(m.as_str()))
}

pub struct DefaultStrategy {
    skip_short_prob: f64,
    min_words: usize,
    markers: Vec<String>,
    group: RangeConfig,
    direct: RangeConfig,
}

impl DefaultStrategy {
    pub fn new(gate: &GateConfig, delays: &DelayConfig) -> Self {
        Self {
            skip_short_prob: gate.skip_short_prob,
            min_words: gate.min_words,
            markers: gate.interrogative_markers.clone(),
            group: delays.group,
            direct: delays.direct,
        }
    }
}

impl ReplyStrategy for DefaultStrategy {
    fn name(&self) -> &'static str {
        "default"
    }

    fn decide(&self, message: &InboundMessage, rng: &mut dyn RngCore) -> GateDecision {
        if is_short(&message.text, self.min_words, &self.markers)
            && rng.random::<f64>() < self.skip_short_prob
        {
            return GateDecision::Skip;
        }
        let range = match message.chat.kind {
            ScopeKind::Group => &self.group,
            ScopeKind::Direct => &self.direct,
        };
        GateDecision::Accept {
            delay: draw_delay(range, rng),
        }
    }
}

pub struct PrivilegedStrategy {
    range: RangeConfig,
}

impl PrivilegedStrategy {
    pub fn new(range: RangeConfig) -> Self {
        Self { range }
    }
}

impl ReplyStrategy for PrivilegedStrategy {
    fn name(&self) -> &'static str {
        "privileged"
    }

    fn decide(&self, _message: &InboundMessage, rng: &mut dyn RngCore) -> GateDecision {
        GateDecision::Accept {
            delay: draw_delay(&self.range, rng),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleLookup {
    privileged: HashSet<String>,
}

impl RoleLookup {
    pub fn new<I, S>(privileged: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            privileged: privileged.into_iter().map(Into::into).collect(),
        }
    }

    pub fn role(&self, actor_id: &str) -> ActorRole {
        if self.privileged.contains(actor_id) {
            ActorRole::Privileged
        } else {
            ActorRole::Default
        }
    }
}

pub struct IntakeGate {
    lookup: RoleLookup,
    default: Box<dyn ReplyStrategy>,
    privileged: Box<dyn ReplyStrategy>,
    followup: RangeConfig,
    followup_prob: f64,
}

impl IntakeGate {
    pub fn new(gate: &GateConfig, delays: &DelayConfig) -> Self {
        Self {
            lookup: RoleLookup::new(gate.privileged_actors.iter().cloned()),
            default: Box::new(DefaultStrategy::new(gate, delays)),
            privileged: Box::new(PrivilegedStrategy::new(delays.privileged)),
            followup: delays.followup,
            followup_prob: delays.followup_prob,
        }
    }

    pub fn role(&self, actor_id: &str) -> ActorRole {
        self.lookup.role(actor_id)
    }

    pub fn strategy_for(&self, actor_id: &str) -> &dyn ReplyStrategy {
        match self.lookup.role(actor_id) {
            ActorRole::Privileged => self.privileged.as_ref(),
            ActorRole::Default => self.default.as_ref(),
        }
    }

    pub fn decide(&self, message: &InboundMessage, rng: &mut dyn RngCore) -> GateDecision {
        self.strategy_for(&message.actor_id).decide(message, rng)
    }

    /// Roll for a follow-up after a fired reply; `Some(delay)` on success.
    pub fn followup_delay(&self, rng: &mut dyn RngCore) -> Option<Duration> {
        (rng.random::<f64>() < self.followup_prob).then(|| draw_delay(&self.followup, rng))
    }
}
