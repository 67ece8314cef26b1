//! End-to-end exchange cycle: gate, supersede, context, invoke, fire.

use async_trait::async_trait;
use cadence_agent::{
    ContextAssembler, Disposition, ExchangeOutcome, ExchangeSettings, IntakeGate, ModelInvoker,
    Orchestrator, Persona, RateLimiter,
};
use cadence_config::{ContextConfig, DelayConfig, GateConfig, RangeConfig};
use cadence_core::channel::{InboundMessage, Outbound, OutboundPayload, ReplyAnchor};
use cadence_core::chronicle::{ChronicleEvent, ChronicleStore, Journal, JournalEntry};
use cadence_core::error::{ChannelError, ProviderError, StoreError};
use cadence_core::event::{DomainEvent, GateOutcome};
use cadence_core::message::{Message, Role};
use cadence_core::provider::{Provider, ProviderRequest, ProviderResponse};
use cadence_core::thread::ChatScope;
use cadence_core::tool::ToolRegistry;
use cadence_memory::InMemoryChronicle;
use cadence_providers::{Backend, BackendPair};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ── Mocks ─────────────────────────────────────────────────────────────────

/// Answers "reply to: <last user message>" and records every request.
struct EchoProvider {
    name: String,
    fail: bool,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl EchoProvider {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fail: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fail: true,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn system_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.messages[0].content.clone())
            .collect()
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.requests.lock().unwrap().push(request);
        if self.fail {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: "backend down".into(),
            });
        }
        Ok(ProviderResponse {
            message: Message::assistant(format!("reply to: {last_user}")),
            usage: None,
            model: "echo".into(),
        })
    }
}

#[derive(Default)]
struct RecordingOutbound {
    sent: Mutex<Vec<(ChatScope, OutboundPayload)>>,
}

impl RecordingOutbound {
    fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.text().to_string())
            .collect()
    }
}

/// Numbers sent messages "sent-1", "sent-2", ... the way a transport would.
#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(
        &self,
        chat: &ChatScope,
        payload: OutboundPayload,
    ) -> Result<Option<String>, ChannelError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat.clone(), payload));
        Ok(Some(format!("sent-{}", sent.len())))
    }
}

#[derive(Default)]
struct RecordingJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

#[async_trait]
impl Journal for RecordingJournal {
    async fn record(&self, entry: JournalEntry) -> Result<(), StoreError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────────────────

struct Harness {
    orchestrator: Arc<Orchestrator>,
    primary: Arc<EchoProvider>,
    outbound: Arc<RecordingOutbound>,
    journal: Arc<RecordingJournal>,
    chronicle: Arc<InMemoryChronicle>,
}

fn fixed(secs: f64) -> RangeConfig {
    RangeConfig::new(secs, secs)
}

fn delays(followup_prob: f64) -> DelayConfig {
    DelayConfig {
        group: fixed(30.0),
        direct: fixed(10.0),
        privileged: fixed(1.0),
        followup: fixed(900.0),
        followup_prob,
    }
}

fn gate(skip_short_prob: f64) -> GateConfig {
    GateConfig {
        skip_short_prob,
        ..GateConfig::default()
    }
}

struct Setup {
    gate: GateConfig,
    delays: DelayConfig,
    primary: Arc<EchoProvider>,
    secondary: Option<Arc<EchoProvider>>,
    rate_limit: Option<u32>,
    thread_idle: Duration,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            gate: gate(0.0),
            delays: delays(0.0),
            primary: EchoProvider::new("primary"),
            secondary: None,
            rate_limit: None,
            thread_idle: Duration::from_secs(6 * 3600),
        }
    }
}

fn harness(setup: Setup) -> Harness {
    let chronicle = Arc::new(InMemoryChronicle::new());
    let outbound = Arc::new(RecordingOutbound::default());
    let journal = Arc::new(RecordingJournal::default());

    let mut backends = BackendPair::new(Backend::new(setup.primary.clone(), "m1"));
    if let Some(secondary) = setup.secondary {
        backends = backends.with_secondary(Backend::new(secondary, "m2"));
    }
    let persona = Persona::new("Cadence", &["cadence".to_string()], Some("You are Cadence.".into()));
    let mut orchestrator = Orchestrator::new(
        persona,
        IntakeGate::new(&setup.gate, &setup.delays),
        ContextAssembler::new(chronicle.clone(), ContextConfig::default()),
        ModelInvoker::new(backends, ToolRegistry::new()),
        chronicle.clone(),
        outbound.clone(),
    )
    .with_journal(journal.clone())
    .with_settings(ExchangeSettings {
        channel_tag: Some("test".into()),
        thread_idle: setup.thread_idle,
        ..ExchangeSettings::default()
    })
    .with_rng_seed(42);
    if let Some(max) = setup.rate_limit {
        orchestrator = orchestrator.with_rate_limiter(RateLimiter::new(max, Duration::from_secs(60)));
    }

    Harness {
        orchestrator: Arc::new(orchestrator),
        primary: setup.primary,
        outbound,
        journal,
        chronicle,
    }
}

fn direct(id: &str, text: &str) -> InboundMessage {
    InboundMessage::new(id, ChatScope::direct("dm"), "alice", text).with_actor_name("Alice")
}

async fn outcome(disposition: Disposition) -> ExchangeOutcome {
    match disposition {
        Disposition::Scheduled(handle) => handle.await.unwrap(),
        other => panic!("expected a scheduled exchange, got {other:?}"),
    }
}

fn tagged(tag: &str) -> BTreeSet<String> {
    [tag.to_string()].into_iter().collect()
}

async fn events_tagged(chronicle: &InMemoryChronicle, tag: &str) -> Vec<ChronicleEvent> {
    chronicle
        .query(
            &tagged(tag),
            Utc::now() - chrono::Duration::days(1),
            Utc::now() + chrono::Duration::days(1),
        )
        .await
        .unwrap()
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn accepted_message_fires_after_its_delay() {
    let h = harness(Setup::default());
    let started = tokio::time::Instant::now();

    let result = outcome(h.orchestrator.handle(direct("1", "what is the tide doing today?")).await).await;
    assert_eq!(
        result,
        ExchangeOutcome::Fired {
            backend: "primary".into()
        }
    );
    assert!(started.elapsed() >= Duration::from_secs(10));

    assert_eq!(h.outbound.texts(), vec!["reply to: what is the tide doing today?"]);
    let replies = events_tagged(&h.chronicle, "reply").await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].tags.contains("test"));
    assert_eq!(replies[0].reply, "reply to: what is the tide doing today?");

    let journal = h.journal.entries.lock().unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].actor_id, "alice");
}

#[tokio::test(start_paused = true)]
async fn burst_on_one_thread_produces_exactly_one_reply() {
    let h = harness(Setup::default());

    let mut dispositions = Vec::new();
    for (id, text) in [
        ("1", "first thought, what do you think?"),
        ("2", "second thought, still listening?"),
        ("3", "third and final question, ready?"),
    ] {
        dispositions.push(h.orchestrator.handle(direct(id, text)).await);
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let mut outcomes = Vec::new();
    for d in dispositions {
        outcomes.push(outcome(d).await);
    }
    assert_eq!(outcomes[0], ExchangeOutcome::Superseded);
    assert_eq!(outcomes[1], ExchangeOutcome::Superseded);
    assert!(matches!(outcomes[2], ExchangeOutcome::Fired { .. }));

    assert_eq!(h.outbound.texts(), vec!["reply to: third and final question, ready?"]);
    assert_eq!(h.journal.entries.lock().unwrap().len(), 1);
    assert_eq!(events_tagged(&h.chronicle, "reply").await.len(), 1);

    // The surviving exchange saw the superseded messages as history.
    let requests = h.primary.requests.lock().unwrap();
    let last = requests.last().unwrap();
    assert!(last.messages.iter().any(|m| m.content == "first thought, what do you think?"));
}

#[tokio::test(start_paused = true)]
async fn skipped_message_is_chronicled_but_not_journaled() {
    let h = harness(Setup {
        gate: gate(1.0),
        ..Setup::default()
    });

    let disposition = h.orchestrator.handle(direct("1", "ok")).await;
    assert!(matches!(disposition, Disposition::Skipped));

    let skipped = events_tagged(&h.chronicle, "skipped").await;
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].prompt, "ok");
    assert!(skipped[0].reply.is_empty());
    assert!(events_tagged(&h.chronicle, "reply").await.is_empty());
    assert!(h.journal.entries.lock().unwrap().is_empty());
    assert!(h.outbound.texts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn skipped_message_still_supersedes_a_pending_reply() {
    let h = harness(Setup {
        gate: gate(1.0),
        ..Setup::default()
    });
    let mut events = h.orchestrator.events().subscribe();

    let first = h.orchestrator.handle(direct("1", "could you tell me about the sea?")).await;
    let second = h.orchestrator.handle(direct("2", "ok")).await;
    assert!(matches!(second, Disposition::Skipped));
    assert_eq!(outcome(first).await, ExchangeOutcome::Superseded);

    assert!(h.outbound.texts().is_empty());
    assert!(h.journal.entries.lock().unwrap().is_empty());
    assert_eq!(h.orchestrator.scheduler().pending_count(), 0);

    let mut superseded = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event.as_ref(), DomainEvent::ReplySuperseded { .. }) {
            superseded += 1;
        }
    }
    assert_eq!(superseded, 1);
}

#[tokio::test(start_paused = true)]
async fn reply_to_the_personas_own_message_recovers_its_surroundings() {
    let h = harness(Setup::default());

    let first = outcome(h.orchestrator.handle(direct("1", "what is the tide doing today?")).await).await;
    assert!(matches!(first, ExchangeOutcome::Fired { .. }));

    // The persona's reply was recorded under the id the transport assigned.
    let around = h
        .chronicle
        .window_around("sent-1", "dm", 5, Utc::now())
        .await
        .unwrap();
    let ids: Vec<_> = around.iter().map(|r| r.message_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "sent-1"]);

    let answer = direct("2", "why do you say that about the tide?").replying_to(ReplyAnchor {
        message_id: "sent-1".into(),
        timestamp: None,
    });
    let second = outcome(h.orchestrator.handle(answer).await).await;
    assert!(matches!(second, ExchangeOutcome::Fired { .. }));

    let system = h.primary.system_prompts().pop().unwrap();
    let section = system.split("[Around the replied message]").nth(1).unwrap();
    assert!(section.contains("what is the tide doing today?"));
    assert!(section.contains("reply to: what is the tide doing today?"));
}

#[tokio::test(start_paused = true)]
async fn terminal_failure_sends_and_journals_nothing() {
    let h = harness(Setup {
        primary: EchoProvider::failing("primary"),
        ..Setup::default()
    });
    let mut events = h.orchestrator.events().subscribe();

    let result = outcome(h.orchestrator.handle(direct("1", "are you there at all?")).await).await;
    assert_eq!(result, ExchangeOutcome::Failed);
    assert!(h.outbound.texts().is_empty());
    assert!(h.journal.entries.lock().unwrap().is_empty());
    assert!(events_tagged(&h.chronicle, "reply").await.is_empty());
    assert_eq!(h.orchestrator.scheduler().pending_count(), 0);

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        saw_failure |= matches!(event.as_ref(), DomainEvent::InvocationFailed { .. });
    }
    assert!(saw_failure);
}

#[tokio::test(start_paused = true)]
async fn primary_failure_falls_back_to_secondary() {
    let secondary = EchoProvider::new("secondary");
    let h = harness(Setup {
        primary: EchoProvider::failing("primary"),
        secondary: Some(secondary.clone()),
        ..Setup::default()
    });

    let result = outcome(h.orchestrator.handle(direct("1", "is anyone listening?")).await).await;
    assert_eq!(
        result,
        ExchangeOutcome::Fired {
            backend: "secondary".into()
        }
    );
    assert_eq!(secondary.requests.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reply_window_follows_the_anchor_even_when_late() {
    let h = harness(Setup::default());
    let anchor_at = Utc::now() - chrono::Duration::hours(3);
    for (offset_min, prompt) in [(-30, "long before"), (-3, "near the anchor"), (2, "just after")] {
        h.chronicle
            .append(
                ChronicleEvent::new("history", "bob", prompt, "noted")
                    .at(anchor_at + chrono::Duration::minutes(offset_min)),
            )
            .await
            .unwrap();
    }
    h.chronicle
        .append(ChronicleEvent::new("history", "bob", "just now", "noted"))
        .await
        .unwrap();

    let message = InboundMessage::new("9", ChatScope::group("room"), "carol", "what did you mean then?")
        .replying_to(ReplyAnchor {
            message_id: "5".into(),
            timestamp: Some(anchor_at),
        });
    let result = outcome(h.orchestrator.handle(message).await).await;
    assert!(matches!(result, ExchangeOutcome::Fired { .. }));

    let system = h.primary.system_prompts().pop().unwrap();
    let window = system.split("[Reply window]").nth(1).unwrap();
    assert!(window.contains("near the anchor"));
    assert!(window.contains("just after"));
    assert!(!window.contains("long before"));
    assert!(!window.contains("just now"));
}

#[tokio::test(start_paused = true)]
async fn unaddressed_group_chatter_is_ignored() {
    let h = harness(Setup::default());

    let chatter = InboundMessage::new("1", ChatScope::group("room"), "bob", "anyone seen my keys?");
    assert!(matches!(h.orchestrator.handle(chatter).await, Disposition::Ignored));

    let addressed =
        InboundMessage::new("2", ChatScope::group("room"), "bob", "Cadence, have you seen my keys?");
    let result = outcome(h.orchestrator.handle(addressed).await).await;
    assert!(matches!(result, ExchangeOutcome::Fired { .. }));
    assert_eq!(h.outbound.texts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_actor_gets_a_notice() {
    let h = harness(Setup {
        rate_limit: Some(1),
        ..Setup::default()
    });

    let first = h.orchestrator.handle(direct("1", "what do you make of this?")).await;
    let second = h.orchestrator.handle(direct("2", "and what about that one?")).await;
    assert!(matches!(second, Disposition::RateLimited));
    assert_eq!(h.outbound.texts(), vec![cadence_agent::orchestrator::RATE_LIMIT_NOTICE]);
    assert!(matches!(outcome(first).await, ExchangeOutcome::Fired { .. }));
}

#[tokio::test(start_paused = true)]
async fn voice_mode_changes_the_payload() {
    let h = harness(Setup::default());

    let ack = h.orchestrator.handle(direct("1", "/voiceon")).await;
    assert!(matches!(ack, Disposition::Command));
    assert_eq!(h.outbound.texts(), vec!["Voice mode on."]);

    outcome(h.orchestrator.handle(direct("2", "will you read this aloud?")).await).await;
    let sent = h.outbound.sent.lock().unwrap();
    assert!(matches!(&sent[1].1, OutboundPayload::Voice(text) if text == "reply to: will you read this aloud?"));
}

#[tokio::test(start_paused = true)]
async fn secondary_command_answers_at_once_from_the_secondary() {
    let secondary = EchoProvider::new("secondary");
    let h = harness(Setup {
        secondary: Some(secondary.clone()),
        ..Setup::default()
    });
    let mut events = h.orchestrator.events().subscribe();
    let started = tokio::time::Instant::now();

    let ack = h.orchestrator.handle(direct("1", "/ds ok")).await;
    assert!(matches!(ack, Disposition::Command));

    loop {
        if let DomainEvent::ReplyFired { backend, .. } = events.recv().await.unwrap().as_ref() {
            assert_eq!(backend, "secondary");
            break;
        }
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(h.outbound.texts(), vec!["reply to: ok"]);
    assert!(h.primary.requests.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn commands_without_a_library_explain_themselves() {
    let h = harness(Setup::default());
    h.orchestrator.handle(direct("1", "/search tides")).await;
    h.orchestrator.handle(direct("2", "/search")).await;
    assert_eq!(
        h.outbound.texts(),
        vec!["No library is configured.", "Usage: /search <query>"]
    );
}

#[tokio::test(start_paused = true)]
async fn followup_fires_after_the_reply() {
    let h = harness(Setup {
        delays: delays(1.0),
        ..Setup::default()
    });
    let mut events = h.orchestrator.events().subscribe();

    outcome(h.orchestrator.handle(direct("1", "what are you reading lately?")).await).await;

    loop {
        if let DomainEvent::ReplyFired { followup: true, .. } = events.recv().await.unwrap().as_ref() {
            break;
        }
    }
    let texts = h.outbound.texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[1].contains("Send a short follow-up message"));
    assert_eq!(events_tagged(&h.chronicle, "followup").await.len(), 1);
    assert_eq!(h.journal.entries.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn new_activity_cancels_a_pending_followup() {
    let h = harness(Setup {
        delays: delays(1.0),
        gate: gate(1.0),
        ..Setup::default()
    });
    let mut events = h.orchestrator.events().subscribe();

    outcome(h.orchestrator.handle(direct("1", "what are you reading lately?")).await).await;
    assert_eq!(h.orchestrator.scheduler().pending_count(), 1);

    // A skipped message is still activity on the thread.
    assert!(matches!(h.orchestrator.handle(direct("2", "ok")).await, Disposition::Skipped));
    assert_eq!(h.orchestrator.scheduler().pending_count(), 0);

    let mut superseded = false;
    while let Ok(event) = events.try_recv() {
        superseded |= matches!(event.as_ref(), DomainEvent::ReplySuperseded { .. });
        if let DomainEvent::MessageGated { outcome, .. } = event.as_ref() {
            assert_ne!(*outcome, GateOutcome::RateLimited);
        }
    }
    assert!(superseded);
    assert_eq!(h.outbound.texts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_threads_are_swept_while_running() {
    let h = harness(Setup {
        thread_idle: Duration::from_secs(600),
        ..Setup::default()
    });
    let (tx, rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();
    let runner = tokio::spawn(h.orchestrator.clone().run(rx, shutdown.clone()));

    tx.send(Ok(direct("1", "what is the tide doing today?"))).await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.outbound.texts().len(), 1);
    assert_eq!(h.orchestrator.threads().len().await, 1);

    tokio::time::sleep(Duration::from_secs(1200)).await;
    assert!(h.orchestrator.threads().is_empty().await);

    shutdown.cancel();
    runner.await.unwrap();
}
