//! The exchange cycle: inbound message to gated, delayed, chronicled reply.
//!
//! ```text
//! inbound ─► addressed? ─► rate limit ─┬─► command (answered at once)
//!                                      └─► gate ─┬─► skipped (chronicled)
//!                                                └─► pending: links, context, model, delay
//!                                                    ─► fired (sent, chronicled, journaled,
//!                                                       maybe a follow-up)
//! ```
//!
//! Each accepted message runs as its own task. Any newer gated message on
//! the same thread key supersedes the pending one wherever it is parked,
//! even when the gate then skips it.

use crate::commands::{Command, parse_command};
use crate::context::ContextAssembler;
use crate::gate::{ActorRole, GateDecision, IntakeGate};
use crate::invoker::{InvokeError, ModelInvoker};
use crate::links::{ExcerptFetcher, fetch_excerpts};
use crate::persona::Persona;
use crate::rate_limit::RateLimiter;
use crate::scheduler::{DelayScheduler, PendingSend};
use crate::split::{MAX_MESSAGE_CHARS, split_message};
use crate::threads::{ThreadState, ThreadStore};
use crate::voice::VoiceModes;
use cadence_config::AppConfig;
use cadence_core::channel::{InboundMessage, Outbound, OutboundPayload};
use cadence_core::chronicle::{
    ChronicleEvent, ChronicleStore, Direction, HistoryRecord, Journal, JournalEntry, TAG_FOLLOWUP,
    TAG_REPLY, TAG_SKIPPED,
};
use cadence_core::error::ChannelError;
use cadence_core::event::{DomainEvent, EventBus, GateOutcome};
use cadence_core::index::TextIndex;
use cadence_core::message::Message;
use cadence_core::thread::{ChatScope, ThreadKey};
use cadence_providers::Route;
use chrono::Utc;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

pub const FOLLOWUP_PROMPT: &str =
    "Send a short follow-up message referencing our earlier conversation.";
pub const RATE_LIMIT_NOTICE: &str = "Too many messages. Please slow down a little.";
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Knobs for the exchange cycle that are not owned by a component.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub per_actor_in_groups: bool,
    pub tools_enabled: bool,
    pub max_links: usize,
    pub excerpt_chars: usize,
    pub link_timeout: Duration,
    pub search_top_k: usize,
    /// Short-window history of a thread is dropped after this much silence.
    pub thread_idle: Duration,
    /// Extra tag on every chronicle event, usually the channel name.
    pub channel_tag: Option<String>,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            per_actor_in_groups: false,
            tools_enabled: true,
            max_links: 3,
            excerpt_chars: 500,
            link_timeout: Duration::from_secs(10),
            search_top_k: 5,
            thread_idle: Duration::from_secs(6 * 3600),
            channel_tag: None,
        }
    }
}

impl ExchangeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            per_actor_in_groups: config.gate.per_actor_in_groups,
            tools_enabled: config.invoker.tools_enabled,
            max_links: config.context.max_links,
            excerpt_chars: config.context.excerpt_chars,
            link_timeout: config.context.source_timeout(),
            search_top_k: config.context.search_top_k,
            thread_idle: config.context.thread_idle(),
            channel_tag: Some(config.channel.kind.clone()),
        }
    }
}

/// What happened to an inbound message at intake.
#[derive(Debug)]
pub enum Disposition {
    /// A slash command, answered at once.
    Command,
    /// A group message not addressed to the persona.
    Ignored,
    RateLimited,
    Skipped,
    /// Accepted; the handle resolves when the pending send ends.
    Scheduled(JoinHandle<ExchangeOutcome>),
}

/// How a pending send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Fired { backend: String },
    Superseded,
    Failed,
}

/// The reply being prepared, and what it answers.
struct Exchange {
    message: InboundMessage,
    key: ThreadKey,
    history: ThreadState,
    delay: Duration,
    route: Route,
}

/// The library the `/index` and `/search` commands operate on.
struct Library {
    index: Arc<dyn TextIndex>,
    source_dir: PathBuf,
    extension: String,
}

pub struct Orchestrator {
    persona: Persona,
    gate: IntakeGate,
    assembler: ContextAssembler,
    invoker: ModelInvoker,
    chronicle: Arc<dyn ChronicleStore>,
    outbound: Arc<dyn Outbound>,
    scheduler: DelayScheduler,
    threads: ThreadStore,
    voice: VoiceModes,
    journal: Option<Arc<dyn Journal>>,
    rate_limiter: Option<RateLimiter>,
    fetcher: Option<Arc<dyn ExcerptFetcher>>,
    library: Option<Library>,
    events: Arc<EventBus>,
    settings: ExchangeSettings,
    rng: Mutex<Pcg64>,
    tasks: TaskTracker,
    closing: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        persona: Persona,
        gate: IntakeGate,
        assembler: ContextAssembler,
        invoker: ModelInvoker,
        chronicle: Arc<dyn ChronicleStore>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            persona,
            gate,
            assembler,
            invoker,
            chronicle,
            outbound,
            scheduler: DelayScheduler::new(),
            threads: ThreadStore::new(100),
            voice: VoiceModes::ephemeral(),
            journal: None,
            rate_limiter: None,
            fetcher: None,
            library: None,
            events: Arc::new(EventBus::default()),
            settings: ExchangeSettings::default(),
            rng: Mutex::new(Pcg64::from_rng(&mut rand::rng())),
            tasks: TaskTracker::new(),
            closing: AtomicBool::new(false),
        }
    }

    pub fn with_settings(mut self, settings: ExchangeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_voice(mut self, voice: VoiceModes) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ExcerptFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_library(
        mut self,
        index: Arc<dyn TextIndex>,
        source_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
    ) -> Self {
        self.library = Some(Library {
            index,
            source_dir: source_dir.into(),
            extension: extension.into(),
        });
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_thread_capacity(mut self, max_messages: usize) -> Self {
        self.threads = ThreadStore::new(max_messages);
        self
    }

    /// Seed the gate's randomness, for reproducible runs.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(Pcg64::seed_from_u64(seed));
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    pub fn scheduler(&self) -> &DelayScheduler {
        &self.scheduler
    }

    /// Consume inbound messages until the channel closes or `shutdown`
    /// fires, then wait for in-flight exchanges.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<Result<InboundMessage, ChannelError>>,
        shutdown: CancellationToken,
    ) {
        info!(persona = %self.persona.name(), "Orchestrator started");
        let idle = self.settings.thread_idle.max(Duration::from_secs(1));
        let sweep_every = idle.min(IDLE_SWEEP_INTERVAL);
        let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + sweep_every, sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, cancelling pending sends");
                    self.scheduler.cancel_all();
                    break;
                }
                next = inbound.recv() => match next {
                    Some(Ok(message)) => {
                        let this = self.clone();
                        self.tasks.spawn(async move {
                            this.handle(message).await;
                        });
                    }
                    Some(Err(e)) => warn!(error = %e, "Inbound channel error"),
                    None => {
                        info!("Inbound channel closed, draining pending replies");
                        break;
                    }
                },
                _ = sweep.tick() => {
                    let evicted = self.threads.evict_idle(idle).await;
                    if evicted > 0 {
                        let remaining = self.threads.len().await;
                        info!(evicted, remaining, "Idle threads evicted");
                    }
                }
            }
        }

        self.closing.store(true, Ordering::SeqCst);
        self.tasks.close();
        self.tasks.wait().await;
        info!("Orchestrator stopped");
    }

    /// Take one inbound message through intake. Accepted messages continue
    /// in a spawned task.
    pub async fn handle(self: &Arc<Self>, message: InboundMessage) -> Disposition {
        self.record_history(
            &message.chat,
            &message.message_id,
            &message.actor_id,
            message.actor_name.clone(),
            Direction::Inbound,
            &message.text,
        )
        .await;

        let command = parse_command(&message.text);
        if command.is_none()
            && message.chat.is_group()
            && !(message.addressed || message.reply_to.is_some() || self.persona.is_addressed(&message.text))
        {
            debug!(chat = %message.chat.id, actor = %message.actor_id, "Group message not addressed");
            self.publish_gated(&message, None, GateOutcome::Ignored, None);
            return Disposition::Ignored;
        }

        if let Some(limiter) = &self.rate_limiter {
            if !limiter.check(&message.actor_id) {
                info!(actor = %message.actor_id, "Rate limited");
                self.publish_gated(&message, None, GateOutcome::RateLimited, None);
                self.deliver_text(&message.chat, &message.message_id, RATE_LIMIT_NOTICE)
                    .await;
                return Disposition::RateLimited;
            }
        }

        if let Some(command) = command {
            return self.handle_command(command, message).await;
        }

        let key = ThreadKey::for_message(&message.chat, &message.actor_id, self.settings.per_actor_in_groups);
        // Any newer message on the key restarts the gate, whatever it decides.
        if self.scheduler.cancel(&key) {
            debug!(thread = %key, "Pending send superseded by new activity");
            self.publish_superseded(&key);
        }

        let decision = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            self.gate.decide(&message, &mut *rng)
        };

        let history = self.threads.snapshot(&key).await;
        self.threads.push(&key, [Message::user(&message.text)]).await;

        match decision {
            GateDecision::Skip => {
                info!(thread = %key, actor = %message.actor_id, "Message skipped");
                self.publish_gated(&message, Some(&key), GateOutcome::Skipped, None);
                let event = ChronicleEvent::new(key.to_string(), &message.actor_id, &message.text, "")
                    .tagged(self.tags(TAG_SKIPPED))
                    .at(message.timestamp);
                self.append_event(event).await;
                Disposition::Skipped
            }
            GateDecision::Accept { delay } => {
                info!(
                    thread = %key,
                    actor = %message.actor_id,
                    strategy = self.gate.strategy_for(&message.actor_id).name(),
                    delay_ms = delay.as_millis() as u64,
                    "Message accepted"
                );
                self.publish_gated(&message, Some(&key), GateOutcome::Accepted, Some(delay));
                Disposition::Scheduled(self.schedule(Exchange {
                    message,
                    key,
                    history,
                    delay,
                    route: Route::Auto,
                }))
            }
        }
    }

    async fn handle_command(self: &Arc<Self>, command: Command, message: InboundMessage) -> Disposition {
        debug!(?command, chat = %message.chat.id, "Command received");
        let reply = match command {
            Command::Index => self.reindex_library().await,
            Command::Search(query) => self.search_library(&query).await,
            Command::VoiceOn => self.set_voice(&message.chat, true).await,
            Command::VoiceOff => self.set_voice(&message.chat, false).await,
            Command::Secondary(text) if text.trim().is_empty() => "Usage: /ds <message>".to_string(),
            Command::Secondary(text) => {
                let key = ThreadKey::for_message(
                    &message.chat,
                    &message.actor_id,
                    self.settings.per_actor_in_groups,
                );
                if self.scheduler.cancel(&key) {
                    self.publish_superseded(&key);
                }
                let history = self.threads.snapshot(&key).await;
                self.threads.push(&key, [Message::user(&text)]).await;
                let message = InboundMessage {
                    text,
                    ..message
                };
                self.schedule(Exchange {
                    message,
                    key,
                    history,
                    delay: Duration::ZERO,
                    route: Route::Secondary,
                });
                return Disposition::Command;
            }
        };
        self.deliver_text(&message.chat, &message.message_id, &reply).await;
        Disposition::Command
    }

    async fn set_voice(&self, chat: &ChatScope, on: bool) -> String {
        let state = if on { "on" } else { "off" };
        match self.voice.set(&chat.id, on).await {
            Ok(()) => format!("Voice mode {state}."),
            Err(e) => {
                warn!(error = %e, "Voice state not saved");
                format!("Voice mode {state} for this session only.")
            }
        }
    }

    async fn reindex_library(&self) -> String {
        let Some(library) = &self.library else {
            return "No library is configured.".into();
        };
        let sources = match cadence_memory::list_sources(&library.source_dir, &library.extension) {
            Ok(sources) => sources,
            Err(e) => return format!("Reindex failed: {e}"),
        };
        match library.index.reindex(&sources, true).await {
            Ok(report) => {
                info!(
                    updated = report.updated.len(),
                    unchanged = report.unchanged.len(),
                    removed = report.removed.len(),
                    failed = report.failed.len(),
                    "Library reindexed"
                );
                self.events.publish(DomainEvent::Reindexed {
                    updated: report.updated.len(),
                    unchanged: report.unchanged.len(),
                    removed: report.removed.len(),
                    failed: report.failed.len(),
                    timestamp: Utc::now(),
                });
                format!(
                    "Reindexed: {} updated, {} unchanged, {} removed, {} failed.",
                    report.updated.len(),
                    report.unchanged.len(),
                    report.removed.len(),
                    report.failed.len()
                )
            }
            Err(e) => {
                error!(error = %e, "Reindex failed");
                format!("Reindex failed: {e}")
            }
        }
    }

    async fn search_library(&self, query: &str) -> String {
        if query.trim().is_empty() {
            return "Usage: /search <query>".into();
        }
        let Some(library) = &self.library else {
            return "No library is configured.".into();
        };
        match library.index.search(query, self.settings.search_top_k).await {
            Ok(hits) if hits.is_empty() => "Nothing found.".into(),
            Ok(hits) => hits
                .iter()
                .map(|hit| format!("{} #{}\n{}", hit.path, hit.chunk_index, hit.content.trim()))
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(e) => {
                warn!(error = %e, "Search failed");
                format!("Search failed: {e}")
            }
        }
    }

    fn schedule(self: &Arc<Self>, exchange: Exchange) -> JoinHandle<ExchangeOutcome> {
        let pending = self.scheduler.install(&exchange.key);
        let this = self.clone();
        self.tasks
            .spawn(async move { this.run_exchange(exchange, pending).await })
    }

    /// Generate inside the pending interval, wait out the rest of the delay,
    /// then fire if still current.
    async fn run_exchange(self: Arc<Self>, exchange: Exchange, pending: PendingSend) -> ExchangeOutcome {
        let Exchange {
            message,
            key,
            history,
            delay,
            route,
        } = exchange;

        let generated = pending
            .run(async {
                let excerpts = match &self.fetcher {
                    Some(fetcher) => {
                        fetch_excerpts(
                            fetcher,
                            &message.text,
                            self.settings.max_links,
                            self.settings.excerpt_chars,
                            self.settings.link_timeout,
                        )
                        .await
                    }
                    None => Vec::new(),
                };
                let bundle = self.assembler.assemble(&message, &history, excerpts).await;
                let privileged = self.gate.role(&message.actor_id) == ActorRole::Privileged;
                let system = self
                    .persona
                    .system_prompt(&message.chat, message.display_name(), privileged);
                let prompt = bundle.render(&system, &message.text, self.assembler.token_budget());
                debug!(
                    thread = %key,
                    tokens = prompt.metadata.total_tokens,
                    drops = prompt.metadata.drops.len(),
                    "Prompt rendered"
                );
                self.invoker
                    .invoke(prompt.messages, self.settings.tools_enabled, route)
                    .await
            })
            .await
            .unwrap_or(Err(InvokeError::Cancelled));

        let invocation = match generated {
            Ok(invocation) => invocation,
            Err(InvokeError::Cancelled) => return self.superseded(&key),
            Err(e) => {
                error!(thread = %key, error = %e, "No reply produced");
                self.events.publish(DomainEvent::InvocationFailed {
                    thread: key.to_string(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                self.scheduler.release(&pending);
                return ExchangeOutcome::Failed;
            }
        };

        if !pending.sleep_until(pending.fire_at(delay)).await || !self.scheduler.commit(&pending) {
            return self.superseded(&key);
        }

        if let Err(e) = self
            .deliver_reply(&message.chat, &message.message_id, &invocation.text)
            .await
        {
            error!(thread = %key, error = %e, "Reply delivery failed");
            return ExchangeOutcome::Failed;
        }
        info!(thread = %key, backend = %invocation.backend, tool_rounds = invocation.tool_rounds, "Reply fired");

        self.threads
            .push(&key, [Message::assistant(&invocation.text)])
            .await;
        self.append_event(
            ChronicleEvent::new(key.to_string(), &message.actor_id, &message.text, &invocation.text)
                .tagged(self.tags(TAG_REPLY)),
        )
        .await;
        self.journal_exchange(&message.actor_id, &key, &message.text, &invocation.text)
            .await;
        self.events.publish(DomainEvent::ReplyFired {
            thread: key.to_string(),
            backend: invocation.backend.clone(),
            followup: false,
            timestamp: Utc::now(),
        });

        self.maybe_schedule_followup(&message, &key, &invocation.text);
        ExchangeOutcome::Fired {
            backend: invocation.backend,
        }
    }

    fn maybe_schedule_followup(self: &Arc<Self>, message: &InboundMessage, key: &ThreadKey, reply: &str) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let delay = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            self.gate.followup_delay(&mut *rng)
        };
        let Some(delay) = delay else {
            return;
        };
        info!(thread = %key, delay_ms = delay.as_millis() as u64, "Follow-up scheduled");

        let pending = self.scheduler.install_followup(key);
        let this = self.clone();
        let chat = message.chat.clone();
        let actor_id = message.actor_id.clone();
        let actor_name = message.display_name().to_string();
        let prompt = message.text.clone();
        let reply = reply.to_string();
        let key = key.clone();
        self.tasks.spawn(async move {
            this.run_followup(pending, key, chat, actor_id, actor_name, prompt, reply, delay)
                .await
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_followup(
        self: Arc<Self>,
        pending: PendingSend,
        key: ThreadKey,
        chat: ChatScope,
        actor_id: String,
        actor_name: String,
        prompt: String,
        reply: String,
        delay: Duration,
    ) -> ExchangeOutcome {
        if !pending.sleep_until(pending.fire_at(delay)).await {
            return self.superseded(&key);
        }

        let history = self.threads.snapshot(&key).await;
        let mut messages = vec![Message::system(self.persona.system_prompt(&chat, &actor_name, false))];
        messages.extend(history.recent(10));
        messages.push(Message::user(format!(
            "{FOLLOWUP_PROMPT}\n\nEarlier, {actor_name} wrote: {prompt}\nYou answered: {reply}"
        )));

        let generated = pending
            .run(self.invoker.invoke(messages, false, Route::Auto))
            .await
            .unwrap_or(Err(InvokeError::Cancelled));
        let invocation = match generated {
            Ok(invocation) => invocation,
            Err(InvokeError::Cancelled) => return self.superseded(&key),
            Err(e) => {
                error!(thread = %key, error = %e, "No follow-up produced");
                self.scheduler.release(&pending);
                return ExchangeOutcome::Failed;
            }
        };
        if !self.scheduler.commit(&pending) {
            return self.superseded(&key);
        }

        let id = format!("followup-{}", pending.generation);
        if let Err(e) = self.deliver_reply(&chat, &id, &invocation.text).await {
            error!(thread = %key, error = %e, "Follow-up delivery failed");
            return ExchangeOutcome::Failed;
        }
        info!(thread = %key, backend = %invocation.backend, "Follow-up fired");

        self.threads
            .push(&key, [Message::assistant(&invocation.text)])
            .await;
        self.append_event(
            ChronicleEvent::new(key.to_string(), &actor_id, FOLLOWUP_PROMPT, &invocation.text)
                .tagged(self.tags(TAG_FOLLOWUP)),
        )
        .await;
        self.journal_exchange(&actor_id, &key, FOLLOWUP_PROMPT, &invocation.text)
            .await;
        self.events.publish(DomainEvent::ReplyFired {
            thread: key.to_string(),
            backend: invocation.backend.clone(),
            followup: true,
            timestamp: Utc::now(),
        });
        ExchangeOutcome::Fired {
            backend: invocation.backend,
        }
    }

    /// The event was already published by whoever cancelled the send.
    fn superseded(&self, key: &ThreadKey) -> ExchangeOutcome {
        debug!(thread = %key, "Pending send stood down");
        ExchangeOutcome::Superseded
    }

    fn publish_superseded(&self, key: &ThreadKey) {
        self.events.publish(DomainEvent::ReplySuperseded {
            thread: key.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn publish_gated(
        &self,
        message: &InboundMessage,
        key: Option<&ThreadKey>,
        outcome: GateOutcome,
        delay: Option<Duration>,
    ) {
        self.events.publish(DomainEvent::MessageGated {
            thread: key.map_or_else(|| message.chat.id.clone(), ToString::to_string),
            actor_id: message.actor_id.clone(),
            outcome,
            delay_ms: delay.map(|d| d.as_millis() as u64),
            timestamp: Utc::now(),
        });
    }

    fn tags(&self, outcome: &str) -> Vec<String> {
        let mut tags = vec![outcome.to_string()];
        tags.extend(self.settings.channel_tag.clone());
        tags
    }

    async fn append_event(&self, event: ChronicleEvent) {
        if let Err(e) = self.chronicle.append(event).await {
            warn!(error = %e, "Chronicle append failed");
        }
    }

    async fn journal_exchange(&self, actor_id: &str, key: &ThreadKey, prompt: &str, reply: &str) {
        let Some(journal) = &self.journal else {
            return;
        };
        let entry = JournalEntry {
            actor_id: actor_id.to_string(),
            thread: key.to_string(),
            prompt: prompt.to_string(),
            reply: reply.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = journal.record(entry).await {
            warn!(error = %e, "Journal write failed");
        }
    }

    async fn record_history(
        &self,
        chat: &ChatScope,
        message_id: &str,
        actor_id: &str,
        actor_name: Option<String>,
        direction: Direction,
        text: &str,
    ) {
        let record = HistoryRecord {
            chat_id: chat.id.clone(),
            message_id: message_id.to_string(),
            actor_id: actor_id.to_string(),
            actor_name,
            direction,
            text: text.to_string(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.chronicle.record_message(record).await {
            warn!(error = %e, "Message history write failed");
        }
    }

    /// Send a reply in the chat's preferred form, recording each part under
    /// the id the transport gave it.
    async fn deliver_reply(&self, chat: &ChatScope, reply_to: &str, text: &str) -> Result<(), ChannelError> {
        let parts = match self.voice.payload_for(&chat.id, text.to_string()).await {
            voice @ OutboundPayload::Voice(_) => vec![voice],
            OutboundPayload::Text(text) => split_message(&text, MAX_MESSAGE_CHARS)
                .into_iter()
                .map(OutboundPayload::Text)
                .collect(),
        };
        for (n, payload) in parts.into_iter().enumerate() {
            let sent_text = payload.text().to_string();
            let sent_id = self.outbound.send(chat, payload).await?;
            self.record_history(
                chat,
                &sent_id.unwrap_or_else(|| format!("{reply_to}-out{n}")),
                self.persona.name(),
                Some(self.persona.name().to_string()),
                Direction::Outbound,
                &sent_text,
            )
            .await;
        }
        Ok(())
    }

    /// Plain text, used for command answers and notices.
    async fn deliver_text(&self, chat: &ChatScope, reply_to: &str, text: &str) {
        for (n, part) in split_message(text, MAX_MESSAGE_CHARS).into_iter().enumerate() {
            let sent_id = match self.outbound.send(chat, OutboundPayload::Text(part.clone())).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(chat = %chat.id, error = %e, "Notice delivery failed");
                    return;
                }
            };
            self.record_history(
                chat,
                &sent_id.unwrap_or_else(|| format!("{reply_to}-out{n}")),
                self.persona.name(),
                Some(self.persona.name().to_string()),
                Direction::Outbound,
                &part,
            )
            .await;
        }
    }
}
