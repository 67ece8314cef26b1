//! `cadence run`: wire every component from configuration and serve a channel.

use super::{ensure_parent, open_index};
use cadence_agent::{
    CachedExcerptFetcher, ContextAssembler, DailyArtifactScheduler, ExchangeSettings,
    HttpExcerptFetcher, IntakeGate, ModelInvoker, Orchestrator, Persona, RateLimiter, VoiceModes,
};
use cadence_channels::{CliChannel, TelegramChannel, TelegramConfig};
use cadence_config::AppConfig;
use cadence_core::channel::{Channel, Outbound};
use cadence_core::event::{DomainEvent, EventBus};
use cadence_core::index::TextIndex;
use cadence_core::provider::Provider;
use cadence_core::tool::ToolRegistry;
use cadence_memory::{FileJournal, SqliteChronicle};
use cadence_providers::{build_from_config, search_backend};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn build_channel(config: &AppConfig) -> Result<Arc<dyn Channel>, Box<dyn std::error::Error>> {
    match config.channel.kind.as_str() {
        "cli" => Ok(Arc::new(CliChannel::new())),
        "telegram" => {
            let telegram = TelegramConfig::from_channel_config(&config.channel)?;
            Ok(Arc::new(TelegramChannel::new(telegram)?))
        }
        other => Err(format!("Unknown channel kind: {other} (expected cli or telegram)").into()),
    }
}

/// Surface domain events at debug level until the bus closes. Returns how
/// many were logged.
async fn log_events(mut rx: broadcast::Receiver<Arc<DomainEvent>>) -> usize {
    let mut logged = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                debug!(?event, "Domain event");
                logged += 1;
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger fell behind"),
            Err(RecvError::Closed) => return logged,
        }
    }
}

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let events = Arc::new(EventBus::default());

    // Library
    let index = Arc::new(open_index(&config).await?);
    if config.index.reindex_on_start {
        match index
            .reindex_dir(&config.index.source_dir, &config.index.extension, false)
            .await
        {
            Ok(report) => info!(
                updated = report.updated.len(),
                unchanged = report.unchanged.len(),
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Library indexed"
            ),
            Err(e) => warn!(error = %e, "Startup reindex failed, serving the existing index"),
        }
    }
    let library: Arc<dyn TextIndex> = index;

    // Storage
    ensure_parent(&config.storage.chronicle_db)?;
    let chronicle = Arc::new(SqliteChronicle::open(&config.storage.chronicle_db.to_string_lossy()).await?);
    ensure_parent(&config.storage.journal_path)?;
    let journal = FileJournal::new(&config.storage.journal_path)?
        .with_rotation(config.storage.journal_max_bytes, config.storage.journal_backups)
        .with_masking(config.storage.mask_pii)?;
    let voice = match &config.storage.voice_state {
        Some(path) => VoiceModes::load(path).await,
        None => VoiceModes::ephemeral(),
    };

    // Backends and tools
    let backends = build_from_config(&config.backends)?;
    let search: Option<Arc<dyn Provider>> = search_backend(&config.backends)?
        .map(|pair| Arc::new(pair) as Arc<dyn Provider>);
    let tools = if config.invoker.tools_enabled {
        cadence_tools::default_registry(Some(library.clone()), search)
    } else {
        ToolRegistry::new()
    };
    info!(tools = ?tools.names(), secondary = backends.has_secondary(), "Backends ready");
    let invoker = ModelInvoker::new(backends, tools)
        .with_max_tool_rounds(config.invoker.max_tool_rounds as usize)
        .with_events(events.clone());

    // Context
    let calendar = Arc::new(DailyArtifactScheduler::new(
        &config.artifacts.dir,
        &config.artifacts.extension,
    ));
    let assembler = ContextAssembler::new(chronicle.clone(), config.context.clone())
        .with_index(library.clone())
        .with_calendar(calendar);

    let persona = Persona::from_config(&config.persona).await?;
    let gate = IntakeGate::new(&config.gate, &config.delays);
    let fetcher = CachedExcerptFetcher::new(
        Arc::new(HttpExcerptFetcher::new(config.context.source_timeout())?),
        config.context.excerpt_ttl(),
    );

    let channel = build_channel(&config)?;
    let outbound: Arc<dyn Outbound> = channel.clone();

    let mut orchestrator = Orchestrator::new(persona, gate, assembler, invoker, chronicle, outbound)
        .with_settings(ExchangeSettings::from_config(&config))
        .with_journal(Arc::new(journal))
        .with_voice(voice)
        .with_fetcher(Arc::new(fetcher))
        .with_library(library, &config.index.source_dir, &config.index.extension)
        .with_events(events.clone());
    if config.rate_limit.enabled {
        orchestrator = orchestrator.with_rate_limiter(RateLimiter::new(
            config.rate_limit.max_messages,
            Duration::from_secs(config.rate_limit.interval_secs),
        ));
    }

    tokio::spawn(log_events(events.subscribe()));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    let inbound = channel.start().await?;
    info!(channel = channel.name(), "Listening");
    Arc::new(orchestrator).run(inbound, shutdown).await;
    channel.stop().await?;
    Ok(())
}
