//! Configuration loading, validation, and management for Cadence.
//!
//! Loads configuration from `~/.cadence/config.toml` (or `CADENCE_CONFIG`)
//! with environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub persona: PersonaConfig,

    #[serde(default)]
    pub backends: BackendsConfig,

    /// Intake gate policy
    #[serde(default)]
    pub gate: GateConfig,

    /// Reply and follow-up delay ranges
    #[serde(default)]
    pub delays: DelayConfig,

    #[serde(default)]
    pub context: ContextConfig,

    /// Full-text index over reference documents
    #[serde(default)]
    pub index: IndexConfig,

    /// Daily artifact (chapter) directory
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub invoker: InvokerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// ── Persona ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,

    /// Words that address the persona in group chats (case-insensitive).
    #[serde(default = "default_wake_words")]
    pub wake_words: Vec<String>,

    /// File holding the full system prompt. Takes precedence over `system_prompt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_file: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_persona_name() -> String {
    "Arianna".into()
}
fn default_wake_words() -> Vec<String> {
    vec!["arianna".into(), "арианна".into()]
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            wake_words: default_wake_words(),
            prompt_file: None,
            system_prompt: None,
        }
    }
}

// ── Backends ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub primary: BackendConfig,

    /// Fallback, also used by the per-message routing override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<BackendConfig>,

    /// Search-capable backend for the `web_lookup` tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<BackendConfig>,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            primary: BackendConfig::default(),
            secondary: None,
            search: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_name")]
    pub name: String,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Bound on a single call before falling back.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend_name() -> String {
    "primary".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4.1".into()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_timeout_secs() -> u64 {
    30
}

impl BackendConfig {
    /// A DeepSeek backend, the usual secondary.
    pub fn deepseek() -> Self {
        Self {
            name: "deepseek".into(),
            api_url: "https://api.deepseek.com/v1".into(),
            api_key: None,
            model: "deepseek-chat".into(),
            temperature: 0.45,
            max_tokens: 700,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: default_backend_name(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Gate ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Probability of skipping a short or non-question message.
    #[serde(default)]
    pub skip_short_prob: f64,

    /// Messages with fewer words than this count as short.
    #[serde(default = "default_min_words")]
    pub min_words: usize,

    #[serde(default = "default_interrogative_markers")]
    pub interrogative_markers: Vec<String>,

    /// Actor IDs that are always answered, quickly.
    #[serde(default)]
    pub privileged_actors: Vec<String>,

    /// Track one thread per actor in group chats instead of one per chat.
    #[serde(default)]
    pub per_actor_in_groups: bool,
}

fn default_min_words() -> usize {
    4
}
fn default_interrogative_markers() -> Vec<String> {
    vec!["?".into(), "？".into()]
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            skip_short_prob: 0.0,
            min_words: default_min_words(),
            interrogative_markers: default_interrogative_markers(),
            privileged_actors: Vec::new(),
            per_actor_in_groups: false,
        }
    }
}

// ── Delays ────────────────────────────────────────────────────────────────

/// An inclusive delay range in (fractional) seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeConfig {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl RangeConfig {
    pub const fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn min(&self) -> Duration {
        Duration::from_secs_f64(self.min_secs)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs_f64(self.max_secs)
    }

    fn check(&self, label: &str) -> Result<(), ConfigError> {
        if !(self.min_secs >= 0.0 && self.min_secs <= self.max_secs) {
            return Err(ConfigError::ValidationError(format!(
                "{label}: need 0 <= min_secs <= max_secs, got {}..{}",
                self.min_secs, self.max_secs
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    #[serde(default = "default_group_delay")]
    pub group: RangeConfig,

    #[serde(default = "default_direct_delay")]
    pub direct: RangeConfig,

    #[serde(default = "default_privileged_delay")]
    pub privileged: RangeConfig,

    #[serde(default = "default_followup_delay")]
    pub followup: RangeConfig,

    #[serde(default = "default_followup_prob")]
    pub followup_prob: f64,
}

fn default_group_delay() -> RangeConfig {
    RangeConfig::new(120.0, 360.0)
}
fn default_direct_delay() -> RangeConfig {
    RangeConfig::new(10.0, 40.0)
}
fn default_privileged_delay() -> RangeConfig {
    RangeConfig::new(0.5, 2.0)
}
fn default_followup_delay() -> RangeConfig {
    RangeConfig::new(900.0, 7200.0)
}
fn default_followup_prob() -> f64 {
    0.2
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            group: default_group_delay(),
            direct: default_direct_delay(),
            privileged: default_privileged_delay(),
            followup: default_followup_delay(),
            followup_prob: default_followup_prob(),
        }
    }
}

// ── Context ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Turns of short-window history kept per thread.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Radius of the chronicle window around a reply anchor.
    #[serde(default = "default_reply_window_minutes")]
    pub reply_window_minutes: u32,

    /// Messages on each side of a reply anchor pulled from chat history.
    #[serde(default = "default_anchor_radius")]
    pub anchor_radius: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    /// Token budget for the rendered context sections.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    #[serde(default = "default_max_links")]
    pub max_links: usize,

    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// Bound on context source queries.
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,

    /// Threads with no activity for this long lose their short-window history.
    #[serde(default = "default_thread_idle_secs")]
    pub thread_idle_secs: u64,

    /// How long a fetched link excerpt is reused.
    #[serde(default = "default_excerpt_ttl_secs")]
    pub excerpt_ttl_secs: u64,
}

fn default_history_turns() -> usize {
    20
}
fn default_reply_window_minutes() -> u32 {
    5
}
fn default_anchor_radius() -> usize {
    10
}
fn default_search_top_k() -> usize {
    5
}
fn default_token_budget() -> usize {
    6000
}
fn default_max_links() -> usize {
    3
}
fn default_excerpt_chars() -> usize {
    500
}
fn default_source_timeout_secs() -> u64 {
    10
}
fn default_thread_idle_secs() -> u64 {
    6 * 3600
}
fn default_excerpt_ttl_secs() -> u64 {
    3600
}

impl ContextConfig {
    pub fn reply_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.reply_window_minutes))
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn thread_idle(&self) -> Duration {
        Duration::from_secs(self.thread_idle_secs)
    }

    pub fn excerpt_ttl(&self) -> Duration {
        Duration::from_secs(self.excerpt_ttl_secs)
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            reply_window_minutes: default_reply_window_minutes(),
            anchor_radius: default_anchor_radius(),
            search_top_k: default_search_top_k(),
            token_budget: default_token_budget(),
            max_links: default_max_links(),
            excerpt_chars: default_excerpt_chars(),
            source_timeout_secs: default_source_timeout_secs(),
            thread_idle_secs: default_thread_idle_secs(),
            excerpt_ttl_secs: default_excerpt_ttl_secs(),
        }
    }
}

// ── Index & artifacts ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// File extension of indexable documents, without the dot.
    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(default = "default_index_db")]
    pub db_path: PathBuf,

    /// Chunk window in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_true")]
    pub reindex_on_start: bool,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("data/reference")
}
fn default_extension() -> String {
    "md".into()
}
fn default_index_db() -> PathBuf {
    PathBuf::from("data/index.db")
}
fn default_chunk_size() -> usize {
    900
}
fn default_chunk_overlap() -> usize {
    120
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            extension: default_extension(),
            db_path: default_index_db(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            reindex_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("data/chapters")
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            extension: default_extension(),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_chronicle_db")]
    pub chronicle_db: PathBuf,

    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,

    /// Rotate the journal when it grows past this many bytes.
    #[serde(default = "default_journal_max_bytes")]
    pub journal_max_bytes: u64,

    #[serde(default = "default_journal_backups")]
    pub journal_backups: usize,

    /// Mask emails and digits before journaling.
    #[serde(default = "default_true")]
    pub mask_pii: bool,

    /// Where per-chat voice mode is persisted. Unset keeps it in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_state: Option<PathBuf>,
}

fn default_chronicle_db() -> PathBuf {
    PathBuf::from("data/chronicle.db")
}
fn default_journal_path() -> PathBuf {
    PathBuf::from("data/journal.log")
}
fn default_journal_max_bytes() -> u64 {
    1_000_000
}
fn default_journal_backups() -> usize {
    3
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chronicle_db: default_chronicle_db(),
            journal_path: default_journal_path(),
            journal_max_bytes: default_journal_max_bytes(),
            journal_backups: default_journal_backups(),
            mask_pii: true,
            voice_state: None,
        }
    }
}

// ── Invoker, rate limit, channel ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Tool round trips allowed per invocation.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    #[serde(default = "default_true")]
    pub tools_enabled: bool,
}

fn default_max_tool_rounds() -> u32 {
    3
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            tools_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_rate_max")]
    pub max_messages: u32,

    #[serde(default = "default_rate_interval")]
    pub interval_secs: u64,
}

fn default_rate_max() -> u32 {
    5
}
fn default_rate_interval() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: default_rate_max(),
            interval_secs: default_rate_interval(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// "cli" or "telegram"
    #[serde(default = "default_channel_kind")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Allowlist of sender IDs. Empty or ["*"] allows everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

fn default_channel_kind() -> String {
    "cli".into()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: default_channel_kind(),
            bot_token: None,
            allowed_users: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("kind", &self.kind)
            .field("bot_token", &redact(&self.bot_token))
            .field("allowed_users", &self.allowed_users)
            .finish()
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from `CADENCE_CONFIG` or `~/.cadence/config.toml`,
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CADENCE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the environment. `lookup` is `std::env::var`
    /// in production and a map in tests.
    ///
    /// - `CADENCE_API_KEY`: primary backend key
    /// - `CADENCE_SECONDARY_API_KEY`: secondary backend key (enables DeepSeek
    ///   as secondary if none is configured)
    /// - `CADENCE_MODEL`: primary model
    /// - `CADENCE_TELEGRAM_TOKEN`: bot token
    /// - `CADENCE_PRIVILEGED`: comma-separated privileged actor IDs
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("CADENCE_API_KEY") {
            self.backends.primary.api_key = Some(key);
        }
        if let Some(key) = lookup("CADENCE_SECONDARY_API_KEY") {
            self.backends
                .secondary
                .get_or_insert_with(BackendConfig::deepseek)
                .api_key = Some(key);
        }
        if let Some(model) = lookup("CADENCE_MODEL") {
            self.backends.primary.model = model;
        }
        if let Some(token) = lookup("CADENCE_TELEGRAM_TOKEN") {
            self.channel.bot_token = Some(token);
        }
        if let Some(ids) = lookup("CADENCE_PRIVILEGED") {
            self.gate.privileged_actors = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cadence")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (label, p) in [
            ("gate.skip_short_prob", self.gate.skip_short_prob),
            ("delays.followup_prob", self.delays.followup_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::ValidationError(format!(
                    "{label} must be between 0.0 and 1.0"
                )));
            }
        }

        self.delays.group.check("delays.group")?;
        self.delays.direct.check("delays.direct")?;
        self.delays.privileged.check("delays.privileged")?;
        self.delays.followup.check("delays.followup")?;

        if self.index.chunk_size == 0 || self.index.chunk_overlap >= self.index.chunk_size {
            return Err(ConfigError::ValidationError(
                "index.chunk_overlap must be smaller than a non-zero index.chunk_size".into(),
            ));
        }

        if self.context.search_top_k == 0 {
            return Err(ConfigError::ValidationError(
                "context.search_top_k must be > 0".into(),
            ));
        }

        if self.context.thread_idle_secs == 0 {
            return Err(ConfigError::ValidationError(
                "context.thread_idle_secs must be > 0".into(),
            ));
        }

        if self.invoker.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "invoker.max_tool_rounds must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config.backends.secondary = Some(BackendConfig::deepseek());
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
