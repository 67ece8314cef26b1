//! Telegram channel adapter.
//!
//! Long-polls the Bot API (`getUpdates`) and sends with `sendMessage`.
//! Private chats map to direct scopes, everything else to group scopes.
//! A message is flagged as addressed when it mentions the bot's username
//! or replies to one of the bot's own messages.

use async_trait::async_trait;
use cadence_config::ChannelConfig;
use cadence_core::channel::{Channel, InboundMessage, Outbound, OutboundPayload, ReplyAnchor};
use cadence_core::error::ChannelError;
use cadence_core::thread::ChatScope;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const RETRY_AFTER_ERROR: Duration = Duration::from_secs(5);

/// Telegram channel configuration.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// Allowed user IDs or usernames. Empty or ["*"] allows everyone.
    pub allowed_users: Vec<String>,
    /// Long-poll timeout passed to `getUpdates`.
    pub poll_timeout_secs: u64,
    pub api_base: String,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            allowed_users: Vec::new(),
            poll_timeout_secs: 30,
            api_base: DEFAULT_API_BASE.into(),
        }
    }

    pub fn from_channel_config(config: &ChannelConfig) -> Result<Self, ChannelError> {
        let token = config
            .bot_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ChannelError::NotConfigured("telegram bot_token is not set".into()))?;
        Ok(Self {
            allowed_users: config.allowed_users.clone(),
            ..Self::new(token)
        })
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("allowed_users", &self.allowed_users)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("api_base", &self.api_base)
            .finish()
    }
}

// ── Bot API wire types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    date: i64,
    chat: TgChat,
    from: Option<TgUser>,
    text: Option<String>,
    reply_to_message: Option<Box<TgMessage>>,
}

/// The part of a `sendMessage` result the core needs.
#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    first_name: String,
    username: Option<String>,
}

fn timestamp(unix: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(unix, 0).unwrap_or_else(Utc::now)
}

/// Map a Bot API message to an envelope. Non-text messages and messages
/// from bots yield `None`.
fn to_inbound(msg: TgMessage, bot: &TgUser) -> Option<InboundMessage> {
    let text = msg.text?;
    let from = msg.from?;
    if from.is_bot {
        return None;
    }

    let chat_id = msg.chat.id.to_string();
    let scope = if msg.chat.kind == "private" {
        ChatScope::direct(chat_id)
    } else {
        ChatScope::group(chat_id)
    };

    let mentioned = bot
        .username
        .as_deref()
        .is_some_and(|name| text.to_lowercase().contains(&format!("@{}", name.to_lowercase())));
    let replied_to_bot = msg
        .reply_to_message
        .as_ref()
        .and_then(|r| r.from.as_ref())
        .is_some_and(|u| u.id == bot.id);

    let mut inbound = InboundMessage::new(msg.message_id.to_string(), scope, from.id.to_string(), text)
        .with_actor_name(from.first_name)
        .at(timestamp(msg.date));
    if let Some(anchor) = msg.reply_to_message {
        inbound = inbound.replying_to(ReplyAnchor {
            message_id: anchor.message_id.to_string(),
            timestamp: Some(timestamp(anchor.date)),
        });
    }
    if mentioned || replied_to_bot {
        inbound = inbound.addressed();
    }
    Some(inbound)
}

fn is_allowed(allowed: &[String], user: &TgUser) -> bool {
    if allowed.is_empty() || allowed.iter().any(|u| u == "*") {
        return true;
    }
    let id = user.id.to_string();
    allowed
        .iter()
        .any(|u| *u == id || user.username.as_deref() == Some(u.trim_start_matches('@')))
}

// ── Client ────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct BotApi {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl BotApi {
    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base.trim_end_matches('/'), self.token, method)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, ChannelError> {
        let response = self
            .client
            .post(self.url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(format!("{method}: {e}")))?;
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(format!("{method}: {e}")))?;
        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(ChannelError::DeliveryFailed {
                channel: "telegram".into(),
                reason: parsed
                    .description
                    .unwrap_or_else(|| format!("{method} returned no result")),
            }),
        }
    }
}

/// Telegram channel adapter.
pub struct TelegramChannel {
    config: TelegramConfig,
    api: BotApi,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("HTTP client: {e}")))?;
        let api = BotApi {
            client,
            base: config.api_base.clone(),
            token: config.bot_token.clone(),
        };
        Ok(Self {
            config,
            api,
            poller: Mutex::new(None),
        })
    }
}

async fn poll_updates(
    api: BotApi,
    bot: TgUser,
    allowed: Vec<String>,
    timeout_secs: u64,
    tx: mpsc::Sender<Result<InboundMessage, ChannelError>>,
) {
    let mut offset = 0i64;
    while !tx.is_closed() {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        let updates: Vec<Update> = match api.call("getUpdates", body).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "Telegram poll failed, retrying");
                tokio::time::sleep(RETRY_AFTER_ERROR).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(msg) = update.message else { continue };
            if let Some(from) = &msg.from
                && !is_allowed(&allowed, from)
            {
                debug!(user = from.id, "Telegram sender not on the allowlist");
                continue;
            }
            if let Some(inbound) = to_inbound(msg, &bot)
                && tx.send(Ok(inbound)).await.is_err()
            {
                return;
            }
        }
    }
}

#[async_trait]
impl Outbound for TelegramChannel {
    async fn send(
        &self,
        chat: &ChatScope,
        payload: OutboundPayload,
    ) -> Result<Option<String>, ChannelError> {
        if let OutboundPayload::Voice(_) = &payload {
            // No speech synthesis on this transport; the text goes out as is.
            debug!(chat = %chat.id, "Voice payload sent as text");
        }
        let body = serde_json::json!({
            "chat_id": chat.id,
            "text": payload.text(),
        });
        let sent: SentMessage = self.api.call("sendMessage", body).await?;
        debug!(
            chat = %chat.id,
            message_id = sent.message_id,
            chars = payload.text().chars().count(),
            "Telegram message sent"
        );
        Ok(Some(sent.message_id.to_string()))
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        let bot: TgUser = self.api.call("getMe", serde_json::json!({})).await?;
        info!(bot = ?bot.username, "Telegram channel starting");

        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(poll_updates(
            self.api.clone(),
            bot,
            self.config.allowed_users.clone(),
            self.config.poll_timeout_secs,
            tx,
        ));
        *self.poller.lock().await = Some(handle);
        Ok(rx)
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Telegram channel stopping");
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}
