//! CLI channel: interactive terminal chat.
//!
//! Reads lines from stdin as direct messages from one local actor and prints
//! replies to stdout. EOF or an exit word closes the inbound stream, which
//! lets pending replies drain before the process stops.

use async_trait::async_trait;
use cadence_core::channel::{Channel, InboundMessage, Outbound, OutboundPayload};
use cadence_core::error::ChannelError;
use cadence_core::thread::ChatScope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const CHAT_ID: &str = "cli";

/// Interactive CLI channel for terminal-based chat.
pub struct CliChannel {
    actor_id: String,
    actor_name: String,
    next_id: Arc<AtomicU64>,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            actor_id: "local".into(),
            actor_name: "You".into(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_actor(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.actor_id = id.into();
        self.actor_name = name.into();
        self
    }

    fn envelope(&self, line: String) -> InboundMessage {
        envelope(&self.next_id, &self.actor_id, &self.actor_name, line)
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn envelope(next_id: &AtomicU64, actor_id: &str, actor_name: &str, line: String) -> InboundMessage {
    let id = next_id.fetch_add(1, Ordering::Relaxed);
    InboundMessage::new(id.to_string(), ChatScope::direct(CHAT_ID), actor_id, line)
        .with_actor_name(actor_name)
}

fn is_exit(line: &str) -> bool {
    matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q")
}

/// How a payload looks on the terminal.
pub fn render_payload(payload: &OutboundPayload) -> String {
    match payload {
        OutboundPayload::Text(text) => text.clone(),
        OutboundPayload::Voice(text) => format!("[voice] {text}"),
    }
}

#[async_trait]
impl Outbound for CliChannel {
    async fn send(
        &self,
        _chat: &ChatScope,
        payload: OutboundPayload,
    ) -> Result<Option<String>, ChannelError> {
        println!("{}", render_payload(&payload));
        Ok(None)
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let next_id = self.next_id.clone();
        let actor_id = self.actor_id.clone();
        let actor_name = self.actor_name.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        if is_exit(&line) {
                            break;
                        }
                        let msg = envelope(&next_id, &actor_id, &actor_name, line);
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}
