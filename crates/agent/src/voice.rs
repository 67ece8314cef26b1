//! Per-chat voice mode flags, optionally persisted as JSON.

use cadence_core::channel::OutboundPayload;
use cadence_core::error::StoreError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::warn;

pub struct VoiceModes {
    path: Option<PathBuf>,
    enabled: RwLock<BTreeMap<String, bool>>,
}

impl VoiceModes {
    /// Voice flags that live only as long as the process.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            enabled: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load flags from `path`. A missing or corrupt file starts empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let enabled = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable voice state");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path: Some(path),
            enabled: RwLock::new(enabled),
        }
    }

    pub async fn is_enabled(&self, chat_id: &str) -> bool {
        self.enabled.read().await.get(chat_id).copied().unwrap_or(false)
    }

    pub async fn set(&self, chat_id: &str, on: bool) -> Result<(), StoreError> {
        let snapshot = {
            let mut enabled = self.enabled.write().await;
            enabled.insert(chat_id.to_string(), on);
            enabled.clone()
        };
        self.persist(&snapshot).await
    }

    /// Wrap reply text in the payload kind this chat wants.
    pub async fn payload_for(&self, chat_id: &str, text: String) -> OutboundPayload {
        if self.is_enabled(chat_id).await {
            OutboundPayload::Voice(text)
        } else {
            OutboundPayload::Text(text)
        }
    }

    async fn persist(&self, state: &BTreeMap<String, bool>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Storage(format!("{}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::Storage(format!("voice state encode: {e}")))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| StoreError::Storage(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn defaults_to_text() {
        let modes = VoiceModes::ephemeral();
        assert!(!modes.is_enabled("c").await);
        assert_eq!(
            modes.payload_for("c", "hi".into()).await,
            OutboundPayload::Text("hi".into())
        );
    }

    #[tokio::test]
    async fn toggles_per_chat() {
        let modes = VoiceModes::ephemeral();
        modes.set("a", true).await.unwrap();
        assert!(modes.is_enabled("a").await);
        assert!(!modes.is_enabled("b").await);
        assert_eq!(
            modes.payload_for("a", "hi".into()).await,
            OutboundPayload::Voice("hi".into())
        );
        modes.set("a", false).await.unwrap();
        assert!(!modes.is_enabled("a").await);
    }

    #[tokio::test]
    async fn persists_across_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/voice.json");

        let modes = VoiceModes::load(&path).await;
        modes.set("chat-1", true).await.unwrap();

        let reloaded = VoiceModes::load(&path).await;
        assert!(reloaded.is_enabled("chat-1").await);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("voice.json");
        std::fs::write(&path, "{not json").unwrap();
        let modes = VoiceModes::load(&path).await;
        assert!(!modes.is_enabled("x").await);
    }
}
