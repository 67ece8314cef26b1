//! JSONL journal of answered exchanges with PII masking and size rotation.

use async_trait::async_trait;
use cadence_core::chronicle::{Journal, JournalEntry};
use cadence_core::error::StoreError;
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_MAX_BYTES: u64 = 1_000_000;
pub const DEFAULT_BACKUPS: usize = 3;

/// Replaces e-mail addresses with `[EMAIL]` and ASCII digits with `X`.
#[derive(Debug, Clone)]
pub struct PiiMasker {
    email: Regex,
    digits: Regex,
}

impl PiiMasker {
    pub fn new() -> Result<Self, StoreError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| StoreError::Storage(format!("mask pattern: {e}")))
        };
        Ok(Self {
            email: compile(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
            digits: compile(r"[0-9]")?,
        })
    }

    pub fn mask(&self, text: &str) -> String {
        let without_email = self.email.replace_all(text, "[EMAIL]");
        self.digits.replace_all(&without_email, "X").into_owned()
    }
}

/// Append-only journal file, rotated to `path.1 .. path.N` when it grows
/// past `max_bytes`.
pub struct FileJournal {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    masker: Option<PiiMasker>,
    write_lock: Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self {
            path: path.into(),
            max_bytes: DEFAULT_MAX_BYTES,
            backups: DEFAULT_BACKUPS,
            masker: Some(PiiMasker::new()?),
            write_lock: Mutex::new(()),
        })
    }

    pub fn with_rotation(mut self, max_bytes: u64, backups: usize) -> Self {
        self.max_bytes = max_bytes;
        self.backups = backups;
        self
    }

    pub fn with_masking(mut self, enabled: bool) -> Result<Self, StoreError> {
        self.masker = if enabled { Some(PiiMasker::new()?) } else { None };
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn render(&self, mut entry: JournalEntry) -> Result<String, StoreError> {
        if let Some(masker) = &self.masker {
            entry.prompt = masker.mask(&entry.prompt);
            entry.reply = masker.mask(&entry.reply);
        }
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| StoreError::Storage(format!("journal encode: {e}")))?;
        line.push('\n');
        Ok(line)
    }

    async fn rotate(&self) -> Result<(), StoreError> {
        if self.backups == 0 {
            return remove_if_exists(&self.path).await;
        }
        remove_if_exists(&self.backup_path(self.backups)).await?;
        for n in (1..self.backups).rev() {
            let from = self.backup_path(n);
            if fs::try_exists(&from).await.unwrap_or(false) {
                fs::rename(&from, self.backup_path(n + 1))
                    .await
                    .map_err(|e| io_error(&from, e))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))
            .await
            .map_err(|e| io_error(&self.path, e))?;
        info!(path = %self.path.display(), "Journal rotated");
        Ok(())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Storage(format!("{}: {e}", path.display()))
}

async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn record(&self, entry: JournalEntry) -> Result<(), StoreError> {
        let line = self.render(entry)?;
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let current = fs::metadata(&self.path).await.map(|m| m.len()).unwrap_or(0);
        if current > 0 && current + line.len() as u64 > self.max_bytes {
            self.rotate().await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| io_error(&self.path, e))?;
        file.flush().await.map_err(|e| io_error(&self.path, e))?;

        debug!(bytes = line.len(), "Journal entry written");
        Ok(())
    }
}
