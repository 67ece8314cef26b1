use async_trait::async_trait;
use cadence_core::error::{ProviderError, StoreError};
use cadence_core::index::{ReindexReport, SearchHit, TextIndex};
use cadence_core::message::Message;
use cadence_core::provider::{Provider, ProviderRequest, ProviderResponse};
use std::path::PathBuf;
use std::sync::Mutex;

pub fn hit(path: &str, idx: usize, content: &str) -> SearchHit {
    SearchHit {
        path: path.into(),
        chunk_index: idx,
        content: content.into(),
    }
}

/// Index that returns canned hits and remembers queries.
pub struct FixedIndex {
    pub hits: Vec<SearchHit>,
    pub queries: Mutex<Vec<(String, usize)>>,
}

impl FixedIndex {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TextIndex for FixedIndex {
    async fn reindex(&self, _sources: &[PathBuf], _force: bool) -> Result<ReindexReport, StoreError> {
        Ok(ReindexReport::default())
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
        self.queries.lock().unwrap().push((query.to_string(), top_k));
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }

    async fn sample(&self, n: usize) -> Result<Vec<SearchHit>, StoreError> {
        Ok(self.hits.iter().take(n).cloned().collect())
    }
}

/// Provider that answers with a fixed text and records every request.
pub struct RecordingProvider {
    pub reply: Result<String, ProviderError>,
    pub requests: Mutex<Vec<ProviderRequest>>,
}

impl RecordingProvider {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            reply: Err(error),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        match &self.reply {
            Ok(text) => Ok(ProviderResponse {
                message: Message::assistant(text.clone()),
                usage: None,
                model: "mock".into(),
            }),
            Err(e) => Err(e.clone()),
        }
    }
}
