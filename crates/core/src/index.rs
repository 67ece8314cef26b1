//! Full-text index over reference documents.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One chunk returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub chunk_index: usize,
    pub content: String,
}

/// A source that could not be indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFailure {
    pub path: String,
    pub reason: String,
}

/// Outcome of a reindex pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReindexReport {
    /// Sources whose chunks were (re)written.
    pub updated: Vec<String>,
    /// Sources whose hash matched and were left alone.
    pub unchanged: Vec<String>,
    /// Previously indexed sources that are no longer in the source set.
    pub removed: Vec<String>,
    pub failed: Vec<IndexFailure>,
    pub chunks_written: usize,
    pub chunks_deleted: usize,
}

impl ReindexReport {
    /// True when the pass touched no chunks at all.
    pub fn is_noop(&self) -> bool {
        self.chunks_written == 0 && self.chunks_deleted == 0
    }
}

#[async_trait]
pub trait TextIndex: Send + Sync {
    /// Bring the index in line with `sources`.
    ///
    /// Sources whose content hash is unchanged are skipped unless `force`.
    /// Unreadable sources are reported in `failed` and do not abort the
    /// batch. Indexed sources absent from `sources` are removed.
    async fn reindex(&self, sources: &[PathBuf], force: bool) -> Result<ReindexReport, StoreError>;

    /// Ranked keyword search, most relevant first, at most `top_k` hits.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, StoreError>;

    /// Up to `n` chunks chosen at random.
    async fn sample(&self, n: usize) -> Result<Vec<SearchHit>, StoreError>;
}
