//! SQLite FTS5 full-text index over reference documents.
//!
//! Three tables:
//! - `sources` holds one row per indexed document with its content hash
//! - `chunks` holds the overlapping windows of each document
//! - `chunks_fts` is an external-content FTS5 table over `chunks`, kept in
//!   sync by triggers and ranked with BM25
//!
//! A document's chunks are only ever replaced wholesale, inside one
//! transaction, when its hash changes (or on a forced reindex).

use crate::chunking::{ChunkSpec, chunk_text, content_hash};
use crate::db;
use async_trait::async_trait;
use cadence_core::error::StoreError;
use cadence_core::index::{IndexFailure, ReindexReport, SearchHit, TextIndex};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "sources table",
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            path        TEXT PRIMARY KEY,
            hash        TEXT NOT NULL,
            indexed_at  TEXT NOT NULL
        )
        "#,
    ),
    (
        "chunks table",
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            path        TEXT NOT NULL,
            chunk_idx   INTEGER NOT NULL,
            content     TEXT NOT NULL,
            UNIQUE(path, chunk_idx)
        )
        "#,
    ),
    (
        "FTS5 table",
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
            content,
            content='chunks',
            content_rowid='id',
            tokenize='porter unicode61'
        )
        "#,
    ),
    (
        "insert trigger",
        r#"
        CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
            INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
        END
        "#,
    ),
    (
        "delete trigger",
        r#"
        CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, content)
            VALUES ('delete', old.id, old.content);
        END
        "#,
    ),
    (
        "path index",
        "CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path, chunk_idx)",
    ),
];

/// Full-text index backed by SQLite FTS5.
pub struct SqliteTextIndex {
    pool: SqlitePool,
    spec: ChunkSpec,
    /// Serializes reindex passes; searches never take it.
    writer: Mutex<()>,
}

impl SqliteTextIndex {
    /// Open the index at `path` (a file path or `sqlite::memory:`).
    pub async fn open(path: &str, spec: ChunkSpec) -> Result<Self, StoreError> {
        let pool = db::open_pool(path).await?;
        let index = Self::from_pool(pool, spec).await?;
        info!("Full-text index initialized at {path}");
        Ok(index)
    }

    pub async fn from_pool(pool: SqlitePool, spec: ChunkSpec) -> Result<Self, StoreError> {
        db::migrate(&pool, MIGRATIONS).await?;
        Ok(Self {
            pool,
            spec,
            writer: Mutex::new(()),
        })
    }

    /// Reindex every `*.{extension}` file directly inside `dir`.
    pub async fn reindex_dir(
        &self,
        dir: &Path,
        extension: &str,
        force: bool,
    ) -> Result<ReindexReport, StoreError> {
        let sources = list_sources(dir, extension)?;
        self.reindex(&sources, force).await
    }

    /// Total number of stored chunks.
    pub async fn chunk_count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("chunk count: {e}")))?;
        Ok(count as usize)
    }

    async fn known_hashes(&self) -> Result<HashMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT path, hash FROM sources")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("sources scan: {e}")))?;
        rows.iter()
            .map(|row| {
                let path: String = row.try_get("path").map_err(column_error)?;
                let hash: String = row.try_get("hash").map_err(column_error)?;
                Ok((path, hash))
            })
            .collect()
    }

    /// Replace all chunks of one source. Returns (deleted, written).
    async fn replace_source(
        &self,
        path: &str,
        hash: &str,
        chunks: &[String],
    ) -> Result<(usize, usize), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;

        let deleted = sqlx::query("DELETE FROM chunks WHERE path = ?1")
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE chunks failed: {e}")))?
            .rows_affected() as usize;

        for (idx, content) in chunks.iter().enumerate() {
            sqlx::query("INSERT INTO chunks (path, chunk_idx, content) VALUES (?1, ?2, ?3)")
                .bind(path)
                .bind(idx as i64)
                .bind(content)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Storage(format!("INSERT chunk failed: {e}")))?;
        }

        sqlx::query(
            r#"
            INSERT INTO sources (path, hash, indexed_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(path) DO UPDATE SET
                hash = excluded.hash,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(path)
        .bind(hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("UPSERT source failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;
        Ok((deleted, chunks.len()))
    }

    /// Drop a source and its chunks. Returns the number of chunks deleted.
    async fn remove_source(&self, path: &str) -> Result<usize, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;
        let deleted = sqlx::query("DELETE FROM chunks WHERE path = ?1")
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE chunks failed: {e}")))?
            .rows_affected() as usize;
        sqlx::query("DELETE FROM sources WHERE path = ?1")
            .bind(path)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE source failed: {e}")))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;
        Ok(deleted)
    }

    fn row_to_hit(row: &sqlx::sqlite::SqliteRow) -> Result<SearchHit, StoreError> {
        let path: String = row.try_get("path").map_err(column_error)?;
        let chunk_idx: i64 = row.try_get("chunk_idx").map_err(column_error)?;
        let content: String = row.try_get("content").map_err(column_error)?;
        Ok(SearchHit {
            path,
            chunk_index: chunk_idx as usize,
            content,
        })
    }
}

fn column_error(e: sqlx::Error) -> StoreError {
    StoreError::QueryFailed(format!("column: {e}"))
}

/// Files with the given extension directly inside `dir`, sorted.
pub fn list_sources(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, StoreError> {
    let entries = std::fs::read_dir(dir).map_err(|e| StoreError::SourceUnreadable {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == extension))
        .collect();
    files.sort();
    Ok(files)
}

/// Build an FTS5 query from free text.
///
/// Each word is reduced to alphanumerics, quoted, and prefix-matched.
/// Words are OR-ed so that a chat message finds passages sharing any of
/// its terms; BM25 ranks passages sharing more of them higher.
fn sanitize_fts_query(text: &str) -> String {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{w}\"*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[async_trait]
impl TextIndex for SqliteTextIndex {
    async fn reindex(&self, sources: &[PathBuf], force: bool) -> Result<ReindexReport, StoreError> {
        let _writer = self.writer.lock().await;
        let known = self.known_hashes().await?;
        let mut report = ReindexReport::default();
        let mut seen = BTreeSet::new();

        for source in sources {
            let key = source.display().to_string();
            if !seen.insert(key.clone()) {
                continue;
            }

            let content = match tokio::fs::read_to_string(source).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %key, error = %e, "Skipping unreadable source");
                    report.failed.push(IndexFailure {
                        path: key,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let hash = content_hash(&content);
            if !force && known.get(&key) == Some(&hash) {
                report.unchanged.push(key);
                continue;
            }

            let chunks = chunk_text(&content, self.spec);
            let (deleted, written) = self.replace_source(&key, &hash, &chunks).await?;
            debug!(path = %key, deleted, written, "Source reindexed");
            report.chunks_deleted += deleted;
            report.chunks_written += written;
            report.updated.push(key);
        }

        let mut stale: Vec<&String> = known.keys().filter(|p| !seen.contains(*p)).collect();
        stale.sort();
        for path in stale {
            report.chunks_deleted += self.remove_source(path).await?;
            report.removed.push(path.clone());
        }

        info!(
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Reindex complete"
        );
        Ok(report)
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, StoreError> {
        let fts_query = sanitize_fts_query(query);
        if fts_query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.path, c.chunk_idx, c.content, bm25(chunks_fts) AS rank
            FROM chunks_fts f
            JOIN chunks c ON c.id = f.rowid
            WHERE chunks_fts MATCH ?1
            ORDER BY rank, c.path, c.chunk_idx
            LIMIT ?2
            "#,
        )
        .bind(&fts_query)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("FTS5 search: {e}")))?;

        rows.iter().map(Self::row_to_hit).collect()
    }

    async fn sample(&self, n: usize) -> Result<Vec<SearchHit>, StoreError> {
        let rows = sqlx::query("SELECT path, chunk_idx, content FROM chunks ORDER BY random() LIMIT ?1")
            .bind(n as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("sample: {e}")))?;
        rows.iter().map(Self::row_to_hit).collect()
    }
}
