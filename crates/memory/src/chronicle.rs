//! SQLite-backed chronicle: tagged exchange events plus raw chat history.
//!
//! Timestamps are stored as integer microseconds since the epoch so that
//! range scans compare numbers, not strings.

use crate::db;
use crate::stamp::Stamper;
use async_trait::async_trait;
use cadence_core::chronicle::{ChronicleEvent, ChronicleStore, Direction, HistoryRecord};
use cadence_core::error::StoreError;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, info};

const TAG_SEPARATOR: char = '\u{1f}';

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "events table",
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            thread      TEXT NOT NULL,
            actor_id    TEXT NOT NULL,
            prompt      TEXT NOT NULL,
            reply       TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        )
        "#,
    ),
    (
        "event tags table",
        r#"
        CREATE TABLE IF NOT EXISTS event_tags (
            event_id    INTEGER NOT NULL REFERENCES events(id),
            tag         TEXT NOT NULL,
            PRIMARY KEY (event_id, tag)
        )
        "#,
    ),
    (
        "messages table",
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            seq         INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     TEXT NOT NULL,
            message_id  TEXT NOT NULL,
            actor_id    TEXT NOT NULL,
            actor_name  TEXT,
            direction   TEXT NOT NULL,
            text        TEXT NOT NULL,
            recorded_at INTEGER NOT NULL,
            UNIQUE(chat_id, message_id)
        )
        "#,
    ),
    (
        "events time index",
        "CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at)",
    ),
    (
        "events thread index",
        "CREATE INDEX IF NOT EXISTS idx_events_thread ON events(thread, created_at)",
    ),
    (
        "tag index",
        "CREATE INDEX IF NOT EXISTS idx_event_tags_tag ON event_tags(tag)",
    ),
];

pub struct SqliteChronicle {
    pool: SqlitePool,
    /// Held across stamp-and-insert so per-thread order is preserved.
    stamper: Mutex<Stamper>,
}

impl SqliteChronicle {
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let pool = db::open_pool(path).await?;
        let chronicle = Self::from_pool(pool).await?;
        info!("Chronicle initialized at {path}");
        Ok(chronicle)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        db::migrate(&pool, MIGRATIONS).await?;
        Ok(Self {
            pool,
            stamper: Mutex::new(Stamper::new()),
        })
    }

    async fn persisted_last(&self, thread: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let micros: Option<i64> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM events WHERE thread = ?1")
                .bind(thread)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("last stamp: {e}")))?;
        micros.map(from_micros).transpose()
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<ChronicleEvent, StoreError> {
        let tags: Option<String> = row.try_get("tags").map_err(column_error)?;
        let created: i64 = row.try_get("created_at").map_err(column_error)?;
        Ok(ChronicleEvent {
            thread: row.try_get("thread").map_err(column_error)?,
            actor_id: row.try_get("actor_id").map_err(column_error)?,
            tags: tags
                .map(|t| t.split(TAG_SEPARATOR).map(str::to_string).collect())
                .unwrap_or_default(),
            prompt: row.try_get("prompt").map_err(column_error)?,
            reply: row.try_get("reply").map_err(column_error)?,
            created_at: from_micros(created)?,
        })
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<HistoryRecord, StoreError> {
        let direction: String = row.try_get("direction").map_err(column_error)?;
        let recorded: i64 = row.try_get("recorded_at").map_err(column_error)?;
        Ok(HistoryRecord {
            chat_id: row.try_get("chat_id").map_err(column_error)?,
            message_id: row.try_get("message_id").map_err(column_error)?,
            actor_id: row.try_get("actor_id").map_err(column_error)?,
            actor_name: row.try_get("actor_name").map_err(column_error)?,
            direction: match direction.as_str() {
                "outbound" => Direction::Outbound,
                _ => Direction::Inbound,
            },
            text: row.try_get("text").map_err(column_error)?,
            recorded_at: from_micros(recorded)?,
        })
    }
}

fn column_error(e: sqlx::Error) -> StoreError {
    StoreError::QueryFailed(format!("column: {e}"))
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::QueryFailed(format!("timestamp out of range: {micros}")))
}

const EVENT_COLUMNS: &str = r#"
    e.thread, e.actor_id, e.prompt, e.reply, e.created_at,
    (SELECT group_concat(t.tag, char(31)) FROM event_tags t WHERE t.event_id = e.id) AS tags
"#;

const MESSAGE_COLUMNS: &str =
    "chat_id, message_id, actor_id, actor_name, direction, text, recorded_at";

#[async_trait]
impl ChronicleStore for SqliteChronicle {
    async fn append(&self, mut event: ChronicleEvent) -> Result<ChronicleEvent, StoreError> {
        let mut stamper = self.stamper.lock().await;
        if stamper.last(&event.thread).is_none() {
            if let Some(last) = self.persisted_last(&event.thread).await? {
                stamper.observe(&event.thread, last);
            }
        }
        // Stamp at the stored precision so reopened stores agree with memory.
        event.created_at = stamper.stamp(
            &event.thread,
            event.created_at.trunc_subsecs(6),
            Utc::now().trunc_subsecs(6),
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;
        let id = sqlx::query(
            "INSERT INTO events (thread, actor_id, prompt, reply, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&event.thread)
        .bind(&event.actor_id)
        .bind(&event.prompt)
        .bind(&event.reply)
        .bind(event.created_at.timestamp_micros())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT event failed: {e}")))?
        .last_insert_rowid();

        for tag in &event.tags {
            sqlx::query("INSERT OR IGNORE INTO event_tags (event_id, tag) VALUES (?1, ?2)")
                .bind(id)
                .bind(tag)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Storage(format!("INSERT tag failed: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;

        debug!(thread = %event.thread, id, "Chronicle event appended");
        Ok(event)
    }

    async fn query(
        &self,
        tags: &BTreeSet<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ChronicleEvent>, StoreError> {
        let mut sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events e WHERE e.created_at BETWEEN ?1 AND ?2"
        );
        if !tags.is_empty() {
            let placeholders: Vec<String> = (0..tags.len()).map(|i| format!("?{}", i + 3)).collect();
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM event_tags t WHERE t.event_id = e.id AND t.tag IN ({}))",
                placeholders.join(", ")
            ));
        }
        sql.push_str(" ORDER BY e.created_at ASC, e.id ASC");

        let mut query = sqlx::query(&sql)
            .bind(start.timestamp_micros())
            .bind(end.timestamp_micros());
        for tag in tags {
            query = query.bind(tag);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("chronicle query: {e}")))?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn record_message(&self, record: HistoryRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO messages
                (chat_id, message_id, actor_id, actor_name, direction, text, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&record.chat_id)
        .bind(&record.message_id)
        .bind(&record.actor_id)
        .bind(&record.actor_name)
        .bind(record.direction.as_str())
        .bind(&record.text)
        .bind(record.recorded_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT message failed: {e}")))?;
        Ok(())
    }

    async fn window_around(
        &self,
        anchor_message_id: &str,
        chat_id: &str,
        radius: usize,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        let anchor = sqlx::query(&format!(
            "SELECT seq, {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 AND message_id = ?2"
        ))
        .bind(chat_id)
        .bind(anchor_message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("anchor lookup: {e}")))?;

        let Some(anchor) = anchor else {
            return Ok(Vec::new());
        };
        let seq: i64 = anchor.try_get("seq").map_err(column_error)?;

        let before = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 AND seq < ?2 ORDER BY seq DESC LIMIT ?3"
        ))
        .bind(chat_id)
        .bind(seq)
        .bind(radius as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("window before: {e}")))?;

        let after = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 AND seq > ?2 AND recorded_at <= ?3 ORDER BY seq ASC LIMIT ?4"
        ))
        .bind(chat_id)
        .bind(seq)
        .bind(end.timestamp_micros())
        .bind(radius as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("window after: {e}")))?;

        let mut window = Vec::with_capacity(before.len() + after.len() + 1);
        for row in before.iter().rev() {
            window.push(Self::row_to_record(row)?);
        }
        window.push(Self::row_to_record(&anchor)?);
        for row in &after {
            window.push(Self::row_to_record(row)?);
        }
        Ok(window)
    }

    async fn message_time(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let micros: Option<i64> = sqlx::query_scalar(
            "SELECT recorded_at FROM messages WHERE chat_id = ?1 AND message_id = ?2",
        )
        .bind(chat_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("message time: {e}")))?;
        micros.map(from_micros).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::chronicle::{TAG_REPLY, TAG_SKIPPED};
    use chrono::Duration;

    async fn test_chronicle() -> SqliteChronicle {
        SqliteChronicle::open("sqlite::memory:").await.unwrap()
    }

    fn tags(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn record(chat: &str, id: usize, at: DateTime<Utc>) -> HistoryRecord {
        HistoryRecord {
            chat_id: chat.into(),
            message_id: id.to_string(),
            actor_id: "u1".into(),
            actor_name: Some("Ada".into()),
            direction: Direction::Inbound,
            text: format!("message {id}"),
            recorded_at: at,
        }
    }

    #[tokio::test]
    async fn append_and_query_by_range_and_tag() {
        let chronicle = test_chronicle().await;
        let t0 = Utc::now() - Duration::minutes(30);

        chronicle
            .append(ChronicleEvent::new("c1", "u1", "hi", "hello").tagged(["cli", TAG_REPLY]).at(t0))
            .await
            .unwrap();
        chronicle
            .append(
                ChronicleEvent::new("c2", "u2", "ok", "")
                    .tagged(["telegram", TAG_SKIPPED])
                    .at(t0 + Duration::minutes(1)),
            )
            .await
            .unwrap();

        let window = (t0 - Duration::minutes(5), t0 + Duration::minutes(5));
        let all = chronicle.query(&BTreeSet::new(), window.0, window.1).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].prompt, "hi");
        assert_eq!(all[0].tags, tags(&["cli", TAG_REPLY]));

        let cli = chronicle.query(&tags(&["cli"]), window.0, window.1).await.unwrap();
        assert_eq!(cli.len(), 1);
        assert_eq!(cli[0].thread, "c1");

        let either = chronicle
            .query(&tags(&["cli", "telegram"]), window.0, window.1)
            .await
            .unwrap();
        assert_eq!(either.len(), 2);

        let outside = chronicle
            .query(&BTreeSet::new(), t0 + Duration::minutes(2), t0 + Duration::minutes(9))
            .await
            .unwrap();
        assert!(outside.is_empty());
    }

    #[tokio::test]
    async fn late_arrival_is_restamped() {
        let chronicle = test_chronicle().await;
        let t0 = Utc::now();
        chronicle
            .append(ChronicleEvent::new("c1", "u1", "first", "a").at(t0))
            .await
            .unwrap();

        let late = chronicle
            .append(ChronicleEvent::new("c1", "u1", "second", "b").at(t0 - Duration::minutes(10)))
            .await
            .unwrap();
        assert!(late.created_at >= t0);

        let events = chronicle
            .query(&BTreeSet::new(), t0 - Duration::hours(1), Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        let prompts: Vec<_> = events.iter().map(|e| e.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn window_around_anchor() {
        let chronicle = test_chronicle().await;
        let t0 = Utc::now() - Duration::hours(1);
        for i in 0..30 {
            chronicle
                .record_message(record("chat", i, t0 + Duration::minutes(i as i64)))
                .await
                .unwrap();
        }
        chronicle.record_message(record("other", 100, t0)).await.unwrap();

        let window = chronicle
            .window_around("15", "chat", 3, Utc::now())
            .await
            .unwrap();
        let ids: Vec<_> = window.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["12", "13", "14", "15", "16", "17", "18"]);

        let truncated = chronicle
            .window_around("15", "chat", 3, t0 + Duration::minutes(16))
            .await
            .unwrap();
        assert_eq!(truncated.last().map(|r| r.message_id.as_str()), Some("16"));

        let edge = chronicle.window_around("1", "chat", 3, Utc::now()).await.unwrap();
        assert_eq!(edge.first().map(|r| r.message_id.as_str()), Some("0"));
        assert_eq!(edge.len(), 5);
    }

    #[tokio::test]
    async fn unknown_anchor_yields_empty_window() {
        let chronicle = test_chronicle().await;
        chronicle.record_message(record("chat", 1, Utc::now())).await.unwrap();
        assert!(chronicle
            .window_around("404", "chat", 10, Utc::now())
            .await
            .unwrap()
            .is_empty());
        assert!(chronicle
            .window_around("1", "other-chat", 10, Utc::now())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn message_time_lookup() {
        let chronicle = test_chronicle().await;
        let at = DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap();
        chronicle.record_message(record("chat", 7, at)).await.unwrap();

        assert_eq!(chronicle.message_time("chat", "7").await.unwrap(), Some(at));
        assert_eq!(chronicle.message_time("chat", "8").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_messages_are_ignored() {
        let chronicle = test_chronicle().await;
        let at = Utc::now();
        chronicle.record_message(record("chat", 1, at)).await.unwrap();
        chronicle.record_message(record("chat", 1, at)).await.unwrap();
        let window = chronicle.window_around("1", "chat", 5, at).await.unwrap();
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn stamps_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chronicle.db");
        let path = path.to_str().unwrap();
        let future = Utc::now() + Duration::hours(2);

        let first = {
            let chronicle = SqliteChronicle::open(path).await.unwrap();
            chronicle
                .append(ChronicleEvent::new("c1", "u1", "a", "b").at(future))
                .await
                .unwrap()
        };

        let chronicle = SqliteChronicle::open(path).await.unwrap();
        let stored = chronicle
            .append(ChronicleEvent::new("c1", "u1", "c", "d"))
            .await
            .unwrap();
        assert!(stored.created_at >= first.created_at);
        assert!(future - stored.created_at < Duration::microseconds(1));
    }

    #[tokio::test]
    async fn returned_stamp_matches_what_is_read_back() {
        let chronicle = test_chronicle().await;
        let stored = chronicle
            .append(ChronicleEvent::new("c1", "u1", "a", "b").tagged([TAG_REPLY]))
            .await
            .unwrap();
        let read = chronicle
            .query(
                &BTreeSet::new(),
                stored.created_at - Duration::seconds(1),
                stored.created_at + Duration::seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].created_at, stored.created_at);
    }
}
