//! Collection-keyed record store backed by SQLite.
//!
//! Every collector writes into one `records` table partitioned by
//! `collection`. Rows are keyed by `(collection, natural_key)`, carry a
//! `temporal_key` used to derive resume checkpoints, and store their payload
//! as a JSON body.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::SqliteConnection;
use tracing::warn;

const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub natural_key: String,
    pub temporal_key: NaiveDate,
    pub body: JsonValue,
}

/// Per-record tally of one or more upsert calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl PersistOutcome {
    pub fn merge(&mut self, other: PersistOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.failed
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Greatest temporal key persisted for `collection`, `None` when empty.
    async fn max_temporal_key(&self, collection: &str) -> Result<Option<NaiveDate>>;

    /// Idempotent keyed upsert. Individual failures are counted, never raised.
    async fn upsert(&self, collection: &str, records: &[StoredRecord]) -> PersistOutcome;

    async fn fetch_body(&self, collection: &str, natural_key: &str) -> Result<Option<JsonValue>>;

    async fn count(&self, collection: &str) -> Result<u64>;
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    batch_size: usize,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("opening sqlite database {}", path.display()))?;

        Ok(Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Single-connection in-memory database; the connection is never recycled
    /// so the data lives as long as the store.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("opening in-memory sqlite database")?;

        Ok(Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                natural_key TEXT NOT NULL,
                temporal_key TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, natural_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating records table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_temporal ON records(collection, temporal_key)",
        )
        .execute(&self.pool)
        .await
        .context("creating records temporal index")?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn write_one(
        conn: &mut SqliteConnection,
        collection: &str,
        record: &StoredRecord,
        body: &str,
        now: i64,
    ) -> Result<WriteKind, sqlx::Error> {
        let temporal_key = record.temporal_key.format("%Y-%m-%d").to_string();
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT body FROM records WHERE collection = ?1 AND natural_key = ?2",
        )
        .bind(collection)
        .bind(&record.natural_key)
        .fetch_optional(&mut *conn)
        .await?;

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO records (collection, natural_key, temporal_key, body, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .bind(collection)
                .bind(&record.natural_key)
                .bind(&temporal_key)
                .bind(body)
                .bind(now)
                .execute(&mut *conn)
                .await?;
                Ok(WriteKind::Inserted)
            }
            Some(current) if current == body => Ok(WriteKind::Unchanged),
            Some(_) => {
                sqlx::query(
                    "UPDATE records SET temporal_key = ?3, body = ?4, updated_at = ?5 \
                     WHERE collection = ?1 AND natural_key = ?2",
                )
                .bind(collection)
                .bind(&record.natural_key)
                .bind(&temporal_key)
                .bind(body)
                .bind(now)
                .execute(&mut *conn)
                .await?;
                Ok(WriteKind::Updated)
            }
        }
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn max_temporal_key(&self, collection: &str) -> Result<Option<NaiveDate>> {
        let max: Option<String> =
            sqlx::query_scalar("SELECT MAX(temporal_key) FROM records WHERE collection = ?1")
                .bind(collection)
                .fetch_one(&self.pool)
                .await
                .with_context(|| format!("reading max temporal key for {collection}"))?;

        max.map(|value| {
            NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                .with_context(|| format!("stored temporal key `{value}` in {collection}"))
        })
        .transpose()
    }

    async fn upsert(&self, collection: &str, records: &[StoredRecord]) -> PersistOutcome {
        let mut outcome = PersistOutcome::default();
        let now = Utc::now().timestamp();

        for chunk in records.chunks(self.batch_size.max(1)) {
            let mut tx = match self.pool.begin().await {
                Ok(tx) => tx,
                Err(err) => {
                    warn!(collection, error = %err, records = chunk.len(), "could not open upsert transaction");
                    outcome.failed += chunk.len();
                    continue;
                }
            };

            let mut batch = PersistOutcome::default();
            for record in chunk {
                let body = match serde_json::to_string(&record.body) {
                    Ok(body) => body,
                    Err(err) => {
                        warn!(collection, natural_key = %record.natural_key, error = %err, "record body not serializable");
                        batch.failed += 1;
                        continue;
                    }
                };

                match Self::write_one(&mut *tx, collection, record, &body, now).await {
                    Ok(WriteKind::Inserted) => batch.inserted += 1,
                    Ok(WriteKind::Updated) => batch.updated += 1,
                    Ok(WriteKind::Unchanged) => batch.unchanged += 1,
                    Err(err) => {
                        warn!(collection, natural_key = %record.natural_key, error = %err, "record upsert failed");
                        batch.failed += 1;
                    }
                }
            }

            match tx.commit().await {
                Ok(()) => outcome.merge(batch),
                Err(err) => {
                    warn!(collection, error = %err, records = chunk.len(), "upsert batch commit failed");
                    outcome.failed += chunk.len();
                }
            }
        }

        outcome
    }

    async fn fetch_body(&self, collection: &str, natural_key: &str) -> Result<Option<JsonValue>> {
        let body: Option<String> = sqlx::query_scalar(
            "SELECT body FROM records WHERE collection = ?1 AND natural_key = ?2",
        )
        .bind(collection)
        .bind(natural_key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("reading {collection}/{natural_key}"))?;

        body.map(|text| {
            serde_json::from_str(&text)
                .with_context(|| format!("decoding stored body for {collection}/{natural_key}"))
        })
        .transpose()
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("counting {collection}"))?;
        Ok(count.max(0) as u64)
    }
}
