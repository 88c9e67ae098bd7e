use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{
    BatchReport, CanonicalMessage, ImageClassification, ImageLabel, ImageRef, MessageKey, StoredMessage,
    UpsertOutcome,
};
use crate::repository::{EnrichmentStore, RawStore};
use crate::schema::{image_classifications, image_detections, raw_messages};

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database manager for handling connections and operations
///
/// Opened once at process start; clones share the same pool.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection pool with default pool settings
    pub fn new(database_url: &str) -> Result<Self> {
        Self::open(database_url, 4, Duration::from_secs(5))
    }

    /// Create a pool from configuration
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::open(&config.url, config.max_connections, Duration::from_secs(config.busy_timeout_secs))
    }

    /// Create a new database connection pool
    pub fn open(database_url: &str, max_connections: u32, busy_timeout: Duration) -> Result<Self> {
        let path = database_path(database_url);

        if path == ":memory:" {
            // Every in-memory connection is its own database, so the pool holds exactly one
            return Self::build(SqliteConnectionManager::memory(), 1, busy_timeout);
        }

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        Self::build(SqliteConnectionManager::file(path), max_connections, busy_timeout)
    }

    /// Private in-memory database, mostly for tests
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:", 1, Duration::from_secs(5))
    }

    fn build(manager: SqliteConnectionManager, max_connections: u32, busy_timeout: Duration) -> Result<Self> {
        let manager = manager.with_init(move |conn| conn.busy_timeout(busy_timeout));
        let pool = Pool::builder().max_size(max_connections.max(1)).build(manager)?;

        // Run migrations
        let conn = pool.get()?;
        Self::run_migrations(&conn)?;

        Ok(Self { pool })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!("../migrations/2026-01-20-000000_create_raw_messages/up.sql"))?;
        conn.execute_batch(include_str!("../migrations/2026-01-24-000000_create_image_enrichment/up.sql"))?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Conditionally insert one record keyed on (`message_id`, `channel_username`)
    pub fn upsert_message(&self, message: &CanonicalMessage) -> Result<UpsertOutcome> {
        let conn = self.get_connection()?;
        let changed = insert_raw(&conn, message, Utc::now())?;
        Ok(outcome(changed))
    }

    /// Insert all records of one file in a single transaction
    ///
    /// A record the database refuses is counted as failed and skipped; the rest
    /// of the batch still commits.
    pub fn upsert_batch(&self, messages: &[CanonicalMessage]) -> Result<BatchReport> {
        let mut conn = self.get_connection()?;
        // Take the write lock up front so concurrent loads queue on the busy timeout
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let loaded_at = Utc::now();
        let mut report = BatchReport::default();

        for message in messages {
            match insert_raw(&tx, message, loaded_at) {
                Ok(changed) => match outcome(changed) {
                    UpsertOutcome::Inserted => report.inserted += 1,
                    UpsertOutcome::Duplicate => report.duplicates += 1,
                },
                Err(e) => {
                    warn!(key = %message.key(), error = %e, "Failed to insert record");
                    report.failed += 1;
                }
            }
        }

        tx.commit()?;
        debug!(
            inserted = report.inserted,
            duplicates = report.duplicates,
            failed = report.failed,
            "Committed batch"
        );
        Ok(report)
    }

    /// Get a stored message by its natural key
    pub fn get_message(&self, key: &MessageKey) -> Result<Option<StoredMessage>> {
        let conn = self.get_connection()?;

        let message = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ? AND {} = ?",
                    raw_messages::TABLE,
                    raw_messages::MESSAGE_ID,
                    raw_messages::CHANNEL_USERNAME
                ),
                params![key.message_id, key.channel_username],
                map_stored_message,
            )
            .optional()?;

        Ok(message)
    }

    /// Number of rows in the raw store
    pub fn count_messages(&self) -> Result<usize> {
        let conn = self.get_connection()?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", raw_messages::TABLE), [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Messages that carry an image, in key order
    pub fn media_messages(&self) -> Result<Vec<ImageRef>> {
        let conn = self.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {id}, {channel}, {path} FROM {table} WHERE {media} = 1 AND {path} IS NOT NULL ORDER BY {channel}, {id}",
            id = raw_messages::MESSAGE_ID,
            channel = raw_messages::CHANNEL_USERNAME,
            path = raw_messages::IMAGE_PATH,
            table = raw_messages::TABLE,
            media = raw_messages::HAS_MEDIA,
        ))?;

        let image_iter = stmt.query_map([], |row| {
            Ok(ImageRef {
                key: MessageKey {
                    message_id: row.get(0)?,
                    channel_username: row.get(1)?,
                },
                image_path: row.get(2)?,
            })
        })?;

        let mut results = Vec::new();
        for image in image_iter {
            results.push(image?);
        }

        Ok(results)
    }

    /// Replace the stored classification of one image
    pub fn save_classification(&self, key: &MessageKey, classification: &ImageClassification) -> Result<usize> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        tx.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ? AND {} = ?",
                image_detections::TABLE,
                image_detections::MESSAGE_ID,
                image_detections::CHANNEL_USERNAME
            ),
            params![key.message_id, key.channel_username],
        )?;

        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                image_detections::TABLE,
                image_detections::MESSAGE_ID,
                image_detections::CHANNEL_USERNAME,
                image_detections::DETECTED_CLASS,
                image_detections::CONFIDENCE_SCORE,
                image_detections::X1,
                image_detections::Y1,
                image_detections::X2,
                image_detections::Y2
            ))?;
            for detection in &classification.detections {
                let [x1, y1, x2, y2] = detection.bounding_box.0;
                stmt.execute(params![
                    key.message_id,
                    key.channel_username,
                    detection.detected_class,
                    f64::from(detection.confidence_score),
                    f64::from(x1),
                    f64::from(y1),
                    f64::from(x2),
                    f64::from(y2)
                ])?;
            }
        }

        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO {} ({}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?)",
                image_classifications::TABLE,
                image_classifications::MESSAGE_ID,
                image_classifications::CHANNEL_USERNAME,
                image_classifications::IMAGE_CATEGORY,
                image_classifications::DETECTION_COUNT,
                image_classifications::CLASSIFIED_AT
            ),
            params![
                key.message_id,
                key.channel_username,
                classification.label.as_str(),
                i64::try_from(classification.detections.len()).unwrap_or(i64::MAX),
                Utc::now()
            ],
        )?;

        tx.commit()?;
        Ok(classification.detections.len())
    }

    /// Stored label and detection count for one image
    pub fn get_classification(&self, key: &MessageKey) -> Result<Option<(ImageLabel, usize)>> {
        let conn = self.get_connection()?;

        let stored = conn
            .query_row(
                &format!(
                    "SELECT {}, {} FROM {} WHERE {} = ? AND {} = ?",
                    image_classifications::IMAGE_CATEGORY,
                    image_classifications::DETECTION_COUNT,
                    image_classifications::TABLE,
                    image_classifications::MESSAGE_ID,
                    image_classifications::CHANNEL_USERNAME
                ),
                params![key.message_id, key.channel_username],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        Ok(stored.and_then(|(label, count)| {
            let label = ImageLabel::ALL.into_iter().find(|candidate| candidate.as_str() == label)?;
            Some((label, usize::try_from(count).unwrap_or_default()))
        }))
    }

    /// Number of detection rows stored for one image
    pub fn count_detections(&self, key: &MessageKey) -> Result<usize> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ? AND {} = ?",
                image_detections::TABLE,
                image_detections::MESSAGE_ID,
                image_detections::CHANNEL_USERNAME
            ),
            params![key.message_id, key.channel_username],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl RawStore for Database {
    fn upsert_batch(&self, messages: &[CanonicalMessage]) -> Result<BatchReport> {
        Self::upsert_batch(self, messages)
    }
}

impl EnrichmentStore for Database {
    fn media_messages(&self) -> Result<Vec<ImageRef>> {
        Self::media_messages(self)
    }

    fn save_classification(&self, key: &MessageKey, classification: &ImageClassification) -> Result<usize> {
        Self::save_classification(self, key, classification)
    }
}

/// Strip the `sqlite:` scheme from a database URL
fn database_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

const fn outcome(changed: usize) -> UpsertOutcome {
    if changed == 0 {
        UpsertOutcome::Duplicate
    } else {
        UpsertOutcome::Inserted
    }
}

/// Insert unless the key already exists; returns the number of rows written
fn insert_raw(conn: &Connection, message: &CanonicalMessage, loaded_at: DateTime<Utc>) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT ({}, {}) DO NOTHING",
        raw_messages::TABLE,
        raw_messages::MESSAGE_ID,
        raw_messages::CHANNEL_USERNAME,
        raw_messages::CHANNEL_TITLE,
        raw_messages::POSTED_AT,
        raw_messages::TEXT,
        raw_messages::VIEW_COUNT,
        raw_messages::FORWARD_COUNT,
        raw_messages::HAS_MEDIA,
        raw_messages::IMAGE_PATH,
        raw_messages::LOADED_AT,
        raw_messages::MESSAGE_ID,
        raw_messages::CHANNEL_USERNAME
    ))?;

    stmt.execute(params![
        message.message_id,
        message.channel_username,
        message.channel_title,
        message.posted_at,
        message.text,
        message.view_count,
        message.forward_count,
        message.has_media,
        message.image_path,
        loaded_at
    ])
}

/// Map a database row to a StoredMessage
fn map_stored_message(row: &Row) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        message: CanonicalMessage {
            message_id: row.get(raw_messages::MESSAGE_ID)?,
            channel_username: row.get(raw_messages::CHANNEL_USERNAME)?,
            channel_title: row.get(raw_messages::CHANNEL_TITLE)?,
            posted_at: row.get(raw_messages::POSTED_AT)?,
            text: row.get(raw_messages::TEXT)?,
            view_count: row.get(raw_messages::VIEW_COUNT)?,
            forward_count: row.get(raw_messages::FORWARD_COUNT)?,
            has_media: row.get(raw_messages::HAS_MEDIA)?,
            image_path: row.get(raw_messages::IMAGE_PATH)?,
        },
        loaded_at: row.get(raw_messages::LOADED_AT)?,
    })
}
