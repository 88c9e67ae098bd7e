//! Read-only analytical queries over the transformed tables.
//!
//! The transform stage owns `fct_messages`, `dim_channels` and
//! `fct_image_detections`; nothing here writes to them. A missing table or a
//! failing query is reported as [`ReportError::Unavailable`], never a panic.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ApiConfig;
use crate::db::Database;
use crate::error::WarehouseError;
use crate::schema::marts;

/// Errors surfaced by report queries
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("{0}")]
    NotFound(String),

    #[error("report data unavailable: {0}")]
    Unavailable(String),
}

impl ReportError {
    /// Stable kind name used in API responses
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<rusqlite::Error> for ReportError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<WarehouseError> for ReportError {
    fn from(e: WarehouseError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

pub type ReportResult<T> = std::result::Result<T, ReportError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMention {
    pub term: String,
    pub mention_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelActivity {
    pub day: NaiveDate,
    pub post_count: i64,
    pub daily_views: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSearchResult {
    pub message_id: i64,
    pub date: NaiveDate,
    pub message_text: Option<String>,
    pub view_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualStat {
    pub channel_name: String,
    pub total_images: i64,
    pub primary_category: Option<String>,
    pub avg_confidence: f64,
}

/// Resolve a requested limit against the API bounds
///
/// Absent means `default`; anything outside `1..=max_limit` is clamped.
pub fn clamp_limit(requested: Option<i64>, default: u32, api: &ApiConfig) -> u32 {
    let max = i64::from(api.max_limit.max(1));
    let limit = requested.unwrap_or_else(|| i64::from(default)).clamp(1, max);
    u32::try_from(limit).unwrap_or(api.max_limit)
}

/// `date_key` is an integer of the form `yyyymmdd`
fn date_from_key(key: i64) -> ReportResult<NaiveDate> {
    NaiveDate::parse_from_str(&key.to_string(), "%Y%m%d")
        .map_err(|_| ReportError::Unavailable(format!("malformed date_key {key}")))
}

/// Escape LIKE wildcards so the query is matched literally
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl Database {
    /// Most frequent non-null message texts
    pub fn top_products(&self, limit: u32) -> ReportResult<Vec<ProductMention>> {
        let conn = self.get_connection()?;
        top_products(&conn, limit)
    }

    /// Per-day posting activity for one channel, newest first
    pub fn channel_activity(&self, channel: &str) -> ReportResult<Vec<ChannelActivity>> {
        let conn = self.get_connection()?;
        channel_activity(&conn, channel)
    }

    /// Case-insensitive substring search over message text, newest first
    pub fn search_messages(&self, query: &str, limit: u32) -> ReportResult<Vec<MessageSearchResult>> {
        let conn = self.get_connection()?;
        search_messages(&conn, query, limit)
    }

    /// Image statistics per channel
    pub fn visual_content(&self) -> ReportResult<Vec<VisualStat>> {
        let conn = self.get_connection()?;
        visual_content(&conn)
    }
}

fn top_products(conn: &Connection, limit: u32) -> ReportResult<Vec<ProductMention>> {
    let sql = format!(
        "SELECT message_text, COUNT(*) AS mention_count
         FROM {}
         WHERE message_text IS NOT NULL
         GROUP BY message_text
         ORDER BY mention_count DESC, message_text ASC
         LIMIT ?1",
        marts::FCT_MESSAGES
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(ProductMention {
            term: row.get(0)?,
            mention_count: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn channel_activity(conn: &Connection, channel: &str) -> ReportResult<Vec<ChannelActivity>> {
    let sql = format!(
        "SELECT m.date_key, COUNT(m.message_id), COALESCE(SUM(m.view_count), 0)
         FROM {} m
         JOIN {} c ON m.channel_key = c.channel_key
         WHERE c.channel_name = ?1
         GROUP BY m.date_key
         ORDER BY m.date_key DESC",
        marts::FCT_MESSAGES,
        marts::DIM_CHANNELS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![channel], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        return Err(ReportError::NotFound(format!("No activity found for channel: {channel}")));
    }

    rows.into_iter()
        .map(|(date_key, post_count, daily_views)| -> ReportResult<ChannelActivity> {
            Ok(ChannelActivity {
                day: date_from_key(date_key)?,
                post_count,
                daily_views,
            })
        })
        .collect()
}

fn search_messages(conn: &Connection, query: &str, limit: u32) -> ReportResult<Vec<MessageSearchResult>> {
    let sql = format!(
        "SELECT message_id, date_key, message_text, view_count
         FROM {}
         WHERE message_text LIKE ?1 ESCAPE '\\'
         ORDER BY date_key DESC, message_id DESC
         LIMIT ?2",
        marts::FCT_MESSAGES
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![like_pattern(query), limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(message_id, date_key, message_text, view_count)| -> ReportResult<MessageSearchResult> {
            Ok(MessageSearchResult {
                message_id,
                date: date_from_key(date_key)?,
                message_text,
                view_count,
            })
        })
        .collect()
}

fn visual_content(conn: &Connection) -> ReportResult<Vec<VisualStat>> {
    // Most frequent class per channel; ties go to the alphabetically first class
    let sql = format!(
        "SELECT c.channel_name,
                COUNT(i.message_id) AS total_images,
                (SELECT i2.detected_class
                 FROM {detections} i2
                 JOIN {channels} c2 ON i2.channel_key = c2.channel_key
                 WHERE c2.channel_name = c.channel_name
                 GROUP BY i2.detected_class
                 ORDER BY COUNT(*) DESC, i2.detected_class ASC
                 LIMIT 1) AS primary_category,
                ROUND(AVG(i.confidence_score), 2) AS avg_confidence
         FROM {detections} i
         JOIN {channels} c ON i.channel_key = c.channel_key
         GROUP BY c.channel_name
         ORDER BY total_images DESC, c.channel_name ASC",
        detections = marts::FCT_IMAGE_DETECTIONS,
        channels = marts::DIM_CHANNELS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(VisualStat {
            channel_name: row.get(0)?,
            total_images: row.get(1)?,
            primary_category: row.get(2)?,
            avg_confidence: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
