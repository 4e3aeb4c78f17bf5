//! Shared type definitions for the database layer.
//!
//! Timestamps are stored as UTC `%Y-%m-%d %H:%M:%S` TEXT so that SQLite's
//! `datetime('now', ...)` window arithmetic compares directly against column
//! values. Row structs carry parsed enums and timestamps; unknown stored
//! status strings fall back to their documented defaults.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    ActivityStatus, AlertKind, AlertStatus, PreferredTime, Priority, RecommendationStatus,
};

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),
}

/// Storage format for timestamp columns.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a timestamp for storage.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts the canonical storage format and
/// RFC 3339 for rows written by external collaborators.
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
}

/// Convert a required timestamp column, surfacing a conversion failure as a
/// rusqlite error so `query_map` callers propagate it normally.
pub(crate) fn column_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp: {raw}").into(),
        )
    })
}

// =============================================================================
// Rows
// =============================================================================

/// A row from the `activities` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbActivity {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Tags stored as a JSON array column.
    pub tags: Vec<String>,
    pub status: ActivityStatus,
    pub created_at: DateTime<Utc>,
}

/// A row from the `activity_analyses` table. Exactly one row per
/// activity_type — writes go through the upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbActivityAnalysis {
    pub activity_type: String,
    pub preferred_time: PreferredTime,
    pub frequency_per_week: f64,
    pub frequency_per_month: f64,
    pub description: String,
    pub last_updated: DateTime<Utc>,
}

/// A row from the `events` table. Read-only to this service — events are
/// created by the extraction collaborator (and by tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbEvent {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub priority: Priority,
    pub description: Option<String>,
}

/// A row from the `alerts` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAlert {
    pub id: String,
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    pub trigger_time: Option<DateTime<Utc>>,
    pub recurrence: Option<String>,
    pub priority: Priority,
    pub status: AlertStatus,
    pub source: Option<String>,
    pub event_id: Option<String>,
    pub recommendation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting an alert. The lifecycle layer decides the initial
/// status and computes the dedup key before the row reaches the store.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    pub trigger_time: Option<DateTime<Utc>>,
    pub recurrence: Option<String>,
    pub priority: Priority,
    pub status: AlertStatus,
    pub source: Option<String>,
    pub event_id: Option<String>,
    pub recommendation_id: Option<String>,
}

/// A row from the `recommendations` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbRecommendation {
    pub id: String,
    pub recommendation_type: String,
    pub title: String,
    pub content: String,
    /// Always within [1, 10]; clamped before insert.
    pub score: i64,
    pub reason: Option<String>,
    pub status: RecommendationStatus,
    pub shown_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Validated recommendation candidate ready for batch insert.
#[derive(Debug, Clone)]
pub struct NewRecommendation {
    pub recommendation_type: String,
    pub title: String,
    pub content: String,
    pub score: i64,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ts_round_trip() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0).unwrap();
        let stored = format_ts(ts);
        assert_eq!(stored, "2026-03-10 09:30:00");
        assert_eq!(parse_ts(&stored), Some(ts));
    }

    #[test]
    fn test_parse_ts_accepts_rfc3339() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 10, 9, 30, 0).unwrap();
        assert_eq!(parse_ts("2026-03-10T09:30:00+00:00"), Some(ts));
        assert_eq!(parse_ts("2026-03-10T04:30:00-05:00"), Some(ts));
    }

    #[test]
    fn test_parse_ts_rejects_garbage() {
        assert_eq!(parse_ts("yesterday"), None);
        assert_eq!(parse_ts(""), None);
    }
}
