//! SQLite-based store for activities, events, alerts, and recommendations.
//!
//! The database lives at `~/.beacon/beacon.db` and is the working store the
//! scheduler loop reads and writes. There is exactly one writer thread (the
//! scheduler worker), so the dedup check-then-insert in the alert lifecycle
//! is safe without explicit locking — see DESIGN.md before scaling this out.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::{
    ActivityStatus, AlertKind, AlertStatus, PreferredTime, Priority, RecommendationStatus,
};

pub mod types;
pub use types::*;

pub struct AlertDb {
    conn: Connection,
}

/// Dedup key for an alert's logical identity: sha256 over (kind, title).
/// Stored in its own indexed column so the rolling-window duplicate lookup
/// is a single range scan.
fn dedup_key(kind: AlertKind, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl AlertDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Self) -> Result<T, String>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| format!("Failed to begin transaction: {e}"))?;
        match f(self) {
            Ok(val) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|e| format!("Failed to commit transaction: {e}"))?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.beacon/beacon.db` and apply the
    /// schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL mode for better concurrent read performance (watchdog, tooling)
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.beacon/beacon.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".beacon").join("beacon.db"))
    }

    // =========================================================================
    // Activities
    // =========================================================================

    /// Insert an activity. Entry point for the extraction collaborator.
    pub fn create_activity(
        &self,
        name: &str,
        description: Option<&str>,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        tags: &[String],
    ) -> Result<String, DbError> {
        let id = format!("act-{}", Uuid::new_v4());
        let tags_json = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());
        self.conn.execute(
            "INSERT INTO activities (id, name, description, start_time, end_time, tags, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
            params![
                id,
                name,
                description,
                start_time.map(format_ts),
                end_time.map(format_ts),
                tags_json,
            ],
        )?;
        Ok(id)
    }

    fn map_activity(row: &Row) -> rusqlite::Result<DbActivity> {
        let tags_raw: String = row.get(5)?;
        Ok(DbActivity {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            start_time: row.get::<_, Option<String>>(3)?.as_deref().and_then(parse_ts),
            end_time: row.get::<_, Option<String>>(4)?.as_deref().and_then(parse_ts),
            tags: serde_json::from_str(&tags_raw).unwrap_or_default(),
            status: ActivityStatus::parse_or_default(&row.get::<_, String>(6)?),
            created_at: column_ts(7, row.get(7)?)?,
        })
    }

    /// All activities still awaiting grouped analysis, oldest first.
    pub fn get_pending_activities(&self) -> Result<Vec<DbActivity>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, start_time, end_time, tags, status, created_at
             FROM activities WHERE status = 'pending' ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], Self::map_activity)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Flip a batch of activities to `analyzed`. Called only after the
    /// grouped analysis that covered them succeeded.
    pub fn mark_activities_analyzed(&self, ids: &[String]) -> Result<(), DbError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.with_transaction(|db| {
            let mut stmt = db
                .conn
                .prepare("UPDATE activities SET status = 'analyzed' WHERE id = ?1")
                .map_err(|e| e.to_string())?;
            for id in ids {
                stmt.execute(params![id]).map_err(|e| e.to_string())?;
            }
            Ok(())
        })
        .map_err(DbError::Transaction)
    }

    // =========================================================================
    // Activity analyses
    // =========================================================================

    /// Insert or update the single analysis row for an activity type.
    pub fn upsert_activity_analysis(
        &self,
        activity_type: &str,
        preferred_time: PreferredTime,
        frequency_per_week: f64,
        frequency_per_month: f64,
        description: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO activity_analyses
                (activity_type, preferred_time, frequency_per_week, frequency_per_month,
                 description, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
             ON CONFLICT(activity_type) DO UPDATE SET
                 preferred_time = excluded.preferred_time,
                 frequency_per_week = excluded.frequency_per_week,
                 frequency_per_month = excluded.frequency_per_month,
                 description = excluded.description,
                 last_updated = datetime('now')",
            params![
                activity_type,
                preferred_time.as_str(),
                frequency_per_week,
                frequency_per_month,
                description,
            ],
        )?;
        Ok(())
    }

    pub fn get_all_activity_analyses(&self) -> Result<Vec<DbActivityAnalysis>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT activity_type, preferred_time, frequency_per_week, frequency_per_month,
                    description, last_updated
             FROM activity_analyses ORDER BY activity_type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DbActivityAnalysis {
                activity_type: row.get(0)?,
                preferred_time: PreferredTime::parse_or_default(&row.get::<_, String>(1)?),
                frequency_per_week: row.get(2)?,
                frequency_per_month: row.get(3)?,
                description: row.get(4)?,
                last_updated: column_ts(5, row.get(5)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Insert an event. Entry point for the extraction collaborator.
    #[allow(clippy::too_many_arguments)]
    pub fn create_event(
        &self,
        name: &str,
        start_time: DateTime<Utc>,
        end_time: Option<DateTime<Utc>>,
        location: Option<&str>,
        priority: Priority,
        description: Option<&str>,
    ) -> Result<String, DbError> {
        let id = format!("evt-{}", Uuid::new_v4());
        self.conn.execute(
            "INSERT INTO events (id, name, start_time, end_time, location, priority, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                name,
                format_ts(start_time),
                end_time.map(format_ts),
                location,
                priority.as_str(),
                description,
            ],
        )?;
        Ok(id)
    }

    fn map_event(row: &Row) -> rusqlite::Result<DbEvent> {
        Ok(DbEvent {
            id: row.get(0)?,
            name: row.get(1)?,
            start_time: column_ts(2, row.get(2)?)?,
            end_time: row.get::<_, Option<String>>(3)?.as_deref().and_then(parse_ts),
            location: row.get(4)?,
            priority: Priority::parse_or_default(&row.get::<_, String>(5)?),
            description: row.get(6)?,
        })
    }

    const EVENT_COLS: &'static str =
        "id, name, start_time, end_time, location, priority, description";

    /// Events starting within the next `minutes`.
    pub fn get_upcoming_events(&self, minutes: i64) -> Result<Vec<DbEvent>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM events
             WHERE start_time >= datetime('now')
               AND start_time <= datetime('now', ?1)
             ORDER BY start_time",
            Self::EVENT_COLS
        ))?;
        let rows = stmt.query_map(params![format!("+{} minutes", minutes)], Self::map_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Events whose effective end (end, or start + 1h) plus `grace_minutes`
    /// has passed, looking back at most `days_back` days.
    pub fn get_overdue_events(
        &self,
        days_back: i64,
        grace_minutes: i64,
    ) -> Result<Vec<DbEvent>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM events
             WHERE start_time >= datetime('now', ?1)
               AND datetime(COALESCE(end_time, datetime(start_time, '+60 minutes')), ?2)
                   < datetime('now')
             ORDER BY start_time",
            Self::EVENT_COLS
        ))?;
        let rows = stmt.query_map(
            params![
                format!("-{} days", days_back),
                format!("+{} minutes", grace_minutes)
            ],
            Self::map_event,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Events starting inside the half-open range `[start, end)`. The caller
    /// supplies the bounds, typically one local calendar day converted to
    /// UTC.
    pub fn get_events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DbEvent>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM events
             WHERE start_time >= ?1 AND start_time < ?2
             ORDER BY start_time",
            Self::EVENT_COLS
        ))?;
        let rows = stmt.query_map(params![format_ts(start), format_ts(end)], Self::map_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Events that are ongoing or start within the next `hours_ahead` —
    /// the raw list the conflict engine pairs up.
    pub fn get_events_window(&self, hours_ahead: i64) -> Result<Vec<DbEvent>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM events
             WHERE start_time <= datetime('now', ?1)
               AND COALESCE(end_time, datetime(start_time, '+60 minutes')) >= datetime('now')
             ORDER BY start_time",
            Self::EVENT_COLS
        ))?;
        let rows = stmt.query_map(params![format!("+{} hours", hours_ahead)], Self::map_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    fn map_alert(row: &Row) -> rusqlite::Result<DbAlert> {
        Ok(DbAlert {
            id: row.get(0)?,
            kind: AlertKind::parse_or_default(&row.get::<_, String>(1)?),
            title: row.get(2)?,
            message: row.get(3)?,
            trigger_time: row.get::<_, Option<String>>(4)?.as_deref().and_then(parse_ts),
            recurrence: row.get(5)?,
            priority: Priority::parse_or_default(&row.get::<_, String>(6)?),
            status: AlertStatus::parse_or_default(&row.get::<_, String>(7)?),
            source: row.get(8)?,
            event_id: row.get(9)?,
            recommendation_id: row.get(10)?,
            created_at: column_ts(11, row.get(11)?)?,
        })
    }

    const ALERT_COLS: &'static str =
        "id, kind, title, message, trigger_time, recurrence, priority, status,
         source, event_id, recommendation_id, created_at";

    /// Insert a new alert row. Status and trigger time are decided by the
    /// lifecycle layer; this is the raw insert.
    pub fn create_alert(&self, new: &NewAlert) -> Result<DbAlert, DbError> {
        let id = format!("alrt-{}", Uuid::new_v4());
        self.conn.execute(
            "INSERT INTO alerts
                (id, kind, title, message, dedup_key, trigger_time, recurrence,
                 priority, status, source, event_id, recommendation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                new.kind.as_str(),
                new.title,
                new.message,
                dedup_key(new.kind, &new.title),
                new.trigger_time.map(format_ts),
                new.recurrence,
                new.priority.as_str(),
                new.status.as_str(),
                new.source,
                new.event_id,
                new.recommendation_id,
            ],
        )?;
        self.get_alert(&id)?
            .ok_or_else(|| DbError::Transaction(format!("alert {id} vanished after insert")))
    }

    /// The most recent non-resolved alert with the same (kind, title) created
    /// inside the rolling dedup window, if any.
    pub fn find_duplicate_alert(
        &self,
        kind: AlertKind,
        title: &str,
        window_hours: i64,
    ) -> Result<Option<DbAlert>, DbError> {
        let key = dedup_key(kind, title);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM alerts
             WHERE dedup_key = ?1
               AND created_at >= datetime('now', ?2)
               AND status != 'resolved'
             ORDER BY created_at DESC LIMIT 1",
            Self::ALERT_COLS
        ))?;
        let mut rows = stmt.query_map(
            params![key, format!("-{} hours", window_hours)],
            Self::map_alert,
        )?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<DbAlert>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM alerts WHERE id = ?1",
            Self::ALERT_COLS
        ))?;
        let mut rows = stmt.query_map(params![id], Self::map_alert)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Alerts that delivery should consider now: any non-terminal alert whose
    /// trigger time has arrived (or will within `window_minutes`), plus
    /// alerts with no trigger time at all.
    pub fn get_due_alerts(&self, window_minutes: i64) -> Result<Vec<DbAlert>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM alerts
             WHERE status IN ('pending', 'triggered', 'active')
               AND (trigger_time IS NULL OR trigger_time <= datetime('now', ?1))
             ORDER BY created_at",
            Self::ALERT_COLS
        ))?;
        let rows = stmt.query_map(
            params![format!("+{} minutes", window_minutes)],
            Self::map_alert,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Raw status write. Transition legality is enforced by the lifecycle
    /// layer — nothing else should call this.
    pub fn set_alert_status(&self, id: &str, status: AlertStatus) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE alerts SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(())
    }

    /// Delete alerts that were sent more than `retention_days` ago. Never
    /// touches pending/triggered/active/resolved rows regardless of age.
    pub fn cleanup_sent_alerts(&self, retention_days: i64) -> Result<usize, DbError> {
        let deleted = self.conn.execute(
            "DELETE FROM alerts
             WHERE status = 'sent' AND created_at < datetime('now', ?1)",
            params![format!("-{} days", retention_days)],
        )?;
        Ok(deleted)
    }

    // =========================================================================
    // Recommendations
    // =========================================================================

    fn map_recommendation(row: &Row) -> rusqlite::Result<DbRecommendation> {
        Ok(DbRecommendation {
            id: row.get(0)?,
            recommendation_type: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            score: row.get(4)?,
            reason: row.get(5)?,
            status: RecommendationStatus::parse_or_default(&row.get::<_, String>(6)?),
            shown_at: row.get::<_, Option<String>>(7)?.as_deref().and_then(parse_ts),
            created_at: column_ts(8, row.get(8)?)?,
        })
    }

    const REC_COLS: &'static str =
        "id, recommendation_type, title, content, score, reason, status, shown_at, created_at";

    /// Insert a batch of validated recommendations in one transaction.
    /// Scores must already be clamped to [1, 10].
    pub fn create_recommendations(
        &self,
        batch: &[NewRecommendation],
    ) -> Result<Vec<String>, DbError> {
        self.with_transaction(|db| {
            let mut ids = Vec::with_capacity(batch.len());
            let mut stmt = db
                .conn
                .prepare(
                    "INSERT INTO recommendations
                        (id, recommendation_type, title, content, score, reason, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
                )
                .map_err(|e| e.to_string())?;
            for rec in batch {
                let id = format!("rec-{}", Uuid::new_v4());
                stmt.execute(params![
                    id,
                    rec.recommendation_type,
                    rec.title,
                    rec.content,
                    rec.score,
                    rec.reason,
                ])
                .map_err(|e| e.to_string())?;
                ids.push(id);
            }
            Ok(ids)
        })
        .map_err(DbError::Transaction)
    }

    /// Pending recommendations at or above the promotion threshold.
    pub fn get_promotable_recommendations(
        &self,
        min_score: i64,
    ) -> Result<Vec<DbRecommendation>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM recommendations
             WHERE status = 'pending' AND score >= ?1
             ORDER BY score DESC, created_at",
            Self::REC_COLS
        ))?;
        let rows = stmt.query_map(params![min_score], Self::map_recommendation)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_recommendation(&self, id: &str) -> Result<Option<DbRecommendation>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM recommendations WHERE id = ?1",
            Self::REC_COLS
        ))?;
        let mut rows = stmt.query_map(params![id], Self::map_recommendation)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Update a recommendation's status. Promotion to `alert_created` also
    /// stamps `shown_at`.
    pub fn update_recommendation_status(
        &self,
        id: &str,
        status: RecommendationStatus,
    ) -> Result<(), DbError> {
        match status {
            RecommendationStatus::AlertCreated => self.conn.execute(
                "UPDATE recommendations
                 SET status = ?1, shown_at = datetime('now') WHERE id = ?2",
                params![status.as_str(), id],
            )?,
            RecommendationStatus::Pending => self.conn.execute(
                "UPDATE recommendations SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?,
        };
        Ok(())
    }

    // =========================================================================
    // Delivery targets
    // =========================================================================

    /// Register a device token for push delivery. Idempotent per token.
    pub fn add_device_token(&self, token: &str, platform: Option<&str>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO device_tokens (token, platform) VALUES (?1, ?2)",
            params![token, platform],
        )?;
        Ok(())
    }

    /// All registered delivery targets. Single-owner deployment — every token
    /// belongs to the service's one user.
    pub fn get_device_tokens(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT token FROM device_tokens ORDER BY created_at")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================


// =============================================================================
// Tests
// =============================================================================
