//! Alert lifecycle management.
//!
//! Turns detections into alert rows and advances them through
//! `pending → triggered → active → sent`, with `resolved` reachable from any
//! non-terminal state. All writes funnel through here so the state machine
//! and the dedup guard are enforced in one place.
//!
//! Dedup correctness relies on the single-writer discipline: the scheduler's
//! one worker thread is the only writer, so the check-then-insert in
//! `create_if_absent` cannot race in-process.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::{AlertDb, DbAlert, DbError, DbRecommendation, NewAlert};
use crate::types::{
    promotion_priority, AlertKind, AlertStatus, Priority, RecommendationStatus,
    PROMOTION_THRESHOLD,
};

/// Errors from alert lifecycle operations.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert not found: {0}")]
    NotFound(String),

    #[error("illegal transition {from:?} → {to:?} for alert {id}")]
    IllegalTransition {
        id: String,
        from: AlertStatus,
        to: AlertStatus,
    },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Everything needed to create an alert except its initial status, which is
/// derived from the trigger time.
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    /// When the alert becomes relevant. `None` means immediately.
    pub trigger_time: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub event_id: Option<String>,
    pub recommendation_id: Option<String>,
}

/// Initial status rule: pending when the trigger time is in the future,
/// active when the alert is immediately relevant.
fn initial_status(trigger_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> AlertStatus {
    match trigger_time {
        Some(t) if t > now => AlertStatus::Pending,
        _ => AlertStatus::Active,
    }
}

/// Create an alert unless a non-resolved one with the same (kind, title)
/// already exists inside the dedup window. Returns the alert plus whether it
/// was newly created; the duplicate case is a normal, logged no-op.
pub fn create_if_absent(
    db: &AlertDb,
    draft: AlertDraft,
    dedup_window_hours: i64,
) -> Result<(DbAlert, bool), AlertError> {
    if let Some(existing) = db.find_duplicate_alert(draft.kind, &draft.title, dedup_window_hours)? {
        log::debug!(
            "Duplicate alert suppressed: {} \"{}\" (existing {})",
            draft.kind,
            draft.title,
            existing.id
        );
        return Ok((existing, false));
    }

    let status = initial_status(draft.trigger_time, Utc::now());
    let alert = db.create_alert(&NewAlert {
        kind: draft.kind,
        title: draft.title,
        message: draft.message,
        trigger_time: draft.trigger_time,
        recurrence: None,
        priority: draft.priority,
        status,
        source: draft.source,
        event_id: draft.event_id,
        recommendation_id: draft.recommendation_id,
    })?;
    log::info!(
        "Created {} alert {} \"{}\" ({})",
        alert.kind,
        alert.id,
        alert.title,
        alert.status.as_str()
    );
    Ok((alert, true))
}

fn transition(db: &AlertDb, alert: &DbAlert, to: AlertStatus) -> Result<(), AlertError> {
    if !alert.status.can_transition_to(to) {
        return Err(AlertError::IllegalTransition {
            id: alert.id.clone(),
            from: alert.status,
            to,
        });
    }
    db.set_alert_status(&alert.id, to)?;
    Ok(())
}

/// Move a pending alert to triggered once its trigger time has arrived.
/// Idempotent for alerts already past pending.
pub fn mark_triggered(db: &AlertDb, alert: &DbAlert) -> Result<(), AlertError> {
    match alert.status {
        AlertStatus::Pending => transition(db, alert, AlertStatus::Triggered),
        _ => Ok(()),
    }
}

/// Advance an alert to sent after successful delivery. Idempotent — calling
/// on an already-sent alert is a no-op, not an error.
pub fn advance_to_sent(db: &AlertDb, alert_id: &str) -> Result<(), AlertError> {
    let alert = db
        .get_alert(alert_id)?
        .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;
    if alert.status == AlertStatus::Sent {
        return Ok(());
    }
    transition(db, &alert, AlertStatus::Sent)
}

/// Explicit acknowledgment: resolve from any non-terminal state.
/// Idempotent for already-resolved alerts.
pub fn resolve(db: &AlertDb, alert_id: &str) -> Result<(), AlertError> {
    let alert = db
        .get_alert(alert_id)?
        .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;
    if alert.status == AlertStatus::Resolved {
        return Ok(());
    }
    transition(db, &alert, AlertStatus::Resolved)
}

/// Promote a high-scoring recommendation into an alert.
///
/// Only pending recommendations with score ≥ 7 are promoted; 9–10 map to
/// high priority, 7–8 to medium. The recommendation flips to `alert_created`
/// so it is never promoted twice. Returns the alert when promotion happened.
pub fn promote_recommendation(
    db: &AlertDb,
    rec: &DbRecommendation,
    dedup_window_hours: i64,
) -> Result<Option<DbAlert>, AlertError> {
    if rec.status != RecommendationStatus::Pending || rec.score < PROMOTION_THRESHOLD {
        return Ok(None);
    }

    let (alert, _created) = create_if_absent(
        db,
        AlertDraft {
            kind: AlertKind::DailyRecommendation,
            title: rec.title.clone(),
            message: rec.content.clone(),
            priority: promotion_priority(rec.score),
            trigger_time: None,
            source: Some("recommendation".to_string()),
            event_id: None,
            recommendation_id: Some(rec.id.clone()),
        },
        dedup_window_hours,
    )?;

    db.update_recommendation_status(&rec.id, RecommendationStatus::AlertCreated)?;
    Ok(Some(alert))
}

/// Delete sent alerts older than the retention window. Pending, triggered,
/// active, and resolved rows are never deleted here regardless of age.
pub fn cleanup(db: &AlertDb, retention_days: i64) -> Result<usize, AlertError> {
    let deleted = db.cleanup_sent_alerts(retention_days)?;
    if deleted > 0 {
        log::info!("Retention cleanup removed {} sent alert(s)", deleted);
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::NewRecommendation;
    use chrono::Duration;

    fn draft(kind: AlertKind, title: &str) -> AlertDraft {
        AlertDraft {
            kind,
            title: title.to_string(),
            message: "msg".to_string(),
            priority: Priority::Medium,
            trigger_time: None,
            source: None,
            event_id: None,
            recommendation_id: None,
        }
    }

    fn insert_rec(db: &AlertDb, title: &str, score: i64) -> DbRecommendation {
        let ids = db
            .create_recommendations(&[NewRecommendation {
                recommendation_type: "habit".to_string(),
                title: title.to_string(),
                content: format!("{title} content"),
                score,
                reason: None,
            }])
            .unwrap();
        db.get_recommendation(&ids[0]).unwrap().unwrap()
    }

    #[test]
    fn test_create_if_absent_dedups_within_window() {
        let db = test_db();
        let (first, created) =
            create_if_absent(&db, draft(AlertKind::UpcomingEvent, "Meeting X"), 24).unwrap();
        assert!(created);

        let (second, created) =
            create_if_absent(&db, draft(AlertKind::UpcomingEvent, "Meeting X"), 24).unwrap();
        assert!(!created, "second call inside the window is a no-op");
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_create_if_absent_new_alert_after_window() {
        let db = test_db();
        let (first, _) =
            create_if_absent(&db, draft(AlertKind::UpcomingEvent, "Meeting X"), 24).unwrap();

        db.conn_ref()
            .execute(
                "UPDATE alerts SET created_at = datetime('now', '-25 hours') WHERE id = ?1",
                rusqlite::params![first.id],
            )
            .unwrap();

        let (second, created) =
            create_if_absent(&db, draft(AlertKind::UpcomingEvent, "Meeting X"), 24).unwrap();
        assert!(created, "window expired, a fresh alert is allowed");
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_initial_status_from_trigger_time() {
        let db = test_db();
        let mut future = draft(AlertKind::UpcomingEvent, "future");
        future.trigger_time = Some(Utc::now() + Duration::hours(2));
        let (alert, _) = create_if_absent(&db, future, 24).unwrap();
        assert_eq!(alert.status, AlertStatus::Pending);

        let (alert, _) =
            create_if_absent(&db, draft(AlertKind::EventConflict, "now"), 24).unwrap();
        assert_eq!(alert.status, AlertStatus::Active);
    }

    #[test]
    fn test_advance_to_sent_idempotent() {
        let db = test_db();
        let (alert, _) = create_if_absent(&db, draft(AlertKind::EventConflict, "c"), 24).unwrap();

        advance_to_sent(&db, &alert.id).unwrap();
        assert_eq!(db.get_alert(&alert.id).unwrap().unwrap().status, AlertStatus::Sent);

        // Second call is a no-op, not an error
        advance_to_sent(&db, &alert.id).unwrap();
    }

    #[test]
    fn test_advance_to_sent_rejects_pending() {
        let db = test_db();
        let mut d = draft(AlertKind::UpcomingEvent, "future");
        d.trigger_time = Some(Utc::now() + Duration::hours(2));
        let (alert, _) = create_if_absent(&db, d, 24).unwrap();

        let err = advance_to_sent(&db, &alert.id).unwrap_err();
        assert!(matches!(err, AlertError::IllegalTransition { .. }));
    }

    #[test]
    fn test_mark_triggered_then_sent() {
        let db = test_db();
        let mut d = draft(AlertKind::UpcomingEvent, "soon");
        d.trigger_time = Some(Utc::now() + Duration::minutes(1));
        let (alert, _) = create_if_absent(&db, d, 24).unwrap();
        assert_eq!(alert.status, AlertStatus::Pending);

        mark_triggered(&db, &alert).unwrap();
        let alert = db.get_alert(&alert.id).unwrap().unwrap();
        assert_eq!(alert.status, AlertStatus::Triggered);

        advance_to_sent(&db, &alert.id).unwrap();
        assert_eq!(db.get_alert(&alert.id).unwrap().unwrap().status, AlertStatus::Sent);
    }

    #[test]
    fn test_resolve_from_active_but_not_sent() {
        let db = test_db();
        let (alert, _) = create_if_absent(&db, draft(AlertKind::System, "note"), 24).unwrap();
        resolve(&db, &alert.id).unwrap();
        assert_eq!(db.get_alert(&alert.id).unwrap().unwrap().status, AlertStatus::Resolved);

        let (sent, _) = create_if_absent(&db, draft(AlertKind::System, "other"), 24).unwrap();
        advance_to_sent(&db, &sent.id).unwrap();
        let err = resolve(&db, &sent.id).unwrap_err();
        assert!(matches!(err, AlertError::IllegalTransition { .. }));
    }

    #[test]
    fn test_promotion_score_bands() {
        let db = test_db();

        let rec = insert_rec(&db, "high", 9);
        let alert = promote_recommendation(&db, &rec, 24).unwrap().unwrap();
        assert_eq!(alert.priority, Priority::High);
        assert_eq!(alert.kind, AlertKind::DailyRecommendation);
        assert_eq!(alert.recommendation_id.as_deref(), Some(rec.id.as_str()));

        let rec = insert_rec(&db, "medium", 7);
        let alert = promote_recommendation(&db, &rec, 24).unwrap().unwrap();
        assert_eq!(alert.priority, Priority::Medium);

        let rec = insert_rec(&db, "low", 6);
        assert!(promote_recommendation(&db, &rec, 24).unwrap().is_none());
    }

    #[test]
    fn test_promotion_never_repeats() {
        let db = test_db();
        let rec = insert_rec(&db, "once", 8);
        assert!(promote_recommendation(&db, &rec, 24).unwrap().is_some());

        let rec = db.get_recommendation(&rec.id).unwrap().unwrap();
        assert_eq!(rec.status, RecommendationStatus::AlertCreated);
        assert!(
            promote_recommendation(&db, &rec, 24).unwrap().is_none(),
            "already-promoted recommendation is skipped"
        );
    }
}
