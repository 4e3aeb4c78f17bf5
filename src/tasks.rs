//! The scheduler's task bodies.
//!
//! Each task is a plain function over a [`TaskContext`] returning how many
//! items it acted on. Tasks never decide WHEN they run — cadence lives in the
//! scheduler loop — and they never touch alert status directly; lifecycle
//! rules are enforced in [`crate::alerts`].

use std::collections::HashSet;

use chrono::Utc;
use chrono_tz::Tz;

use crate::alerts::{self, AlertDraft};
use crate::analysis::{self, CompletionProvider};
use crate::config::Config;
use crate::db::{format_ts, AlertDb, DbEvent};
use crate::error::TaskError;
use crate::push::{deliver_alert, DeliveryOutcome, PushTransport};
use crate::timing;
use crate::types::{AlertKind, AlertStatus, Priority, TaskName, PROMOTION_THRESHOLD};

/// Everything a task body needs. Borrowed from the scheduler's worker thread
/// for the duration of one tick.
pub struct TaskContext<'a> {
    pub db: &'a AlertDb,
    pub provider: &'a dyn CompletionProvider,
    pub push: &'a dyn PushTransport,
    pub config: &'a Config,
    /// Timezone for local-day computations, parsed once at startup.
    pub tz: Tz,
}

/// Dispatch one named task. Returns the number of items the task acted on
/// (alerts created or delivered, groups analyzed, rows deleted).
pub fn run_task(task: TaskName, ctx: &TaskContext) -> Result<usize, TaskError> {
    match task {
        TaskName::DueAlerts => run_due_alerts(ctx),
        TaskName::UpcomingEvents => run_upcoming_events(ctx),
        TaskName::EventConflicts => run_event_conflicts(ctx),
        TaskName::OverdueEvents => run_overdue_events(ctx),
        TaskName::ActivityAnalysis => run_activity_analysis(ctx),
        TaskName::Recommendations => run_recommendations(ctx),
        TaskName::DailyDigest => run_daily_digest(ctx),
        TaskName::Cleanup => run_cleanup(ctx),
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Trigger and deliver alerts whose time has come.
///
/// Pending alerts past their trigger time move to triggered first, then
/// every triggered or active alert is fanned out. Only a confirmed delivery
/// advances an alert to sent; no-target and all-failed outcomes leave it for
/// a later tick.
fn run_due_alerts(ctx: &TaskContext) -> Result<usize, TaskError> {
    let now = Utc::now();
    let due = ctx.db.get_due_alerts(ctx.config.due_alert_window_minutes)?;

    let mut delivered = 0usize;
    for mut alert in due {
        if alert.status == AlertStatus::Pending {
            match alert.trigger_time {
                Some(t) if t <= now => {
                    alerts::mark_triggered(ctx.db, &alert)?;
                    alert.status = AlertStatus::Triggered;
                }
                // Inside the look-ahead window but not yet due
                _ => continue,
            }
        }

        match deliver_alert(ctx.db, ctx.push, &alert)? {
            DeliveryOutcome::Delivered => {
                alerts::advance_to_sent(ctx.db, &alert.id)?;
                delivered += 1;
            }
            DeliveryOutcome::NoTargets | DeliveryOutcome::Failed => {}
        }
    }
    Ok(delivered)
}

// =============================================================================
// Event scans
// =============================================================================

fn event_time_line(event: &DbEvent) -> String {
    let mut line = format!("Starts at {}", format_ts(event.start_time));
    if let Some(end) = event.end_time {
        line.push_str(&format!(", ends at {}", format_ts(end)));
    }
    if let Some(ref location) = event.location {
        line.push_str(&format!(" ({location})"));
    }
    line
}

/// Raise an alert for each event starting within the upcoming window.
/// The dedup guard keeps one alert per event title per window.
fn run_upcoming_events(ctx: &TaskContext) -> Result<usize, TaskError> {
    let events = ctx.db.get_upcoming_events(ctx.config.upcoming_window_minutes)?;

    let mut created = 0usize;
    for event in &events {
        let (_, was_new) = alerts::create_if_absent(
            ctx.db,
            AlertDraft {
                kind: AlertKind::UpcomingEvent,
                title: format!("Upcoming: {}", event.name),
                message: event_time_line(event),
                priority: event.priority,
                trigger_time: None,
                source: Some("event_scan".to_string()),
                event_id: Some(event.id.clone()),
                recommendation_id: None,
            },
            ctx.config.dedup_window_hours,
        )?;
        if was_new {
            created += 1;
        }
    }
    Ok(created)
}

/// Pair up ongoing and near-future events and alert on overlaps.
///
/// The conflict title is built from the two names in sorted order, so the
/// same pair always produces the same dedup key no matter which event the
/// scan visits first.
fn run_event_conflicts(ctx: &TaskContext) -> Result<usize, TaskError> {
    let events = ctx.db.get_events_window(ctx.config.conflict_hours_ahead)?;

    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
    let mut created = 0usize;
    for i in 0..events.len() {
        for j in (i + 1)..events.len() {
            let (a, b) = (&events[i], &events[j]);
            if !timing::overlaps(a.start_time, a.end_time, b.start_time, b.end_time) {
                continue;
            }

            let mut pair = (a.id.clone(), b.id.clone());
            if pair.1 < pair.0 {
                std::mem::swap(&mut pair.0, &mut pair.1);
            }
            if !seen_pairs.insert(pair) {
                continue;
            }

            let mut names = [a.name.as_str(), b.name.as_str()];
            names.sort();
            let (_, was_new) = alerts::create_if_absent(
                ctx.db,
                AlertDraft {
                    kind: AlertKind::EventConflict,
                    title: format!("Schedule conflict: {} / {}", names[0], names[1]),
                    message: format!(
                        "\"{}\" ({}) overlaps \"{}\" ({})",
                        a.name,
                        format_ts(a.start_time),
                        b.name,
                        format_ts(b.start_time)
                    ),
                    priority: Priority::High,
                    trigger_time: None,
                    source: Some("conflict_scan".to_string()),
                    event_id: Some(a.id.clone()),
                    recommendation_id: None,
                },
                ctx.config.dedup_window_hours,
            )?;
            if was_new {
                created += 1;
            }
        }
    }
    Ok(created)
}

/// Alert on events whose effective end plus grace has passed without any
/// follow-up.
fn run_overdue_events(ctx: &TaskContext) -> Result<usize, TaskError> {
    let events = ctx
        .db
        .get_overdue_events(ctx.config.overdue_days_back, ctx.config.overdue_grace_minutes)?;

    let mut created = 0usize;
    for event in &events {
        let ended = timing::effective_end(event.start_time, event.end_time);
        let (_, was_new) = alerts::create_if_absent(
            ctx.db,
            AlertDraft {
                kind: AlertKind::OverdueEvent,
                title: format!("Overdue: {}", event.name),
                message: format!("Ended at {} with no follow-up", format_ts(ended)),
                priority: event.priority,
                trigger_time: None,
                source: Some("overdue_scan".to_string()),
                event_id: Some(event.id.clone()),
                recommendation_id: None,
            },
            ctx.config.dedup_window_hours,
        )?;
        if was_new {
            created += 1;
        }
    }
    Ok(created)
}

// =============================================================================
// Analysis and recommendations
// =============================================================================

/// Group pending activities and run one generator call per group.
///
/// Partial-batch semantics: a failed group's activities stay pending and are
/// retried on the next run, while successful groups are persisted and their
/// activities marked analyzed in one batch at the end. Only a run where
/// every group failed surfaces as an error.
fn run_activity_analysis(ctx: &TaskContext) -> Result<usize, TaskError> {
    let pending = ctx.db.get_pending_activities()?;
    if pending.is_empty() {
        return Ok(0);
    }

    let groups = analysis::group_activities(&pending);
    let total_groups = groups.len();
    let mut analyzed_groups = 0usize;
    let mut analyzed_ids: HashSet<String> = HashSet::new();
    let mut last_failure: Option<TaskError> = None;

    for (activity_type, activities) in &groups {
        match analysis::analyze_group(ctx.provider, activity_type, activities) {
            Ok(data) => {
                ctx.db.upsert_activity_analysis(
                    activity_type,
                    data.preferred_time,
                    data.frequency_per_week,
                    data.frequency_per_month,
                    &data.description,
                )?;
                analyzed_ids.extend(activities.iter().map(|a| a.id.clone()));
                analyzed_groups += 1;
            }
            Err(e) => {
                log::warn!(
                    "Analysis of group \"{}\" failed, leaving {} activity(ies) pending: {}",
                    activity_type,
                    activities.len(),
                    e
                );
                last_failure = Some(e.into());
            }
        }
    }

    if analyzed_groups == 0 {
        if let Some(failure) = last_failure {
            return Err(failure);
        }
        return Ok(0);
    }

    let ids: Vec<String> = analyzed_ids.into_iter().collect();
    ctx.db.mark_activities_analyzed(&ids)?;
    log::info!(
        "Activity analysis: {}/{} group(s) analyzed, {} activity(ies) marked",
        analyzed_groups,
        total_groups,
        ids.len()
    );
    Ok(analyzed_groups)
}

/// Generate a bounded recommendation batch and promote the high scorers.
///
/// Skipped entirely when there is no context to recommend from. Propagates
/// generator failure so the scheduler leaves the periodic gate unreset and
/// retries on the next tick.
fn run_recommendations(ctx: &TaskContext) -> Result<usize, TaskError> {
    let analyses = ctx.db.get_all_activity_analyses()?;
    let events = ctx.db.get_events_window(ctx.config.conflict_hours_ahead)?;
    if analyses.is_empty() && events.is_empty() {
        log::debug!("No habits or upcoming events; skipping recommendation batch");
        return Ok(0);
    }

    let batch = analysis::generate_recommendations(
        ctx.provider,
        &analyses,
        &events,
        ctx.config.max_recommendations,
    )?;
    if batch.is_empty() {
        return Ok(0);
    }

    let ids = ctx.db.create_recommendations(&batch)?;
    log::info!("Stored {} recommendation(s)", ids.len());

    for rec in ctx.db.get_promotable_recommendations(PROMOTION_THRESHOLD)? {
        alerts::promote_recommendation(ctx.db, &rec, ctx.config.dedup_window_hours)?;
    }
    Ok(ids.len())
}

// =============================================================================
// Daily tasks
// =============================================================================

/// Once-a-day digest of today's schedule, delivered as a single alert.
///
/// "Today" is the configured timezone's calendar day, matching the daily
/// gate that fires this task; the local date in the title makes each day
/// its own dedup key.
fn run_daily_digest(ctx: &TaskContext) -> Result<usize, TaskError> {
    let (day_start, day_end, local_date) = timing::local_day_bounds(&ctx.tz, Utc::now());
    let events = ctx.db.get_events_between(day_start, day_end)?;
    if events.is_empty() {
        return Ok(0);
    }

    let mut message = format!("{} event(s) today:\n", events.len());
    for event in &events {
        message.push_str(&format!(
            "- {} at {}\n",
            event.name,
            event.start_time.with_timezone(&ctx.tz).format("%H:%M")
        ));
    }

    let (_, was_new) = alerts::create_if_absent(
        ctx.db,
        AlertDraft {
            kind: AlertKind::DailyRecommendation,
            title: format!("Daily digest for {local_date}"),
            message,
            priority: Priority::Low,
            trigger_time: None,
            source: Some("daily_digest".to_string()),
            event_id: None,
            recommendation_id: None,
        },
        ctx.config.dedup_window_hours,
    )?;
    Ok(usize::from(was_new))
}

/// Delete sent alerts past the retention window.
fn run_cleanup(ctx: &TaskContext) -> Result<usize, TaskError> {
    Ok(alerts::cleanup(ctx.db, ctx.config.retention_days)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::Duration;

    use crate::analysis::ProviderError;
    use crate::db::test_utils::test_db;
    use crate::push::PushError;

    struct StubProvider {
        response: Mutex<Option<String>>,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn with_response(response: &str) -> Self {
            Self {
                response: Mutex::new(Some(response.to_string())),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl CompletionProvider for StubProvider {
        fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response
                .lock()
                .unwrap()
                .clone()
                .ok_or(ProviderError::EmptyResponse)
        }
    }

    /// Provider returning one scripted response per call, in order.
    struct SequenceProvider {
        responses: std::sync::Mutex<Vec<Option<String>>>,
    }

    impl SequenceProvider {
        fn new(responses: &[Option<&str>]) -> Self {
            Self {
                responses: std::sync::Mutex::new(
                    responses.iter().map(|r| r.map(str::to_string)).collect(),
                ),
            }
        }
    }

    impl CompletionProvider for SequenceProvider {
        fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            let mut guard = self.responses.lock().unwrap();
            if guard.is_empty() {
                return Err(ProviderError::EmptyResponse);
            }
            guard.remove(0).ok_or(ProviderError::EmptyResponse)
        }
    }

    struct StubPush {
        fail: bool,
        sends: AtomicUsize,
    }

    impl StubPush {
        fn ok() -> Self {
            Self {
                fail: false,
                sends: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                sends: AtomicUsize::new(0),
            }
        }
    }

    impl PushTransport for StubPush {
        fn send(&self, _token: &str, _title: &str, _message: &str) -> Result<(), PushError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PushError::Status { status: 503 })
            } else {
                Ok(())
            }
        }
    }

    fn ctx<'a>(
        db: &'a AlertDb,
        provider: &'a StubProvider,
        push: &'a StubPush,
        config: &'a Config,
    ) -> TaskContext<'a> {
        TaskContext {
            db,
            provider,
            push,
            config,
            tz: chrono_tz::UTC,
        }
    }

    fn minutes_from_now(mins: i64) -> chrono::DateTime<Utc> {
        Utc::now() + Duration::minutes(mins)
    }

    #[test]
    fn test_upcoming_events_alert_once() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        db.create_event("Standup", minutes_from_now(30), None, None, Priority::Medium, None)
            .unwrap();
        db.create_event("Far away", minutes_from_now(600), None, None, Priority::Low, None)
            .unwrap();

        assert_eq!(run_task(TaskName::UpcomingEvents, &ctx).unwrap(), 1);
        // Second tick inside the dedup window creates nothing
        assert_eq!(run_task(TaskName::UpcomingEvents, &ctx).unwrap(), 0);
    }

    #[test]
    fn test_conflict_detection_and_stable_title() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        db.create_event(
            "Zeta sync",
            minutes_from_now(10),
            Some(minutes_from_now(70)),
            None,
            Priority::Medium,
            None,
        )
        .unwrap();
        db.create_event(
            "Alpha review",
            minutes_from_now(40),
            Some(minutes_from_now(100)),
            None,
            Priority::Medium,
            None,
        )
        .unwrap();

        assert_eq!(run_task(TaskName::EventConflicts, &ctx).unwrap(), 1);
        let alerts = db.get_due_alerts(5).unwrap();
        let conflict = alerts
            .iter()
            .find(|a| a.kind == AlertKind::EventConflict)
            .unwrap();
        assert_eq!(conflict.title, "Schedule conflict: Alpha review / Zeta sync");
        assert_eq!(conflict.priority, Priority::High);

        // Re-running inside the window is a no-op
        assert_eq!(run_task(TaskName::EventConflicts, &ctx).unwrap(), 0);
    }

    #[test]
    fn test_touching_events_do_not_conflict() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        let boundary = minutes_from_now(60);
        db.create_event("First", minutes_from_now(0), Some(boundary), None, Priority::Medium, None)
            .unwrap();
        db.create_event("Second", boundary, Some(minutes_from_now(120)), None, Priority::Medium, None)
            .unwrap();

        assert_eq!(run_task(TaskName::EventConflicts, &ctx).unwrap(), 0);
    }

    #[test]
    fn test_due_alerts_deliver_and_advance() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        db.add_device_token("tok", None).unwrap();
        let (alert, _) = alerts::create_if_absent(
            &db,
            AlertDraft {
                kind: AlertKind::System,
                title: "Hello".to_string(),
                message: "world".to_string(),
                priority: Priority::Medium,
                trigger_time: None,
                source: None,
                event_id: None,
                recommendation_id: None,
            },
            24,
        )
        .unwrap();

        assert_eq!(run_task(TaskName::DueAlerts, &ctx).unwrap(), 1);
        assert_eq!(
            db.get_alert(&alert.id).unwrap().unwrap().status,
            AlertStatus::Sent
        );

        // Sent alerts are terminal; the next tick finds nothing to deliver
        assert_eq!(run_task(TaskName::DueAlerts, &ctx).unwrap(), 0);
        assert_eq!(push.sends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_due_alerts_failed_delivery_leaves_status() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::failing();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        db.add_device_token("tok", None).unwrap();
        let (alert, _) = alerts::create_if_absent(
            &db,
            AlertDraft {
                kind: AlertKind::System,
                title: "Hello".to_string(),
                message: "world".to_string(),
                priority: Priority::Medium,
                trigger_time: None,
                source: None,
                event_id: None,
                recommendation_id: None,
            },
            24,
        )
        .unwrap();

        assert_eq!(run_task(TaskName::DueAlerts, &ctx).unwrap(), 0);
        assert_eq!(
            db.get_alert(&alert.id).unwrap().unwrap().status,
            AlertStatus::Active,
            "failed delivery must not advance the alert"
        );
    }

    #[test]
    fn test_due_alerts_trigger_pending_past_time() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        db.add_device_token("tok", None).unwrap();
        let (alert, _) = alerts::create_if_absent(
            &db,
            AlertDraft {
                kind: AlertKind::UpcomingEvent,
                title: "Later".to_string(),
                message: "m".to_string(),
                priority: Priority::Medium,
                trigger_time: Some(Utc::now() + Duration::hours(2)),
                source: None,
                event_id: None,
                recommendation_id: None,
            },
            24,
        )
        .unwrap();
        assert_eq!(alert.status, AlertStatus::Pending);

        // Not yet due: the far-future trigger keeps it out of the scan
        assert_eq!(run_task(TaskName::DueAlerts, &ctx).unwrap(), 0);

        // Backdate the trigger to simulate its time arriving
        db.conn_ref()
            .execute(
                "UPDATE alerts SET trigger_time = datetime('now', '-1 minute') WHERE id = ?1",
                rusqlite::params![alert.id],
            )
            .unwrap();
        assert_eq!(run_task(TaskName::DueAlerts, &ctx).unwrap(), 1);
        assert_eq!(
            db.get_alert(&alert.id).unwrap().unwrap().status,
            AlertStatus::Sent
        );
    }

    #[test]
    fn test_activity_analysis_marks_analyzed() {
        let db = test_db();
        let provider = StubProvider::with_response(
            r#"{"preferred_time": "morning", "frequency_per_week": 3,
                "frequency_per_month": 12, "description": "regular habit"}"#,
        );
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        db.create_activity("Run", None, None, None, &["exercise".to_string()])
            .unwrap();
        db.create_activity("Lift", None, None, None, &["exercise".to_string()])
            .unwrap();

        assert_eq!(run_task(TaskName::ActivityAnalysis, &ctx).unwrap(), 1);
        assert!(db.get_pending_activities().unwrap().is_empty());

        let analyses = db.get_all_activity_analyses().unwrap();
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0].activity_type, "exercise");
        assert_eq!(analyses[0].frequency_per_week, 3.0);
    }

    #[test]
    fn test_activity_analysis_partial_batch() {
        let db = test_db();
        // Groups analyze in alphabetical order: "cooking" first, then "music".
        // The first call succeeds, the second yields nothing usable.
        let provider = SequenceProvider::new(&[
            Some(
                r#"{"preferred_time": "evening", "frequency_per_week": 2,
                    "frequency_per_month": 8, "description": "cooks dinner"}"#,
            ),
            None,
        ]);
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = TaskContext {
            db: &db,
            provider: &provider,
            push: &push,
            config: &config,
            tz: chrono_tz::UTC,
        };

        db.create_activity("Make pasta", None, None, None, &["cooking".to_string()])
            .unwrap();
        db.create_activity("Practice guitar", None, None, None, &["music".to_string()])
            .unwrap();

        assert_eq!(run_task(TaskName::ActivityAnalysis, &ctx).unwrap(), 1);

        let analyses = db.get_all_activity_analyses().unwrap();
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0].activity_type, "cooking");

        let pending = db.get_pending_activities().unwrap();
        assert_eq!(pending.len(), 1, "failed group's activity stays pending");
        assert_eq!(pending[0].name, "Practice guitar");
    }

    #[test]
    fn test_activity_analysis_total_failure_leaves_pending() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        db.create_activity("Run", None, None, None, &[]).unwrap();

        assert!(run_task(TaskName::ActivityAnalysis, &ctx).is_err());
        assert_eq!(db.get_pending_activities().unwrap().len(), 1);
    }

    #[test]
    fn test_recommendations_skipped_without_context() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        assert_eq!(run_task(TaskName::Recommendations, &ctx).unwrap(), 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0, "no generator call without context");
    }

    #[test]
    fn test_recommendations_created_and_promoted() {
        let db = test_db();
        let provider = StubProvider::with_response(
            r#"[
                {"recommendation_type": "habit", "title": "Stretch", "content": "Do it", "score": 9},
                {"recommendation_type": "habit", "title": "Hydrate", "content": "Drink", "score": 4}
            ]"#,
        );
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        db.upsert_activity_analysis(
            "exercise",
            crate::types::PreferredTime::Morning,
            3.0,
            12.0,
            "works out most mornings",
        )
        .unwrap();

        assert_eq!(run_task(TaskName::Recommendations, &ctx).unwrap(), 2);

        let due = db.get_due_alerts(5).unwrap();
        let promoted: Vec<_> = due
            .iter()
            .filter(|a| a.kind == AlertKind::DailyRecommendation)
            .collect();
        assert_eq!(promoted.len(), 1, "only the 7+ candidate is promoted");
        assert_eq!(promoted[0].title, "Stretch");
        assert_eq!(promoted[0].priority, Priority::High);
    }

    #[test]
    fn test_daily_digest_once_per_day() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        // No events, no digest
        assert_eq!(run_task(TaskName::DailyDigest, &ctx).unwrap(), 0);

        db.create_event("Dentist", minutes_from_now(0), None, None, Priority::Medium, None)
            .unwrap();
        assert_eq!(run_task(TaskName::DailyDigest, &ctx).unwrap(), 1);
        assert_eq!(run_task(TaskName::DailyDigest, &ctx).unwrap(), 0);
    }

    #[test]
    fn test_daily_digest_uses_local_day() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::ok();
        let config = Config::default();
        let tz = chrono_tz::Asia::Tokyo;
        let ctx = TaskContext {
            db: &db,
            provider: &provider,
            push: &push,
            config: &config,
            tz,
        };

        let (day_start, day_end, local_date) = timing::local_day_bounds(&tz, Utc::now());
        // Noon of the Tokyo day, wherever the UTC date boundary falls
        db.create_event(
            "Dentist",
            day_start + Duration::hours(12),
            None,
            None,
            Priority::Medium,
            None,
        )
        .unwrap();
        // Tomorrow in Tokyo; must not appear in today's digest
        db.create_event(
            "Next day",
            day_end + Duration::hours(1),
            None,
            None,
            Priority::Medium,
            None,
        )
        .unwrap();

        assert_eq!(run_task(TaskName::DailyDigest, &ctx).unwrap(), 1);
        let digest = db
            .get_due_alerts(5)
            .unwrap()
            .into_iter()
            .find(|a| a.kind == AlertKind::DailyRecommendation)
            .unwrap();
        assert_eq!(digest.title, format!("Daily digest for {local_date}"));
        assert!(digest.message.contains("Dentist"));
        assert!(!digest.message.contains("Next day"));
    }

    #[test]
    fn test_cleanup_counts_deleted() {
        let db = test_db();
        let provider = StubProvider::failing();
        let push = StubPush::ok();
        let config = Config::default();
        let ctx = ctx(&db, &provider, &push, &config);

        let (alert, _) = alerts::create_if_absent(
            &db,
            AlertDraft {
                kind: AlertKind::System,
                title: "old".to_string(),
                message: "m".to_string(),
                priority: Priority::Low,
                trigger_time: None,
                source: None,
                event_id: None,
                recommendation_id: None,
            },
            24,
        )
        .unwrap();
        alerts::advance_to_sent(&db, &alert.id).unwrap();
        db.conn_ref()
            .execute(
                "UPDATE alerts SET created_at = datetime('now', '-40 days') WHERE id = ?1",
                rusqlite::params![alert.id],
            )
            .unwrap();

        assert_eq!(run_task(TaskName::Cleanup, &ctx).unwrap(), 1);
    }
}
