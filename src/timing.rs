//! Conflict and timing engine.
//!
//! Pure functions over timestamps — no store access, no side effects. The
//! scheduler owns the mutable "last run" state and passes it in explicitly,
//! which keeps every gate deterministic under test without wall-clock mocks.
//!
//! Interval semantics are half-open `[start, effective_end)`: two events that
//! merely touch endpoints do NOT conflict. An absent end time is treated as
//! start + 1 hour everywhere interval math happens.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

/// Default span assumed for events without an explicit end time.
pub const DEFAULT_EVENT_SPAN_MINS: i64 = 60;

/// An event's end time, or start + 1h when no end is recorded.
pub fn effective_end(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> DateTime<Utc> {
    end.unwrap_or_else(|| start + Duration::minutes(DEFAULT_EVENT_SPAN_MINS))
}

/// True when the event starts inside `[now, now + window]`.
pub fn is_due_soon(start: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    start >= now && start <= now + window
}

/// Half-open interval overlap: `a.start < b.effective_end AND
/// b.start < a.effective_end`. Touching endpoints are not a conflict.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: Option<DateTime<Utc>>,
    b_start: DateTime<Utc>,
    b_end: Option<DateTime<Utc>>,
) -> bool {
    a_start < effective_end(b_start, b_end) && b_start < effective_end(a_start, a_end)
}

/// True once the event's effective end plus the grace period has passed.
pub fn is_overdue(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    grace: Duration,
) -> bool {
    effective_end(start, end) + grace < now
}

/// Daily gate: true only inside the first `minute_window` minutes of `hour`.
///
/// Used to throttle once-per-day tasks without a persistent cron. The caller
/// passes `now` already converted to the configured timezone; combined with a
/// same-day last-run check this fires at most once per day.
pub fn gated_daily<Tz: TimeZone>(hour: u32, minute_window: u32, now: &DateTime<Tz>) -> bool {
    now.hour() == hour && now.minute() < minute_window
}

/// The UTC instant at which `date` begins in timezone `tz`.
///
/// An ambiguous local midnight (a DST fold) resolves to the earlier instant;
/// a nonexistent midnight (a DST gap) resolves to one hour later, which
/// still lies inside the local day.
pub fn day_start_utc<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = midnight + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    dt.with_timezone(&Utc)
                }
                LocalResult::None => Utc.from_utc_datetime(&midnight),
            }
        }
    }
}

/// The half-open UTC bounds `[start, end)` of the local calendar day
/// containing `now` in timezone `tz`, plus that local date.
pub fn local_day_bounds<Tz: TimeZone>(
    tz: &Tz,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>, NaiveDate) {
    let date = now.with_timezone(tz).date_naive();
    let start = day_start_utc(tz, date);
    let end = day_start_utc(tz, date + Duration::days(1));
    (start, end, date)
}

/// Periodic gate: true when at least `period` has elapsed since `last_run`.
/// A task that has never run is always due.
pub fn hourly_gate(
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    period: Duration,
) -> bool {
    match last_run {
        None => true,
        Some(last) => now - last >= period,
    }
}
