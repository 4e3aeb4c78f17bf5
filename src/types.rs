//! Shared domain types: closed status enumerations and the scheduler's
//! control-surface types.
//!
//! Every status the source data could carry as free text is a closed enum
//! here — unknown stored values fall back to a documented default on read,
//! and illegal transitions are rejected at the lifecycle layer, never
//! silently applied.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Priority
// =============================================================================

/// Priority shared by events, alerts, and promoted recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Parse a stored priority, defaulting to `Medium` for unknown values.
    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "low" => Priority::Low,
            "high" => Priority::High,
            _ => Priority::Medium,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Activity
// =============================================================================

/// Lifecycle of a logged activity. Activities move `Pending → Analyzed` only
/// as a side effect of a successful grouped analysis; a failed analysis
/// leaves them pending for the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Pending,
    Analyzed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Pending => "pending",
            ActivityStatus::Analyzed => "analyzed",
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "analyzed" => ActivityStatus::Analyzed,
            _ => ActivityStatus::Pending,
        }
    }
}

/// Preferred-time bucket produced by the grouped activity analysis.
/// Anything the generator returns outside the five valid buckets is treated
/// as `Mixed` rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredTime {
    Morning,
    Afternoon,
    Evening,
    Night,
    Mixed,
}

impl PreferredTime {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferredTime::Morning => "morning",
            PreferredTime::Afternoon => "afternoon",
            PreferredTime::Evening => "evening",
            PreferredTime::Night => "night",
            PreferredTime::Mixed => "mixed",
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "morning" => PreferredTime::Morning,
            "afternoon" => PreferredTime::Afternoon,
            "evening" => PreferredTime::Evening,
            "night" => PreferredTime::Night,
            _ => PreferredTime::Mixed,
        }
    }
}

// =============================================================================
// Alert
// =============================================================================

/// What kind of fact an alert notifies about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    UpcomingEvent,
    EventConflict,
    OverdueEvent,
    DailyRecommendation,
    System,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::UpcomingEvent => "upcoming_event",
            AlertKind::EventConflict => "event_conflict",
            AlertKind::OverdueEvent => "overdue_event",
            AlertKind::DailyRecommendation => "daily_recommendation",
            AlertKind::System => "system",
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "upcoming_event" => AlertKind::UpcomingEvent,
            "event_conflict" => AlertKind::EventConflict,
            "overdue_event" => AlertKind::OverdueEvent,
            "daily_recommendation" => AlertKind::DailyRecommendation,
            _ => AlertKind::System,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert state machine: `Pending → Triggered → Active → Sent`, with
/// `Resolved` reachable from any non-terminal state via explicit
/// acknowledgment. `Sent` and `Resolved` are terminal for automatic
/// processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Triggered,
    Active,
    Sent,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Triggered => "triggered",
            AlertStatus::Active => "active",
            AlertStatus::Sent => "sent",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "triggered" => AlertStatus::Triggered,
            "active" => AlertStatus::Active,
            "sent" => AlertStatus::Sent,
            "resolved" => AlertStatus::Resolved,
            _ => AlertStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Sent | AlertStatus::Resolved)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Forward transitions only; `Resolved` is reachable from any
    /// non-terminal state. Self-transitions are not valid here — idempotent
    /// no-ops are handled by the lifecycle layer before this check.
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        use AlertStatus::*;
        match (self, next) {
            (Pending, Triggered) | (Triggered, Active) | (Active, Sent) => true,
            // Delivery may advance a triggered alert directly once its
            // trigger time has arrived.
            (Triggered, Sent) => true,
            (_, Resolved) => !self.is_terminal(),
            _ => false,
        }
    }
}

// =============================================================================
// Recommendation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    AlertCreated,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::AlertCreated => "alert_created",
        }
    }

    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "alert_created" => RecommendationStatus::AlertCreated,
            _ => RecommendationStatus::Pending,
        }
    }
}

/// Clamp a raw recommendation score into the valid [1, 10] range.
/// Out-of-range scores are clamped, never rejected.
pub fn clamp_score(raw: f64) -> i64 {
    (raw.round() as i64).clamp(1, 10)
}

/// Minimum score at which a recommendation is promoted to an alert.
pub const PROMOTION_THRESHOLD: i64 = 7;

/// Map a (clamped) recommendation score to the promoted alert's priority.
/// 9–10 → high, 7–8 → medium. Scores below the promotion threshold never
/// reach this function in practice, but map to low for completeness.
pub fn promotion_priority(score: i64) -> Priority {
    if score >= 9 {
        Priority::High
    } else if score >= PROMOTION_THRESHOLD {
        Priority::Medium
    } else {
        Priority::Low
    }
}

// =============================================================================
// Scheduler control surface
// =============================================================================

/// Named scheduler tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    DueAlerts,
    UpcomingEvents,
    EventConflicts,
    OverdueEvents,
    ActivityAnalysis,
    Recommendations,
    DailyDigest,
    Cleanup,
}

/// All tasks, in per-tick execution order.
pub const ALL_TASKS: &[TaskName] = &[
    TaskName::DueAlerts,
    TaskName::UpcomingEvents,
    TaskName::EventConflicts,
    TaskName::OverdueEvents,
    TaskName::ActivityAnalysis,
    TaskName::Recommendations,
    TaskName::DailyDigest,
    TaskName::Cleanup,
];

impl TaskName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::DueAlerts => "due_alerts",
            TaskName::UpcomingEvents => "upcoming_events",
            TaskName::EventConflicts => "event_conflicts",
            TaskName::OverdueEvents => "overdue_events",
            TaskName::ActivityAnalysis => "activity_analysis",
            TaskName::Recommendations => "recommendations",
            TaskName::DailyDigest => "daily_digest",
            TaskName::Cleanup => "cleanup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ALL_TASKS.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by `Scheduler::status()` for the external watchdog.
/// Liveness and cadence only — task error history goes to the operational
/// log, not the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    /// Whether the worker thread is actually alive (vs. requested-running).
    pub alive: bool,
    pub tick_interval_secs: u64,
    /// Last successful run per task, keyed by task name.
    pub last_run: HashMap<String, DateTime<Utc>>,
}
