//! Analysis invoker: grouping, validation, and clamping around the external
//! structured-output generator.
//!
//! The generator is treated as slow, non-deterministic, and occasionally
//! malformed. Field-level problems are clamped or defaulted; candidate-level
//! problems drop the one candidate; only a total failure (structured call and
//! free-text fallback both unusable) surfaces as an error, so the caller can
//! leave its gated timer unadvanced and retry promptly.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use crate::db::{DbActivity, DbActivityAnalysis, DbEvent, NewRecommendation};
use crate::types::{clamp_score, PreferredTime};

pub mod prompts;
pub mod provider;

pub use provider::{CompletionProvider, HttpProvider, ProviderError};

/// Errors from the analysis invoker. Anything here means the whole call
/// yielded nothing usable — partial problems are handled by clamping and
/// per-candidate drops instead.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("no JSON found in generator response")]
    NoJson,

    #[error("unparseable generator response: {0}")]
    Parse(String),
}

/// Validated, clamped result of a grouped activity analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityAnalysisData {
    pub preferred_time: PreferredTime,
    pub frequency_per_week: f64,
    pub frequency_per_month: f64,
    pub description: String,
}

// =============================================================================
// Grouping
// =============================================================================

/// Group key for an untagged activity: its normalized lower-cased name.
fn normalized_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Group activities for analysis. Tags take priority — an activity with N
/// tags contributes to N groups; untagged activities group by normalized
/// name. BTreeMap keeps group order deterministic across ticks.
pub fn group_activities(activities: &[DbActivity]) -> BTreeMap<String, Vec<DbActivity>> {
    let mut groups: BTreeMap<String, Vec<DbActivity>> = BTreeMap::new();
    for activity in activities {
        if activity.tags.is_empty() {
            groups
                .entry(normalized_name(&activity.name))
                .or_default()
                .push(activity.clone());
        } else {
            for tag in &activity.tags {
                groups
                    .entry(normalized_name(tag))
                    .or_default()
                    .push(activity.clone());
            }
        }
    }
    groups
}

// =============================================================================
// Grouped activity analysis
// =============================================================================

/// Raw analysis shape as the generator returns it — everything optional,
/// nothing trusted.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    preferred_time: Option<String>,
    #[serde(default)]
    frequency_per_week: Option<f64>,
    #[serde(default)]
    frequency_per_month: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

/// Analyze one group of same-type activities.
///
/// Malformed fields are clamped or defaulted rather than rejecting the whole
/// record: an unknown preferred_time becomes `mixed`, frequencies clamp to
/// [0,7] and [0,30].
pub fn analyze_group(
    provider: &dyn CompletionProvider,
    activity_type: &str,
    activities: &[DbActivity],
) -> Result<ActivityAnalysisData, AnalysisError> {
    let prompt = prompts::build_activity_analysis_prompt(activity_type, activities);
    let response = provider.complete(&prompt)?;

    let json_str = prompts::extract_json_object(&response).ok_or(AnalysisError::NoJson)?;
    let raw: RawAnalysis =
        serde_json::from_str(json_str).map_err(|e| AnalysisError::Parse(e.to_string()))?;

    Ok(ActivityAnalysisData {
        preferred_time: raw
            .preferred_time
            .as_deref()
            .map(PreferredTime::parse_or_default)
            .unwrap_or(PreferredTime::Mixed),
        frequency_per_week: raw.frequency_per_week.unwrap_or(0.0).clamp(0.0, 7.0),
        frequency_per_month: raw.frequency_per_month.unwrap_or(0.0).clamp(0.0, 30.0),
        description: raw.description.unwrap_or_default(),
    })
}

// =============================================================================
// Recommendation generation
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    recommendation_type: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

/// Validate a single candidate. Missing title or content makes it malformed
/// and it is dropped; a missing type defaults to "general", a missing score
/// to the neutral 5, and out-of-range scores clamp to [1,10].
fn validate_candidate(raw: RawCandidate) -> Option<NewRecommendation> {
    let title = raw.title.filter(|t| !t.trim().is_empty())?;
    let content = raw.content.filter(|c| !c.trim().is_empty())?;
    Some(NewRecommendation {
        recommendation_type: raw
            .recommendation_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "general".to_string()),
        title,
        content,
        score: clamp_score(raw.score.unwrap_or(5.0)),
        reason: raw.reason,
    })
}

/// Parse a generator response into validated candidates. Candidates are
/// validated independently — one malformed element never fails the batch.
fn parse_candidates(response: &str, max: usize) -> Result<Vec<NewRecommendation>, AnalysisError> {
    let json_str = prompts::extract_json_array(response).ok_or(AnalysisError::NoJson)?;
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(json_str).map_err(|e| AnalysisError::Parse(e.to_string()))?;

    let mut candidates = Vec::new();
    for value in raw {
        match serde_json::from_value::<RawCandidate>(value) {
            Ok(candidate) => match validate_candidate(candidate) {
                Some(valid) => candidates.push(valid),
                None => log::warn!("Dropping malformed recommendation candidate (missing fields)"),
            },
            Err(e) => log::warn!("Dropping malformed recommendation candidate: {}", e),
        }
        if candidates.len() >= max {
            break;
        }
    }
    Ok(candidates)
}

/// Request a bounded batch of recommendation candidates.
///
/// The structured call is tried first; if its response is unusable, a
/// fallback free-text call with explicit JSON-array instructions is
/// attempted. Only when both fail does the function error — the caller then
/// leaves the hourly gate unreset so the next tick retries promptly.
pub fn generate_recommendations(
    provider: &dyn CompletionProvider,
    analyses: &[DbActivityAnalysis],
    upcoming_events: &[DbEvent],
    max_candidates: usize,
) -> Result<Vec<NewRecommendation>, AnalysisError> {
    let prompt = prompts::build_recommendations_prompt(analyses, upcoming_events, max_candidates);
    let first_failure = match provider
        .complete(&prompt)
        .map_err(AnalysisError::from)
        .and_then(|response| parse_candidates(&response, max_candidates))
    {
        Ok(candidates) => return Ok(candidates),
        Err(e) => e,
    };

    log::warn!(
        "Structured recommendation call failed ({}); trying free-text fallback",
        first_failure
    );

    let fallback =
        prompts::build_recommendations_fallback_prompt(analyses, upcoming_events, max_candidates);
    let response = provider.complete(&fallback)?;
    parse_candidates(&response, max_candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    use crate::types::ActivityStatus;

    fn activity(name: &str, tags: &[&str]) -> DbActivity {
        DbActivity {
            id: format!("act-{name}"),
            name: name.to_string(),
            description: None,
            start_time: None,
            end_time: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            status: ActivityStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Provider double returning a scripted sequence of responses.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<String, ()>>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<String, ()>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    impl CompletionProvider for ScriptedProvider {
        fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            let mut guard = self.responses.lock().unwrap();
            if guard.is_empty() {
                return Err(ProviderError::EmptyResponse);
            }
            guard.remove(0).map_err(|_| ProviderError::EmptyResponse)
        }
    }

    #[test]
    fn test_grouping_tags_first_then_name() {
        let activities = vec![
            activity("Morning Run", &["exercise"]),
            activity("Gym", &["exercise", "strength"]),
            activity("Read Book", &[]),
            activity("read book", &[]),
        ];
        let groups = group_activities(&activities);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups["exercise"].len(), 2);
        assert_eq!(groups["strength"].len(), 1, "multi-tag activity joins each tag group");
        assert_eq!(groups["read book"].len(), 2, "untagged grouped by normalized name");
    }

    #[test]
    fn test_analyze_group_clamps_malformed_fields() {
        let provider = ScriptedProvider::new(vec![Ok(r#"{
            "preferred_time": "dawn",
            "frequency_per_week": 12,
            "frequency_per_month": -4,
            "description": "runs a lot"
        }"#
        .to_string())]);

        let result = analyze_group(&provider, "exercise", &[activity("run", &["exercise"])])
            .unwrap();
        assert_eq!(result.preferred_time, PreferredTime::Mixed);
        assert_eq!(result.frequency_per_week, 7.0);
        assert_eq!(result.frequency_per_month, 0.0);
        assert_eq!(result.description, "runs a lot");
    }

    #[test]
    fn test_analyze_group_provider_failure_propagates() {
        let provider = ScriptedProvider::new(vec![Err(())]);
        let err = analyze_group(&provider, "exercise", &[activity("run", &[])]).unwrap_err();
        assert!(matches!(err, AnalysisError::Provider(_)));
    }

    #[test]
    fn test_generate_drops_single_malformed_candidate() {
        let provider = ScriptedProvider::new(vec![Ok(r#"[
            {"recommendation_type": "habit", "title": "Stretch", "content": "Stretch daily", "score": 8},
            {"recommendation_type": "habit", "content": "missing title", "score": 9}
        ]"#
        .to_string())]);

        let batch = generate_recommendations(&provider, &[], &[], 4).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].title, "Stretch");
        assert_eq!(batch[0].score, 8);
    }

    #[test]
    fn test_generate_clamps_scores() {
        let provider = ScriptedProvider::new(vec![Ok(r#"[
            {"title": "A", "content": "a", "score": 42},
            {"title": "B", "content": "b", "score": -1},
            {"title": "C", "content": "c"}
        ]"#
        .to_string())]);

        let batch = generate_recommendations(&provider, &[], &[], 4).unwrap();
        let scores: Vec<_> = batch.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![10, 1, 5]);
    }

    #[test]
    fn test_generate_bounded_candidate_count() {
        let provider = ScriptedProvider::new(vec![Ok(r#"[
            {"title": "A", "content": "a"},
            {"title": "B", "content": "b"},
            {"title": "C", "content": "c"},
            {"title": "D", "content": "d"},
            {"title": "E", "content": "e"}
        ]"#
        .to_string())]);

        let batch = generate_recommendations(&provider, &[], &[], 4).unwrap();
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn test_generate_uses_fallback_after_unusable_structured_reply() {
        let provider = ScriptedProvider::new(vec![
            Ok("I can't answer in JSON, sorry.".to_string()),
            Ok(r#"[{"title": "Walk", "content": "Take a walk", "score": 7}]"#.to_string()),
        ]);

        let batch = generate_recommendations(&provider, &[], &[], 4).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].title, "Walk");
    }

    #[test]
    fn test_generate_errors_when_both_calls_fail() {
        let provider = ScriptedProvider::new(vec![Err(()), Err(())]);
        assert!(generate_recommendations(&provider, &[], &[], 4).is_err());
    }
}
