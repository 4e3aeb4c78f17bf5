//! Prompt construction and response extraction for the analysis invoker.
//!
//! Prompts demand bare JSON; extraction still tolerates markdown fences and
//! surrounding prose, because the generator does not always comply.

use crate::db::{format_ts, DbActivity, DbActivityAnalysis, DbEvent};

/// Prompt for summarizing a group of same-type activities into an analysis.
pub fn build_activity_analysis_prompt(activity_type: &str, activities: &[DbActivity]) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(
        "You analyze a user's logged activities to find their habits. \
         Summarize the activity group below.\n\n",
    );

    prompt.push_str(&format!(
        "<activity_group type=\"{}\">\n",
        activity_type
    ));
    for activity in activities {
        prompt.push_str(&format!("- <user_data>{}</user_data>", activity.name));
        if let Some(ref desc) = activity.description {
            prompt.push_str(&format!(" — <user_data>{}</user_data>", desc));
        }
        if let Some(start) = activity.start_time {
            prompt.push_str(&format!(" (at {})", format_ts(start)));
        }
        prompt.push('\n');
    }
    prompt.push_str("</activity_group>\n\n");

    prompt.push_str(
        "Respond with ONLY a valid JSON object (no markdown fences, no explanation):\n\
         {\n\
         \x20 \"preferred_time\": \"morning|afternoon|evening|night|mixed\",\n\
         \x20 \"frequency_per_week\": 0,\n\
         \x20 \"frequency_per_month\": 0,\n\
         \x20 \"description\": \"one sentence describing the habit\"\n\
         }\n\n\
         Constraints:\n\
         - preferred_time: exactly one of the five listed buckets\n\
         - frequency_per_week: number between 0 and 7\n\
         - frequency_per_month: number between 0 and 30\n\
         - description: one sentence, specific to this group",
    );

    prompt
}

fn push_context(
    prompt: &mut String,
    analyses: &[DbActivityAnalysis],
    events: &[DbEvent],
) {
    if !analyses.is_empty() {
        prompt.push_str("<habits>\n");
        for analysis in analyses {
            prompt.push_str(&format!(
                "- {} ({}x/week, usually {}): <user_data>{}</user_data>\n",
                analysis.activity_type,
                analysis.frequency_per_week,
                analysis.preferred_time.as_str(),
                analysis.description
            ));
        }
        prompt.push_str("</habits>\n\n");
    }

    if !events.is_empty() {
        prompt.push_str("<upcoming_events>\n");
        for event in events {
            prompt.push_str(&format!(
                "- <user_data>{}</user_data> at {}\n",
                event.name,
                format_ts(event.start_time)
            ));
        }
        prompt.push_str("</upcoming_events>\n\n");
    }
}

/// Primary structured-output prompt for recommendation candidates.
pub fn build_recommendations_prompt(
    analyses: &[DbActivityAnalysis],
    events: &[DbEvent],
    max_candidates: usize,
) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(
        "You are a personal planning assistant. Based on the user's habits and \
         upcoming schedule, suggest helpful recommendations.\n\n",
    );
    push_context(&mut prompt, analyses, events);

    prompt.push_str(&format!(
        "Respond with ONLY a valid JSON array of at most {} objects \
         (no markdown fences, no explanation):\n\
         [\n\
         \x20 {{\n\
         \x20   \"recommendation_type\": \"habit|schedule|wellness|general\",\n\
         \x20   \"title\": \"short imperative title\",\n\
         \x20   \"content\": \"one or two sentences of actionable advice\",\n\
         \x20   \"score\": 5,\n\
         \x20   \"reason\": \"why this matters now\"\n\
         \x20 }}\n\
         ]\n\n\
         Constraints:\n\
         - score: integer 1-10, where 7+ means worth interrupting the user for\n\
         - be specific and actionable, not generic",
        max_candidates
    ));

    prompt
}

/// Fallback prompt used when the structured call fails: plainer framing with
/// explicit JSON-array instructions repeated.
pub fn build_recommendations_fallback_prompt(
    analyses: &[DbActivityAnalysis],
    events: &[DbEvent],
    max_candidates: usize,
) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str("Suggest personal recommendations from the context below.\n\n");
    push_context(&mut prompt, analyses, events);

    prompt.push_str(&format!(
        "Output format: a JSON array, and nothing else. Start your answer with '[' \
         and end it with ']'. Include at most {} elements. Each element must be an \
         object with string fields \"recommendation_type\", \"title\", \"content\", \
         \"reason\" and an integer field \"score\" from 1 to 10.",
        max_candidates
    ));

    prompt
}

/// Extract a JSON object from response text. Handles markdown fences and
/// surrounding prose.
pub fn extract_json_object(response: &str) -> Option<&str> {
    extract_json_value(response, '{', '}')
}

/// Extract a JSON array from response text.
pub fn extract_json_array(response: &str) -> Option<&str> {
    extract_json_value(response, '[', ']')
}

fn extract_json_value(response: &str, open: char, close: char) -> Option<&str> {
    // Try to find JSON in a ```json code fence
    if let Some(start) = response.find("```json") {
        let json_start = start + 7;
        if let Some(end) = response[json_start..].find("```") {
            let candidate = response[json_start..json_start + end].trim();
            if candidate.starts_with(open) {
                return Some(candidate);
            }
        }
    }
    // Try generic ``` code fence
    if let Some(start) = response.find("```") {
        let after_fence = start + 3;
        if let Some(nl) = response[after_fence..].find('\n') {
            let json_start = after_fence + nl + 1;
            if let Some(end) = response[json_start..].find("```") {
                let candidate = response[json_start..json_start + end].trim();
                if candidate.starts_with(open) {
                    return Some(candidate);
                }
            }
        }
    }

    // Raw value, or a value embedded in other text: balanced-delimiter walk
    // that ignores delimiters inside strings.
    if let Some(start) = response.find(open) {
        let candidate = &response[start..];
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escape = false;
        for (i, ch) in candidate.char_indices() {
            if escape {
                escape = false;
                continue;
            }
            if ch == '\\' && in_string {
                escape = true;
                continue;
            }
            if ch == '"' {
                in_string = !in_string;
                continue;
            }
            if in_string {
                continue;
            }
            if ch == open {
                depth += 1;
            } else if ch == close {
                depth -= 1;
                if depth == 0 {
                    return Some(&candidate[..=i]);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_raw_object() {
        assert_eq!(extract_json_object(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_extract_from_json_fence() {
        let response = "Here you go:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json_object(response), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_from_generic_fence() {
        let response = "```\n[{\"a\": 1}]\n```";
        assert_eq!(extract_json_array(response), Some("[{\"a\": 1}]"));
    }

    #[test]
    fn test_extract_embedded_object_balances_braces() {
        let response = r#"Sure! {"a": {"b": "with } inside"}} trailing"#;
        assert_eq!(
            extract_json_object(response),
            Some(r#"{"a": {"b": "with } inside"}}"#)
        );
    }

    #[test]
    fn test_extract_array_embedded_in_prose() {
        let response = "The recommendations are: [{\"score\": 8}] — enjoy.";
        assert_eq!(extract_json_array(response), Some("[{\"score\": 8}]"));
    }

    #[test]
    fn test_extract_none_when_missing() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_array("{\"object\": true}"), None);
    }
}
