use crate::types::{AnalysisError, ModelResponse, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Wire schema the models are asked to emit for each segment.
///
/// The two counts are required; the event lists are lists of timestamp
/// strings and default to empty when a model omits them.
#[derive(Debug, Deserialize)]
struct RawShotResponse {
    shots_attempted: i64,
    shots_made: i64,
    #[serde(default)]
    shot_attempt_events: Vec<Value>,
    #[serde(default)]
    shot_made_events: Vec<Value>,
}

/// Which parse strategy produced (or failed to produce) a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// The raw text parsed as JSON directly.
    Strict,
    /// JSON recovered after stripping code-fence wrapping.
    CodeFenceStripped,
}

impl ParseStrategy {
    fn label(&self) -> &'static str {
        match self {
            ParseStrategy::Strict => "strict",
            ParseStrategy::CodeFenceStripped => "code-fence-stripped",
        }
    }
}

/// Strip a leading/trailing markdown code fence (``` or ```json) if present.
fn strip_code_fence(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix("```")?;
    // Drop an optional language tag on the opening fence line.
    let rest = match rest.split_once('\n') {
        Some((first_line, body)) if first_line.trim().chars().all(|c| c.is_alphanumeric()) => body,
        _ => rest,
    };
    Some(rest.strip_suffix("```").unwrap_or(rest).trim())
}

/// Convert a model-emitted timestamp to seconds.
///
/// Accepts plain decimal seconds ("3.2") and minute-second form
/// ("00:03.2" -> 3.2). Empty or non-numeric values yield `None` and are
/// skipped by the caller, never treated as fatal.
pub fn timestamp_to_seconds(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some((minutes, seconds)) = raw.split_once(':') {
        let minutes: f64 = minutes.parse().ok()?;
        let seconds: f64 = seconds.parse().ok()?;
        return Some(minutes * 60.0 + seconds);
    }

    raw.parse().ok()
}

fn event_seconds(values: &[Value], field: &str) -> Vec<f64> {
    let mut seconds = Vec::with_capacity(values.len());
    for value in values {
        let parsed = match value {
            Value::String(s) => timestamp_to_seconds(s),
            Value::Number(n) => n.as_f64(),
            _ => None,
        };
        match parsed {
            Some(s) if s >= 0.0 => seconds.push(s),
            _ => debug!("Skipping unusable {} entry: {}", field, value),
        }
    }
    seconds
}

/// No plausible clip produces counts anywhere near this; anything larger is a
/// malformed response, not data.
const MAX_SHOT_COUNT: i64 = 10_000;

fn validate(raw: RawShotResponse) -> Result<ModelResponse> {
    if raw.shots_attempted < 0 || raw.shots_made < 0 {
        return Err(AnalysisError::ResponseParse(format!(
            "negative shot counts: attempted={} made={}",
            raw.shots_attempted, raw.shots_made
        )));
    }
    if raw.shots_attempted > MAX_SHOT_COUNT || raw.shots_made > MAX_SHOT_COUNT {
        return Err(AnalysisError::ResponseParse(format!(
            "implausible shot counts: attempted={} made={}",
            raw.shots_attempted, raw.shots_made
        )));
    }

    let mut attempt_events = event_seconds(&raw.shot_attempt_events, "shot_attempt_events");
    let made_events = event_seconds(&raw.shot_made_events, "shot_made_events");

    // Zero attempts with leftover attempt events is a malformed response;
    // drop the events rather than crash or reject the whole result.
    if raw.shots_attempted == 0 && !attempt_events.is_empty() {
        warn!(
            "Model reported 0 attempts but {} attempt events; dropping events",
            attempt_events.len()
        );
        attempt_events.clear();
    }

    // Made counts and made-event list lengths are independent signals and may
    // disagree; surfacing that divergence is the point of the harness.
    if raw.shots_made as usize != made_events.len() {
        debug!(
            "shots_made={} disagrees with {} made events (kept as-is)",
            raw.shots_made,
            made_events.len()
        );
    }

    Ok(ModelResponse {
        shots_attempted: raw.shots_attempted as u32,
        shots_made: raw.shots_made as u32,
        attempt_events,
        made_events,
    })
}

/// Parse raw model output text into a validated [`ModelResponse`].
///
/// Ordered strategy chain: strict JSON parse, then code-fence stripping, then
/// failure. The error message records what each attempted strategy saw, so a
/// failed response is traceable; it is never folded into a zeroed result.
pub fn parse_model_response(text: &str) -> Result<(ModelResponse, ParseStrategy)> {
    let mut attempts: Vec<String> = Vec::new();

    let candidates = [
        (ParseStrategy::Strict, Some(text.trim())),
        (ParseStrategy::CodeFenceStripped, strip_code_fence(text)),
    ];

    for (strategy, candidate) in candidates {
        let Some(candidate) = candidate else {
            attempts.push(format!("{}: not applicable", strategy.label()));
            continue;
        };
        match serde_json::from_str::<RawShotResponse>(candidate) {
            Ok(raw) => {
                debug!("Parsed model response via {} strategy", strategy.label());
                return validate(raw).map(|r| (r, strategy));
            }
            Err(e) => attempts.push(format!("{}: {}", strategy.label(), e)),
        }
    }

    Err(AnalysisError::ResponseParse(attempts.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"shots_attempted":3,"shots_made":1,
        "shot_attempt_events":["1.0","5.5",""],"shot_made_events":["5.5"]}"#;

    #[test]
    fn strict_json_parses() {
        let (resp, strategy) = parse_model_response(VALID).unwrap();
        assert_eq!(strategy, ParseStrategy::Strict);
        assert_eq!(resp.shots_attempted, 3);
        assert_eq!(resp.shots_made, 1);
        assert_eq!(resp.attempt_events, vec![1.0, 5.5]);
        assert_eq!(resp.made_events, vec![5.5]);
    }

    #[test]
    fn code_fenced_json_parses_identically() {
        let fenced = format!("```json\n{}\n```", VALID);
        let (bare, _) = parse_model_response(VALID).unwrap();
        let (wrapped, strategy) = parse_model_response(&fenced).unwrap();
        assert_eq!(strategy, ParseStrategy::CodeFenceStripped);
        assert_eq!(bare, wrapped);
    }

    #[test]
    fn empty_timestamp_entries_are_skipped() {
        let (resp, _) = parse_model_response(VALID).unwrap();
        assert_eq!(resp.attempt_events.len(), 2);
    }

    #[test]
    fn garbage_is_an_explicit_error_not_zeroes() {
        let err = parse_model_response("the player shot 3 times, nice form!").unwrap_err();
        match err {
            AnalysisError::ResponseParse(msg) => {
                assert!(msg.contains("strict"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn implausibly_large_counts_are_rejected_not_wrapped() {
        // Counts beyond u32 range must fail validation instead of silently
        // truncating into a small number.
        let text = format!(
            r#"{{"shots_attempted":{},"shots_made":1,
                "shot_attempt_events":[],"shot_made_events":[]}}"#,
            (u32::MAX as i64) + 7
        );
        let err = parse_model_response(&text).unwrap_err();
        match err {
            AnalysisError::ResponseParse(msg) => assert!(msg.contains("implausible")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn missing_required_count_is_rejected() {
        let err =
            parse_model_response(r#"{"shots_made":1,"shot_made_events":["5.5"]}"#).unwrap_err();
        assert!(matches!(err, AnalysisError::ResponseParse(_)));
    }

    #[test]
    fn zero_attempts_clears_attempt_events() {
        let text = r#"{"shots_attempted":0,"shots_made":0,
            "shot_attempt_events":["2.0"],"shot_made_events":[]}"#;
        let (resp, _) = parse_model_response(text).unwrap();
        assert!(resp.attempt_events.is_empty());
    }

    #[test]
    fn made_count_and_event_list_may_disagree() {
        let text = r#"{"shots_attempted":4,"shots_made":3,
            "shot_attempt_events":["1.0","2.0","3.0","4.0"],"shot_made_events":["2.0"]}"#;
        let (resp, _) = parse_model_response(text).unwrap();
        assert_eq!(resp.shots_made, 3);
        assert_eq!(resp.made_events.len(), 1);
    }

    #[test]
    fn minute_second_timestamps_convert() {
        assert_eq!(timestamp_to_seconds("3.2"), Some(3.2));
        assert_eq!(timestamp_to_seconds("00:03.2"), Some(3.2));
        assert_eq!(timestamp_to_seconds("1:30"), Some(90.0));
        assert_eq!(timestamp_to_seconds(""), None);
        assert_eq!(timestamp_to_seconds("n/a"), None);
    }

    #[test]
    fn numeric_event_values_are_accepted() {
        let text = r#"{"shots_attempted":2,"shots_made":0,
            "shot_attempt_events":[1.5,"4.0"],"shot_made_events":[]}"#;
        let (resp, _) = parse_model_response(text).unwrap();
        assert_eq!(resp.attempt_events, vec![1.5, 4.0]);
    }
}
