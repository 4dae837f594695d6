use crate::model::{call_model, VisionModel};
use crate::types::{RunTotals, Segment};
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// What one model produced over one full pass: accumulated totals plus a
/// transcript of the raw text it returned per segment. The transcript keeps
/// unparseable responses too, so a skipped contribution stays inspectable.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub totals: RunTotals,
    pub transcript: String,
}

/// Execute one full pass: every configured model against every segment.
///
/// Segments are processed sequentially in time order. Within a segment the
/// model calls fan out concurrently and join before any accumulation, so the
/// per-run totals are only ever written from this task and need no locks.
/// A failed (model, segment) call is logged and skipped; it contributes
/// nothing and never disturbs other models or segments.
pub async fn run_pass(
    models: &[Arc<dyn VisionModel>],
    segments: &[Segment],
    prompt: &str,
) -> HashMap<String, RunOutput> {
    let mut outputs: HashMap<String, RunOutput> = models
        .iter()
        .map(|m| (m.model_id(), RunOutput::default()))
        .collect();

    for segment in segments {
        let calls = models.iter().map(|model| {
            let model = Arc::clone(model);
            async move {
                let record = call_model(model.as_ref(), prompt, &segment.bytes).await;
                (model.model_id(), record)
            }
        });

        for (model_id, record) in join_all(calls).await {
            let output = outputs.entry(model_id.clone()).or_default();

            let _ = writeln!(
                output.transcript,
                "--- segment [{:.3}, {:.3}) ---",
                segment.window.start, segment.window.end
            );
            match (&record.raw_text, &record.outcome) {
                (Some(text), _) => {
                    let _ = writeln!(output.transcript, "{}", text.trim_end());
                }
                (None, Err(e)) => {
                    let _ = writeln!(output.transcript, "[no response: {}]", e);
                }
                (None, Ok(_)) => {}
            }

            match record.outcome {
                Ok(response) => {
                    debug!(
                        "Segment [{:.3}, {:.3}) model {}: attempted={} made={}",
                        segment.window.start,
                        segment.window.end,
                        model_id,
                        response.shots_attempted,
                        response.shots_made
                    );
                    let totals = &mut output.totals;
                    totals.shots_attempted += response.shots_attempted;
                    totals.shots_made += response.shots_made;
                    totals
                        .attempt_events
                        .extend(response.attempt_events.iter().map(|t| segment.window.start + t));
                    totals
                        .made_events
                        .extend(response.made_events.iter().map(|t| segment.window.start + t));
                }
                Err(e) => {
                    warn!(
                        "Segment [{:.3}, {:.3}): skipping contribution: {}",
                        segment.window.start, segment.window.end, e
                    );
                }
            }
        }
    }

    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MockVisionModel;
    use crate::types::SegmentWindow;

    fn segment(start: f64, end: f64) -> Segment {
        Segment {
            window: SegmentWindow { start, end },
            bytes: vec![0u8; 16],
        }
    }

    #[tokio::test]
    async fn relative_events_become_absolute() {
        let model: Arc<dyn VisionModel> = Arc::new(MockVisionModel::new("m").with_response(
            r#"{"shots_attempted":3,"shots_made":1,
                "shot_attempt_events":["1.0","5.5",""],"shot_made_events":["5.5"]}"#,
        ));
        let segments = vec![segment(13.0, 25.0)];

        let outputs = run_pass(&[model], &segments, "prompt").await;
        let m = &outputs["m"].totals;
        assert_eq!(m.shots_attempted, 3);
        assert_eq!(m.shots_made, 1);
        assert_eq!(m.attempt_events.len(), 2);
        assert!((m.attempt_events[0] - 14.0).abs() < 1e-6);
        assert!((m.attempt_events[1] - 18.5).abs() < 1e-6);
        assert_eq!(m.made_events.len(), 1);
        assert!((m.made_events[0] - 18.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn one_model_failing_does_not_affect_the_other() {
        let ok: Arc<dyn VisionModel> = Arc::new(MockVisionModel::new("steady").with_response(
            r#"{"shots_attempted":2,"shots_made":1,
                "shot_attempt_events":["1.0","3.0"],"shot_made_events":["3.0"]}"#,
        ));
        let broken: Arc<dyn VisionModel> =
            Arc::new(MockVisionModel::new("broken").with_failure("quota exceeded"));
        let segments = vec![segment(0.0, 12.0), segment(13.0, 25.0)];

        let outputs = run_pass(&[ok, broken], &segments, "prompt").await;
        assert_eq!(outputs["steady"].totals.shots_attempted, 4);
        assert_eq!(outputs["steady"].totals.shots_made, 2);
        // The failing model still has an entry, with nothing accumulated.
        assert_eq!(outputs["broken"].totals.shots_attempted, 0);
        assert!(outputs["broken"].totals.attempt_events.is_empty());
    }

    #[tokio::test]
    async fn failed_segment_call_is_skipped_not_zero_filled() {
        let model: Arc<dyn VisionModel> = Arc::new(
            MockVisionModel::new("m")
                .with_failure("timeout")
                .with_response(
                    r#"{"shots_attempted":1,"shots_made":1,
                        "shot_attempt_events":["2.0"],"shot_made_events":["2.0"]}"#,
                ),
        );
        let segments = vec![segment(0.0, 12.0), segment(13.0, 25.0)];

        let outputs = run_pass(&[model], &segments, "prompt").await;
        // Only the second segment contributed; its event is absolute.
        assert_eq!(outputs["m"].totals.shots_attempted, 1);
        assert!((outputs["m"].totals.attempt_events[0] - 15.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn transcript_records_raw_text_per_segment_including_failures() {
        let model: Arc<dyn VisionModel> = Arc::new(
            MockVisionModel::new("m")
                .with_response("garbled non-json output")
                .with_response(
                    r#"{"shots_attempted":1,"shots_made":0,
                        "shot_attempt_events":["2.0"],"shot_made_events":[]}"#,
                ),
        );
        let segments = vec![segment(0.0, 12.0), segment(13.0, 25.0)];

        let outputs = run_pass(&[model], &segments, "prompt").await;
        let transcript = &outputs["m"].transcript;
        assert!(transcript.contains("--- segment [0.000, 12.000) ---"));
        assert!(transcript.contains("--- segment [13.000, 25.000) ---"));
        // The unparseable text is preserved even though it contributed nothing.
        assert!(transcript.contains("garbled non-json output"));
        assert!(transcript.contains("\"shots_attempted\":1"));
        assert_eq!(outputs["m"].totals.shots_attempted, 1);
    }
}
