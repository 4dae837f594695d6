use crate::aggregator::run_pass;
use crate::chunker;
use crate::model::{ModelRegistry, SHOT_COUNT_PROMPT};
use crate::types::{
    AnalysisError, ConsistencyReport, HarnessConfig, ModelConsistency, Result, Segment,
};
use std::collections::HashMap;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{info, warn};

/// Everything one analysis request produced: the consistency report plus the
/// raw per-run response transcripts, keyed by model id in run-index order.
pub struct AnalysisOutput {
    pub report: ConsistencyReport,
    pub transcripts: HashMap<String, Vec<String>>,
}

/// Drives the whole multi-run comparison for one analysis request.
///
/// Owns the injected model registry and configuration; scratch storage for
/// the source video and its segments lives in a [`TempDir`] that is reclaimed
/// on every exit path, success or failure.
pub struct Orchestrator {
    registry: ModelRegistry,
    config: HarnessConfig,
    prompt: String,
}

impl Orchestrator {
    pub fn new(registry: ModelRegistry, config: HarnessConfig) -> Self {
        Self {
            registry,
            config,
            prompt: SHOT_COUNT_PROMPT.to_string(),
        }
    }

    /// Override the instruction prompt (the default asks for the fixed
    /// shot-count schema).
    pub fn with_prompt(mut self, prompt: String) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run the full analysis: chunk once, then `num_runs` independent passes
    /// over the same fixed segment list.
    ///
    /// Fatal before any run: unreadable or zero-duration video, or a source
    /// from which no segment could be extracted. An unexpected failure inside
    /// a run aborts the whole request. Partial run arrays are never emitted,
    /// since a silently skipped run index would be indistinguishable from a
    /// zero-shot run.
    pub async fn analyze(&self, video_bytes: &[u8]) -> Result<AnalysisOutput> {
        if self.registry.is_empty() {
            return Err(AnalysisError::General(
                "no models configured for comparison".to_string(),
            ));
        }

        let scratch = TempDir::new()?;
        let video_path = scratch.path().join("source.mp4");
        tokio::fs::write(&video_path, video_bytes).await?;

        let video = chunker::probe_video(&video_path).await?;
        info!(
            "Source video: {:.3}s at {:.2} fps",
            video.duration_seconds, video.frame_rate
        );

        let windows = chunker::plan_windows(video.duration_seconds, &self.config.chunk)?;
        info!(
            "Planned {} windows (chunk={}s gap={}s)",
            windows.len(),
            self.config.chunk.chunk_seconds,
            self.config.chunk.gap_seconds
        );

        // Segments are extracted once and shared by every run; model output
        // variance is the only thing the repeated passes should measure.
        let segments = chunker::extract_all(&video_path, &windows, scratch.path()).await;
        if segments.is_empty() {
            return Err(AnalysisError::NoSegments);
        }
        if segments.len() < windows.len() {
            warn!(
                "{} of {} windows failed extraction and will be skipped by all models",
                windows.len() - segments.len(),
                windows.len()
            );
        }

        let output = self.run_all(&segments).await;

        Ok(output)
        // `scratch` drops here (and on every early return), deleting the
        // temporary video and segment files exactly once.
    }

    /// Perform `num_runs` structurally identical passes over an already
    /// extracted segment list. State from one run never leaks into the next;
    /// every per-model array in the result has length exactly `num_runs`,
    /// even when runs contained recovered per-segment failures.
    pub async fn run_all(&self, segments: &[Segment]) -> AnalysisOutput {
        let models = self.registry.models();
        let model_ids = self.registry.model_ids();
        let mut per_model: HashMap<String, ModelConsistency> = model_ids
            .iter()
            .map(|id| (id.clone(), ModelConsistency::default()))
            .collect();
        let mut transcripts: HashMap<String, Vec<String>> = model_ids
            .into_iter()
            .map(|id| (id, Vec::with_capacity(self.config.num_runs)))
            .collect();

        for run in 0..self.config.num_runs {
            let run_started = Instant::now();
            info!("Run {}/{} started", run + 1, self.config.num_runs);

            let outputs = run_pass(&models, segments, &self.prompt).await;
            for (model_id, output) in outputs {
                per_model
                    .entry(model_id.clone())
                    .or_default()
                    .push_run(output.totals);
                transcripts.entry(model_id).or_default().push(output.transcript);
            }

            info!(
                "Run {}/{} finished in {:.2}s",
                run + 1,
                self.config.num_runs,
                run_started.elapsed().as_secs_f64()
            );
        }

        AnalysisOutput {
            report: ConsistencyReport {
                model_consistency_analysis: per_model,
            },
            transcripts,
        }
    }
}
