use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Chunking parameters for splitting the source video into segments.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Target duration of each chunk, in seconds.
    pub chunk_seconds: f64,
    /// Gap between the end of one chunk window and the start of the next.
    pub gap_seconds: f64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: 12.0,
            gap_seconds: 1.0,
        }
    }
}

/// Full configuration surface for one analysis request.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub chunk: ChunkConfig,
    /// Number of independent passes over the same segment list.
    pub num_runs: usize,
    /// Identifiers of the models to compare.
    pub models: Vec<String>,
    /// Directory that session folders are created under.
    pub log_dir: PathBuf,
    /// Optional human label folded into the session directory name.
    pub session_label: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            num_runs: 5,
            models: vec![
                "gemini-2.5-pro".to_string(),
                "gemini-3-pro-preview".to_string(),
            ],
            log_dir: PathBuf::from("logs"),
            session_label: None,
        }
    }
}

/// Probed metadata for a source video.
#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub duration_seconds: f64,
    pub frame_rate: f64,
}

/// A half-open time window `[start, end)` into the source video, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentWindow {
    pub start: f64,
    pub end: f64,
}

impl SegmentWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// One extracted chunk: the window plus its stream-copied byte payload.
#[derive(Debug, Clone)]
pub struct Segment {
    pub window: SegmentWindow,
    pub bytes: Vec<u8>,
}

/// Validated result of one model invocation on one segment.
///
/// Event timestamps are segment-relative seconds. `shots_made` and the length
/// of `made_events` are independent signals from the model and may disagree;
/// that divergence is surfaced, not reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub shots_attempted: u32,
    pub shots_made: u32,
    pub attempt_events: Vec<f64>,
    pub made_events: Vec<f64>,
}

/// Per-model running totals for one pass over all segments.
///
/// Event timestamps here are video-absolute (segment start + relative offset).
#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    pub shots_attempted: u32,
    pub shots_made: u32,
    pub attempt_events: Vec<f64>,
    pub made_events: Vec<f64>,
}

/// One model's results across all runs, in run-index order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConsistency {
    pub shots_attempted: Vec<u32>,
    pub shots_made: Vec<u32>,
    pub attempt_events: Vec<Vec<f64>>,
    pub made_events: Vec<Vec<f64>>,
}

impl ModelConsistency {
    pub fn push_run(&mut self, totals: RunTotals) {
        self.shots_attempted.push(totals.shots_attempted);
        self.shots_made.push(totals.shots_made);
        self.attempt_events.push(totals.attempt_events);
        self.made_events.push(totals.made_events);
    }
}

/// The persisted artifact: per-model run arrays, one outer entry per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub model_consistency_analysis: HashMap<String, ModelConsistency>,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Video is unreadable: {0}")]
    UnreadableVideo(String),

    #[error("Video has zero or invalid duration: {0}")]
    ZeroDuration(f64),

    #[error("Segment extraction failed for [{start}, {end}): {reason}")]
    Extraction {
        start: f64,
        end: f64,
        reason: String,
    },

    #[error("No segments could be extracted from the source video")]
    NoSegments,

    #[error("Model '{model}' call failed: {cause}")]
    ModelCall { model: String, cause: String },

    #[error("Response parse failed: {0}")]
    ResponseParse(String),

    #[error("Unknown model identifier: {0}")]
    UnknownModel(String),

    #[error("Session setup failed: {0}")]
    SessionSetup(String),

    #[error("General error: {0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
