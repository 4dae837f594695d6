use crate::types::{AnalysisError, ConsistencyReport, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Lifecycle markers written to `status.txt` as an analysis progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Received,
    AnalysisFailed,
    Success,
}

impl SessionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Received => "RECEIVED",
            SessionStatus::AnalysisFailed => "ANALYSIS_FAILED",
            SessionStatus::Success => "SUCCESS",
        }
    }
}

/// Make a user-supplied label safe for use in a directory name.
///
/// Illegal filesystem characters become underscores, whitespace and
/// underscore runs collapse, edges are trimmed, and the result is bounded to
/// `max_len` with an `unknown` fallback.
pub fn safe_fs_name(value: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_sep = true;

    for c in value.trim().chars() {
        let mapped = if c.is_whitespace() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
            '_'
        } else {
            c
        };
        if mapped == '_' {
            if !last_was_sep {
                out.push('_');
                last_was_sep = true;
            }
        } else {
            out.push(mapped);
            last_was_sep = false;
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let bounded: String = trimmed.chars().take(max_len).collect();
    if bounded.is_empty() {
        "unknown".to_string()
    } else {
        bounded
    }
}

/// A session-scoped output directory, unique per invocation.
///
/// Directory name combines the sanitized label, a local timestamp, and a
/// short random suffix so concurrent or same-second sessions never collide.
pub struct Session {
    dir: PathBuf,
}

impl Session {
    /// Create the session directory under `log_dir`. Failure here is a fatal
    /// setup error for the whole request.
    pub fn create(log_dir: &Path, label: Option<&str>) -> Result<Self> {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let token = Uuid::new_v4().simple().to_string();
        let suffix = &token[..8];
        let name = match label {
            Some(label) => format!("{}_{}_{}", safe_fs_name(label, 50), timestamp, suffix),
            None => format!("session_{}_{}", timestamp, suffix),
        };

        let dir = log_dir.join(name);
        std::fs::create_dir_all(&dir)
            .map_err(|e| AnalysisError::SessionSetup(format!("{}: {}", dir.display(), e)))?;

        info!("Created session directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Overwrite `status.txt` with the current lifecycle marker.
    pub fn set_status(&self, status: SessionStatus) -> Result<()> {
        std::fs::write(self.dir.join("status.txt"), format!("{}\n", status.as_str()))?;
        Ok(())
    }

    /// Write `meta.txt` describing the request.
    pub fn write_meta(&self, video_name: &str, models: &[String], num_runs: usize) -> Result<()> {
        let meta = format!(
            "Video Name: {}\nTimestamp: {}\nModels: {}\nRuns: {}\n",
            video_name,
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            models.join(", "),
            num_runs
        );
        std::fs::write(self.dir.join("meta.txt"), meta)?;
        Ok(())
    }

    /// Serialize the final report to `results.json`. All-or-nothing: a
    /// failed write surfaces as an error, it is never silently retried.
    pub fn write_report(&self, report: &ConsistencyReport) -> Result<()> {
        let path = self.dir.join("results.json");
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)?;
        info!("Wrote consistency report: {}", path.display());
        Ok(())
    }

    /// Persist each model's raw per-run response text as
    /// `raw_<model>_run<k>.txt`. The raw text is kept verbatim (including
    /// responses that failed validation); it is the primary artifact for
    /// inspecting free-form output variance after the fact.
    pub fn write_raw_transcripts(
        &self,
        transcripts: &std::collections::HashMap<String, Vec<String>>,
    ) -> Result<()> {
        for (model_id, runs) in transcripts {
            let model_tag = safe_fs_name(model_id, 40);
            for (run, transcript) in runs.iter().enumerate() {
                let path = self.dir.join(format!("raw_{}_run{}.txt", model_tag, run + 1));
                std::fs::write(&path, transcript)?;
            }
        }
        info!("Wrote raw model transcripts to {}", self.dir.display());
        Ok(())
    }

    /// Record the cause of a failed analysis in `error.txt`.
    pub fn write_error(&self, cause: &str) -> Result<()> {
        std::fs::write(self.dir.join("error.txt"), format!("{}\n", cause))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelConsistency;

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(safe_fs_name("Coach: Mike / Session 2", 50), "Coach_Mike_Session_2");
        assert_eq!(safe_fs_name("  __..__  ", 50), "unknown");
        assert_eq!(safe_fs_name("a<b>c", 50), "a_b_c");
        let long = "x".repeat(100);
        assert_eq!(safe_fs_name(&long, 50).len(), 50);
    }

    #[test]
    fn session_dirs_are_unique() {
        let root = tempfile::tempdir().unwrap();
        let a = Session::create(root.path(), Some("tester")).unwrap();
        let b = Session::create(root.path(), Some("tester")).unwrap();
        assert_ne!(a.dir(), b.dir());
        assert!(a.dir().exists() && b.dir().exists());
    }

    #[test]
    fn report_round_trips_through_results_json() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::create(root.path(), None).unwrap();

        let mut report = ConsistencyReport::default();
        report.model_consistency_analysis.insert(
            "gemini-2.5-pro".to_string(),
            ModelConsistency {
                shots_attempted: vec![3, 4],
                shots_made: vec![1, 2],
                attempt_events: vec![vec![14.0, 18.5], vec![2.0]],
                made_events: vec![vec![18.5], vec![]],
            },
        );
        session.write_report(&report).unwrap();

        let raw = std::fs::read_to_string(session.dir().join("results.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let model = &value["model_consistency_analysis"]["gemini-2.5-pro"];
        assert_eq!(model["shots_attempted"], serde_json::json!([3, 4]));
        assert_eq!(model["attempt_events"][0][1], serde_json::json!(18.5));
    }

    #[test]
    fn raw_transcripts_land_one_file_per_model_per_run() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::create(root.path(), None).unwrap();

        let mut transcripts = std::collections::HashMap::new();
        transcripts.insert(
            "gemini-2.5-pro".to_string(),
            vec![
                "--- segment [0.000, 12.000) ---\n{\"shots_attempted\":2}\n".to_string(),
                "--- segment [0.000, 12.000) ---\ngarbled output\n".to_string(),
            ],
        );
        session.write_raw_transcripts(&transcripts).unwrap();

        let run1 = std::fs::read_to_string(session.dir().join("raw_gemini-2.5-pro_run1.txt"))
            .unwrap();
        assert!(run1.contains("shots_attempted"));
        let run2 = std::fs::read_to_string(session.dir().join("raw_gemini-2.5-pro_run2.txt"))
            .unwrap();
        assert!(run2.contains("garbled output"));
    }

    #[test]
    fn status_transitions_overwrite() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::create(root.path(), None).unwrap();
        session.set_status(SessionStatus::Received).unwrap();
        session.set_status(SessionStatus::Success).unwrap();
        let status = std::fs::read_to_string(session.dir().join("status.txt")).unwrap();
        assert_eq!(status, "SUCCESS\n");
    }
}
