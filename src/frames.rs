use crate::types::{AnalysisError, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Extract a single still frame at `timestamp_sec` into `output_path`.
async fn extract_frame(video: &Path, timestamp_sec: f64, output_path: &Path) -> Result<()> {
    let output = Command::new("ffmpeg")
        .args(["-y", "-v", "error"])
        .args(["-ss", &format!("{:.3}", timestamp_sec)])
        .arg("-i")
        .arg(video)
        .args(["-frames:v", "1"])
        .arg(output_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(AnalysisError::General(format!(
            "frame extraction at {:.3}s failed: {}",
            timestamp_sec,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Capture one still per event timestamp into `output_dir`, named
/// `<prefix>_<n>.jpg`. Individual frame failures are logged and skipped;
/// returns the `(timestamp, path)` pairs that succeeded.
pub async fn extract_event_frames(
    video: &Path,
    events: &[f64],
    output_dir: &Path,
    prefix: &str,
) -> Result<Vec<(f64, PathBuf)>> {
    std::fs::create_dir_all(output_dir)?;
    let mut captured = Vec::new();

    for (index, &timestamp) in events.iter().enumerate() {
        let out_path = output_dir.join(format!("{}_{}.jpg", prefix, index + 1));
        match extract_frame(video, timestamp, &out_path).await {
            Ok(()) => {
                debug!("Captured event frame at {:.3}s: {}", timestamp, out_path.display());
                captured.push((timestamp, out_path));
            }
            Err(e) => warn!("Skipping event frame at {:.3}s: {}", timestamp, e),
        }
    }

    Ok(captured)
}
