use crate::types::{AnalysisError, ChunkConfig, Result, Segment, SegmentWindow, VideoInfo};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    /// e.g. "30/1" or "24000/1001"
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Parse an ffprobe frame-rate fraction like "24000/1001" into frames per second.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                None
            } else {
                Some(num / den)
            }
        }
        None => raw.trim().parse().ok(),
    }
}

/// Probe a video for total duration and frame rate.
///
/// A missing, zero, or non-finite duration (and likewise a zero frame rate) is
/// a fatal setup condition: the window planner would otherwise loop forever.
pub async fn probe_video(path: &Path) -> Result<VideoInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(|e| AnalysisError::UnreadableVideo(format!("ffprobe not runnable: {}", e)))?;

    if !output.status.success() {
        return Err(AnalysisError::UnreadableVideo(format!(
            "ffprobe exit code {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let probed: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| AnalysisError::UnreadableVideo(format!("ffprobe output: {}", e)))?;

    let duration_seconds: f64 = probed
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0.0);

    if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
        return Err(AnalysisError::ZeroDuration(duration_seconds));
    }

    let frame_rate = probed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| s.r_frame_rate.as_deref())
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    if frame_rate <= 0.0 {
        return Err(AnalysisError::UnreadableVideo(
            "no video stream with a usable frame rate".to_string(),
        ));
    }

    debug!(
        "Probed video: duration={:.3}s frame_rate={:.3}",
        duration_seconds, frame_rate
    );

    Ok(VideoInfo {
        duration_seconds,
        frame_rate,
    })
}

/// Plan the ordered chunk windows for a video of `total_duration` seconds.
///
/// Consecutive windows satisfy `next.start = prev.start + chunk + gap`; the
/// final window is clipped so its end equals `total_duration` exactly.
pub fn plan_windows(total_duration: f64, config: &ChunkConfig) -> Result<Vec<SegmentWindow>> {
    if !total_duration.is_finite() || total_duration <= 0.0 {
        return Err(AnalysisError::ZeroDuration(total_duration));
    }
    if config.chunk_seconds <= 0.0 || config.gap_seconds < 0.0 {
        return Err(AnalysisError::General(format!(
            "invalid chunk config: chunk={}s gap={}s",
            config.chunk_seconds, config.gap_seconds
        )));
    }

    let mut windows = Vec::new();
    let mut start = 0.0;

    while start < total_duration {
        let end = (start + config.chunk_seconds).min(total_duration);
        windows.push(SegmentWindow { start, end });
        start += config.chunk_seconds + config.gap_seconds;
    }

    Ok(windows)
}

/// Extract one window from the source video as a standalone byte payload.
///
/// Stream copy only (`-c copy`): no re-encode, the segment keeps the source
/// codec. Nonzero exit status or empty output is an extraction failure.
pub async fn extract_segment(
    source: &Path,
    window: SegmentWindow,
    scratch_dir: &Path,
) -> Result<Vec<u8>> {
    let out_path = scratch_dir.join(format!("chunk_{:.3}_{:.3}.mp4", window.start, window.end));

    let output = Command::new("ffmpeg")
        .args(["-y", "-v", "error"])
        .args(["-ss", &format!("{:.3}", window.start)])
        .arg("-i")
        .arg(source)
        .args(["-t", &format!("{:.3}", window.duration())])
        .args(["-c", "copy", "-an"])
        .arg(&out_path)
        .output()
        .await
        .map_err(|e| AnalysisError::Extraction {
            start: window.start,
            end: window.end,
            reason: format!("ffmpeg not runnable: {}", e),
        })?;

    if !output.status.success() {
        return Err(AnalysisError::Extraction {
            start: window.start,
            end: window.end,
            reason: format!(
                "ffmpeg exit code {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let bytes = tokio::fs::read(&out_path).await?;
    if bytes.is_empty() {
        return Err(AnalysisError::Extraction {
            start: window.start,
            end: window.end,
            reason: "ffmpeg produced an empty segment".to_string(),
        });
    }

    Ok(bytes)
}

/// Extract every planned window, skipping (and logging) individual failures.
///
/// One bad window never aborts extraction of the windows after it.
pub async fn extract_all(
    source: &Path,
    windows: &[SegmentWindow],
    scratch_dir: &Path,
) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(windows.len());

    for window in windows {
        match extract_segment(source, *window, scratch_dir).await {
            Ok(bytes) => {
                debug!(
                    "Extracted segment [{:.3}, {:.3}) ({} bytes)",
                    window.start,
                    window.end,
                    bytes.len()
                );
                segments.push(Segment {
                    window: *window,
                    bytes,
                });
            }
            Err(e) => {
                warn!(
                    "Skipping segment [{:.3}, {:.3}): {}",
                    window.start, window.end, e
                );
            }
        }
    }

    info!(
        "Extracted {}/{} segments from source video",
        segments.len(),
        windows.len()
    );
    segments
}
