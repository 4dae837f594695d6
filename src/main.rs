use clap::Parser;
use shot_consistency::{
    frames, safe_fs_name, GeminiClient, HarnessConfig, ModelRegistry, Orchestrator, Session,
    SessionStatus,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// Compare hosted vision models on basketball shot counting: chunk a video,
/// run every model over every chunk N times, and log how consistent each
/// model's counts are across identical inputs.
#[derive(Debug, Parser)]
#[command(name = "shot-consistency", version)]
struct Cli {
    /// Path to the source video (mp4).
    #[arg(long)]
    video: PathBuf,

    /// Model identifiers to compare.
    #[arg(long = "model", default_values_t = [
        "gemini-2.5-pro".to_string(),
        "gemini-3-pro-preview".to_string(),
    ])]
    models: Vec<String>,

    /// Chunk duration in seconds.
    #[arg(long, default_value_t = 12.0)]
    chunk_seconds: f64,

    /// Gap between consecutive chunks in seconds.
    #[arg(long, default_value_t = 1.0)]
    gap_seconds: f64,

    /// Number of independent passes over the same segment list.
    #[arg(long, default_value_t = 5)]
    runs: usize,

    /// Directory that session folders are created under.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Optional label folded into the session directory name.
    #[arg(long)]
    label: Option<String>,

    /// Per-model-call timeout in seconds.
    #[arg(long, default_value_t = 300)]
    call_timeout_seconds: u64,

    /// Also capture a still frame per first-run event into the session folder.
    #[arg(long, default_value_t = false)]
    capture_frames: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = HarnessConfig {
        chunk: shot_consistency::ChunkConfig {
            chunk_seconds: cli.chunk_seconds,
            gap_seconds: cli.gap_seconds,
        },
        num_runs: cli.runs,
        models: cli.models.clone(),
        log_dir: cli.log_dir.clone(),
        session_label: cli.label.clone(),
    };

    let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
        error!("GEMINI_API_KEY is not set (environment or .env)");
        "GEMINI_API_KEY is required"
    })?;

    let client = GeminiClient::new(api_key, Duration::from_secs(cli.call_timeout_seconds))?;
    let registry = ModelRegistry::from_gemini_ids(&client, &config.models)?;

    info!(
        "Starting analysis | video={} | models={} | runs={}",
        cli.video.display(),
        config.models.join(", "),
        config.num_runs
    );

    // Session creation failure is fatal before any run starts.
    let session = Session::create(&config.log_dir, config.session_label.as_deref())?;
    session.set_status(SessionStatus::Received)?;
    let video_name = cli
        .video
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| cli.video.display().to_string());
    session.write_meta(&video_name, &config.models, config.num_runs)?;

    let video_bytes = tokio::fs::read(&cli.video).await.map_err(|e| {
        error!("Failed to read {}: {}", cli.video.display(), e);
        e
    })?;

    let orchestrator = Orchestrator::new(registry, config);
    let output = match orchestrator.analyze(&video_bytes).await {
        Ok(output) => output,
        Err(e) => {
            error!("Analysis failed: {}", e);
            session.set_status(SessionStatus::AnalysisFailed)?;
            session.write_error(&e.to_string())?;
            return Err(Box::new(e) as Box<dyn std::error::Error>);
        }
    };
    let report = output.report;

    session.write_report(&report)?;
    session.write_raw_transcripts(&output.transcripts)?;
    session.set_status(SessionStatus::Success)?;

    for (model_id, consistency) in &report.model_consistency_analysis {
        info!(
            "Model {} | attempted per run: {:?} | made per run: {:?}",
            model_id, consistency.shots_attempted, consistency.shots_made
        );
    }

    if cli.capture_frames {
        let frames_dir = session.dir().join("frames");
        for (model_id, consistency) in &report.model_consistency_analysis {
            let model_tag = safe_fs_name(model_id, 40);
            if let Some(events) = consistency.attempt_events.first() {
                let prefix = format!("{}_attempt", model_tag);
                if let Err(e) =
                    frames::extract_event_frames(&cli.video, events, &frames_dir, &prefix).await
                {
                    error!("Frame capture failed for {}: {}", model_id, e);
                }
            }
            if let Some(events) = consistency.made_events.first() {
                let prefix = format!("{}_made", model_tag);
                if let Err(e) =
                    frames::extract_event_frames(&cli.video, events, &frames_dir, &prefix).await
                {
                    error!("Frame capture failed for {}: {}", model_id, e);
                }
            }
        }
    }

    info!("Analysis complete | session={}", session.dir().display());
    Ok(())
}
