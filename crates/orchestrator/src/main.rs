/// Detection service CLI
///
/// Runs a single-shot detection over a raw media buffer and prints the
/// integrated verdict as JSON.
use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::info;

use forgery_detect_orchestrator::{IntegrationConfig, IntegrationOrchestrator};

fn usage(program: &str) -> String {
    format!(
        "Usage: {program} <video|audio> <raw-media-file> <model.onnx> [options]\n\
         \n\
         video options: --width <px> --height <px> --fps <n>   (default 640x480@30)\n\
         audio options: --rate <hz> --channels <n>             (default 16000 mono)\n\
         common:        --no-compression"
    )
}

fn parse_flag(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        bail!("{}", usage(&args[0]));
    }

    let mode = args[1].as_str();
    let media_path = PathBuf::from(&args[2]);
    let model_path = PathBuf::from(&args[3]);

    let data = std::fs::read(&media_path)
        .with_context(|| format!("failed to read media file {}", media_path.display()))?;
    info!(bytes = data.len(), file = %media_path.display(), "loaded media");

    let mut config = IntegrationConfig::default();
    if args.iter().any(|a| a == "--no-compression") {
        config.enable_compression = false;
    }

    let orchestrator = IntegrationOrchestrator::new();
    let verdict = match mode {
        "video" => {
            let width = parse_flag(&args, "--width").map_or(Ok(640), |v| v.parse())?;
            let height = parse_flag(&args, "--height").map_or(Ok(480), |v| v.parse())?;
            let fps = parse_flag(&args, "--fps").map_or(Ok(30), |v| v.parse())?;
            config.video_model.model_path = model_path;
            config.audio_model.model_path = config.video_model.model_path.clone();
            orchestrator
                .initialize(config)
                .context("failed to initialize detection service")?;
            orchestrator.detect_video(&data, width, height, fps)
        }
        "audio" => {
            let rate = parse_flag(&args, "--rate").map_or(Ok(16_000), |v| v.parse())?;
            let channels = parse_flag(&args, "--channels").map_or(Ok(1), |v| v.parse())?;
            config.audio_model.model_path = model_path;
            config.video_model.model_path = config.audio_model.model_path.clone();
            orchestrator
                .initialize(config)
                .context("failed to initialize detection service")?;
            orchestrator.detect_audio(&data, rate, channels)
        }
        other => bail!("unknown mode {other:?}\n{}", usage(&args[0])),
    };

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    info!(status = %orchestrator.get_service_status(), "detection complete");

    orchestrator.cleanup();
    Ok(())
}
