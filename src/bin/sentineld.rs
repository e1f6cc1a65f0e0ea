//! sentineld - multi-camera detection daemon
//!
//! This daemon:
//! 1. Loads configuration (file + env + flags)
//! 2. Loads the detector once and shares it across cameras
//! 3. Fetches the camera roster from the backend
//! 4. Runs one worker per camera until Ctrl-C, then joins them all

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sentinel_engine::transport::{RosterSource, StaticRoster};
use sentinel_engine::{
    config::ModelBackendKind, load_detector, BackendClient, Camera, EngineConfig,
    PipelineContext, ShutdownSignal, StreamSourceFactory, Supervisor,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the multi-camera detection and alert pipeline")]
struct Args {
    /// Config file (.toml, otherwise JSON).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Backend base URL, e.g. http://localhost:3000/api/v1.
    #[arg(long)]
    backend_url: Option<String>,

    /// Model backend: stub or tract.
    #[arg(long)]
    model_backend: Option<String>,

    /// Path to the ONNX model file (tract backend).
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Read the camera roster from a JSON file instead of the backend.
    #[arg(long)]
    roster_file: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = EngineConfig::load_from(args.config.as_deref())?;
    if let Some(url) = args.backend_url {
        config.backend.base_url = url;
    }
    if let Some(kind) = args.model_backend {
        config.model.backend = kind.parse::<ModelBackendKind>()?;
    }
    if let Some(path) = args.model_path {
        config.model.path = Some(path);
    }
    config.validate()?;

    let detector = load_detector(&config.model).context("load detector")?;
    let client = BackendClient::new(&config.backend)?;
    let roster: Arc<dyn RosterSource> = match &args.roster_file {
        Some(path) => Arc::new(StaticRoster(read_roster_file(path)?)),
        None => Arc::new(client.clone()),
    };

    let ctx = PipelineContext::from_config(
        &config,
        detector,
        Arc::new(client),
        Arc::new(StreamSourceFactory::new(config.stream.clone())),
    );

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || handler_signal.trigger())
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "sentineld starting: backend={} stride={} threshold={} cooldown={:?}",
        config.backend.base_url,
        config.detection.frame_stride,
        config.detection.confidence_threshold,
        config.alerts.cooldown
    );
    let mut supervisor = Supervisor::new(ctx, roster, shutdown);
    supervisor.start()?;
    log::info!("sentineld waiting for shutdown signal (Ctrl-C)...");

    for report in supervisor.wait_for_shutdown() {
        log::info!(
            "[cam {}] stopped: frames_read={} inferred={} sent={} suppressed={} failed={} reconnects={}",
            report.camera_id,
            report.frames_read,
            report.frames_inferred,
            report.alerts_sent,
            report.alerts_suppressed,
            report.alerts_failed,
            report.reconnects
        );
    }
    log::info!("sentineld stopped");
    Ok(())
}

fn read_roster_file(path: &Path) -> Result<Vec<Camera>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read roster file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse roster file {}", path.display()))
}
