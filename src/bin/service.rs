use anyhow::Context as _;
use clap::Parser;
use faceward::{
    camera::CameraFactory,
    common::{Config, DevMode},
    core::{Collaborators, EnrollmentDialog, OnnxFaceDetector, OnnxFaceEmbedder, Pipeline, StatusHub},
    service::server,
    setup_logging,
    speech::{CommandSpeechInput, CommandSpeechOutput},
    storage,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "faceward-service")]
#[command(about = "Faceward face recognition and enrollment service")]
struct Args {
    /// Run in development mode
    #[arg(long)]
    dev: bool,

    /// Config file (defaults to the mode's location)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Socket path (overrides the config)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Start processing frames immediately instead of waiting for a viewer
    #[arg(long)]
    autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.dev);

    tracing::info!("Starting Faceward service (dev_mode: {})", args.dev);

    let dev_mode = DevMode::new(args.dev)?;
    let config_path = args.config.clone().unwrap_or_else(|| dev_mode.config_file());
    let config = Config::load_from_path(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let models_dir = dev_mode.models_dir();
    let detector = OnnxFaceDetector::new(&config, &models_dir)?;
    let embedder = OnnxFaceEmbedder::new(&config, &models_dir)?;
    let (store, images) = storage::open(&config, &dev_mode)?;

    let hub = Arc::new(StatusHub::new(config.service.subscriber_queue));
    let dialog = EnrollmentDialog::new(
        Arc::new(CommandSpeechOutput::new(&config.speech)),
        Arc::new(CommandSpeechInput::new(&config.speech)),
        store.clone(),
        images,
        hub.clone(),
        config.dialog.clone(),
    );
    let collaborators = Collaborators {
        frames: Arc::new(CameraFactory::new(&config)),
        detector: Arc::new(detector),
        embedder: Arc::new(embedder),
        store,
        dialog,
    };
    let pipeline = Pipeline::new(&config, collaborators, hub)?;

    let socket_path = args.socket.clone()
        .or_else(|| config.service.socket_path.clone())
        .unwrap_or_else(|| dev_mode.socket_path());
    let listener = server::bind(&socket_path).context("Failed to bind Unix socket")?;

    // Holding a consumer keeps the loop running with no viewer attached
    let autostart = args.autostart.then(|| pipeline.attach_consumer());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown requested");
    };
    server::serve(listener, pipeline.clone(), shutdown).await;

    drop(autostart);
    pipeline.shutdown(Duration::from_secs(config.service.shutdown_grace_secs)).await;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!("Could not remove socket {}: {}", socket_path.display(), e);
    }
    tracing::info!("Service stopped");
    Ok(())
}
