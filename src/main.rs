use faceward::{
    cli::{check_for_escape, import_photo, AsciiRenderer, PreviewPainter},
    common::{Config, DevMode},
    core::{OnnxFaceDetector, OnnxFaceEmbedder},
    service::ServiceClient,
    setup_logging,
    storage,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "faceward")]
#[command(about = "Face recognition with voice enrollment of strangers")]
struct Cli {
    /// Enable development mode (uses ./dev_data and /tmp/faceward.sock)
    #[arg(long, global = true)]
    dev: bool,

    /// Service socket (overrides the config)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show service status
    Status,
    /// Stop recognizing; viewers get a paused placeholder
    Pause,
    /// Resume recognizing
    Resume,
    /// Persons recognized in the current frame
    Persons,
    /// Enrolled persons
    Known,
    /// Print status events as JSON lines
    Events,
    /// Live ASCII preview of the annotated video
    Watch {
        /// Stop after this many frames
        #[arg(short = 'n', long)]
        frames: Option<u32>,
        /// Also save every received frame as JPEG into this directory
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// Enroll a person from a photo
    Import {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        image: PathBuf,
    },
    /// List stored identities
    Identities,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;

    match &cli.command {
        Commands::Status => {
            let status = client(&cli, &dev_mode)?.status()?;
            println!("Paused:              {}", status.paused);
            println!("Pipeline running:    {}", status.running);
            println!("Interaction active:  {}", status.interaction_active);
            println!("Processed strangers: {}", status.processed_strangers);
            println!("Video consumers:     {}", status.active_consumers);
            println!("Event subscribers:   {}", status.active_subscribers);
            println!("Similarity threshold {:.2}", status.similarity_threshold);
            println!("Known persons:       {}", list(&status.known_persons));
            println!("Detected persons:    {}", list(&status.detected_persons));
        }
        Commands::Pause => {
            let changed = client(&cli, &dev_mode)?.pause()?;
            println!("{}", if changed { "⏸  Paused" } else { "Already paused" });
        }
        Commands::Resume => {
            let changed = client(&cli, &dev_mode)?.resume()?;
            println!("{}", if changed { "▶  Resumed" } else { "Already running" });
        }
        Commands::Persons => {
            for name in client(&cli, &dev_mode)?.detected_persons()? {
                println!("{}", name);
            }
        }
        Commands::Known => {
            for name in client(&cli, &dev_mode)?.known_persons()? {
                println!("{}", name);
            }
        }
        Commands::Events => {
            client(&cli, &dev_mode)?.subscribe(|event| match serde_json::to_string(&event) {
                Ok(line) => {
                    println!("{}", line);
                    true
                }
                Err(e) => {
                    eprintln!("Failed to encode event: {}", e);
                    false
                }
            })?;
        }
        Commands::Watch { frames, dump } => watch(&cli, &dev_mode, *frames, dump.as_ref())?,
        Commands::Import { name, image: photo_path } => {
            let config = load_config(&dev_mode)?;
            let models_dir = dev_mode.models_dir();
            let detector = OnnxFaceDetector::new(&config, &models_dir)?;
            let embedder = OnnxFaceEmbedder::new(&config, &models_dir)?;
            let (store, images) = storage::open(&config, &dev_mode)?;

            let photo = image::open(photo_path)
                .with_context(|| format!("Failed to open {}", photo_path.display()))?;
            let imported = import_photo(&photo, name, &detector, &embedder, &config.recognition, &store, &images)?;

            println!("✅ {} enrolled from {}", imported.name, photo_path.display());
            println!("   The running service picks this up after its next enrollment or restart.");
        }
        Commands::Identities => {
            let config = load_config(&dev_mode)?;
            let (store, _) = storage::open(&config, &dev_mode)?;
            let summaries = store.summaries()?;
            if summaries.is_empty() {
                println!("No identities stored");
            }
            for summary in summaries {
                println!("{:<32} {:>4} embedding(s)", summary.name, summary.rows);
            }
        }
    }

    Ok(())
}

fn load_config(dev_mode: &DevMode) -> Result<Config> {
    let path = dev_mode.config_file();
    Config::load_from_path(&path).with_context(|| format!("Failed to load config from {}", path.display()))
}

fn client(cli: &Cli, dev_mode: &DevMode) -> Result<ServiceClient> {
    let socket = match &cli.socket {
        Some(path) => path.clone(),
        None => Config::load_from_path(&dev_mode.config_file())
            .ok()
            .and_then(|config| config.service.socket_path)
            .unwrap_or_else(|| dev_mode.socket_path()),
    };

    let client = ServiceClient::new(socket, dev_mode.is_enabled());
    client.ensure_service_running()?;
    Ok(client)
}

fn watch(cli: &Cli, dev_mode: &DevMode, frames: Option<u32>, dump: Option<&PathBuf>) -> Result<()> {
    if let Some(dir) = dump {
        std::fs::create_dir_all(dir)?;
    }

    let renderer = AsciiRenderer::new(None, None);
    let mut painter = PreviewPainter::new();
    println!("📷 Watching (Esc + Enter to stop)");

    let result = client(cli, dev_mode)?.watch(frames, |frame| {
        if let Some(dir) = dump {
            let path = dir.join(format!("frame_{:06}.jpg", frame.sequence));
            if let Err(e) = std::fs::write(&path, &frame.jpeg) {
                eprintln!("Failed to save {}: {}", path.display(), e);
                return false;
            }
        }

        match image::load_from_memory(&frame.jpeg) {
            Ok(decoded) => {
                let caption = if frame.paused {
                    format!(" #{} PAUSED ", frame.sequence)
                } else {
                    format!(" #{} faces: {} ", frame.sequence, frame.faces.len())
                };
                let text = renderer.render_frame(&decoded, &frame.faces, &caption);
                if painter.paint(&text).is_err() {
                    return false;
                }
            }
            Err(e) => tracing::warn!("Undecodable frame {}: {}", frame.sequence, e),
        }

        !check_for_escape().unwrap_or(false)
    });

    painter.finish();
    result?;
    Ok(())
}

fn list(names: &[String]) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}
