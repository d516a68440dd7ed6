use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegallery_core::{respond, Config, GalleryService, MatchOptions, ModelLoading, ServiceReply};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "facegallery", about = "Labeled face gallery: detect, recognize and manage references")]
struct Cli {
    /// Gallery root directory (overrides FACEGALLERY_GALLERY_DIR)
    #[arg(long, global = true)]
    gallery_dir: Option<PathBuf>,

    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect faces in an image
    Detect {
        image: PathBuf,
    },
    /// Find gallery references matching the face in an image
    Recognize {
        image: PathBuf,
        /// Maximum number of matches
        #[arg(long)]
        top_k: Option<usize>,
        /// Maximum distance for a match
        #[arg(long)]
        max_distance: Option<f32>,
    },
    /// Add an image to the gallery
    Add {
        image: PathBuf,
        /// Identity the image belongs to
        #[arg(short, long)]
        label: String,
    },
    /// List labels and reference counts
    List,
    /// Remove one reference by id ("<label>/<file>")
    Remove {
        id: String,
    },
    /// Remove a label and all of its references
    RemoveLabel {
        label: String,
    },
    /// Show gallery and model status
    Status,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(dir) = cli.gallery_dir {
        config.gallery_dir = dir;
    }
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }

    tracing::debug!(
        gallery = %config.gallery_dir.display(),
        models = %config.model_dir.display(),
        cache = ?config.cache_file(),
        "configuration loaded"
    );

    // Models load on first use; list, add and remove never need them.
    let service = GalleryService::from_config(&config, ModelLoading::Lazy).context("failed to open gallery")?;
    tracing::info!(command = ?cli.command, "running");

    let reply = match cli.command {
        Commands::Detect { image } => respond(service.detect(&read_image(&image)?)),
        Commands::Recognize {
            image,
            top_k,
            max_distance,
        } => {
            let defaults = *service.options();
            let options = MatchOptions {
                top_k: top_k.unwrap_or(defaults.top_k),
                max_distance: max_distance.unwrap_or(defaults.max_distance),
            };
            respond(service.recognize_with(&read_image(&image)?, &options))
        }
        Commands::Add { image, label } => respond(service.add_face(&read_image(&image)?, &label)),
        Commands::List => respond(service.gallery()),
        Commands::Remove { id } => respond(service.remove_reference(&id)),
        Commands::RemoveLabel { label } => respond(service.remove_label(&label)),
        Commands::Status => respond(service.status()),
    };

    print_reply(&reply)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "image read");
    Ok(bytes)
}

fn print_reply(reply: &ServiceReply) -> Result<ExitCode> {
    let body = serde_json::to_string_pretty(&reply.body)?;
    if reply.is_ok() {
        println!("{body}");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::debug!(status = reply.status, "command failed");
        eprintln!("{body}");
        Ok(ExitCode::FAILURE)
    }
}
