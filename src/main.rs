use std::env;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lensfit::config::{self, Config};
use lensfit::generation::{self, Generations, Outcome, Ticket};
use lensfit::{EncodedImage, FacePresence};
use log::{debug, info, warn};

#[derive(Parser)]
#[command(name = "lensfit")]
#[command(version, about = "Virtual eyewear try-on for face photos")]
struct Cli {
    /// Config file (defaults to the platform config dir or $LENSFIT_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a photo contains a confident face
    Check {
        photo: PathBuf,
    },
    /// Render glasses onto a face photo
    TryOn {
        photo: PathBuf,
        /// Eyewear artwork, ideally with a transparent background
        overlay: PathBuf,
        /// Output file (defaults to <photo>-tryon.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Frame width in inter-eye distances
        #[arg(short, long)]
        size: Option<f32>,
        #[arg(long)]
        opacity: Option<f32>,
        /// Print detection, pose and placement as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-render whenever a new size multiplier is read from stdin
    Adjust {
        photo: PathBuf,
        overlay: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Open config file in editor
    Config {
        /// Print the effective configuration instead
        #[arg(long)]
        show: bool,
    },
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { photo } => check(&cfg, &photo),
        Commands::TryOn {
            photo,
            overlay,
            output,
            size,
            opacity,
            json,
        } => {
            if let Some(opacity) = opacity {
                cfg.opacity = opacity;
            }
            cfg.validate()?;
            let size = size.unwrap_or(cfg.size_multiplier);
            try_on(&cfg, &photo, &overlay, output, size, json)
        }
        Commands::Adjust {
            photo,
            overlay,
            output,
        } => adjust(&cfg, &photo, &overlay, &output),
        Commands::Config { show } => {
            if show {
                print!("{}", toml::to_string_pretty(&cfg)?);
                Ok(())
            } else {
                open_config(cli.config.as_deref())
            }
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn check(cfg: &Config, photo: &Path) -> Result<()> {
    let pipeline = lensfit::build_pipeline(cfg);
    let bytes = read(photo)?;

    match pipeline
        .check_face(&bytes)
        .context("Failed to run face detector")?
    {
        FacePresence::Present(detection) => {
            info!("✓ Face detected with score {:.3}", detection.score);
            Ok(())
        }
        FacePresence::LowConfidence(score) => anyhow::bail!(
            "Face detected but confidence {:.3} is below {:.3}. Please retake the photo.",
            score,
            cfg.min_confidence
        ),
        FacePresence::NoFace => {
            anyhow::bail!("No face detected. Please ensure your face is visible and well-lit.")
        }
        FacePresence::Undecodable => {
            anyhow::bail!("{} is not a supported image", photo.display())
        }
    }
}

fn try_on(
    cfg: &Config,
    photo: &Path,
    overlay: &Path,
    output: Option<PathBuf>,
    size: f32,
    json: bool,
) -> Result<()> {
    let pipeline = lensfit::build_pipeline(cfg);
    let photo_bytes = read(photo)?;
    let overlay_bytes = read(overlay)?;

    let report = pipeline
        .render(&photo_bytes, &overlay_bytes, size)
        .context("Failed to render try-on")?;
    info!(
        "Face score {:.3}, eye distance {:.1}px, tilt {:.1}°",
        report.detection.score, report.pose.inter_eye_distance, report.pose.tilt_degrees
    );

    let output = output.unwrap_or_else(|| default_output(photo, &report.image));
    write_image(&output, &report.image)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

/// Size multipliers arrive one per line, as a slider would send them.
/// A single worker renders only the newest request; anything overtaken
/// during the debounce window, or while rendering, never reaches the
/// output file.
fn adjust(cfg: &Config, photo: &Path, overlay: &Path, output: &Path) -> Result<()> {
    let pipeline = lensfit::build_pipeline(cfg);
    let photo_bytes = read(photo)?;
    let overlay_bytes = read(overlay)?;
    let generations = Arc::new(Generations::new());
    let delay = Duration::from_millis(cfg.debounce_ms);
    let (tx, rx) = mpsc::channel::<(Ticket, f32)>();

    let worker = {
        let generations = Arc::clone(&generations);
        let output = output.to_path_buf();
        thread::spawn(move || {
            while let Some((ticket, size)) = generation::recv_latest(&rx) {
                let outcome = generations.debounced(ticket, delay, || {
                    pipeline
                        .try_on(&photo_bytes, &overlay_bytes, size)
                        .context("Failed to render try-on")
                });
                match outcome {
                    Outcome::Current(Ok(image)) => match write_image(&output, &image) {
                        Ok(()) => info!("Size {:.2} rendered", size),
                        Err(e) => warn!("Size {:.2}: {:#}", size, e),
                    },
                    Outcome::Current(Err(e)) => warn!("Size {:.2}: {:#}", size, e),
                    Outcome::Superseded => debug!("Size {:.2} superseded, discarded", size),
                }
            }
        })
    };

    info!("Reading size multipliers from stdin. Ctrl+D to finish.");

    for line in std::io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let size: f32 = match line.parse() {
            Ok(s) => s,
            Err(_) => {
                warn!("Ignoring {:?}: not a number", line);
                continue;
            }
        };

        if tx.send((generations.issue(), size)).is_err() {
            anyhow::bail!("Render worker stopped");
        }
    }
    drop(tx);

    if worker.join().is_err() {
        anyhow::bail!("Render worker panicked");
    }
    Ok(())
}

fn default_output(photo: &Path, image: &EncodedImage) -> PathBuf {
    let stem = photo
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());
    let ext = image.format.extensions_str().first().copied().unwrap_or("png");
    photo.with_file_name(format!("{stem}-tryon.{ext}"))
}

fn write_image(path: &Path, image: &EncodedImage) -> Result<()> {
    std::fs::write(path, &image.data).with_context(|| format!("writing {}", path.display()))?;
    info!("✓ Wrote {}", path.display());
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    if !config_path.exists() {
        config::save_config(&Config::default(), Some(config_path))?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
