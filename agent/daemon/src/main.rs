//! VFD Agent - AI-generated animations for a 2x20 display
//!
//! Asks a local Ollama model for animation scripts, validates each one in a
//! sandbox and plays the survivors on the display.
//!
//! # Usage
//!
//! ```bash
//! # Generate and play forever
//! vfd-agent
//!
//! # One idea, looped until Ctrl-C
//! vfd-agent --idea "rain on a window" --preview
//!
//! # Loop previously generated animations without a model
//! vfd-agent --replay generated_animations
//!
//! # Verbose logging
//! RUST_LOG=debug vfd-agent
//! ```
//!
//! # Environment Variables
//!
//! - `OLLAMA_API_BASE`: Ollama server URL (default: `http://localhost:11434`)
//! - `OLLAMA_MODEL`: Model name (default: `qwen2.5-coder:3b`)
//! - `VFD_DEVICE`: Display device (default: `simulator`)
//! - `RUST_LOG`: Log filter, overrides `--verbose`
//!
//! # Signals
//!
//! - `SIGINT` / `SIGTERM`: Graceful shutdown. In-flight state writes finish.

mod modes;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vfd_agent_core::{load_config_from_path, AgentConfig, ConfigOverrides, Shutdown};

/// VFD Agent - generate, validate and play AI-written display animations
#[derive(Parser, Debug)]
#[command(name = "vfd-agent")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Seconds each animation plays
    #[arg(short = 'd', long = "duration", value_name = "SECS")]
    duration: Option<f64>,

    /// Playback frames per second
    #[arg(short = 'f', long = "fps", value_name = "FPS")]
    fps: Option<u32>,

    /// Prompt template file
    #[arg(short = 'p', long = "prompt", value_name = "FILE")]
    prompt: Option<PathBuf>,

    /// Generate this one idea and loop it (single-shot mode)
    #[arg(long, value_name = "TEXT", conflicts_with = "replay")]
    idea: Option<String>,

    /// Render frames to the console
    #[arg(long)]
    preview: bool,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Loop saved animations from DIR (default: the output directory)
    #[arg(long, value_name = "DIR", num_args = 0..=1)]
    replay: Option<Option<PathBuf>>,

    /// Configuration file path
    #[arg(long, env = "VFD_AGENT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Display device
    #[arg(long, value_name = "DEVICE")]
    device: Option<String>,

    /// Ollama model name
    #[arg(long, value_name = "NAME")]
    model: Option<String>,

    /// Animations buffered ahead of playback
    #[arg(long, value_name = "N")]
    queue_size: Option<usize>,

    /// Skip the backend and model checks at startup
    #[arg(long)]
    skip_checks: bool,
}

impl Args {
    /// CLI overrides in configuration form
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(secs) = self.duration {
            overrides = overrides.with_duration_secs(secs);
        }
        if let Some(fps) = self.fps {
            overrides = overrides.with_frame_rate(fps);
        }
        if let Some(ref path) = self.prompt {
            overrides = overrides.with_prompt_file(path.clone());
        }
        if self.preview {
            overrides = overrides.with_preview(true);
        }
        if let Some(ref device) = self.device {
            overrides = overrides.with_device(device.clone());
        }
        if let Some(ref model) = self.model {
            overrides = overrides.with_model(model.clone());
        }
        if let Some(size) = self.queue_size {
            overrides = overrides.with_queue_size(size);
        }
        overrides
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("vfd_agent={level},vfd_agent_core={level}")))
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
    Ok(())
}

fn load(args: &Args) -> Result<AgentConfig> {
    let path = args
        .config
        .clone()
        .or_else(vfd_agent_core::config::default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Trigger shutdown on Ctrl-C or SIGTERM
fn spawn_signal_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => info!("Received Ctrl+C, shutting down"),
            () = terminate => info!("Received SIGTERM, shutting down"),
        }
        shutdown.trigger();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config = load(&args)?;
    info!(
        source = %config.source(),
        model = %config.llm.model,
        duration_secs = config.generation.duration_secs,
        frame_rate = config.playback.frame_rate,
        device = %config.playback.device,
        "Starting VFD agent"
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    if let Some(replay) = args.replay {
        let dir = replay.unwrap_or_else(|| config.storage.output_dir.clone());
        return modes::run_replay(&config, &dir, shutdown).await;
    }

    let agent = modes::Agent::prepare(config, args.skip_checks, shutdown).await?;
    match args.idea {
        Some(idea) => agent.run_single_shot(&idea).await,
        None => agent.run_continuous().await,
    }
}
