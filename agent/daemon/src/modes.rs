//! Run modes
//!
//! Wires the core pipeline together for the three ways the agent runs:
//! continuous (producer and consumer tasks joined by the queue), single-shot
//! (one request, then loop it) and replay (no model at all).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use vfd_agent_core::display::open_display;
use vfd_agent_core::{
    AgentConfig, AnimationQueue, CodeGenerationClient, DisplayController, Generator,
    GeneratorSettings, IdeaGenerator, OllamaBackend, PlaybackSettings, ProgressTracker,
    RetryController, RhaiSandbox, Sandbox, Shutdown, StateStore, Telemetry, ValidationPipeline,
};

/// How often the loading screen is redrawn while a single-shot request runs
const LOADING_REFRESH: Duration = Duration::from_millis(250);

/// Everything a generating mode needs, built once at startup
pub struct Agent {
    config: AgentConfig,
    client: Arc<dyn CodeGenerationClient>,
    sandbox: Arc<dyn Sandbox>,
    state: Arc<StateStore>,
    telemetry: Arc<Telemetry>,
    template: Arc<str>,
    shutdown: Shutdown,
}

impl Agent {
    /// Open storage, read the prompt and check the backend
    pub async fn prepare(config: AgentConfig, skip_checks: bool, shutdown: Shutdown) -> Result<Self> {
        let output_dir = &config.storage.output_dir;
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

        let template = read_template(&config.generation.prompt_file)?;

        let client: Arc<dyn CodeGenerationClient> = Arc::new(OllamaBackend::with_timeout(
            config.llm.api_base.clone(),
            config.llm.timeout,
        ));
        if skip_checks {
            warn!("Skipping startup checks");
        } else {
            startup_checks(client.as_ref(), &config.llm.model, &config.llm.api_base).await?;
        }

        let state = StateStore::open(output_dir)
            .context("Failed to open state store")?
            .with_limits(config.storage.max_log_entries, config.storage.max_error_chars);
        info!(path = %state.path().display(), stats = %state.stats(), "State loaded");

        let telemetry = if config.storage.telemetry {
            Telemetry::new(output_dir)
        } else {
            Telemetry::disabled()
        };

        Ok(Self {
            config,
            client,
            sandbox: Arc::new(RhaiSandbox::new()),
            state: Arc::new(state),
            telemetry: Arc::new(telemetry),
            template,
            shutdown,
        })
    }

    fn generator(&self, progress: &Arc<ProgressTracker>) -> Result<Generator> {
        let pipeline = ValidationPipeline::with_static(
            self.config.static_validator(),
            Arc::clone(&self.sandbox),
            self.config.runtime_settings(),
        );
        let controller = RetryController::new(
            Arc::clone(&self.client),
            pipeline,
            self.config.retry_policy(),
            self.config.llm.model.clone(),
            self.shutdown.clone(),
        )
        .with_token_limits(self.config.llm.max_tokens, self.config.llm.context_window)
        .with_progress(Arc::clone(progress));

        let ideas = IdeaGenerator::from_optional_file(self.config.generation.vocabulary_file.as_deref())
            .context("Failed to load idea vocabulary")?;

        let settings = GeneratorSettings {
            duration_secs: self.config.generation.duration_secs,
            frame_rate: self.config.playback.frame_rate,
            template: Arc::clone(&self.template),
            output_dir: self.config.storage.output_dir.clone(),
            capture_frames: self.config.storage.capture_frames,
            model: self.config.llm.model.clone(),
        };

        Ok(
            Generator::new(controller, Arc::clone(&self.state), settings, self.shutdown.clone())
                .with_telemetry(Arc::clone(&self.telemetry))
                .with_ideas(ideas),
        )
    }

    fn player(&self, progress: &Arc<ProgressTracker>) -> Result<DisplayController> {
        Ok(player(&self.config, Arc::clone(&self.sandbox), self.shutdown.clone())?
            .with_progress(Arc::clone(progress)))
    }

    /// Generate and play until shutdown
    ///
    /// The producer runs on its own task; playback runs here. A fatal
    /// producer error stops both and is returned.
    pub async fn run_continuous(self) -> Result<()> {
        let progress = Arc::new(ProgressTracker::default());
        let generator = Arc::new(self.generator(&progress)?);
        let player = self.player(&progress)?;
        let queue = Arc::new(AnimationQueue::new(self.config.generation.queue_size));

        info!(
            queue_size = queue.capacity(),
            max_retries = self.config.generation.max_retries,
            "Continuous mode"
        );
        player.show_loading();

        let producer = Arc::clone(&generator).spawn(Arc::clone(&queue));
        let played = player.run_queue(&queue).await;

        // The producer may be blocked on a full queue; shutdown releases it
        self.shutdown.trigger();
        let produced = producer.await.context("Generator task panicked")?;

        info!(played, stats = %self.state.stats(), "Stopped");
        produced.context("Generator stopped on a fatal error")
    }

    /// Generate one animation for `idea` and loop it until shutdown
    pub async fn run_single_shot(self, idea: &str) -> Result<()> {
        let progress = Arc::new(ProgressTracker::default());
        let generator = self.generator(&progress)?;
        let player = self.player(&progress)?;

        info!(idea, "Single-shot mode");

        let animation = {
            let generate = generator.run_single_shot(idea);
            tokio::pin!(generate);
            let mut ticker = tokio::time::interval(LOADING_REFRESH);
            loop {
                tokio::select! {
                    result = &mut generate => break result,
                    _ = ticker.tick() => player.show_loading(),
                }
            }
        }
        .context("Generation stopped on a fatal error")?;

        let Some(animation) = animation else {
            if self.shutdown.is_triggered() {
                info!("Interrupted before an animation was ready");
                return Ok(());
            }
            error!(idea, stats = %self.state.stats(), "No valid animation produced");
            bail!(
                "No valid animation for \"{idea}\" after {} attempts",
                self.config.generation.max_retries
            );
        };

        let loops = player.run_single(animation).await;
        info!(loops, stats = %self.state.stats(), "Stopped");
        Ok(())
    }
}

/// Loop saved animations from `dir` until shutdown; no model is contacted
pub async fn run_replay(config: &AgentConfig, dir: &Path, shutdown: Shutdown) -> Result<()> {
    let player = player(config, Arc::new(RhaiSandbox::new()), shutdown)?;
    let passes = player
        .replay(dir)
        .await
        .with_context(|| format!("Nothing to replay in {}", dir.display()))?;
    info!(passes, played = player.played(), "Replay stopped");
    Ok(())
}

fn player(config: &AgentConfig, sandbox: Arc<dyn Sandbox>, shutdown: Shutdown) -> Result<DisplayController> {
    let display = open_display(
        &config.playback.device,
        config.playback.frame_rate,
        config.playback.preview,
    )?;
    let settings = PlaybackSettings {
        duration_secs: config.generation.duration_secs,
        frame_rate: config.playback.frame_rate,
        output_dir: config.storage.output_dir.clone(),
        capture_frames: config.storage.capture_frames,
    };
    Ok(DisplayController::new(
        Box::new(display),
        sandbox,
        settings,
        shutdown,
    ))
}

fn read_template(path: &Path) -> Result<Arc<str>> {
    let template = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt template {}", path.display()))?;
    let template = template.trim();
    if template.is_empty() {
        bail!("Prompt template {} is empty", path.display());
    }
    Ok(Arc::from(template))
}

async fn startup_checks(client: &dyn CodeGenerationClient, model: &str, api_base: &str) -> Result<()> {
    if !client.health_check().await {
        bail!("Cannot reach {} at {api_base}. Is `ollama serve` running?", client.name());
    }
    if !client
        .has_model(model)
        .await
        .context("Failed to list models")?
    {
        bail!("Model {model} is not available. Run: ollama pull {model}");
    }
    info!(backend = client.name(), model, "Backend ready");
    Ok(())
}
