//! Generator (producer)
//!
//! Turns ideas into validated animations. Each request runs through the
//! [`RetryController`]; the terminal outcome is recorded in the
//! [`StateStore`] before control returns here, and a successful animation
//! is handed to the [`AnimationQueue`] (continuous mode) or back to the
//! caller (single-shot mode).
//!
//! Shutdown is observed before every request, while waiting for queue
//! capacity, and inside the retry controller. A state write that is already
//! in flight always completes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::animation::{Animation, GenerationRequest};
use crate::error::PipelineError;
use crate::ideas::IdeaGenerator;
use crate::metrics::CodeMetrics;
use crate::queue::AnimationQueue;
use crate::retry::{GenerationExhausted, RetryController, RetryOutcome, RetrySuccess};
use crate::shutdown::Shutdown;
use crate::state::{Diagnostic, StateError, StateStore};
use crate::telemetry::{GenerationEvent, Telemetry};

/// Subdirectory for frame captures
pub const CAPTURE_DIR: &str = "frame_captures";

/// Extension of archived animation sources
pub const SOURCE_EXTENSION: &str = "rhai";

/// Per-request parameters shared by every request
#[derive(Clone, Debug)]
pub struct GeneratorSettings {
    /// Playback duration in seconds
    pub duration_secs: f64,
    /// Playback frame rate
    pub frame_rate: u32,
    /// Prompt template
    pub template: Arc<str>,
    /// Where sources and captures are written
    pub output_dir: PathBuf,
    /// Write validation captures
    pub capture_frames: bool,
    /// Model name, recorded in telemetry
    pub model: String,
}

/// Result of one request
#[derive(Debug)]
pub enum Produced {
    /// Validated and recorded
    Animation(Animation),
    /// Every attempt failed; recorded as a failure
    Exhausted,
    /// Shutdown interrupted the request; nothing recorded
    Cancelled,
}

/// The producer worker
pub struct Generator {
    controller: RetryController,
    state: Arc<StateStore>,
    telemetry: Arc<Telemetry>,
    ideas: IdeaGenerator,
    settings: GeneratorSettings,
    shutdown: Shutdown,
}

impl Generator {
    /// Create a generator with the built-in idea vocabulary and no telemetry
    pub fn new(
        controller: RetryController,
        state: Arc<StateStore>,
        settings: GeneratorSettings,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            controller,
            state,
            telemetry: Arc::new(Telemetry::disabled()),
            ideas: IdeaGenerator::builtin(),
            settings,
            shutdown,
        }
    }

    /// Record outcomes to a telemetry sink
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Draw random ideas from a custom vocabulary
    #[must_use]
    pub fn with_ideas(mut self, ideas: IdeaGenerator) -> Self {
        self.ideas = ideas;
        self
    }

    /// Build a request for an idea
    #[must_use]
    pub fn request(&self, idea: impl Into<String>) -> GenerationRequest {
        GenerationRequest::new(
            idea,
            self.settings.duration_secs,
            self.settings.frame_rate,
            Arc::clone(&self.settings.template),
        )
    }

    /// Run one request to a terminal outcome and record it
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] if the outcome could not be
    /// recorded durably.
    pub async fn produce_one(&self, request: &GenerationRequest) -> Result<Produced, PipelineError> {
        let started = Instant::now();
        tracing::info!(animation_id = %request.id, idea = %request.idea, "Generating");

        match self.controller.run(request).await {
            RetryOutcome::Success(success) => {
                let animation = self.on_success(request, *success, started).await?;
                Ok(Produced::Animation(animation))
            }
            RetryOutcome::Exhausted(exhausted) => {
                self.on_exhausted(request, &exhausted, started).await?;
                Ok(Produced::Exhausted)
            }
            RetryOutcome::Cancelled => {
                tracing::info!(animation_id = %request.id, "Generation cancelled");
                Ok(Produced::Cancelled)
            }
        }
    }

    async fn on_success(
        &self,
        request: &GenerationRequest,
        success: RetrySuccess,
        started: Instant,
    ) -> Result<Animation, PipelineError> {
        let RetrySuccess {
            animation,
            attempt,
            report,
        } = success;
        let id = animation.id.as_str().to_string();

        let source_path = self
            .settings
            .output_dir
            .join(format!("{id}.{SOURCE_EXTENSION}"));
        if let Err(e) = std::fs::write(&source_path, &animation.source) {
            tracing::warn!(path = %source_path.display(), error = %e, "Failed to archive source");
        }

        if self.settings.capture_frames {
            let stats = report.capture.stats();
            let mut extra = serde_json::Map::new();
            extra.insert("idea".into(), request.idea.clone().into());
            extra.insert("validation".into(), true.into());
            extra.insert("entry_point".into(), report.entry_point.clone().into());
            let path = capture_path(&self.settings.output_dir, &id, "");
            match report.capture.save_jsonl(&path, extra) {
                Ok(()) => tracing::debug!(
                    animation_id = %id,
                    frames = stats.total_frames,
                    empty_ratio = stats.empty_ratio,
                    both_rows_ratio = stats.both_rows_ratio,
                    "Validation capture saved"
                ),
                Err(e) => tracing::warn!(animation_id = %id, error = %e, "Failed to save capture"),
            }
        }

        let metrics = CodeMetrics::analyze(&animation.source, Some(&animation.entry_point));
        self.telemetry.log_generation(&GenerationEvent {
            generation_id: id.clone(),
            idea: request.idea.clone(),
            success: true,
            attempts: attempt.index,
            model: self.settings.model.clone(),
            frames: Some(report.outcome.frames()),
            error: None,
            elapsed_secs: started.elapsed().as_secs_f64(),
            metrics: Some(metrics.clone()),
        });
        let metadata = serde_json::json!({
            "generation_id": id,
            "attempt": attempt.index,
            "temperature": attempt.creativity,
            "metrics": metrics.to_json(),
        });
        self.telemetry
            .log_training_example(&attempt.prompt, &animation.source, Some(&metadata));

        let description = animation.description.clone();
        self.persist(move |state| state.record_success(&id, &description))
            .await?;

        tracing::info!(
            animation_id = %animation.id,
            attempts = attempt.index,
            stats = %self.state.stats(),
            "Animation ready"
        );
        Ok(animation)
    }

    async fn on_exhausted(
        &self,
        request: &GenerationRequest,
        exhausted: &GenerationExhausted,
        started: Instant,
    ) -> Result<(), PipelineError> {
        let id = request.id.as_str().to_string();
        let final_attempt = &exhausted.final_attempt;

        let diagnostic = {
            let state = Arc::clone(&self.state);
            let id = id.clone();
            let idea = request.idea.clone();
            let error = exhausted.last_error.clone();
            let raw = final_attempt.raw_output.clone();
            let attempt = final_attempt.index;
            tokio::task::spawn_blocking(move || {
                state.write_diagnostic(&Diagnostic {
                    animation_id: &id,
                    description: &idea,
                    attempt,
                    error: &error,
                    raw_output: &raw,
                })
            })
            .await?
        };
        match diagnostic {
            Ok(path) => tracing::debug!(path = %path.display(), "Diagnostic written"),
            Err(e) => tracing::warn!(animation_id = %id, error = %e, "Failed to write diagnostic"),
        }

        let metrics = (!final_attempt.raw_output.is_empty())
            .then(|| CodeMetrics::analyze(&final_attempt.raw_output, Some(&id)));
        self.telemetry.log_generation(&GenerationEvent {
            generation_id: id.clone(),
            idea: request.idea.clone(),
            success: false,
            attempts: exhausted.attempts,
            model: self.settings.model.clone(),
            frames: None,
            error: Some(exhausted.last_error.clone()),
            elapsed_secs: started.elapsed().as_secs_f64(),
            metrics,
        });

        let idea = request.idea.clone();
        let error = exhausted.last_error.clone();
        self.persist(move |state| state.record_failure(&id, &idea, &error))
            .await?;

        tracing::warn!(
            animation_id = %request.id,
            attempts = exhausted.attempts,
            stats = %self.state.stats(),
            "Generation exhausted"
        );
        Ok(())
    }

    /// Run a state mutation on the blocking pool
    ///
    /// The write is never abandoned halfway, even during shutdown.
    async fn persist<F>(&self, write: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&StateStore) -> Result<(), StateError> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || write(&state)).await??;
        Ok(())
    }

    /// Generate random ideas forever, feeding the queue
    ///
    /// Blocks while the queue is full. Returns when shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`PipelineError`]; per-request failures are recorded
    /// and do not stop the loop.
    pub async fn run_continuous(&self, queue: &AnimationQueue) -> Result<(), PipelineError> {
        let mut requests = 0u64;
        while !self.shutdown.is_triggered() {
            let request = self.request(self.ideas.generate());
            requests += 1;

            match self.produce_one(&request).await? {
                Produced::Animation(animation) => {
                    tokio::select! {
                        result = queue.put(animation) => result?,
                        () = self.shutdown.wait() => break,
                    }
                    tracing::debug!(
                        animation_id = %request.id,
                        queue_len = queue.len(),
                        "Animation queued"
                    );
                }
                Produced::Exhausted => {}
                Produced::Cancelled => break,
            }
        }

        tracing::info!(requests, "Generator stopped");
        Ok(())
    }

    /// Run exactly one request for a given idea
    ///
    /// The animation is returned to the caller; nothing is enqueued.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Persistence`] if the outcome could not be
    /// recorded.
    pub async fn run_single_shot(&self, idea: &str) -> Result<Option<Animation>, PipelineError> {
        let request = self.request(idea);
        match self.produce_one(&request).await? {
            Produced::Animation(animation) => Ok(Some(animation)),
            Produced::Exhausted | Produced::Cancelled => Ok(None),
        }
    }

    /// Run [`Generator::run_continuous`] on its own task
    pub fn spawn(self: Arc<Self>, queue: Arc<AnimationQueue>) -> JoinHandle<Result<(), PipelineError>> {
        tokio::spawn(async move {
            let result = self.run_continuous(&queue).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "Generator failed");
                if e.is_fatal() {
                    self.shutdown.trigger();
                }
            }
            result
        })
    }
}

/// Capture file path for an animation, e.g. `frame_captures/<id>_playback.jsonl`
#[must_use]
pub fn capture_path(output_dir: &Path, animation_id: &str, suffix: &str) -> PathBuf {
    output_dir
        .join(CAPTURE_DIR)
        .join(format!("{animation_id}{suffix}.jsonl"))
}
