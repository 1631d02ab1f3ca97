//! Retry Controller
//!
//! Drives one [`GenerationRequest`] through up to `max_retries` attempts:
//!
//! ```text
//! GENERATING -> STATIC_CHECK -> SYNTAX_CHECK -> RUNTIME_CHECK -> SUCCESS
//!      |             |               |               |
//!      +-------------+---------------+---------------+--> RETRY | EXHAUSTED
//! ```
//!
//! The creativity parameter falls with each attempt, and the next prompt
//! carries the previous attempt's failure as literal text. The controller
//! never inspects what kind of failure it was, so rule sets can change
//! without touching it.

use std::sync::Arc;

use thiserror::Error;

use crate::animation::{Animation, GenerationRequest};
use crate::backend::{
    CodeGenerationClient, CompletionRequest, DEFAULT_CONTEXT_WINDOW, DEFAULT_MAX_TOKENS,
};
use crate::progress::ProgressTracker;
use crate::shutdown::Shutdown;
use crate::validation::{RuntimeReport, ValidationPipeline, ValidationStage, Verdict};

/// Creativity schedule and attempt limit
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Generation calls allowed per request
    pub max_retries: u32,
    /// Creativity before the first step is subtracted
    pub creativity_start: f32,
    /// Amount subtracted per attempt
    pub creativity_step: f32,
    /// Lowest creativity used
    pub creativity_floor: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            creativity_start: 0.85,
            creativity_step: 0.05,
            creativity_floor: 0.60,
        }
    }
}

impl RetryPolicy {
    /// Policy with the default schedule and a custom attempt limit
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Creativity for a 1-based attempt index; never increases
    #[must_use]
    pub fn creativity(&self, attempt: u32) -> f32 {
        (self.creativity_start - attempt as f32 * self.creativity_step).max(self.creativity_floor)
    }
}

/// Furthest point an attempt reached
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptStage {
    /// Waiting on or rejected by the generator
    Generating,
    /// Structural checks
    StaticCheck,
    /// Parse check
    SyntaxCheck,
    /// Sandboxed run
    RuntimeCheck,
    /// Passed everything
    Succeeded,
}

impl From<ValidationStage> for AttemptStage {
    fn from(stage: ValidationStage) -> Self {
        match stage {
            ValidationStage::Static => Self::StaticCheck,
            ValidationStage::Syntax => Self::SyntaxCheck,
            ValidationStage::Runtime => Self::RuntimeCheck,
        }
    }
}

impl std::fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Generating => "generating",
            Self::StaticCheck => "static_check",
            Self::SyntaxCheck => "syntax_check",
            Self::RuntimeCheck => "runtime_check",
            Self::Succeeded => "succeeded",
        })
    }
}

/// One generation attempt
#[derive(Clone, Debug)]
pub struct Attempt {
    /// 1-based attempt index
    pub index: u32,
    /// Creativity used for this attempt
    pub creativity: f32,
    /// Prompt sent
    pub prompt: String,
    /// Raw model output (empty if the call failed)
    pub raw_output: String,
    /// Furthest stage reached
    pub stage: AttemptStage,
    /// Failure text, forwarded verbatim to the next attempt
    pub failure: Option<String>,
}

impl Attempt {
    fn new(index: u32, creativity: f32, prompt: String) -> Self {
        Self {
            index,
            creativity,
            prompt,
            raw_output: String::new(),
            stage: AttemptStage::Generating,
            failure: None,
        }
    }

    fn fail(&mut self, stage: AttemptStage, failure: String) {
        self.stage = stage;
        self.failure = Some(failure);
    }
}

/// All attempts for a request failed
#[derive(Clone, Debug, Error)]
#[error("All {attempts} attempts failed; last error: {last_error}")]
pub struct GenerationExhausted {
    /// Attempts made
    pub attempts: u32,
    /// Failure text of the final attempt
    pub last_error: String,
    /// The final attempt, kept for diagnostics
    pub final_attempt: Attempt,
}

/// A request that produced an animation
#[derive(Clone, Debug)]
pub struct RetrySuccess {
    /// The validated animation
    pub animation: Animation,
    /// The attempt that passed
    pub attempt: Attempt,
    /// Runtime validation report (with captured frames)
    pub report: RuntimeReport,
}

/// Terminal result of [`RetryController::run`]
#[derive(Clone, Debug)]
pub enum RetryOutcome {
    /// An attempt passed every stage
    Success(Box<RetrySuccess>),
    /// Every attempt failed
    Exhausted(Box<GenerationExhausted>),
    /// Shutdown was requested before a terminal outcome
    Cancelled,
}

/// Build the prompt for one attempt
///
/// Only the immediately preceding failure is included.
#[must_use]
pub fn build_prompt(
    template: &str,
    idea: &str,
    entry_point: &str,
    previous_error: Option<&str>,
) -> String {
    let retry = previous_error.map_or_else(String::new, |error| {
        format!(
            "\n\nPREVIOUS ATTEMPT FAILED:\n- {error}\n\nFix the error above and generate corrected code."
        )
    });
    format!("{template}\n\nCreate: {idea}\nFunction: {entry_point}{retry}\n\nONLY output code.")
}

/// Runs generation attempts until one validates or the limit is reached
pub struct RetryController {
    client: Arc<dyn CodeGenerationClient>,
    pipeline: ValidationPipeline,
    policy: RetryPolicy,
    model: String,
    max_tokens: u32,
    context_window: u32,
    progress: Option<Arc<ProgressTracker>>,
    shutdown: Shutdown,
}

impl RetryController {
    /// Create a controller
    pub fn new(
        client: Arc<dyn CodeGenerationClient>,
        pipeline: ValidationPipeline,
        policy: RetryPolicy,
        model: impl Into<String>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            client,
            pipeline,
            policy,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            context_window: DEFAULT_CONTEXT_WINDOW,
            progress: None,
            shutdown,
        }
    }

    /// Report attempts to a progress tracker
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Override generation length and context size
    #[must_use]
    pub fn with_token_limits(mut self, max_tokens: u32, context_window: u32) -> Self {
        self.max_tokens = max_tokens;
        self.context_window = context_window;
        self
    }

    /// Attempt schedule
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run attempts for one request
    pub async fn run(&self, request: &GenerationRequest) -> RetryOutcome {
        let total = self.policy.max_retries.max(1);
        let entry = request.id.as_str();
        let mut previous: Option<Attempt> = None;

        for index in 1..=total {
            if self.shutdown.is_triggered() {
                return RetryOutcome::Cancelled;
            }
            if let Some(progress) = &self.progress {
                progress.record_attempt(index, total, &request.idea);
            }

            let creativity = self.policy.creativity(index);
            let previous_error = previous.as_ref().and_then(|a| a.failure.as_deref());
            let prompt = build_prompt(&request.template, &request.idea, entry, previous_error);
            let mut attempt = Attempt::new(index, creativity, prompt);

            tracing::debug!(
                animation_id = %request.id,
                attempt = index,
                temperature = creativity,
                "Requesting code"
            );

            let completion = CompletionRequest::new(attempt.prompt.clone(), self.model.clone())
                .with_temperature(creativity)
                .with_max_tokens(self.max_tokens)
                .with_context_window(self.context_window);
            let response = tokio::select! {
                response = self.client.complete(&completion) => response,
                () = self.shutdown.wait() => return RetryOutcome::Cancelled,
            };

            match response {
                Err(e) => attempt.fail(
                    AttemptStage::Generating,
                    format!("GenerationFailed: {e}"),
                ),
                Ok(response) if response.content.trim().is_empty() => attempt.fail(
                    AttemptStage::Generating,
                    "GenerationFailed: empty response".to_string(),
                ),
                Ok(response) => {
                    attempt.raw_output = response.content;
                    let verdict = self
                        .pipeline
                        .validate(&attempt.raw_output, entry, Some(self.shutdown.clone()))
                        .await;

                    match verdict {
                        Verdict::Passed(candidate) => {
                            attempt.stage = AttemptStage::Succeeded;
                            if let Some(progress) = &self.progress {
                                progress.complete_request();
                            }
                            tracing::info!(
                                animation_id = %request.id,
                                attempt = index,
                                frames = candidate.report.outcome.frames(),
                                "Animation validated"
                            );
                            let animation = Animation::new(
                                request.id.clone(),
                                candidate.source,
                                candidate.report.entry_point.clone(),
                                request.idea.clone(),
                            );
                            return RetryOutcome::Success(Box::new(RetrySuccess {
                                animation,
                                attempt,
                                report: candidate.report,
                            }));
                        }
                        Verdict::Failed { error, .. } => {
                            attempt.fail(error.stage().into(), error.to_string());
                        }
                        Verdict::Cancelled => return RetryOutcome::Cancelled,
                    }
                }
            }

            tracing::info!(
                animation_id = %request.id,
                attempt = index,
                stage = %attempt.stage,
                error = attempt.failure.as_deref().unwrap_or_default(),
                "Attempt failed"
            );
            previous = Some(attempt);
        }

        if let Some(progress) = &self.progress {
            progress.complete_request();
        }

        let final_attempt = previous.unwrap_or_else(|| {
            let mut attempt = Attempt::new(total, self.policy.creativity(total), String::new());
            attempt.fail(AttemptStage::Generating, "no attempt made".to_string());
            attempt
        });
        let last_error = final_attempt.failure.clone().unwrap_or_default();

        tracing::warn!(
            animation_id = %request.id,
            attempts = total,
            error = %last_error,
            "All attempts failed"
        );

        RetryOutcome::Exhausted(Box::new(GenerationExhausted {
            attempts: total,
            last_error,
            final_attempt,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_creativity_schedule() {
        let policy = RetryPolicy::default();
        let values: Vec<f32> = (1..=6).map(|i| policy.creativity(i)).collect();
        let expected = [0.80, 0.75, 0.70, 0.65, 0.60, 0.60];
        for (got, want) in values.iter().zip(expected) {
            assert!((got - want).abs() < 1e-5, "{got} != {want}");
        }
        assert!(values.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_first_prompt_has_no_retry_context() {
        let prompt = build_prompt("TEMPLATE", "rain on glass", "anim_1_1000", None);
        assert_eq!(
            prompt,
            "TEMPLATE\n\nCreate: rain on glass\nFunction: anim_1_1000\n\nONLY output code."
        );
    }

    #[test]
    fn test_retry_prompt_embeds_previous_error() {
        let prompt = build_prompt("T", "rain", "anim_1_1000", Some("Missing write_frame"));
        assert_eq!(
            prompt,
            "T\n\nCreate: rain\nFunction: anim_1_1000\n\nPREVIOUS ATTEMPT FAILED:\n- Missing write_frame\n\nFix the error above and generate corrected code.\n\nONLY output code."
        );
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(AttemptStage::from(ValidationStage::Static), AttemptStage::StaticCheck);
        assert_eq!(AttemptStage::from(ValidationStage::Runtime).to_string(), "runtime_check");
    }
}
