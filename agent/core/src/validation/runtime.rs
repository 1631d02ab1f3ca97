//! Sandboxed runtime validation
//!
//! Runs a candidate against a [`HeadlessDisplay`] at an accelerated tick rate
//! for a fixed frame budget. The blocking run goes to tokio's blocking pool
//! and is additionally bounded by an outer timeout, so a run that ignores the
//! engine's own ceiling still cannot hang the producer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::ValidationError;
use crate::display::{FrameCapture, HeadlessDisplay, SharedDisplay};
use crate::sandbox::{FaultKind, InvokeParams, RunOutcome, Sandbox, SandboxError};
use crate::shutdown::Shutdown;

/// Extra time the outer timeout allows beyond the engine ceiling
const OUTER_GRACE: Duration = Duration::from_millis(500);

/// Runtime validation settings
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    /// Frames a candidate must be able to draw
    pub frame_budget: u64,
    /// Simulated frames per second reported to the script
    pub tick_rate: u32,
    /// Wall-clock ceiling for the whole run
    pub time_ceiling: Duration,
    /// Engine operation cap
    pub max_operations: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            frame_budget: 600,
            tick_rate: 600,
            time_ceiling: Duration::from_secs(2),
            max_operations: 5_000_000,
        }
    }
}

impl RuntimeSettings {
    /// Duration handed to the entry point
    #[must_use]
    pub fn simulated_duration(&self) -> f64 {
        self.frame_budget as f64 / f64::from(self.tick_rate.max(1))
    }
}

/// What a passing (or cancelled) run produced
#[derive(Clone, Debug)]
pub struct RuntimeReport {
    /// Entry point the sandbox resolved
    pub entry_point: String,
    /// How the run ended
    pub outcome: RunOutcome,
    /// Frames drawn during validation
    pub capture: FrameCapture,
    /// Wall-clock time spent
    pub elapsed: Duration,
}

/// Executes candidates in the sandbox against a headless display
#[derive(Clone)]
pub struct RuntimeValidator {
    sandbox: Arc<dyn Sandbox>,
    settings: RuntimeSettings,
}

impl RuntimeValidator {
    /// Validator with the given engine and settings
    pub fn new(sandbox: Arc<dyn Sandbox>, settings: RuntimeSettings) -> Self {
        Self { sandbox, settings }
    }

    /// Current settings
    #[must_use]
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Run a candidate
    ///
    /// A cancelled run is returned as `Ok` with [`RunOutcome::Cancelled`];
    /// callers decide what cancellation means for them.
    pub async fn validate(
        &self,
        source: &str,
        entry_hint: &str,
        cancel: Option<Shutdown>,
    ) -> Result<RuntimeReport, ValidationError> {
        let settings = self.settings.clone();
        let sandbox = Arc::clone(&self.sandbox);
        let source = source.to_string();
        let entry_hint = entry_hint.to_string();
        let started = Instant::now();

        let mut params = InvokeParams::new(settings.simulated_duration())
            .with_frame_budget(settings.frame_budget)
            .with_time_ceiling(settings.time_ceiling)
            .with_max_operations(settings.max_operations);
        if let Some(cancel) = cancel {
            params = params.with_cancel(cancel);
        }

        let task = tokio::task::spawn_blocking(move || {
            let program = sandbox.load(&source, &entry_hint)?;
            let display = Arc::new(Mutex::new(HeadlessDisplay::new(settings.tick_rate)));
            let shared: SharedDisplay = display.clone();
            let outcome = program.invoke(shared, &params)?;
            let frames = display.lock().take_frames();
            Ok::<_, SandboxError>((program.entry_point().to_string(), outcome, frames))
        });

        let ceiling = self.settings.time_ceiling;
        let (entry_point, outcome, frames) =
            match tokio::time::timeout(ceiling + OUTER_GRACE, task).await {
                Ok(Ok(Ok(done))) => done,
                Ok(Ok(Err(err))) => return Err(runtime_failure(err)),
                Ok(Err(join_err)) => {
                    return Err(ValidationError::RuntimeValidation {
                        kind: FaultKind::RuntimeError,
                        message: format!("validation task failed: {join_err}"),
                        frame: 0,
                    })
                }
                Err(_) => {
                    tracing::warn!(
                        ceiling_ms = ceiling.as_millis() as u64,
                        "Sandboxed run ignored its ceiling; abandoning it"
                    );
                    return Err(ValidationError::RuntimeValidation {
                        kind: FaultKind::Timeout,
                        message: format!(
                            "animation hung (no result within {}ms)",
                            (ceiling + OUTER_GRACE).as_millis()
                        ),
                        frame: 0,
                    });
                }
            };

        match outcome {
            RunOutcome::Completed { frames: 0 } => {
                return Err(ValidationError::RuntimeValidation {
                    kind: FaultKind::NoFrames,
                    message: "entry point returned without calling write_frame".to_string(),
                    frame: 0,
                });
            }
            RunOutcome::Completed { frames } if frames < self.settings.frame_budget => {
                return Err(ValidationError::RuntimeValidation {
                    kind: FaultKind::ShortRun,
                    message: format!(
                        "entry point returned after {frames} of {} frames; keep drawing in a loop",
                        self.settings.frame_budget
                    ),
                    frame: frames,
                });
            }
            _ => {}
        }

        let elapsed = started.elapsed();
        tracing::debug!(
            entry_point = %entry_point,
            frames = outcome.frames(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Runtime validation finished"
        );

        Ok(RuntimeReport {
            capture: FrameCapture::from_frames(entry_point.clone(), frames),
            entry_point,
            outcome,
            elapsed,
        })
    }
}

/// Convert a sandbox failure into the error forwarded to the next attempt
fn runtime_failure(err: SandboxError) -> ValidationError {
    match err {
        SandboxError::Parse(message) => ValidationError::Syntax { message },
        other => ValidationError::RuntimeValidation {
            kind: other.kind().unwrap_or(FaultKind::RuntimeError),
            frame: other.frame(),
            message: match other {
                SandboxError::Fault { message, .. } => message,
                other => other.to_string(),
            },
        },
    }
}
