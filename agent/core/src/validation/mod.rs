//! Candidate Validation
//!
//! Three stages a generated script must pass, in order, before it becomes an
//! [`Animation`](crate::animation::Animation):
//!
//! 1. **Static** - structural rules on the text ([`StaticValidator`])
//! 2. **Syntax** - parse-only check ([`SyntaxValidator`])
//! 3. **Runtime** - sandboxed run against a headless display
//!    ([`RuntimeValidator`])
//!
//! Each failure carries the exact text that will be forwarded to the next
//! generation attempt.

mod runtime;
mod static_check;
mod syntax;

use std::sync::Arc;

use thiserror::Error;

pub use runtime::{RuntimeReport, RuntimeSettings, RuntimeValidator};
pub use static_check::{
    bound_identifiers, defined_functions, extract_candidate, literal_chars, StaticRule,
    StaticValidator, MOTION_STEMS,
};
pub use syntax::SyntaxValidator;

use crate::sandbox::{FaultKind, Sandbox};
use crate::shutdown::Shutdown;

/// Validation failure, one variant per stage
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidationError {
    /// One or more structural rules were not met
    #[error("{}", join_rules(violations))]
    StaticValidation {
        /// Unmet rules, in check order
        violations: Vec<StaticRule>,
    },

    /// The source does not parse
    #[error("Syntax: {message}")]
    Syntax {
        /// Parser message, verbatim
        message: String,
    },

    /// The sandboxed run faulted, timed out or stopped short of the budget
    #[error("Runtime {kind} at frame {frame}: {message}")]
    RuntimeValidation {
        /// Classification
        kind: FaultKind,
        /// Engine message
        message: String,
        /// Frames drawn before the failure
        frame: u64,
    },
}

impl ValidationError {
    /// Static failure from a list of rules
    #[must_use]
    pub fn static_rules(violations: Vec<StaticRule>) -> Self {
        Self::StaticValidation { violations }
    }

    /// Stage that produced this error
    #[must_use]
    pub fn stage(&self) -> ValidationStage {
        match self {
            Self::StaticValidation { .. } => ValidationStage::Static,
            Self::Syntax { .. } => ValidationStage::Syntax,
            Self::RuntimeValidation { .. } => ValidationStage::Runtime,
        }
    }
}

fn join_rules(rules: &[StaticRule]) -> String {
    rules
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validation stage names
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationStage {
    /// Structural rules
    Static,
    /// Parse-only check
    Syntax,
    /// Sandboxed execution
    Runtime,
}

impl std::fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Static => "static",
            Self::Syntax => "syntax",
            Self::Runtime => "runtime",
        })
    }
}

/// A candidate that passed every stage
#[derive(Clone, Debug)]
pub struct ValidatedCandidate {
    /// Extracted source
    pub source: String,
    /// Runtime stage report
    pub report: RuntimeReport,
}

/// Result of running the pipeline on one reply
#[derive(Clone, Debug)]
pub enum Verdict {
    /// Every stage passed
    Passed(Box<ValidatedCandidate>),
    /// A stage failed
    Failed {
        /// Source that was checked, if extraction succeeded
        source: Option<String>,
        /// The failure
        error: ValidationError,
    },
    /// Cancellation was observed during the runtime stage
    Cancelled,
}

/// The three stages wired together
#[derive(Clone)]
pub struct ValidationPipeline {
    static_validator: StaticValidator,
    syntax: SyntaxValidator,
    runtime: RuntimeValidator,
}

impl ValidationPipeline {
    /// Pipeline with default static thresholds
    pub fn new(sandbox: Arc<dyn Sandbox>, runtime: RuntimeSettings) -> Self {
        Self::with_static(StaticValidator::new(), sandbox, runtime)
    }

    /// Pipeline with a custom static validator
    pub fn with_static(
        static_validator: StaticValidator,
        sandbox: Arc<dyn Sandbox>,
        runtime: RuntimeSettings,
    ) -> Self {
        Self {
            static_validator,
            syntax: SyntaxValidator::new(Arc::clone(&sandbox)),
            runtime: RuntimeValidator::new(sandbox, runtime),
        }
    }

    /// Runtime settings in use
    #[must_use]
    pub fn runtime_settings(&self) -> &RuntimeSettings {
        self.runtime.settings()
    }

    /// Run every stage on a raw model reply
    pub async fn validate(
        &self,
        raw: &str,
        entry_hint: &str,
        cancel: Option<Shutdown>,
    ) -> Verdict {
        let source = match extract_candidate(raw) {
            Ok(source) => source,
            Err(error) => {
                return Verdict::Failed {
                    source: None,
                    error,
                }
            }
        };

        if let Err(error) = self.static_validator.check(&source) {
            return Verdict::Failed {
                source: Some(source),
                error,
            };
        }
        tracing::debug!(entry_hint, "Static checks passed");

        if let Err(error) = self.syntax.check(&source) {
            return Verdict::Failed {
                source: Some(source),
                error,
            };
        }
        tracing::debug!(entry_hint, "Syntax valid");

        match self.runtime.validate(&source, entry_hint, cancel).await {
            Ok(report) if report.outcome.is_cancelled() => Verdict::Cancelled,
            Ok(report) => Verdict::Passed(Box::new(ValidatedCandidate { source, report })),
            Err(error) => Verdict::Failed {
                source: Some(source),
                error,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::RhaiSandbox;

    fn pipeline() -> ValidationPipeline {
        ValidationPipeline::new(Arc::new(RhaiSandbox::new()), RuntimeSettings::default())
    }

    const BOUNCE: &str = r##"```rhai
fn anim_9_9999(animator, duration) {
    let pos = 0;
    let vel = 1;
    loop {
        let line1 = blank_row();
        let line2 = blank_row();
        line1[pos] = "*";
        line2[19 - pos] = "o";
        if pos % 2 == 0 { line2[0] = "#"; } else { line1[19] = "+"; }
        animator.write_frame(line1, line2);
        pos += vel;
        if pos == 0 || pos == animator.width - 1 { vel = -vel; }
        animator.frame_sleep(0.16);
    }
}
```"##;

    #[tokio::test]
    async fn test_passing_candidate() {
        match pipeline().validate(BOUNCE, "anim_9_9999", None).await {
            Verdict::Passed(candidate) => {
                assert!(candidate.source.starts_with("fn anim_9_9999"));
                assert_eq!(candidate.report.capture.len(), 600);
            }
            other => panic!("expected pass, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_static_failure_stops_before_execution() {
        let raw = "fn anim(a, d) { a.write_frame(\"x\", \"y\"); }";
        match pipeline().validate(raw, "anim", None).await {
            Verdict::Failed { error, source } => {
                assert_eq!(error.stage(), ValidationStage::Static);
                assert!(source.is_some());
            }
            other => panic!("expected static failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_syntax_failure() {
        let raw = BOUNCE.replace("let vel = 1;", "let vel = ;");
        match pipeline().validate(&raw, "anim_9_9999", None).await {
            Verdict::Failed { error, .. } => {
                assert_eq!(error.stage(), ValidationStage::Syntax);
                assert!(error.to_string().starts_with("Syntax: "));
            }
            other => panic!("expected syntax failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_runtime_failure_off_by_one() {
        let raw = BOUNCE.replace("line2[19 - pos]", "line2[20 - pos]");
        match pipeline().validate(&raw, "anim_9_9999", None).await {
            Verdict::Failed { error, .. } => match error {
                ValidationError::RuntimeValidation { kind, frame, .. } => {
                    assert_eq!(kind, FaultKind::IndexError);
                    assert_eq!(frame, 0);
                }
                other => panic!("expected runtime failure, got {other:?}"),
            },
            other => panic!("expected runtime failure, got {other:?}"),
        }
    }

    #[test]
    fn test_static_error_text_joins_rules() {
        let err = ValidationError::static_rules(vec![
            StaticRule::MissingWriteFrame,
            StaticRule::NoMotion,
        ]);
        assert!(err.to_string().starts_with("Missing write_frame; No motion"));
    }
}
