//! Sandboxed Execution of Generated Animations
//!
//! Generated code is untrusted. Everything that parses or runs it goes
//! through the narrow interface in this module:
//!
//! - [`Sandbox::parse`] - parse-only check, no side effects
//! - [`Sandbox::load`] - compile and resolve the entry point
//! - [`AnimationProgram::invoke`] - run against a display under a frame
//!   budget, a wall-clock ceiling and an operation cap
//!
//! The retry controller, validators and display controller only see these
//! traits, so the engine can be swapped (in-process, or a separate process
//! with a kill timeout) without touching them. [`RhaiSandbox`] is the
//! in-process implementation.

mod rhai_engine;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::display::SharedDisplay;
use crate::shutdown::Shutdown;

pub use rhai_engine::{RhaiSandbox, SandboxLimits};

/// Longest single `frame_sleep` a script may request, in seconds
pub const MAX_FRAME_SLEEP_SECS: f64 = 1.0;

/// Classification of a failed run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    /// Array, string or bit-field index out of range
    IndexError,
    /// Division by zero, overflow and similar
    ArithmeticError,
    /// Wrong value type for an operation or call
    TypeError,
    /// Unknown function, variable or property
    NameError,
    /// Operation, call-depth or data-size cap exceeded
    ResourceLimitError,
    /// The display driver rejected a frame
    DisplayError,
    /// Any other script fault (including `throw`)
    RuntimeError,
    /// Wall-clock ceiling exceeded
    Timeout,
    /// Entry point returned without drawing a frame
    NoFrames,
    /// Entry point returned before the frame budget was drawn
    ShortRun,
}

impl FaultKind {
    /// Stable name used in error text forwarded to the model
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IndexError => "IndexError",
            Self::ArithmeticError => "ArithmeticError",
            Self::TypeError => "TypeError",
            Self::NameError => "NameError",
            Self::ResourceLimitError => "ResourceLimitError",
            Self::DisplayError => "DisplayError",
            Self::RuntimeError => "RuntimeError",
            Self::Timeout => "Timeout",
            Self::NoFrames => "NoFrames",
            Self::ShortRun => "ShortRun",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from parsing, loading or running a script
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Source did not parse; message is the parser's, verbatim
    #[error("{0}")]
    Parse(String),

    /// No callable entry point with the expected shape
    #[error("No function found: expected `fn {expected}(animator, duration)`")]
    EntryPointMissing {
        /// Entry point name that was looked for
        expected: String,
    },

    /// The script faulted while running
    #[error("{kind}: {message}")]
    Fault {
        /// Classification
        kind: FaultKind,
        /// Engine message
        message: String,
        /// Frames written before the fault
        frame: u64,
    },

    /// The run exceeded its wall-clock ceiling and was aborted
    #[error("Timeout: animation still running after {}ms ({frames} frames written)", ceiling.as_millis())]
    Timeout {
        /// Ceiling that was exceeded
        ceiling: Duration,
        /// Frames written before the abort
        frames: u64,
    },
}

impl SandboxError {
    /// Fault classification, if this error came from a run
    #[must_use]
    pub fn kind(&self) -> Option<FaultKind> {
        match self {
            Self::Fault { kind, .. } => Some(*kind),
            Self::Timeout { .. } => Some(FaultKind::Timeout),
            Self::EntryPointMissing { .. } => Some(FaultKind::NameError),
            Self::Parse(_) => None,
        }
    }

    /// Frames written before the failure
    #[must_use]
    pub fn frame(&self) -> u64 {
        match self {
            Self::Fault { frame, .. } => *frame,
            Self::Timeout { frames, .. } => *frames,
            _ => 0,
        }
    }
}

/// How a run ended, when it did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Entry point returned on its own
    Completed {
        /// Frames written
        frames: u64,
    },
    /// Frame budget reached; the run was stopped
    BudgetReached {
        /// Frames written (equal to the budget)
        frames: u64,
    },
    /// Cancellation was observed; the run was stopped
    Cancelled {
        /// Frames written
        frames: u64,
    },
}

impl RunOutcome {
    /// Frames written during the run
    #[must_use]
    pub fn frames(&self) -> u64 {
        match self {
            Self::Completed { frames }
            | Self::BudgetReached { frames }
            | Self::Cancelled { frames } => *frames,
        }
    }

    /// Whether the run was interrupted by cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Parameters for one invocation
#[derive(Clone, Debug)]
pub struct InvokeParams {
    /// `duration` argument handed to the entry point, in seconds
    pub duration_secs: f64,
    /// Stop successfully after this many frames
    pub frame_budget: Option<u64>,
    /// Abort with a timeout after this much wall-clock time
    pub time_ceiling: Option<Duration>,
    /// Abort after this many engine operations (0 = unlimited)
    pub max_operations: u64,
    /// Stop early when triggered
    pub cancel: Option<Shutdown>,
}

impl InvokeParams {
    /// Parameters with no budget, ceiling or cancellation
    #[must_use]
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            frame_budget: None,
            time_ceiling: None,
            max_operations: 0,
            cancel: None,
        }
    }

    /// Set the frame budget
    #[must_use]
    pub fn with_frame_budget(mut self, budget: u64) -> Self {
        self.frame_budget = Some(budget);
        self
    }

    /// Set the wall-clock ceiling
    #[must_use]
    pub fn with_time_ceiling(mut self, ceiling: Duration) -> Self {
        self.time_ceiling = Some(ceiling);
        self
    }

    /// Set the operation cap
    #[must_use]
    pub fn with_max_operations(mut self, ops: u64) -> Self {
        self.max_operations = ops;
        self
    }

    /// Observe a shutdown signal
    #[must_use]
    pub fn with_cancel(mut self, cancel: Shutdown) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A loaded, runnable animation
pub trait AnimationProgram: Send + Sync {
    /// Name of the function that will be invoked
    fn entry_point(&self) -> &str;

    /// Run the entry point against a display
    ///
    /// Blocks the calling thread. Run it on a blocking pool from async code.
    fn invoke(
        &self,
        display: SharedDisplay,
        params: &InvokeParams,
    ) -> Result<RunOutcome, SandboxError>;
}

/// Execution engine for generated animation code
pub trait Sandbox: Send + Sync {
    /// Engine name, for logs
    fn name(&self) -> &str;

    /// Parse without executing anything
    fn parse(&self, source: &str) -> Result<(), SandboxError>;

    /// Compile and resolve the entry point
    ///
    /// `entry_hint` is the conventional function name; engines may fall back
    /// to a single function with the right arity.
    fn load(
        &self,
        source: &str,
        entry_hint: &str,
    ) -> Result<Arc<dyn AnimationProgram>, SandboxError>;
}
