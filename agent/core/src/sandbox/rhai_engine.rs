//! Rhai Sandbox
//!
//! In-process execution of generated animations with the Rhai engine.
//!
//! Every invocation gets a fresh [`Engine`] configured with hard limits: an
//! operation cap, call and expression depth caps, data size caps, no module
//! resolver, `eval` disabled and output swallowed. A progress hook aborts the
//! run when the wall-clock ceiling passes or shutdown is requested, and the
//! host `write_frame` stops the run once the frame budget is reached.
//!
//! # Host API
//!
//! ```text
//! animator.write_frame(line1, line2)   // strings or arrays of cells
//! animator.frame_sleep(seconds)        // clamped to 1s per call
//! animator.frame_rate / width / frame  // read-only properties
//! rand_int(lo, hi)  rand_float()  blank_line()  blank_row()
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::Rng;
use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Position, Scope, AST};

use super::{
    AnimationProgram, FaultKind, InvokeParams, RunOutcome, Sandbox, SandboxError,
    MAX_FRAME_SLEEP_SECS,
};
use crate::display::{SharedDisplay, DISPLAY_WIDTH};

/// Progress hook checks the clock once per this many operations
const PROGRESS_CHECK_INTERVAL: u64 = 256;

/// Structural limits applied to every engine
#[derive(Clone, Debug)]
pub struct SandboxLimits {
    /// Maximum script function call depth
    pub max_call_levels: usize,
    /// Maximum expression nesting at global level
    pub max_expr_depth: usize,
    /// Maximum expression nesting inside functions
    pub max_function_expr_depth: usize,
    /// Maximum string length in bytes
    pub max_string_size: usize,
    /// Maximum array length
    pub max_array_size: usize,
    /// Maximum object map size
    pub max_map_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_call_levels: 32,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_string_size: 10_000,
            max_array_size: 10_000,
            max_map_size: 1_000,
        }
    }
}

/// Rhai-backed [`Sandbox`]
#[derive(Clone, Debug, Default)]
pub struct RhaiSandbox {
    limits: SandboxLimits,
}

impl RhaiSandbox {
    /// Create a sandbox with default limits
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sandbox with custom limits
    #[must_use]
    pub fn with_limits(limits: SandboxLimits) -> Self {
        Self { limits }
    }
}

/// Build a locked-down engine with the host API registered
fn build_engine(limits: &SandboxLimits) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.on_print(|_| {});
    engine.on_debug(|_, _, _| {});

    register_host_api(&mut engine);
    engine
}

fn register_host_api(engine: &mut Engine) {
    engine.register_type_with_name::<Animator>("Animator");

    engine.register_fn(
        "write_frame",
        |animator: &mut Animator, line1: Dynamic, line2: Dynamic| {
            animator.run.write_frame(line1, line2)
        },
    );
    engine.register_fn("frame_sleep", |animator: &mut Animator, seconds: f64| {
        animator.run.frame_sleep(seconds)
    });
    engine.register_fn("frame_sleep", |animator: &mut Animator, seconds: i64| {
        animator.run.frame_sleep(seconds as f64)
    });

    engine.register_get("frame_rate", |animator: &mut Animator| {
        i64::from(animator.run.frame_rate)
    });
    engine.register_get("width", |_: &mut Animator| DISPLAY_WIDTH as i64);
    engine.register_get("frame", |animator: &mut Animator| {
        animator.run.frames() as i64
    });

    engine.register_fn("rand_int", |lo: i64, hi: i64| -> i64 {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        rand::thread_rng().gen_range(lo..=hi)
    });
    engine.register_fn("rand_float", || -> f64 { rand::random::<f64>() });
    engine.register_fn("blank_line", || " ".repeat(DISPLAY_WIDTH));
    engine.register_fn("blank_row", || -> Array {
        vec![Dynamic::from(' '); DISPLAY_WIDTH]
    });
}

impl Sandbox for RhaiSandbox {
    fn name(&self) -> &str {
        "rhai"
    }

    fn parse(&self, source: &str) -> Result<(), SandboxError> {
        build_engine(&self.limits)
            .compile(source)
            .map(|_| ())
            .map_err(|e| SandboxError::Parse(e.to_string()))
    }

    fn load(
        &self,
        source: &str,
        entry_hint: &str,
    ) -> Result<Arc<dyn AnimationProgram>, SandboxError> {
        let ast = build_engine(&self.limits)
            .compile(source)
            .map_err(|e| SandboxError::Parse(e.to_string()))?;

        let entry_point = resolve_entry_point(&ast, entry_hint).ok_or_else(|| {
            SandboxError::EntryPointMissing {
                expected: entry_hint.to_string(),
            }
        })?;

        tracing::debug!(entry_point = %entry_point, "Loaded animation script");

        Ok(Arc::new(RhaiProgram {
            ast,
            entry_point,
            limits: self.limits.clone(),
        }))
    }
}

/// Pick the function to call: the conventional name, or the only
/// two-parameter function in the script
fn resolve_entry_point(ast: &AST, hint: &str) -> Option<String> {
    let candidates: Vec<String> = ast
        .iter_functions()
        .filter(|f| f.params.len() == 2)
        .map(|f| f.name.to_string())
        .collect();

    if candidates.iter().any(|name| name == hint) {
        return Some(hint.to_string());
    }
    match candidates.as_slice() {
        [only] => Some(only.clone()),
        _ => None,
    }
}

/// A compiled script with a resolved entry point
struct RhaiProgram {
    ast: AST,
    entry_point: String,
    limits: SandboxLimits,
}

impl AnimationProgram for RhaiProgram {
    fn entry_point(&self) -> &str {
        &self.entry_point
    }

    fn invoke(
        &self,
        display: SharedDisplay,
        params: &InvokeParams,
    ) -> Result<RunOutcome, SandboxError> {
        let run = Arc::new(RunState::new(display, params));

        let mut engine = build_engine(&self.limits);
        engine.set_max_operations(params.max_operations);
        {
            let run = Arc::clone(&run);
            engine.on_progress(move |ops| {
                if ops % PROGRESS_CHECK_INTERVAL != 0 {
                    return None;
                }
                run.interrupted().map(|reason| {
                    run.set_stop(reason);
                    Dynamic::UNIT
                })
            });
        }

        let animator = Animator {
            run: Arc::clone(&run),
        };
        let mut scope = Scope::new();
        let result = engine.call_fn::<Dynamic>(
            &mut scope,
            &self.ast,
            &self.entry_point,
            (animator, params.duration_secs),
        );

        let frames = run.frames();
        let stop = run.stop.lock().take();

        match (result, stop) {
            (_, Some(StopReason::BudgetReached)) => Ok(RunOutcome::BudgetReached { frames }),
            (_, Some(StopReason::Cancelled)) => Ok(RunOutcome::Cancelled { frames }),
            (_, Some(StopReason::Timeout)) => Err(SandboxError::Timeout {
                ceiling: params.time_ceiling.unwrap_or_default(),
                frames,
            }),
            (_, Some(StopReason::Display(message))) => Err(SandboxError::Fault {
                kind: FaultKind::DisplayError,
                message,
                frame: frames,
            }),
            (Ok(_), None) => Ok(RunOutcome::Completed { frames }),
            (Err(err), None) => Err(classify(*err, frames)),
        }
    }
}

/// Why the host stopped a run
#[derive(Clone, Debug, PartialEq, Eq)]
enum StopReason {
    BudgetReached,
    Cancelled,
    Timeout,
    Display(String),
}

/// State shared by the host functions and the progress hook for one run
struct RunState {
    display: SharedDisplay,
    frame_rate: u32,
    frames: AtomicU64,
    budget: Option<u64>,
    deadline: Option<Instant>,
    cancel: Option<crate::shutdown::Shutdown>,
    stop: Mutex<Option<StopReason>>,
}

impl RunState {
    fn new(display: SharedDisplay, params: &InvokeParams) -> Self {
        let frame_rate = display.lock().frame_rate();
        Self {
            display,
            frame_rate,
            frames: AtomicU64::new(0),
            budget: params.frame_budget,
            deadline: params.time_ceiling.map(|c| Instant::now() + c),
            cancel: params.cancel.clone(),
            stop: Mutex::new(None),
        }
    }

    fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    fn interrupted(&self) -> Option<StopReason> {
        if self.cancel.as_ref().is_some_and(|c| c.is_triggered()) {
            return Some(StopReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(StopReason::Timeout);
        }
        None
    }

    /// Record the first stop reason; later ones are ignored
    fn set_stop(&self, reason: StopReason) {
        let mut stop = self.stop.lock();
        if stop.is_none() {
            *stop = Some(reason);
        }
    }

    fn terminate(&self, reason: StopReason) -> Box<EvalAltResult> {
        self.set_stop(reason);
        Box::new(EvalAltResult::ErrorTerminated(Dynamic::UNIT, Position::NONE))
    }

    fn write_frame(&self, line1: Dynamic, line2: Dynamic) -> Result<(), Box<EvalAltResult>> {
        if let Some(reason) = self.interrupted() {
            return Err(self.terminate(reason));
        }

        let line1 = row_text(line1)?;
        let line2 = row_text(line2)?;

        if let Err(e) = self.display.lock().write_frame(&line1, &line2) {
            return Err(self.terminate(StopReason::Display(e.to_string())));
        }

        let written = self.frames.fetch_add(1, Ordering::AcqRel) + 1;
        if self.budget.is_some_and(|b| written >= b) {
            return Err(self.terminate(StopReason::BudgetReached));
        }
        Ok(())
    }

    fn frame_sleep(&self, seconds: f64) -> Result<(), Box<EvalAltResult>> {
        if let Some(reason) = self.interrupted() {
            return Err(self.terminate(reason));
        }
        let seconds = if seconds.is_finite() {
            seconds.clamp(0.0, MAX_FRAME_SLEEP_SECS)
        } else {
            0.0
        };
        self.display.lock().frame_sleep(seconds);
        Ok(())
    }
}

/// Script-visible display handle
#[derive(Clone)]
struct Animator {
    run: Arc<RunState>,
}

/// Flatten a row value (string, char, array of cells or unit) to text
fn row_text(value: Dynamic) -> Result<String, Box<EvalAltResult>> {
    if value.is_unit() {
        return Ok(String::new());
    }
    if value.is_string() {
        return Ok(value.to_string());
    }
    if value.is_char() {
        return Ok(value.to_string());
    }
    if value.is_array() {
        let type_name = value.type_name();
        let cells = value.into_array().map_err(|_| mismatch(type_name))?;
        return Ok(cells.iter().map(ToString::to_string).collect());
    }
    Err(mismatch(value.type_name()))
}

fn mismatch(actual: &str) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorMismatchDataType(
        "string or array".to_string(),
        actual.to_string(),
        Position::NONE,
    ))
}

/// Map an engine error to a fault, unwrapping nested function-call errors
fn classify(err: EvalAltResult, frame: u64) -> SandboxError {
    let root = root_cause(err);
    let kind = match &root {
        EvalAltResult::ErrorArrayBounds(..)
        | EvalAltResult::ErrorStringBounds(..)
        | EvalAltResult::ErrorBitFieldBounds(..) => FaultKind::IndexError,
        EvalAltResult::ErrorArithmetic(..) => FaultKind::ArithmeticError,
        EvalAltResult::ErrorMismatchDataType(..)
        | EvalAltResult::ErrorMismatchOutputType(..)
        | EvalAltResult::ErrorIndexingType(..)
        | EvalAltResult::ErrorFor(..) => FaultKind::TypeError,
        EvalAltResult::ErrorFunctionNotFound(..)
        | EvalAltResult::ErrorVariableNotFound(..)
        | EvalAltResult::ErrorPropertyNotFound(..)
        | EvalAltResult::ErrorModuleNotFound(..) => FaultKind::NameError,
        EvalAltResult::ErrorTooManyOperations(..)
        | EvalAltResult::ErrorStackOverflow(..)
        | EvalAltResult::ErrorDataTooLarge(..)
        | EvalAltResult::ErrorTooManyModules(..) => FaultKind::ResourceLimitError,
        _ => FaultKind::RuntimeError,
    };

    SandboxError::Fault {
        kind,
        message: root.to_string(),
        frame,
    }
}

fn root_cause(err: EvalAltResult) -> EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => root_cause(*inner),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::display::HeadlessDisplay;
    use crate::shutdown::Shutdown;

    fn headless() -> (Arc<Mutex<HeadlessDisplay>>, SharedDisplay) {
        let display = Arc::new(Mutex::new(HeadlessDisplay::new(600)));
        let shared: SharedDisplay = display.clone();
        (display, shared)
    }

    fn run(source: &str, params: &InvokeParams) -> (Result<RunOutcome, SandboxError>, usize) {
        let program = RhaiSandbox::new().load(source, "anim_1_1000").unwrap();
        let (display, shared) = headless();
        let result = program.invoke(shared, params);
        let frames = display.lock().frames().len();
        (result, frames)
    }

    const MARQUEE: &str = r#"
        fn anim_1_1000(animator, duration) {
            let pos = 0;
            loop {
                let row = blank_row();
                row[pos] = "*";
                animator.write_frame(row, blank_line());
                pos = (pos + 1) % animator.width;
                animator.frame_sleep(0.1);
            }
        }
    "#;

    #[test]
    fn test_parse_reports_position() {
        let sandbox = RhaiSandbox::new();
        assert!(sandbox.parse(MARQUEE).is_ok());

        let err = sandbox.parse("fn broken(a, b) { let x = ; }").unwrap_err();
        assert!(matches!(err, SandboxError::Parse(_)));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_eval_is_disabled() {
        let err = RhaiSandbox::new()
            .parse(r#"fn f(a, d) { eval("1 + 1"); }"#)
            .unwrap_err();
        assert!(matches!(err, SandboxError::Parse(_)));
    }

    #[test]
    fn test_load_prefers_named_entry_point() {
        let source = r#"
            fn helper(a, b) { a + b }
            fn anim_1_1000(animator, duration) { animator.write_frame("a", "b"); }
        "#;
        let program = RhaiSandbox::new().load(source, "anim_1_1000").unwrap();
        assert_eq!(program.entry_point(), "anim_1_1000");
    }

    #[test]
    fn test_load_falls_back_to_single_candidate() {
        let source = r#"fn rain(animator, duration) { animator.write_frame("a", "b"); }"#;
        let program = RhaiSandbox::new().load(source, "anim_1_1000").unwrap();
        assert_eq!(program.entry_point(), "rain");
    }

    #[test]
    fn test_load_rejects_ambiguous_or_missing_entry() {
        let sandbox = RhaiSandbox::new();
        let two = "fn a(x, y) { } fn b(x, y) { }";
        assert!(matches!(
            sandbox.load(two, "anim_1_1000"),
            Err(SandboxError::EntryPointMissing { .. })
        ));
        let none = "fn a(x) { }";
        let err = sandbox.load(none, "anim_1_1000").err().unwrap();
        assert!(err.to_string().starts_with("No function found"));
    }

    #[test]
    fn test_budget_stops_endless_animation() {
        let params = InvokeParams::new(1.0)
            .with_frame_budget(600)
            .with_time_ceiling(Duration::from_secs(5));
        let (result, frames) = run(MARQUEE, &params);

        assert_eq!(result.unwrap(), RunOutcome::BudgetReached { frames: 600 });
        assert_eq!(frames, 600);
    }

    #[test]
    fn test_off_by_one_index_fails_on_first_frame() {
        let source = r#"
            fn anim_1_1000(animator, duration) {
                loop {
                    let row = blank_row();
                    row[animator.width] = "*";
                    animator.write_frame(row, row);
                }
            }
        "#;
        let params = InvokeParams::new(1.0).with_frame_budget(600);
        let (result, frames) = run(source, &params);

        let err = result.unwrap_err();
        assert_eq!(err.kind(), Some(FaultKind::IndexError));
        assert_eq!(err.frame(), 0);
        assert_eq!(frames, 0);
    }

    #[test]
    fn test_fault_inside_helper_is_unwrapped() {
        let source = r#"
            fn step(x) { x / 0 }
            fn anim_1_1000(animator, duration) {
                animator.write_frame("a", "b");
                step(1);
            }
        "#;
        let (result, _) = run(source, &InvokeParams::new(1.0));
        let err = result.unwrap_err();
        assert_eq!(err.kind(), Some(FaultKind::ArithmeticError));
        assert_eq!(err.frame(), 1);
    }

    #[test]
    fn test_unknown_function_is_name_error() {
        let source = r#"fn anim_1_1000(animator, duration) { sparkle(animator); }"#;
        let (result, _) = run(source, &InvokeParams::new(1.0));
        assert_eq!(result.unwrap_err().kind(), Some(FaultKind::NameError));
    }

    #[test]
    fn test_wrong_row_type_is_type_error() {
        let source = r#"fn anim_1_1000(animator, duration) { animator.write_frame(42, "x"); }"#;
        let (result, _) = run(source, &InvokeParams::new(1.0));
        assert_eq!(result.unwrap_err().kind(), Some(FaultKind::TypeError));
    }

    #[test]
    fn test_spin_without_frames_times_out() {
        let source = r#"fn anim_1_1000(animator, duration) { let x = 0; loop { x += 1; } }"#;
        let params = InvokeParams::new(1.0)
            .with_frame_budget(600)
            .with_time_ceiling(Duration::from_millis(200));
        let (result, frames) = run(source, &params);

        assert!(matches!(result, Err(SandboxError::Timeout { frames: 0, .. })));
        assert_eq!(frames, 0);
    }

    #[test]
    fn test_operation_cap_is_resource_limit() {
        let source = r#"fn anim_1_1000(animator, duration) { let x = 0; loop { x += 1; } }"#;
        let params = InvokeParams::new(1.0).with_max_operations(10_000);
        let (result, _) = run(source, &params);
        assert_eq!(result.unwrap_err().kind(), Some(FaultKind::ResourceLimitError));
    }

    #[test]
    fn test_cancellation_stops_run() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let params = InvokeParams::new(1.0).with_cancel(shutdown);
        let (result, frames) = run(MARQUEE, &params);

        assert_eq!(result.unwrap(), RunOutcome::Cancelled { frames: 0 });
        assert_eq!(frames, 0);
    }

    #[test]
    fn test_returning_early_completes() {
        let source = r#"
            fn anim_1_1000(animator, duration) {
                print("ignored");
                animator.write_frame("hello", 'x');
                animator.write_frame((), "world");
            }
        "#;
        let program = RhaiSandbox::new().load(source, "anim_1_1000").unwrap();
        let (display, shared) = headless();
        let outcome = program.invoke(shared, &InvokeParams::new(1.0)).unwrap();

        assert_eq!(outcome, RunOutcome::Completed { frames: 2 });
        let display = display.lock();
        assert_eq!(display.frames()[0].1.trim(), "x");
        assert_eq!(display.frames()[1].0.trim(), "");
    }

    #[test]
    fn test_frame_sleep_reaches_display() {
        let source = r#"
            fn anim_1_1000(animator, duration) {
                animator.frame_sleep(30);
                animator.frame_sleep(0.01);
                animator.write_frame("a", "b");
            }
        "#;
        let program = RhaiSandbox::new().load(source, "anim_1_1000").unwrap();
        let (display, shared) = headless();
        program.invoke(shared, &InvokeParams::new(1.0)).unwrap();
        assert_eq!(display.lock().sleep_calls(), 2);
    }

    #[test]
    fn test_rand_int_is_inclusive_and_ordered() {
        let source = r#"
            fn anim_1_1000(animator, duration) {
                for i in 0..200 {
                    let v = rand_int(3, 1);
                    if v < 1 || v > 3 { throw "out of range"; }
                }
                animator.write_frame("ok", "ok");
            }
        "#;
        let (result, _) = run(source, &InvokeParams::new(1.0));
        assert_eq!(result.unwrap(), RunOutcome::Completed { frames: 1 });
    }
}
