//! VFD Agent Core - Generated Animation Pipeline
//!
//! Continuously asks a language model for small animation scripts for a
//! 2x20 character display, validates each candidate in stages, and plays the
//! survivors. Everything here is headless; the `vfd-agent` daemon wires it to
//! a CLI, logging and signals.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────── producer ────────────────────────┐
//!  │ IdeaGenerator ─► RetryController ─► ValidationPipeline   │
//!  │                    │    ▲             static ► syntax ►  │
//!  │                    │    └─ last error  runtime (sandbox) │
//!  │                    ▼                                     │
//!  │  StateStore ◄── Generator ──► Telemetry                  │
//!  └────────────────────┬─────────────────────────────────────┘
//!                       │ AnimationQueue (bounded)
//!  ┌────────────────────▼──────── consumer ───────────────────┐
//!  │ DisplayController ─► sandbox ─► DisplayDriver            │
//!  │        ▲                                                 │
//!  │        └── ProgressTracker (loading screen)              │
//!  └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`animation`]: Animation, identifiers and generation requests
//! - [`backend`]: Code generation client trait and the Ollama backend
//! - [`config`]: TOML/env/CLI configuration
//! - [`display`]: Display driver contract, headless and console drivers, capture
//! - [`sandbox`]: Execution engine seam for untrusted scripts (Rhai)
//! - [`validation`]: Static, syntax and runtime validation stages
//! - [`retry`]: Retry controller and prompt construction
//! - [`generator`]: Producer loop
//! - [`player`]: Display controller (consumer loop)
//! - [`queue`]: Bounded animation queue
//! - [`state`]: Durable counters and rolling log
//! - [`progress`]: Progress tracker for the console
//! - [`ideas`], [`metrics`], [`telemetry`]: idea phrases, code metrics, JSONL telemetry
//!
//! Untrusted code only ever runs inside [`sandbox`].

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

pub mod animation;
pub mod backend;
pub mod config;
pub mod display;
pub mod error;
pub mod generator;
pub mod ideas;
pub mod metrics;
pub mod player;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod sandbox;
pub mod shutdown;
pub mod state;
pub mod telemetry;
pub mod validation;

// Re-exports for convenience
pub use animation::{Animation, AnimationId, AnimationStatus, GenerationRequest};
pub use backend::{CodeGenerationClient, CompletionRequest, CompletionResponse, OllamaBackend};
pub use config::{load_config, load_config_from_path, AgentConfig, ConfigError, ConfigOverrides};
pub use display::{ConsoleDisplay, DisplayDriver, HeadlessDisplay, SharedDisplay};
pub use error::PipelineError;
pub use generator::{Generator, GeneratorSettings, Produced};
pub use ideas::IdeaGenerator;
pub use player::{DisplayController, PlayResult, PlaybackSettings};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use queue::{AnimationQueue, QueueClosed};
pub use retry::{GenerationExhausted, RetryController, RetryOutcome, RetryPolicy};
pub use sandbox::{RhaiSandbox, Sandbox};
pub use shutdown::Shutdown;
pub use state::{StateError, StateSnapshot, StateStore};
pub use telemetry::Telemetry;
pub use validation::{ValidationError, ValidationPipeline, Verdict};
