//! Agent configuration
//!
//! Centralized configuration for the agent, loaded from
//! `~/.config/vfd-agent/agent.toml` when present.
//!
//! # Precedence
//!
//! Later layers win over earlier ones, strongest first:
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. `OLLAMA_*` and `VFD_*` variables
//! 3. `agent.toml`
//! 4. Default values
//!
//! # Example
//!
//! ```toml
//! [llm]
//! api_base = "http://localhost:11434"
//! model = "qwen2.5-coder:3b"
//!
//! [generation]
//! duration_secs = 10.0
//! max_retries = 5
//! queue_size = 2
//! prompt_file = "prompt.txt"
//!
//! [validation]
//! frame_budget = 600
//! tick_rate = 600
//! time_ceiling_ms = 2000
//!
//! [playback]
//! device = "simulator"
//! frame_rate = 6
//!
//! [storage]
//! output_dir = "generated_animations"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{
    DEFAULT_API_BASE, DEFAULT_CONTEXT_WINDOW, DEFAULT_MAX_TOKENS, GENERATION_TIMEOUT,
};
use crate::display::SIMULATOR_DEVICE;
use crate::retry::RetryPolicy;
use crate::state::{DEFAULT_MAX_ERROR_CHARS, DEFAULT_MAX_LOG_ENTRIES};
use crate::validation::{RuntimeSettings, StaticValidator};

/// Model used when nothing else is configured
pub const DEFAULT_MODEL: &str = "qwen2.5-coder:3b";

/// Environment variables read by [`load_config`]
pub const ENV_VARS: &[&str] = &[
    "OLLAMA_API_BASE",
    "OLLAMA_MODEL",
    "VFD_DEVICE",
    "ANIMATION_DURATION",
    "VFD_FRAME_RATE",
    "VFD_QUEUE_SIZE",
    "VFD_MAX_RETRIES",
    "VFD_OUTPUT_DIR",
];

// =============================================================================
// Errors
// =============================================================================

/// Failure while reading or checking `agent.toml`
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read
    #[error("Failed to read config file at {}: {source}", path.display())]
    Read {
        /// File that was opened
        path: PathBuf,
        /// IO failure
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Malformed agent.toml: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Bad configuration value: {0}")]
    Invalid(String),
}

// =============================================================================
// Provenance
// =============================================================================

/// Strongest layer that set any value
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line flag
    Cli,
    /// Process environment
    Env,
    /// `agent.toml`
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// File layout
// =============================================================================

/// `[llm]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmToml {
    /// Ollama API base URL
    pub api_base: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Context window size
    pub context_window: Option<u32>,
}

/// `[generation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// Animation length in seconds
    pub duration_secs: Option<f64>,
    /// Generation attempts per animation
    pub max_retries: Option<u32>,
    /// Queue capacity
    pub queue_size: Option<usize>,
    /// Prompt template file
    pub prompt_file: Option<PathBuf>,
    /// Vocabulary file for idea generation
    pub vocabulary_file: Option<PathBuf>,
}

/// `[validation]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationToml {
    /// Frames a candidate must be able to draw
    pub frame_budget: Option<u64>,
    /// Simulated frames per second
    pub tick_rate: Option<u32>,
    /// Wall-clock ceiling in milliseconds
    pub time_ceiling_ms: Option<u64>,
    /// Engine operation cap
    pub max_operations: Option<u64>,
    /// Minimum source length
    pub min_length: Option<usize>,
    /// Minimum distinct literal characters
    pub min_distinct_chars: Option<usize>,
}

/// `[playback]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackToml {
    /// Display device name
    pub device: Option<String>,
    /// Frames per second
    pub frame_rate: Option<u32>,
    /// Echo frames to the console
    pub preview: Option<bool>,
}

/// `[storage]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageToml {
    /// Directory for state, sources, captures and telemetry
    pub output_dir: Option<PathBuf>,
    /// Entries kept in the rolling generation log
    pub max_log_entries: Option<usize>,
    /// Characters of error text stored per entry
    pub max_error_chars: Option<usize>,
    /// Write frame captures
    pub capture_frames: Option<bool>,
    /// Write telemetry JSONL files
    pub telemetry: Option<bool>,
}

/// Whole `agent.toml` document
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentToml {
    /// LLM backend section
    pub llm: LlmToml,
    /// Generation section
    pub generation: GenerationToml,
    /// Validation section
    pub validation: ValidationToml,
    /// Playback section
    pub playback: PlaybackToml,
    /// Storage section
    pub storage: StorageToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// LLM backend settings
#[derive(Clone, Debug, PartialEq)]
pub struct LlmConfig {
    /// Ollama API base URL
    pub api_base: String,
    /// Model name
    pub model: String,
    /// Request timeout
    pub timeout: Duration,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Context window size
    pub context_window: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: GENERATION_TIMEOUT,
            max_tokens: DEFAULT_MAX_TOKENS,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }
}

/// Generation settings
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationConfig {
    /// Animation length in seconds
    pub duration_secs: f64,
    /// Generation attempts per animation
    pub max_retries: u32,
    /// Queue capacity
    pub queue_size: usize,
    /// Prompt template file
    pub prompt_file: PathBuf,
    /// Vocabulary file; the built-in vocabulary is used when unset
    pub vocabulary_file: Option<PathBuf>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10.0,
            max_retries: 5,
            queue_size: 2,
            prompt_file: PathBuf::from("prompt.txt"),
            vocabulary_file: None,
        }
    }
}

/// Validation settings
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationConfig {
    /// Frames a candidate must be able to draw
    pub frame_budget: u64,
    /// Simulated frames per second
    pub tick_rate: u32,
    /// Wall-clock ceiling
    pub time_ceiling: Duration,
    /// Engine operation cap
    pub max_operations: u64,
    /// Minimum source length
    pub min_length: usize,
    /// Minimum distinct literal characters
    pub min_distinct_chars: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let runtime = RuntimeSettings::default();
        let checks = StaticValidator::default();
        Self {
            frame_budget: runtime.frame_budget,
            tick_rate: runtime.tick_rate,
            time_ceiling: runtime.time_ceiling,
            max_operations: runtime.max_operations,
            min_length: checks.min_length(),
            min_distinct_chars: checks.min_distinct_chars(),
        }
    }
}

/// Playback settings
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackConfig {
    /// Display device name
    pub device: String,
    /// Frames per second
    pub frame_rate: u32,
    /// Echo frames to the console
    pub preview: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: SIMULATOR_DEVICE.to_string(),
            frame_rate: 6,
            preview: false,
        }
    }
}

/// Storage settings
#[derive(Clone, Debug, PartialEq)]
pub struct StorageConfig {
    /// Directory for state, sources, captures and telemetry
    pub output_dir: PathBuf,
    /// Entries kept in the rolling generation log
    pub max_log_entries: usize,
    /// Characters of error text stored per entry
    pub max_error_chars: usize,
    /// Write frame captures
    pub capture_frames: bool,
    /// Write telemetry JSONL files
    pub telemetry: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("generated_animations"),
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            max_error_chars: DEFAULT_MAX_ERROR_CHARS,
            capture_frames: true,
            telemetry: true,
        }
    }
}

/// Centralized configuration for the agent
///
/// Use [`load_config`] to load with proper priority handling, then apply
/// [`ConfigOverrides`] for CLI arguments.
#[derive(Clone, Debug, Default)]
pub struct AgentConfig {
    /// LLM backend
    pub llm: LlmConfig,
    /// Generation
    pub generation: GenerationConfig,
    /// Validation
    pub validation: ValidationConfig,
    /// Playback
    pub playback: PlaybackConfig,
    /// Storage
    pub storage: StorageConfig,
    /// `agent.toml` that was read, if one existed
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl AgentConfig {
    /// Built-in defaults only
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Retry schedule for the configured attempt limit
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_retries(self.generation.max_retries)
    }

    /// Runtime validation settings
    #[must_use]
    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            frame_budget: self.validation.frame_budget,
            tick_rate: self.validation.tick_rate,
            time_ceiling: self.validation.time_ceiling,
            max_operations: self.validation.max_operations,
        }
    }

    /// Static validator with the configured thresholds
    #[must_use]
    pub fn static_validator(&self) -> StaticValidator {
        StaticValidator::with_thresholds(
            self.validation.min_length,
            self.validation.min_distinct_chars,
        )
    }

    /// Frames played for one animation
    #[must_use]
    pub fn playback_frame_budget(&self) -> u64 {
        (self.generation.duration_secs * f64::from(self.playback.frame_rate)).round() as u64
    }

    /// Reject values the pipeline cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        let duration = self.generation.duration_secs;
        if !(duration.is_finite() && duration > 0.0) {
            return invalid("generation.duration_secs must be positive");
        }
        if self.playback.frame_rate == 0 {
            return invalid("playback.frame_rate must be at least 1");
        }
        if self.generation.queue_size == 0 {
            return invalid("generation.queue_size must be at least 1");
        }
        if self.generation.max_retries == 0 {
            return invalid("generation.max_retries must be at least 1");
        }
        if self.validation.frame_budget == 0 {
            return invalid("validation.frame_budget must be at least 1");
        }
        if self.validation.tick_rate == 0 {
            return invalid("validation.tick_rate must be at least 1");
        }
        if self.validation.time_ceiling.is_zero() {
            return invalid("validation.time_ceiling_ms must be positive");
        }
        if self.llm.model.trim().is_empty() {
            return invalid("llm.model must not be empty");
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// `~/.config/vfd-agent/agent.toml`, if a config dir exists
///
/// Returns `$XDG_CONFIG_HOME/vfd-agent/agent.toml` or
/// `~/.config/vfd-agent/agent.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("vfd-agent").join("agent.toml"))
}

/// Load configuration from the default path, environment and defaults
///
/// # Errors
///
/// A missing file falls back to defaults; an unreadable or malformed one
/// is an error.
pub fn load_config() -> Result<AgentConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Same as [`load_config`] with an explicit file
///
/// # Errors
///
/// Fails when the file is present but unreadable or malformed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<AgentConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// # Errors
///
/// Fails when the file is present but unreadable or malformed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<AgentConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = AgentConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::Read {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: AgentToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Read agent.toml"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "No agent.toml, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Copy every value the file sets
fn apply_toml_config(config: &mut AgentConfig, toml: &AgentToml) {
    // LLM settings
    if let Some(ref api_base) = toml.llm.api_base {
        config.llm.api_base = api_base.clone();
    }
    if let Some(ref model) = toml.llm.model {
        config.llm.model = model.clone();
    }
    if let Some(secs) = toml.llm.timeout_secs {
        config.llm.timeout = Duration::from_secs(secs);
    }
    if let Some(tokens) = toml.llm.max_tokens {
        config.llm.max_tokens = tokens;
    }
    if let Some(window) = toml.llm.context_window {
        config.llm.context_window = window;
    }

    // Generation settings
    if let Some(duration) = toml.generation.duration_secs {
        config.generation.duration_secs = duration;
    }
    if let Some(retries) = toml.generation.max_retries {
        config.generation.max_retries = retries;
    }
    if let Some(size) = toml.generation.queue_size {
        config.generation.queue_size = size;
    }
    if let Some(ref file) = toml.generation.prompt_file {
        config.generation.prompt_file = file.clone();
    }
    if toml.generation.vocabulary_file.is_some() {
        config.generation.vocabulary_file = toml.generation.vocabulary_file.clone();
    }

    // Validation settings
    if let Some(budget) = toml.validation.frame_budget {
        config.validation.frame_budget = budget;
    }
    if let Some(rate) = toml.validation.tick_rate {
        config.validation.tick_rate = rate;
    }
    if let Some(ms) = toml.validation.time_ceiling_ms {
        config.validation.time_ceiling = Duration::from_millis(ms);
    }
    if let Some(ops) = toml.validation.max_operations {
        config.validation.max_operations = ops;
    }
    if let Some(length) = toml.validation.min_length {
        config.validation.min_length = length;
    }
    if let Some(chars) = toml.validation.min_distinct_chars {
        config.validation.min_distinct_chars = chars;
    }

    // Playback settings
    if let Some(ref device) = toml.playback.device {
        config.playback.device = device.clone();
    }
    if let Some(rate) = toml.playback.frame_rate {
        config.playback.frame_rate = rate;
    }
    if let Some(preview) = toml.playback.preview {
        config.playback.preview = preview;
    }

    // Storage settings
    if let Some(ref dir) = toml.storage.output_dir {
        config.storage.output_dir = dir.clone();
    }
    if let Some(entries) = toml.storage.max_log_entries {
        config.storage.max_log_entries = entries;
    }
    if let Some(chars) = toml.storage.max_error_chars {
        config.storage.max_error_chars = chars;
    }
    if let Some(enabled) = toml.storage.capture_frames {
        config.storage.capture_frames = enabled;
    }
    if let Some(enabled) = toml.storage.telemetry {
        config.storage.telemetry = enabled;
    }
}

/// Copy every value the environment sets
///
/// Unparseable numeric values are ignored with a warning.
fn apply_env_config<F>(config: &mut AgentConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
        let parsed = value.trim().parse().ok();
        if parsed.is_none() {
            tracing::warn!(key, value, "Ignoring unparseable environment value");
        }
        parsed
    }

    if let Some(api_base) = env("OLLAMA_API_BASE") {
        config.llm.api_base = api_base;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("OLLAMA_MODEL") {
        config.llm.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(device) = env("VFD_DEVICE") {
        config.playback.device = device;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env("ANIMATION_DURATION") {
        if let Some(secs) = parsed::<f64>("ANIMATION_DURATION", &value) {
            config.generation.duration_secs = secs;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = env("VFD_FRAME_RATE") {
        if let Some(fps) = parsed::<u32>("VFD_FRAME_RATE", &value) {
            config.playback.frame_rate = fps;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = env("VFD_QUEUE_SIZE") {
        if let Some(size) = parsed::<usize>("VFD_QUEUE_SIZE", &value) {
            config.generation.queue_size = size;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = env("VFD_MAX_RETRIES") {
        if let Some(retries) = parsed::<u32>("VFD_MAX_RETRIES", &value) {
            config.generation.max_retries = retries;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(dir) = env("VFD_OUTPUT_DIR") {
        config.storage.output_dir = PathBuf::from(dir);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line values layered over a loaded [`AgentConfig`]
///
/// Unset fields leave the config alone.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Animation duration override (seconds)
    pub duration_secs: Option<f64>,
    /// Frame rate override
    pub frame_rate: Option<u32>,
    /// Prompt file override
    pub prompt_file: Option<PathBuf>,
    /// Console preview override
    pub preview: Option<bool>,
    /// Display device override
    pub device: Option<String>,
    /// Model override
    pub model: Option<String>,
    /// Queue size override
    pub queue_size: Option<usize>,
}

impl ConfigOverrides {
    /// No overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set duration override
    #[must_use]
    pub fn with_duration_secs(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Set frame rate override
    #[must_use]
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// Set prompt file override
    #[must_use]
    pub fn with_prompt_file(mut self, path: PathBuf) -> Self {
        self.prompt_file = Some(path);
        self
    }

    /// Set preview override
    #[must_use]
    pub fn with_preview(mut self, preview: bool) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Set device override
    #[must_use]
    pub fn with_device(mut self, device: String) -> Self {
        self.device = Some(device);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Set queue size override
    #[must_use]
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = Some(size);
        self
    }

    fn is_empty(&self) -> bool {
        self.duration_secs.is_none()
            && self.frame_rate.is_none()
            && self.prompt_file.is_none()
            && self.preview.is_none()
            && self.device.is_none()
            && self.model.is_none()
            && self.queue_size.is_none()
    }

    /// Write every set field into `config`
    pub fn apply(&self, config: &mut AgentConfig) {
        if !self.is_empty() {
            config.source = ConfigSource::Cli;
        }

        if let Some(secs) = self.duration_secs {
            config.generation.duration_secs = secs;
        }
        if let Some(fps) = self.frame_rate {
            config.playback.frame_rate = fps;
        }
        if let Some(ref path) = self.prompt_file {
            config.generation.prompt_file = path.clone();
        }
        if let Some(preview) = self.preview {
            config.playback.preview = preview;
        }
        if let Some(ref device) = self.device {
            config.playback.device = device.clone();
        }
        if let Some(ref model) = self.model {
            config.llm.model = model.clone();
        }
        if let Some(size) = self.queue_size {
            config.generation.queue_size = size;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();

        assert_eq!(config.llm.model, "qwen2.5-coder:3b");
        assert_eq!(config.llm.api_base, "http://localhost:11434");
        assert_eq!(config.llm.timeout, Duration::from_secs(120));
        assert_eq!(config.generation.duration_secs, 10.0);
        assert_eq!(config.generation.max_retries, 5);
        assert_eq!(config.generation.queue_size, 2);
        assert_eq!(config.generation.prompt_file, PathBuf::from("prompt.txt"));
        assert_eq!(config.playback.frame_rate, 6);
        assert_eq!(config.playback.device, "simulator");
        assert_eq!(config.storage.output_dir, PathBuf::from("generated_animations"));
        assert_eq!(config.storage.max_log_entries, 100);
        assert_eq!(config.storage.max_error_chars, 200);
        assert_eq!(config.validation.frame_budget, 600);
        assert_eq!(config.validation.tick_rate, 600);
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("vfd-agent"));
            assert!(p.to_string_lossy().ends_with("agent.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = toml_file(
            r#"
[llm]
model = "codellama:7b"
timeout_secs = 30

[generation]
duration_secs = 4.5
max_retries = 3
queue_size = 4
vocabulary_file = "words.txt"

[validation]
frame_budget = 120
tick_rate = 60
time_ceiling_ms = 500

[playback]
frame_rate = 12
preview = true

[storage]
output_dir = "/tmp/anims"
telemetry = false
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.llm.model, "codellama:7b");
        assert_eq!(config.llm.timeout, Duration::from_secs(30));
        assert_eq!(config.generation.duration_secs, 4.5);
        assert_eq!(config.generation.max_retries, 3);
        assert_eq!(config.generation.queue_size, 4);
        assert_eq!(
            config.generation.vocabulary_file,
            Some(PathBuf::from("words.txt"))
        );
        assert_eq!(config.validation.frame_budget, 120);
        assert_eq!(config.validation.time_ceiling, Duration::from_millis(500));
        assert_eq!(config.runtime_settings().simulated_duration(), 2.0);
        assert_eq!(config.playback.frame_rate, 12);
        assert!(config.playback.preview);
        assert_eq!(config.storage.output_dir, PathBuf::from("/tmp/anims"));
        assert!(!config.storage.telemetry);
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_parse_empty_toml() {
        let file = toml_file("");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert_eq!(config.generation.queue_size, 2);
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/vfd-agent/agent.toml");
        let config = load_config_with_env(Some(path), no_env).unwrap();
        assert!(config.config_file_path.is_none());
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = toml_file("[generation\nqueue_size = ");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = toml_file("[playback]\nframe_rate = 12\n[generation]\nqueue_size = 4\n");
        let env = env_from(&[
            ("VFD_FRAME_RATE", "24"),
            ("OLLAMA_MODEL", "tinyllama"),
            ("VFD_OUTPUT_DIR", "/var/anims"),
            ("ANIMATION_DURATION", "2.5"),
        ]);

        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(config.playback.frame_rate, 24);
        assert_eq!(config.generation.queue_size, 4);
        assert_eq!(config.llm.model, "tinyllama");
        assert_eq!(config.storage.output_dir, PathBuf::from("/var/anims"));
        assert_eq!(config.generation.duration_secs, 2.5);
        assert_eq!(config.playback_frame_budget(), 60);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_unparseable_env_is_ignored() {
        let env = env_from(&[("VFD_QUEUE_SIZE", "lots")]);
        let config = load_config_with_env(None, env).unwrap();
        assert_eq!(config.generation.queue_size, 2);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_env() {
        let env = env_from(&[("OLLAMA_MODEL", "from-env"), ("VFD_QUEUE_SIZE", "3")]);
        let mut config = load_config_with_env(None, env).unwrap();

        ConfigOverrides::new()
            .with_model("from-cli".to_string())
            .with_preview(true)
            .apply(&mut config);

        assert_eq!(config.llm.model, "from-cli");
        assert_eq!(config.generation.queue_size, 3);
        assert!(config.playback.preview);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = AgentConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
        assert_eq!(config.playback.frame_rate, 6);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases: Vec<(&str, Box<dyn Fn(&mut AgentConfig)>)> = vec![
            ("frame_rate", Box::new(|c| c.playback.frame_rate = 0)),
            ("queue_size", Box::new(|c| c.generation.queue_size = 0)),
            ("max_retries", Box::new(|c| c.generation.max_retries = 0)),
            ("duration_secs", Box::new(|c| c.generation.duration_secs = 0.0)),
            ("duration_secs", Box::new(|c| c.generation.duration_secs = f64::NAN)),
            ("frame_budget", Box::new(|c| c.validation.frame_budget = 0)),
        ];

        for (field, mutate) in cases {
            let mut config = AgentConfig::default();
            mutate(&mut config);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
