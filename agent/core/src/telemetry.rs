//! Telemetry
//!
//! Append-only JSON Lines records under `<output_dir>/telemetry/`:
//!
//! - `events.jsonl` - one record per terminal generation outcome
//! - `training.jsonl` - prompt/response pairs of successful generations
//!
//! Telemetry is best-effort. Write failures are logged and otherwise ignored.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;
use serde::Serialize;

use crate::metrics::CodeMetrics;

/// Directory name under the output directory
pub const TELEMETRY_DIR: &str = "telemetry";

/// One generation outcome
#[derive(Clone, Debug, Serialize)]
pub struct GenerationEvent {
    /// Animation identifier
    pub generation_id: String,
    /// Idea text
    pub idea: String,
    /// Whether an animation was produced
    pub success: bool,
    /// Attempts used
    pub attempts: u32,
    /// Model that generated the code
    pub model: String,
    /// Frames drawn during validation (success only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<u64>,
    /// Final error text (failure only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds from request to outcome
    pub elapsed_secs: f64,
    /// Source metrics of the final candidate, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CodeMetrics>,
}

#[derive(Serialize)]
struct Stamped<'a, T: Serialize> {
    timestamp: f64,
    message: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Serialize)]
struct TrainingExample<'a> {
    prompt: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Value>,
}

/// JSONL telemetry sink
#[derive(Debug)]
pub struct Telemetry {
    dir: Option<PathBuf>,
    lock: Mutex<()>,
}

impl Telemetry {
    /// Sink writing under `<output_dir>/telemetry`
    #[must_use]
    pub fn new(output_dir: &Path) -> Self {
        Self {
            dir: Some(output_dir.join(TELEMETRY_DIR)),
            lock: Mutex::new(()),
        }
    }

    /// Sink that drops everything
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            dir: None,
            lock: Mutex::new(()),
        }
    }

    /// Directory records are written to, if enabled
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Record a generation outcome
    pub fn log_generation(&self, event: &GenerationEvent) {
        self.append("events.jsonl", "generation", event);
    }

    /// Record a successful prompt/response pair
    pub fn log_training_example(
        &self,
        prompt: &str,
        response: &str,
        metadata: Option<&serde_json::Value>,
    ) {
        let example = TrainingExample {
            prompt,
            response,
            metadata,
        };
        self.append("training.jsonl", "training_example", &example);
    }

    fn append<T: Serialize>(&self, file: &str, message: &str, body: &T) {
        let Some(dir) = &self.dir else {
            return;
        };
        let path = dir.join(file);
        let record = Stamped {
            timestamp: Local::now().timestamp_millis() as f64 / 1000.0,
            message,
            body,
        };

        let _guard = self.lock.lock();
        if let Err(e) = append_line(dir, &path, &record) {
            tracing::warn!(path = %path.display(), error = %e, "Telemetry write failed");
        }
    }
}

fn append_line<T: Serialize>(dir: &Path, path: &Path, record: &T) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)
}
