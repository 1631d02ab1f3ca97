//! State Store
//!
//! Durable counters and a rolling log of terminal generation outcomes.
//!
//! # File Format
//!
//! `<output_dir>/agent_state.json`:
//!
//! ```json
//! {
//!   "generations": [
//!     {"timestamp": "...", "function": "anim_...", "description": "...",
//!      "status": "success", "error": ""}
//!   ],
//!   "success": 12,
//!   "failure": 3
//! }
//! ```
//!
//! Every mutation is written to a temp file in the same directory, synced,
//! and renamed over the target, so readers never observe a partial file. The
//! in-memory copy only changes after that write succeeds.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// State file name inside the output directory
pub const STATE_FILE_NAME: &str = "agent_state.json";

/// Entries kept in the rolling log
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 100;

/// Characters of error text kept per entry
pub const DEFAULT_MAX_ERROR_CHARS: usize = 200;

/// State persistence errors
#[derive(Debug, Error)]
pub enum StateError {
    /// Could not write the state file or an artifact
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        /// File being written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Could not read the state file
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        /// File being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// State could not be encoded or decoded
    #[error("Invalid state JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Terminal outcome of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// An animation was produced
    Success,
    /// Every attempt failed
    Failure,
}

/// One log entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Local ISO-8601 time of the outcome
    pub timestamp: String,
    /// Animation identifier
    pub function: String,
    /// Idea text
    pub description: String,
    /// Outcome
    pub status: RecordStatus,
    /// Final error text (empty on success)
    #[serde(default)]
    pub error: String,
}

/// Full persisted state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Rolling log, oldest first
    #[serde(default)]
    pub generations: Vec<GenerationRecord>,
    /// Cumulative successes
    #[serde(default)]
    pub success: u64,
    /// Cumulative failures
    #[serde(default)]
    pub failure: u64,
}

impl StateSnapshot {
    /// Total terminal outcomes recorded
    #[must_use]
    pub fn total(&self) -> u64 {
        self.success + self.failure
    }
}

/// Content of a failed-attempt diagnostic artifact
#[derive(Clone, Copy, Debug)]
pub struct Diagnostic<'a> {
    /// Animation identifier
    pub animation_id: &'a str,
    /// Idea text
    pub description: &'a str,
    /// 1-based attempt index
    pub attempt: u32,
    /// Failure text
    pub error: &'a str,
    /// Verbatim model output
    pub raw_output: &'a str,
}

/// Durable generation record
pub struct StateStore {
    path: PathBuf,
    output_dir: PathBuf,
    max_log_entries: usize,
    max_error_chars: usize,
    state: Mutex<StateSnapshot>,
}

impl StateStore {
    /// Open (or initialize) the store in an output directory
    ///
    /// An unreadable or corrupt state file is logged and replaced on the
    /// next write.
    pub fn open(output_dir: &Path) -> Result<Self, StateError> {
        fs::create_dir_all(output_dir).map_err(|source| StateError::Write {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let path = output_dir.join(STATE_FILE_NAME);
        let state = match Self::read_snapshot(&path) {
            Ok(state) => state,
            Err(StateError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                StateSnapshot::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Starting with empty state");
                StateSnapshot::default()
            }
        };

        tracing::debug!(
            path = %path.display(),
            success = state.success,
            failure = state.failure,
            "State loaded"
        );

        Ok(Self {
            path,
            output_dir: output_dir.to_path_buf(),
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            max_error_chars: DEFAULT_MAX_ERROR_CHARS,
            state: Mutex::new(state),
        })
    }

    /// Override the log length and error truncation
    #[must_use]
    pub fn with_limits(mut self, max_log_entries: usize, max_error_chars: usize) -> Self {
        self.max_log_entries = max_log_entries.max(1);
        self.max_error_chars = max_error_chars;
        self
    }

    /// Read a state file without opening a store (for inspection tools)
    pub fn read_snapshot(path: &Path) -> Result<StateSnapshot, StateError> {
        let text = fs::read_to_string(path).map_err(|source| StateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Path of the state file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a successful request and flush
    pub fn record_success(&self, animation_id: &str, description: &str) -> Result<(), StateError> {
        self.record(animation_id, description, RecordStatus::Success, "")
    }

    /// Record an exhausted request and flush
    pub fn record_failure(
        &self,
        animation_id: &str,
        description: &str,
        error: &str,
    ) -> Result<(), StateError> {
        self.record(animation_id, description, RecordStatus::Failure, error)
    }

    fn record(
        &self,
        animation_id: &str,
        description: &str,
        status: RecordStatus,
        error: &str,
    ) -> Result<(), StateError> {
        let mut state = self.state.lock();

        let mut next = state.clone();
        next.generations.push(GenerationRecord {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            function: animation_id.to_string(),
            description: description.to_string(),
            status,
            error: error.chars().take(self.max_error_chars).collect(),
        });
        match status {
            RecordStatus::Success => next.success += 1,
            RecordStatus::Failure => next.failure += 1,
        }
        let excess = next.generations.len().saturating_sub(self.max_log_entries);
        next.generations.drain(..excess);

        let json = serde_json::to_vec_pretty(&next)?;
        write_atomic(&self.path, &json).map_err(|source| StateError::Write {
            path: self.path.clone(),
            source,
        })?;

        *state = next;
        Ok(())
    }

    /// Write the raw output of a failed attempt to its own file
    pub fn write_diagnostic(&self, diagnostic: &Diagnostic<'_>) -> Result<PathBuf, StateError> {
        let path = self.output_dir.join(format!(
            "failed_{}_attempt{}.txt",
            diagnostic.animation_id, diagnostic.attempt
        ));
        let rule = "=".repeat(60);
        let body = format!(
            "Description: {}\n\n{rule}\nATTEMPT {}\n{rule}\n\n{}\n\n{rule}\nRESPONSE\n{rule}\n\n{}",
            diagnostic.description, diagnostic.attempt, diagnostic.error, diagnostic.raw_output
        );
        write_atomic(&path, body.as_bytes()).map_err(|source| StateError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.lock().clone()
    }

    /// Short console summary, e.g. `✓12 ✗3`
    #[must_use]
    pub fn stats(&self) -> String {
        let state = self.state.lock();
        format!("✓{} ✗{}", state.success, state.failure)
    }
}

/// Write a file via temp file + sync + rename in the same directory
pub(crate) fn write_atomic(target: &Path, data: &[u8]) -> io::Result<()> {
    let parent = target.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        target.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ));

    let result = (|| -> io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_open_empty_directory() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        assert_eq!(store.snapshot(), StateSnapshot::default());
        assert_eq!(store.stats(), "✓0 ✗0");
        assert!(!store.path().exists());
    }

    #[test]
    fn test_records_are_flushed_and_reloaded() {
        let dir = TempDir::new().unwrap();
        {
            let store = StateStore::open(dir.path()).unwrap();
            store.record_success("anim_1_1000", "rain").unwrap();
            store
                .record_failure("anim_2_2000", "snow", "Missing write_frame")
                .unwrap();
        }

        let on_disk = StateStore::read_snapshot(&dir.path().join(STATE_FILE_NAME)).unwrap();
        assert_eq!(on_disk.success, 1);
        assert_eq!(on_disk.failure, 1);
        assert_eq!(on_disk.generations[1].status, RecordStatus::Failure);
        assert_eq!(on_disk.generations[1].error, "Missing write_frame");

        let reopened = StateStore::open(dir.path()).unwrap();
        assert_eq!(reopened.snapshot(), on_disk);
        assert_eq!(reopened.stats(), "✓1 ✗1");
    }

    #[test]
    fn test_json_shape() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.record_success("anim_1_1000", "rain").unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(value["success"], 1);
        assert_eq!(value["failure"], 0);
        let entry = &value["generations"][0];
        assert_eq!(entry["function"], "anim_1_1000");
        assert_eq!(entry["description"], "rain");
        assert_eq!(entry["status"], "success");
        assert_eq!(entry["error"], "");
        assert!(entry["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_log_rolls_but_counters_do_not() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap().with_limits(3, 10);
        for i in 0..5 {
            store
                .record_failure(&format!("anim_{i}"), "idea", "a very long error message")
                .unwrap();
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.failure, 5);
        assert_eq!(snapshot.generations.len(), 3);
        assert_eq!(snapshot.generations[0].function, "anim_2");
        assert_eq!(snapshot.generations[0].error, "a very lon");
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(STATE_FILE_NAME), "{not json").unwrap();

        let store = StateStore::open(dir.path()).unwrap();
        assert_eq!(store.snapshot().total(), 0);

        store.record_success("anim_1", "x").unwrap();
        assert_eq!(StateStore::read_snapshot(store.path()).unwrap().success, 1);
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.record_success("anim_1", "x").unwrap();

        // Replace the state file with a non-empty directory so rename fails
        fs::remove_file(store.path()).unwrap();
        fs::create_dir(store.path()).unwrap();
        fs::write(store.path().join("blocker"), "x").unwrap();

        let err = store.record_success("anim_2", "y").unwrap_err();
        assert!(matches!(err, StateError::Write { .. }));
        assert_eq!(store.snapshot().success, 1);
        assert_eq!(store.snapshot().generations.len(), 1);
    }

    #[test]
    fn test_diagnostic_artifact_layout() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let path = store
            .write_diagnostic(&Diagnostic {
                animation_id: "anim_3_3000",
                description: "fireflies",
                attempt: 5,
                error: "Syntax: bad token",
                raw_output: "fn nope(",
            })
            .unwrap();

        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "failed_anim_3_3000_attempt5.txt"
        );
        let text = fs::read_to_string(path).unwrap();
        assert!(text.starts_with("Description: fireflies\n\n"));
        assert!(text.contains("ATTEMPT 5"));
        assert!(text.contains("Syntax: bad token"));
        assert!(text.ends_with("RESPONSE\n============================================================\n\nfn nope("));
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.json");
        write_atomic(&target, b"one").unwrap();
        write_atomic(&target, b"two").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "two");
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
