//! Pipeline-level errors
//!
//! Per-attempt failures never reach this type: they are retried and, when
//! exhausted, recorded. What remains is either fatal to the producer or
//! fatal to startup.

use thiserror::Error;

use crate::config::ConfigError;
use crate::display::{CaptureError, DisplayError};
use crate::ideas::IdeaError;
use crate::queue::QueueClosed;
use crate::state::StateError;

/// Errors that stop a worker or prevent startup
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Durable state could not be written; the producer stops
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StateError),

    /// The consumer side of the queue went away
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),

    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The display could not be opened or written
    #[error(transparent)]
    Display(#[from] DisplayError),

    /// A capture file could not be read
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// The idea vocabulary could not be loaded
    #[error(transparent)]
    Ideas(#[from] IdeaError),

    /// Prompt template or other input file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Input {
        /// File attempted
        path: std::path::PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// A blocking worker panicked or was aborted
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Whether the producer must stop rather than continue with the next request
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::QueueClosed(_) | Self::Join(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_persistence_is_fatal() {
        let err = PipelineError::from(StateError::Write {
            path: PathBuf::from("/x/agent_state.json"),
            source: std::io::Error::other("disk full"),
        });
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("Persistence failure: "));
    }

    #[test]
    fn test_display_error_not_fatal_to_producer() {
        let err = PipelineError::from(DisplayError::UnsupportedDevice("/dev/ttyUSB0".into()));
        assert!(!err.is_fatal());
    }
}
