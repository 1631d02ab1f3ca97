//! Animation Types
//!
//! The validated artifact handed from the producer to the consumer, and the
//! immutable request that starts its generation.
//!
//! An [`Animation`] only exists once its source has passed every validation
//! stage. It is owned by the generator until enqueued; after that the queue
//! and then the display controller own it. Ownership moves, it is never
//! cloned into the queue twice.

use std::sync::Arc;

use chrono::{DateTime, Local};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Animation identifier, also the conventional entry-point name
///
/// Format: `anim_<unix seconds>_<4 random digits>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnimationId(pub String);

impl AnimationId {
    /// Create an ID from an existing string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh ID from the current time and a random suffix
    #[must_use]
    pub fn generate() -> Self {
        let secs = Local::now().timestamp();
        let suffix: u16 = rand::thread_rng().gen_range(1000..=9999);
        Self(format!("anim_{secs}_{suffix}"))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AnimationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an animation after validation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationStatus {
    /// Validated, not yet handed to the queue or the display
    Pending,
    /// Waiting in the animation queue
    Queued,
    /// Currently driving the display
    Playing,
    /// Finished playing
    Retired,
}

impl AnimationStatus {
    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Playing => "playing",
            Self::Retired => "retired",
        }
    }
}

impl std::fmt::Display for AnimationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A validated, playable animation
#[derive(Clone, Debug)]
pub struct Animation {
    /// Unique identifier
    pub id: AnimationId,
    /// Script source that passed all validation stages
    pub source: String,
    /// Name of the script function to invoke
    pub entry_point: String,
    /// Human description (the idea it was generated from)
    pub description: String,
    /// When validation completed
    pub created_at: DateTime<Local>,
    status: AnimationStatus,
}

impl Animation {
    /// Create a pending animation
    pub fn new(
        id: AnimationId,
        source: impl Into<String>,
        entry_point: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id,
            source: source.into(),
            entry_point: entry_point.into(),
            description: description.into(),
            created_at: Local::now(),
            status: AnimationStatus::Pending,
        }
    }

    /// Current lifecycle status
    #[must_use]
    pub fn status(&self) -> AnimationStatus {
        self.status
    }

    /// Mark as waiting in the queue
    pub fn mark_queued(&mut self) {
        self.status = AnimationStatus::Queued;
    }

    /// Mark as driving the display
    pub fn mark_playing(&mut self) {
        self.status = AnimationStatus::Playing;
    }

    /// Mark as finished
    pub fn retire(&mut self) {
        self.status = AnimationStatus::Retired;
    }
}

/// Immutable input to one generation pass
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Identifier the resulting animation will carry
    pub id: AnimationId,
    /// What to animate
    pub idea: String,
    /// Playback duration in seconds
    pub duration_secs: f64,
    /// Playback frame rate
    pub frame_rate: u32,
    /// Prompt template the idea is appended to
    pub template: Arc<str>,
}

impl GenerationRequest {
    /// Create a request with a freshly generated identifier
    pub fn new(
        idea: impl Into<String>,
        duration_secs: f64,
        frame_rate: u32,
        template: Arc<str>,
    ) -> Self {
        Self {
            id: AnimationId::generate(),
            idea: idea.into(),
            duration_secs,
            frame_rate,
            template,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_format() {
        let id = AnimationId::generate();
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "anim");
        assert!(parts[1].parse::<i64>().is_ok());
        let suffix: u16 = parts[2].parse().unwrap();
        assert!((1000..=9999).contains(&suffix));
    }

    #[test]
    fn test_status_transitions() {
        let mut animation = Animation::new(AnimationId::new("anim_1_1000"), "src", "anim_1_1000", "rain");
        assert_eq!(animation.status(), AnimationStatus::Pending);

        animation.mark_queued();
        assert_eq!(animation.status(), AnimationStatus::Queued);

        animation.mark_playing();
        assert_eq!(animation.status(), AnimationStatus::Playing);

        animation.retire();
        assert_eq!(animation.status(), AnimationStatus::Retired);
        assert_eq!(animation.status().to_string(), "retired");
    }

    #[test]
    fn test_request_gets_unique_ids() {
        let template: Arc<str> = Arc::from("template");
        let a = GenerationRequest::new("rain", 10.0, 6, template.clone());
        let b = GenerationRequest::new("rain", 10.0, 6, template);
        assert_eq!(a.idea, "rain");
        // Same second is possible; the random suffix still differs almost always,
        // so only assert the shared shape here.
        assert!(a.id.as_str().starts_with("anim_"));
        assert!(b.id.as_str().starts_with("anim_"));
    }
}
