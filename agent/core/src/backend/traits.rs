//! Completion client seam
//!
//! The generation pipeline depends only on [`CodeGenerationClient`].
//!
//! The client returns raw text. Nothing here parses or cleans the output;
//! that belongs to the validation stage.

use async_trait::async_trait;

/// Default cap on generated tokens per completion
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Default context window requested from the model
pub const DEFAULT_CONTEXT_WINDOW: u32 = 8192;

/// One prompt sent to the model
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    /// Full prompt text (template, idea and any retry context)
    pub prompt: String,
    /// Backend model tag
    pub model: String,
    /// Sampling temperature, lowered on each retry
    pub temperature: f32,
    /// Cap on generated tokens; 0 leaves the backend default
    pub max_tokens: u32,
    /// Requested context size; 0 leaves the backend default
    pub context_window: u32,
    /// Sequences that end generation early
    pub stop: Vec<String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: String::new(),
            temperature: 0.8,
            max_tokens: DEFAULT_MAX_TOKENS,
            context_window: DEFAULT_CONTEXT_WINDOW,
            stop: Vec::new(),
        }
    }
}

impl CompletionRequest {
    /// Request with default limits
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Clamped to 0.0..=2.0
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_context_window(mut self, context_window: u32) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// What the model sent back
#[derive(Clone, Debug)]
pub struct CompletionResponse {
    /// Unprocessed text, possibly wrapped in prose or fences
    pub content: String,
    pub model: String,
    /// `eval_count` when the backend reports it
    pub tokens_used: Option<u32>,
    /// Wall time of the call
    pub duration_ms: Option<u64>,
}

/// One entry of the backend's model list
#[derive(Clone, Debug)]
pub struct ModelInfo {
    /// Tag such as `qwen2.5-coder:3b`
    pub name: String,
    /// Bytes on disk
    pub size: Option<u64>,
    /// Parameter count as reported, e.g. `3.1B`
    pub parameters: Option<String>,
}

/// Text-completion client used by the retry controller
#[async_trait]
pub trait CodeGenerationClient: Send + Sync {
    /// Human-readable backend name for logs
    fn name(&self) -> &str;

    /// Whether the server answers at all
    async fn health_check(&self) -> bool;

    /// One non-streaming completion
    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse>;

    /// Models the server can run
    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>>;

    /// Whether `model` appears in [`Self::list_models`]
    async fn has_model(&self, model: &str) -> anyhow::Result<bool> {
        Ok(self
            .list_models()
            .await?
            .into_iter()
            .any(|info| info.name == model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_builder() {
        let request = CompletionRequest::new("Create: rain", "qwen2.5-coder:3b")
            .with_temperature(0.75)
            .with_max_tokens(100)
            .with_context_window(4096)
            .with_stop("```\n\n");

        assert_eq!(request.prompt, "Create: rain");
        assert_eq!(request.model, "qwen2.5-coder:3b");
        assert!((request.temperature - 0.75).abs() < f32::EPSILON);
        assert_eq!(request.max_tokens, 100);
        assert_eq!(request.context_window, 4096);
        assert_eq!(request.stop, vec!["```\n\n".to_string()]);
    }

    #[test]
    fn test_defaults_match_generation_limits() {
        let request = CompletionRequest::default();
        assert_eq!(request.max_tokens, 2048);
        assert_eq!(request.context_window, 8192);
        assert!(request.stop.is_empty());
    }

    #[test]
    fn test_temperature_is_clamped() {
        let request = CompletionRequest::new("p", "m").with_temperature(9.0);
        assert!((request.temperature - 2.0).abs() < f32::EPSILON);
    }
}
