//! Completion backends
//!
//! The retry controller asks a [`CodeGenerationClient`] for raw text. Ollama
//! is the only production client; tests script their own.
//!
//! # Example
//!
//! ```ignore
//! use vfd_agent_core::backend::{
//!     CodeGenerationClient, CompletionRequest, OllamaBackend, DEFAULT_API_BASE,
//! };
//!
//! let backend = OllamaBackend::new(DEFAULT_API_BASE);
//! let request = CompletionRequest::new(prompt, "qwen2.5-coder:3b").with_temperature(0.8);
//! let response = backend.complete(&request).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::{OllamaBackend, DEFAULT_API_BASE, GENERATION_TIMEOUT};
pub use traits::{
    CodeGenerationClient, CompletionRequest, CompletionResponse, ModelInfo,
    DEFAULT_CONTEXT_WINDOW, DEFAULT_MAX_TOKENS,
};
