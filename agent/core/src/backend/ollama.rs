//! Ollama client
//!
//! Talks to a local Ollama server over two endpoints: `/api/generate` with
//! `stream: false` for animation code, and `/api/tags` for the startup model
//! check.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::traits::{CodeGenerationClient, CompletionRequest, CompletionResponse, ModelInfo};

/// Default Ollama API base
pub const DEFAULT_API_BASE: &str = "http://localhost:11434";

/// Per-request timeout for generation calls
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// [`CodeGenerationClient`] backed by a local Ollama server
#[derive(Clone)]
pub struct OllamaBackend {
    /// Server root without a trailing slash
    api_base: String,
    http: reqwest::Client,
}

impl OllamaBackend {
    /// Client for `api_base` with the default generation timeout
    pub fn new(api_base: impl Into<String>) -> Self {
        Self::with_timeout(api_base, GENERATION_TIMEOUT)
    }

    /// Client whose requests give up after `timeout`
    pub fn with_timeout(api_base: impl Into<String>, timeout: Duration) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { api_base, http }
    }

    /// Server root this client talks to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.api_base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{path}", self.api_base)
    }

    /// Build the JSON body for `/api/generate`
    fn request_body(request: &CompletionRequest) -> serde_json::Value {
        let mut options = serde_json::json!({
            "temperature": request.temperature,
        });

        if request.max_tokens != 0 {
            options["num_predict"] = serde_json::json!(request.max_tokens);
        }
        if request.context_window != 0 {
            options["num_ctx"] = serde_json::json!(request.context_window);
        }
        if !request.stop.is_empty() {
            options["stop"] = serde_json::json!(request.stop);
        }

        serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": options,
        })
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

/// Turn a non-2xx reply into an error carrying the body Ollama sent
async fn check_status(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    anyhow::bail!("Ollama answered {status}: {}", detail.trim())
}

#[async_trait]
impl CodeGenerationClient for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        let probe = self
            .http
            .get(self.endpoint("tags"))
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        probe.is_ok()
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let started = Instant::now();
        let response = self
            .http
            .post(self.endpoint("generate"))
            .json(&Self::request_body(request))
            .send()
            .await?;
        let reply: serde_json::Value = check_status(response).await?.json().await?;

        Ok(CompletionResponse {
            content: reply["response"].as_str().unwrap_or_default().to_owned(),
            model: request.model.clone(),
            tokens_used: reply["eval_count"].as_u64().map(|n| n as u32),
            duration_ms: Some(started.elapsed().as_millis() as u64),
        })
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let response = self
            .http
            .get(self.endpoint("tags"))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        let tags: serde_json::Value = check_status(response).await?.json().await?;
        Ok(parse_models(&tags))
    }
}

/// Model entries of a `/api/tags` reply; entries without a name are skipped
fn parse_models(tags: &serde_json::Value) -> Vec<ModelInfo> {
    let Some(entries) = tags["models"].as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            Some(ModelInfo {
                name: entry["name"].as_str()?.to_owned(),
                size: entry["size"].as_u64(),
                parameters: entry["details"]["parameter_size"].as_str().map(String::from),
            })
        })
        .collect()
}
