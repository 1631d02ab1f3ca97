//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use vfd_agent_core::backend::{CodeGenerationClient, CompletionRequest, CompletionResponse, ModelInfo};
use vfd_agent_core::validation::RuntimeSettings;
use vfd_agent_core::{
    Generator, GeneratorSettings, RetryController, RetryPolicy, RhaiSandbox, Sandbox, Shutdown,
    StateStore, ValidationPipeline,
};

/// A script that passes every validation stage
pub const BOUNCE: &str = r##"```rhai
fn bounce(animator, duration) {
    let pos = 0;
    let vel = 1;
    loop {
        let line1 = blank_row();
        let line2 = blank_row();
        line1[pos] = "*";
        line2[19 - pos] = "o";
        if pos % 2 == 0 { line2[0] = "#"; } else { line1[19] = "+"; }
        animator.write_frame(line1, line2);
        pos += vel;
        if pos == 0 || pos == animator.width - 1 { vel = -vel; }
        animator.frame_sleep(0.16);
    }
}
```"##;

/// Fails only the `write_frame` rule
pub fn missing_write_frame() -> String {
    BOUNCE.replace("animator.write_frame(line1, line2);", "animator.draw(line1, line2);")
}

/// Fails only the distinct-characters rule
pub fn too_few_chars() -> String {
    BOUNCE
        .replace("\"o\"", "\"*\"")
        .replace("\"#\"", "\"*\"")
        .replace("\"+\"", "\"*\"")
}

/// One scripted reply
#[derive(Clone, Debug)]
pub enum Reply {
    /// Return this text
    Text(String),
    /// Fail the call
    Error(String),
}

/// Client that replays a script of replies and records every prompt
///
/// When the script runs out, the last reply repeats.
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    prompts: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedClient {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn always(text: &str) -> Arc<Self> {
        Self::new([Reply::Text(text.to_string())])
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.prompts.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl CodeGenerationClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<CompletionResponse> {
        self.prompts.lock().push(request.clone());
        let reply = {
            let mut replies = self.replies.lock();
            let mut last = self.last.lock();
            match replies.pop_front() {
                Some(reply) => {
                    *last = Some(reply.clone());
                    reply
                }
                None => last
                    .clone()
                    .unwrap_or_else(|| Reply::Error("no scripted reply".into())),
            }
        };
        match reply {
            Reply::Text(content) => Ok(CompletionResponse {
                content,
                model: request.model.clone(),
                tokens_used: None,
                duration_ms: Some(1),
            }),
            Reply::Error(message) => Err(anyhow::anyhow!(message)),
        }
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            name: "test-model".into(),
            size: None,
            parameters: None,
        }])
    }
}

pub fn sandbox() -> Arc<dyn Sandbox> {
    Arc::new(RhaiSandbox::new())
}

pub fn controller(client: Arc<ScriptedClient>, shutdown: &Shutdown) -> RetryController {
    let pipeline = ValidationPipeline::new(sandbox(), RuntimeSettings::default());
    RetryController::new(
        client,
        pipeline,
        RetryPolicy::default(),
        "test-model",
        shutdown.clone(),
    )
}

pub fn generator(
    client: Arc<ScriptedClient>,
    output_dir: &Path,
    shutdown: &Shutdown,
) -> (Generator, Arc<StateStore>) {
    let state = Arc::new(StateStore::open(output_dir).unwrap());
    let settings = GeneratorSettings {
        duration_secs: 1.0,
        frame_rate: 6,
        template: Arc::from("TEMPLATE"),
        output_dir: output_dir.to_path_buf(),
        capture_frames: true,
        model: "test-model".into(),
    };
    let generator = Generator::new(
        controller(client, shutdown),
        Arc::clone(&state),
        settings,
        shutdown.clone(),
    );
    (generator, state)
}
