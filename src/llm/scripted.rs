//! In-process provider that replays queued replies.
//!
//! Used by tests, and by the server when `PRISM_OFFLINE` is set: the
//! offline variant reports the runtime as down, so every caller takes its
//! deterministic fallback path.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CompletionProvider, GenerateRequest, Health, LlmError};

type Responder = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    responder: Option<Responder>,
    health: Mutex<Health>,
    prompts: Mutex<Vec<String>>,
    health_checks: Mutex<usize>,
    delay: Option<Duration>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    /// A healthy provider with an empty script.
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            responder: None,
            health: Mutex::new(Health {
                running: true,
                model_available: true,
            }),
            prompts: Mutex::new(Vec::new()),
            health_checks: Mutex::new(0),
            delay: None,
        }
    }

    /// A provider that reports the runtime as down.
    pub fn offline() -> Self {
        let provider = Self::new();
        provider.set_health(Health::default());
        provider
    }

    /// Answer every prompt not covered by a queued reply.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_health(&self, health: Health) {
        *self.health.lock() = health;
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, err: LlmError) {
        self.replies.lock().push_back(Err(err));
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn health_checks(&self) -> usize {
        *self.health_checks.lock()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn health(&self) -> Health {
        *self.health_checks.lock() += 1;
        *self.health.lock()
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        self.prompts.lock().push(request.prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.replies.lock().pop_front();
        match queued {
            Some(reply) => reply,
            None => match &self.responder {
                Some(responder) => responder(&request.prompt),
                None => Err(LlmError::Unavailable("script exhausted".to_string())),
            },
        }
    }
}
