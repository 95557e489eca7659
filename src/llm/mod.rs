//! LLM gateway over a local model runtime.
//!
//! `LlmGateway` wraps a `CompletionProvider` (Ollama in production, a
//! scripted provider in tests) and adds the behavior every caller relies on:
//! a cached health check that fails fast when the runtime or model is
//! missing, bounded retry with exponential backoff for transient transport
//! failures, per-call timeouts, cooperative cancellation, and JSON repair.

pub mod json;
pub mod ollama;
pub mod scripted;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::LlmConfig;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Runtime not reachable or required model not installed. Never retried.
    #[error("{0}")]
    Unavailable(String),

    #[error("Request to model runtime failed: {0}")]
    Network(String),

    #[error("Model runtime returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Model call timed out after {0}s")]
    Timeout(u64),

    #[error("Model output is not valid JSON: {message}")]
    Malformed { message: String, raw: String },

    #[error("Cancelled")]
    Cancelled,
}

impl LlmError {
    /// Failures worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Network(_) => true,
            LlmError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Runtime reachability and model presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub running: bool,
    pub model_available: bool,
}

impl Health {
    pub fn is_ready(&self) -> bool {
        self.running && self.model_available
    }
}

/// One generation request as seen by a provider.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_tokens: Option<u32>,
    /// Ask the runtime to constrain output to JSON when it supports it.
    pub json_mode: bool,
}

/// A backend that turns a prompt into text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    async fn health(&self) -> Health;

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError>;
}

#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub expect_json: bool,
    pub timeout: Duration,
    pub cancel: Option<CancellationToken>,
}

impl CompletionOptions {
    pub fn text(timeout: Duration) -> Self {
        Self {
            max_tokens: None,
            expect_json: false,
            timeout,
            cancel: None,
        }
    }

    pub fn json(timeout: Duration) -> Self {
        Self {
            expect_json: true,
            ..Self::text(timeout)
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    Json(serde_json::Value),
}

pub struct LlmGateway {
    provider: Arc<dyn CompletionProvider>,
    health_ttl: Duration,
    max_retries: u32,
    backoff_base: Duration,
    health_cache: Mutex<Option<(Instant, Health)>>,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            health_ttl: Duration::from_secs(config.health_ttl_secs),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(500),
            health_cache: Mutex::new(None),
        }
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Health, served from cache while it is younger than the TTL.
    pub async fn health(&self) -> Health {
        let cached = *self.health_cache.lock();
        if let Some((checked_at, health)) = cached {
            if checked_at.elapsed() < self.health_ttl {
                log::debug!("LLM: health cache hit ({:?})", health);
                return health;
            }
        }
        self.refresh_health().await
    }

    /// Probe the runtime now and replace the cached value.
    pub async fn refresh_health(&self) -> Health {
        let health = self.provider.health().await;
        let previous = self.health_cache.lock().replace((Instant::now(), health));
        if previous.map(|(_, h)| h.is_ready()) != Some(health.is_ready()) {
            log::info!(
                "LLM: {} model '{}' running={} modelAvailable={}",
                self.provider.name(),
                self.provider.model(),
                health.running,
                health.model_available
            );
        }
        health
    }

    fn invalidate_health(&self) {
        *self.health_cache.lock() = None;
    }

    /// Complete a prompt. Fails fast with `Unavailable` when the runtime is
    /// down or the model is missing. With `expect_json`, malformed output
    /// gets exactly one repair round trip before `Malformed` is returned.
    pub async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let health = self.health().await;
        if !health.is_ready() {
            return Err(LlmError::Unavailable(self.describe_unavailable(health)));
        }

        let text = self.generate_with_retry(prompt, options).await?;
        if !options.expect_json {
            return Ok(Completion::Text(text));
        }

        match json::parse_json(&text) {
            Ok(value) => Ok(Completion::Json(value)),
            Err(first) => {
                log::warn!("LLM: malformed JSON ({}), attempting one repair", first);
                let repaired = self
                    .generate_with_retry(&json::repair_prompt(&text), options)
                    .await?;
                json::parse_json(&repaired).map(Completion::Json)
            }
        }
    }

    pub async fn complete_text(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        match self.complete(prompt, options).await? {
            Completion::Text(text) => Ok(text),
            Completion::Json(value) => Ok(value.to_string()),
        }
    }

    pub async fn complete_json(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<serde_json::Value, LlmError> {
        let options = CompletionOptions {
            expect_json: true,
            ..options.clone()
        };
        match self.complete(prompt, &options).await? {
            Completion::Json(value) => Ok(value),
            Completion::Text(text) => json::parse_json(&text),
        }
    }

    async fn generate_with_retry(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let request = GenerateRequest {
            prompt: prompt.to_string(),
            max_tokens: options.max_tokens,
            json_mode: options.expect_json,
        };

        let mut attempt: u32 = 0;
        loop {
            let call = tokio::time::timeout(options.timeout, self.provider.generate(&request));
            let outcome = match &options.cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(LlmError::Cancelled),
                    outcome = call => outcome,
                },
                None => call.await,
            };

            let err = match outcome {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) => e,
                Err(_) => LlmError::Timeout(options.timeout.as_secs()),
            };

            if matches!(err, LlmError::Unavailable(_)) {
                self.invalidate_health();
                return Err(err);
            }
            if !err.is_transient() || attempt >= self.max_retries {
                return Err(err);
            }

            let delay = backoff_delay(self.backoff_base, attempt);
            log::warn!(
                "LLM: attempt {} failed ({}), retrying in {:?}",
                attempt + 1,
                err,
                delay
            );
            attempt += 1;
            match &options.cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => return Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    fn describe_unavailable(&self, health: Health) -> String {
        if !health.running {
            format!("{} is not running", self.provider.name())
        } else {
            format!(
                "model '{}' is not installed in {}",
                self.provider.model(),
                self.provider.name()
            )
        }
    }
}

/// `base * 2^attempt`, capped.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedProvider;
    use super::*;

    fn gateway(provider: Arc<ScriptedProvider>) -> LlmGateway {
        LlmGateway::new(provider, &LlmConfig::default()).with_backoff_base(Duration::from_millis(1))
    }

    fn opts() -> CompletionOptions {
        CompletionOptions::text(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_fails_fast_when_model_missing() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.set_health(Health {
            running: true,
            model_available: false,
        });
        provider.push_reply("never used");
        let gw = gateway(provider.clone());

        let err = gw.complete("hi", &opts()).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(msg) if msg.contains("not installed")));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(LlmError::Network("reset".into()));
        provider.push_error(LlmError::Http {
            status: 503,
            body: "busy".into(),
        });
        provider.push_reply("ok");
        let gw = gateway(provider.clone());

        assert_eq!(gw.complete_text("hi", &opts()).await.unwrap(), "ok");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let provider = Arc::new(ScriptedProvider::new());
        for _ in 0..10 {
            provider.push_error(LlmError::Network("down".into()));
        }
        let gw = gateway(provider.clone());

        let err = gw.complete("hi", &opts()).await.unwrap_err();
        assert!(matches!(err, LlmError::Network(_)));
        assert_eq!(provider.call_count(), 1 + LlmConfig::default().max_retries as usize);
    }

    #[tokio::test]
    async fn test_unavailable_is_not_retried_and_clears_health_cache() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(LlmError::Unavailable("connection refused".into()));
        provider.push_reply("second");
        let gw = gateway(provider.clone());

        assert!(matches!(
            gw.complete("hi", &opts()).await,
            Err(LlmError::Unavailable(_))
        ));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(gw.complete_text("hi", &opts()).await.unwrap(), "second");
        assert_eq!(provider.health_checks(), 2);
    }

    #[tokio::test]
    async fn test_health_is_cached() {
        let provider = Arc::new(ScriptedProvider::new());
        let gw = gateway(provider.clone());
        gw.health().await;
        gw.health().await;
        assert_eq!(provider.health_checks(), 1);
        gw.refresh_health().await;
        assert_eq!(provider.health_checks(), 2);
    }

    #[tokio::test]
    async fn test_json_repair_gets_one_attempt() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_reply("Sure! here you go: {not json");
        provider.push_reply("```json\n{\"ok\": true}\n```");
        let gw = gateway(provider.clone());

        let value = gw.complete_json("give json", &opts()).await.unwrap();
        assert_eq!(value["ok"], true);

        provider.push_reply("nope");
        provider.push_reply("still nope");
        let err = gw.complete_json("give json", &opts()).await.unwrap_err();
        assert!(matches!(err, LlmError::Malformed { raw, .. } if raw == "still nope"));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_call() {
        let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_secs(5)));
        provider.push_reply("late");
        let gw = gateway(provider);
        let token = CancellationToken::new();
        token.cancel();

        let err = gw
            .complete("hi", &opts().with_cancel(token))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Cancelled));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_millis(200)));
        provider.push_reply("late");
        let gw = gateway(provider);
        let err = gw
            .complete("hi", &CompletionOptions::text(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 10), MAX_BACKOFF);
    }
}
