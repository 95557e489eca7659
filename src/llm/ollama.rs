//! Ollama HTTP provider.
//!
//! Health is read from `/api/tags`; generation goes through the non-streaming
//! `/api/generate` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CompletionProvider, GenerateRequest, Health, LlmError};
use crate::types::LlmConfig;

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct OllamaModelList {
    #[serde(default)]
    models: Vec<OllamaModelEntry>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelEntry {
    name: String,
}

pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        // Per-call deadlines are enforced by the gateway; this only bounds
        // connection setup so a dead host is reported quickly.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| LlmError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        if !response.status().is_success() {
            return Err(LlmError::Http {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let list: OllamaModelList = response
            .json()
            .await
            .map_err(|e| LlmError::Network(format!("Invalid model list: {}", e)))?;
        Ok(list.models.into_iter().map(|m| m.name).collect())
    }
}

/// `llama3.1` matches an installed `llama3.1:latest`; an explicit tag must
/// match exactly.
pub(crate) fn model_matches(wanted: &str, installed: &str) -> bool {
    if wanted == installed {
        return true;
    }
    !wanted.contains(':') && installed.split(':').next() == Some(wanted)
}

fn map_transport_error(err: &reqwest::Error) -> LlmError {
    if err.is_connect() {
        LlmError::Unavailable(format!("Cannot connect to Ollama: {}", err))
    } else if err.is_timeout() {
        LlmError::Timeout(0)
    } else {
        LlmError::Network(err.to_string())
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health(&self) -> Health {
        match self.list_models().await {
            Ok(models) => Health {
                running: true,
                model_available: models.iter().any(|m| model_matches(&self.model, m)),
            },
            Err(e) => {
                log::debug!("LLM: Ollama health probe failed: {}", e);
                Health::default()
            }
        }
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            format: request.json_mode.then_some("json"),
            options: OllamaOptions {
                temperature: 0.2,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Ollama answers 404 when the model has been removed.
            return Err(LlmError::Unavailable(format!(
                "model '{}' is not installed in ollama",
                self.model
            )));
        }
        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Network(format!("Invalid generate response: {}", e)))?;
        Ok(parsed.response)
    }
}
