//! Ollama text generation backend
//!
//! Talks to a local or remote Ollama server over its non-streaming
//! `/api/generate` endpoint, and maps transport failures onto the pipeline's
//! error taxonomy.

use crate::backend::{GenerationRequest, TextGenerationBackend};
use crate::config::LlmConfig;
use crate::error::PipelineError;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub enabled: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            timeout_seconds: 60,
            enabled: false,
        }
    }
}

impl From<&LlmConfig> for OllamaConfig {
    fn from(llm: &LlmConfig) -> Self {
        Self {
            endpoint: llm.endpoint.clone(),
            model: llm.model.clone(),
            timeout_seconds: llm.timeout_seconds,
            enabled: llm.enabled,
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Clone)]
pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    pub async fn health_check(&self) -> Result<bool> {
        if !self.config.enabled {
            return Ok(false);
        }

        debug!("Performing Ollama health check");

        let response = self
            .client
            .get(format!("{}/api/tags", self.config.endpoint))
            .send()
            .await?;

        let is_healthy = response.status().is_success();

        if is_healthy {
            info!("Ollama health check passed");
        } else {
            warn!("Ollama health check failed: {}", response.status());
        }

        Ok(is_healthy)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> PipelineError {
        if e.is_timeout() {
            PipelineError::BackendTimeout {
                timeout: Duration::from_secs(self.config.timeout_seconds),
            }
        } else if e.is_decode() {
            PipelineError::MalformedBackendResponse(format!("unreadable Ollama envelope: {}", e))
        } else {
            PipelineError::unavailable(format!("request to {} failed: {}", self.config.endpoint, e))
        }
    }
}

#[async_trait]
impl TextGenerationBackend for OllamaBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        if !self.config.enabled {
            return Err(PipelineError::unavailable("the LLM backend is disabled in configuration"));
        }

        let body = OllamaRequest {
            model: &self.config.model,
            system: &request.system_instruction,
            prompt: &request.user_instruction,
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_output_tokens,
            },
        };

        debug!(
            "Making request to Ollama: {}/api/generate ({} prompt chars)",
            self.config.endpoint,
            request.user_instruction.len()
        );

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Ollama request failed with status {}: {}", status, error_text);
            return Err(PipelineError::unavailable(format!(
                "Ollama returned {} - {}",
                status, error_text
            )));
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !ollama_response.done {
            warn!("Received incomplete response from Ollama");
        }

        debug!("Received response from Ollama: {} characters", ollama_response.response.len());
        Ok(ollama_response.response)
    }
}
