//! OpenAI-compatible text generator.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any
//! endpoint that follows the OpenAI chat completions API format.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::brain::TextGenerator;
use crate::config::LlmConfig;
use crate::error::LlmError;

/// Chat-completions client that returns the first choice's text.
pub struct OpenAiCompatibleGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl OpenAiCompatibleGenerator {
    /// Create a generator from configuration.
    ///
    /// Reads the API key from the environment variable named by
    /// `config.api_key_env`. Local endpoints work without a key.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let is_local = config
            .base_url
            .as_ref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local endpoint; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;
        Ok(Self::new_with_key(config, api_key))
    }

    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn request_body(&self, system: &str, user: &str) -> Value {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": user}));
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }

    fn parse_response(body: &Value) -> Result<String, LlmError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No text content in choice".to_string(),
            })
    }

    fn map_transport_error(err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout { timeout_secs: 0 }
        } else if err.is_connect() {
            LlmError::Connection {
                message: err.to_string(),
            }
        } else {
            LlmError::ApiRequest {
                message: format!("Request failed: {err}"),
            }
        }
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed ({})", status);
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                // "Rate limit reached ... try again in 7s"
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim_end_matches(['s', '.']).parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            502..=504 => LlmError::Connection {
                message: format!("Upstream unavailable ({status}): {body}"),
            },
            s if s >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({status}): {body}"),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {status}: {body}"),
            },
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.request_body(system, user))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;

        Self::parse_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
