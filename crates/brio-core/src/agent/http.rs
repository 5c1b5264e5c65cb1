//! HTTP completion backend — calls an Anthropic-compatible Messages API.
//!
//! POST {base_url}/v1/messages
//! Headers:
//!   x-api-key: {api_key}
//!   anthropic-version: 2023-06-01
//!   content-type: application/json

use async_trait::async_trait;

use super::client::{CompletionError, CompletionRequest, CompletionResponse, CompletionService};

#[derive(Debug, Clone)]
pub struct HttpCompletionConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: std::time::Duration,
}

impl Default for HttpCompletionConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("COMPLETION_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
            api_key: std::env::var("COMPLETION_API_KEY").unwrap_or_default(),
            model: std::env::var("COMPLETION_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            timeout: std::time::Duration::from_secs(120),
        }
    }
}

pub struct HttpCompletionService {
    client: reqwest::Client,
    config: HttpCompletionConfig,
}

impl HttpCompletionService {
    pub fn new(config: HttpCompletionConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            config,
        }
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "messages": [
                {
                    "role": "user",
                    "content": request.user_prompt
                }
            ]
        });

        if !request.system_prompt.is_empty() {
            body["system"] = serde_json::Value::String(request.system_prompt.clone());
        }

        tracing::info!(
            "[CompletionService] Calling {} (model: {})",
            url,
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout
                } else {
                    CompletionError::Provider(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| CompletionError::Provider(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(CompletionError::Provider(format!(
                "API returned {}: {}",
                status, response_text
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| CompletionError::Provider(format!("Failed to parse response JSON: {}", e)))?;

        // Extract content from the Anthropic response format
        let content = json
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|arr| {
                arr.iter()
                    .filter_map(|block| {
                        if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                            block.get("text").and_then(|t| t.as_str()).map(|s| s.to_string())
                        } else {
                            None
                        }
                    })
                    .reduce(|a, b| format!("{}\n{}", a, b))
            })
            .unwrap_or_default();

        let input_tokens = json
            .pointer("/usage/input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = json
            .pointer("/usage/output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let model = json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.config.model)
            .to_string();

        Ok(CompletionResponse {
            content,
            model,
            input_tokens,
            output_tokens,
        })
    }
}
