//! OpenAI-compatible chat-completions client.
//!
//! Sends one user message per call and returns the first choice's content.
//! Errors are returned as `ModelError`; the worker pool renders them into the
//! result text.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::ModelConfig;
use crate::core::{ModelClient, ModelError};

/// Chat message as sent to and received from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker role (`user`, `assistant`, ...).
    pub role: String,
    /// Message text. May be absent on tool-call responses.
    #[serde(default)]
    pub content: Option<String>,
}

/// Chat-completions request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    /// Model name.
    pub model: String,
    /// Whether the provider stores the completion.
    pub store: bool,
    /// Conversation, here a single user message.
    pub messages: Vec<ChatMessage>,
}

impl ChatCompletionRequest {
    /// Request with a single user message.
    #[must_use]
    pub fn user(model: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            store: true,
            messages: vec![ChatMessage {
                role: "user".into(),
                content: Some(prompt.to_string()),
            }],
        }
    }
}

/// One completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    /// Generated message.
    pub message: ChatMessage,
}

/// Chat-completions response body (fields in use only).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    /// Provider response id.
    #[serde(default)]
    pub id: Option<String>,
    /// Generated choices.
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

/// Extract the first choice's text from a raw response body.
///
/// # Errors
///
/// - `ModelError::Decode` if the body is not a chat-completions response
/// - `ModelError::EmptyResponse` if there are no choices
pub fn parse_completion(body: &str) -> Result<String, ModelError> {
    let response: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Decode(e.to_string()))?;
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or(ModelError::EmptyResponse)
}

/// OpenAI chat-completions client
#[derive(Clone)]
pub struct OpenAiClient {
    /// HTTP client
    client: Client,
    /// Full chat-completions URL
    endpoint: String,
    /// Bearer credential
    api_key: String,
    /// Model name
    model: String,
}

impl OpenAiClient {
    /// Create a client from provider settings.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Client` if the HTTP client cannot be built.
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ModelError::Client(e.to_string()))?;
        let endpoint = format!(
            "{}/v1/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        info!(endpoint = %endpoint, model = %config.model, "Creating OpenAI client");

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// Chat-completions URL this client posts to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Model name sent with each request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    #[instrument(skip(self, prompt), fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let request = ChatCompletionRequest::user(&self.model, prompt);
        let started = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        debug!(status = %status, elapsed = ?started.elapsed(), "Model request finished");

        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = ChatCompletionRequest::user("gpt-4o-mini", "2+2?");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-4o-mini",
                "store": true,
                "messages": [{"role": "user", "content": "2+2?"}]
            })
        );
    }

    #[test]
    fn test_parse_first_choice() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"message": {"role": "assistant", "content": "4"}},
                {"message": {"role": "assistant", "content": "four"}}
            ]
        }"#;
        assert_eq!(parse_completion(body).unwrap(), "4");
    }

    #[test]
    fn test_parse_no_choices() {
        let err = parse_completion(r#"{"id": "x", "choices": []}"#).unwrap_err();
        assert!(matches!(err, ModelError::EmptyResponse));
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_completion("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ModelError::Decode(_)));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = ModelConfig {
            api_key: "sk-test".into(),
            base_url: "http://localhost:9999/".into(),
            ..ModelConfig::default()
        };
        let client = OpenAiClient::new(&config).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9999/v1/chat/completions");
        assert_eq!(client.model(), "gpt-4o-mini");
    }
}
