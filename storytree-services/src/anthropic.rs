//! Text generation through the Anthropic Messages API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storytree_core::services::{ServiceError, TextGenerator, TextRequest};

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Claude-backed text generator.
#[derive(Clone)]
pub struct ClaudeTextGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl ClaudeTextGenerator {
    /// Create a generator with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: crate::http_client(Duration::from_secs(120)),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Create a generator from the ANTHROPIC_API_KEY environment variable.
    ///
    /// ANTHROPIC_MODEL overrides the default model.
    pub fn from_env() -> Result<Self, ServiceError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ServiceError::NotConfigured("ANTHROPIC_API_KEY".to_string()))?;
        let mut generator = Self::new(api_key);
        if let Ok(model) = std::env::var("ANTHROPIC_MODEL") {
            generator = generator.with_model(model);
        }
        Ok(generator)
    }

    /// Set the model for this generator.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the generator at another API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, ServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| ServiceError::NotConfigured(format!("Invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn build_api_request(&self, request: &TextRequest) -> ApiRequest {
        ApiRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            system: (!request.system.is_empty()).then(|| request.system.clone()),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: request.user.clone(),
            }],
            temperature: Some(request.temperature),
        }
    }
}

#[async_trait]
impl TextGenerator for ClaudeTextGenerator {
    async fn generate(&self, request: TextRequest) -> Result<String, ServiceError> {
        let api_request = self.build_api_request(&request);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        tracing::debug!(
            model = %api_response.model,
            input_tokens = api_response.usage.input_tokens,
            output_tokens = api_response.usage.output_tokens,
            stop_reason = %api_response.stop_reason.as_deref().unwrap_or("none"),
            "text generated"
        );
        if api_response.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(max_tokens = request.max_tokens, "response truncated at token limit");
        }

        let text = api_response.text();
        if text.trim().is_empty() {
            return Err(ServiceError::Parse("response has no text".to_string()));
        }
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ApiContent>,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

impl ApiResponse {
    /// Concatenated text blocks.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ApiContent::Text { text } => Some(text.as_str()),
                ApiContent::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use storytree_core::services::RequestKind;

    fn request() -> TextRequest {
        TextRequest {
            kind: RequestKind::Bible,
            system: "You are a writer.".to_string(),
            user: "Premise: a fox".to_string(),
            temperature: 0.9,
            max_tokens: 4096,
        }
    }

    #[test]
    fn test_client_creation() {
        let client = ClaudeTextGenerator::new("test-key");
        assert_eq!(client.model, DEFAULT_MODEL);

        let client = client.with_model("claude-3-opus");
        assert_eq!(client.model, "claude-3-opus");
    }

    #[test]
    fn test_api_request_shape() {
        let client = ClaudeTextGenerator::new("test-key");
        let body = serde_json::to_value(client.build_api_request(&request())).unwrap();

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["system"], "You are a writer.");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Premise: a fox");
    }

    #[test]
    fn test_response_text_skips_other_blocks() {
        let raw = r#"{
            "id": "msg_1",
            "model": "claude",
            "content": [
                {"type": "text", "text": "{\"title\":"},
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": " \"A\"}"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let response: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.text(), "{\"title\": \"A\"}");
    }

    #[test]
    fn test_invalid_api_key_header() {
        let client = ClaudeTextGenerator::new("bad\nkey");
        assert!(matches!(
            client.build_headers(),
            Err(ServiceError::NotConfigured(_))
        ));
    }
}
