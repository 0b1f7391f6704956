//! Speech synthesis through an OpenAI-compatible `/audio/speech` endpoint.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use std::time::Duration;
use storytree_core::services::{ServiceError, SpeechRequest, SpeechSynthesizer};

const DEFAULT_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "tts-1";

/// Endpoint input limit, in characters.
const MAX_INPUT_CHARS: usize = 4096;

#[derive(Clone)]
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpSpeechSynthesizer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: crate::http_client(Duration::from_secs(60)),
            base_url: DEFAULT_BASE.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a synthesizer from SPEECH_API_KEY, with SPEECH_API_URL
    /// overriding the base URL.
    pub fn from_env() -> Result<Self, ServiceError> {
        let api_key = std::env::var("SPEECH_API_KEY")
            .map_err(|_| ServiceError::NotConfigured("SPEECH_API_KEY".to_string()))?;
        let mut synthesizer = Self::new(api_key);
        if let Ok(base_url) = std::env::var("SPEECH_API_URL") {
            synthesizer = synthesizer.with_base_url(base_url);
        }
        Ok(synthesizer)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn build_body(&self, request: &SpeechRequest) -> SpeechBody {
        let input = if request.text.chars().count() > MAX_INPUT_CHARS {
            tracing::warn!(
                chars = request.text.chars().count(),
                "narration text exceeds endpoint limit, truncating"
            );
            request.text.chars().take(MAX_INPUT_CHARS).collect()
        } else {
            request.text.clone()
        };
        SpeechBody {
            model: self.model.clone(),
            input,
            voice: request.voice.clone(),
            speed: request.speed,
            response_format: "mp3",
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, request: SpeechRequest) -> Result<Vec<u8>, ServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| ServiceError::NotConfigured(format!("Invalid API key: {e}")))?,
        );

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .headers(headers)
            .json(&self.build_body(&request))
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

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        tracing::debug!(bytes = bytes.len(), voice = %request.voice, "speech synthesized");
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Serialize)]
struct SpeechBody {
    model: String,
    input: String,
    voice: String,
    speed: f32,
    response_format: &'static str,
}
