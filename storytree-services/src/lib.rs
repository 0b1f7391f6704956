//! HTTP adapters for the storytree service contracts.
//!
//! This crate provides:
//! - `ClaudeTextGenerator` over the Anthropic Messages API
//! - `HttpImageGenerator` over a prediction-style job API
//! - `HttpSpeechSynthesizer` over an OpenAI-compatible speech endpoint
//! - `LocalObjectStorage` and `HttpObjectStorage`
//!
//! Every adapter has a `from_env()` constructor; [`ServiceSet::from_env`]
//! builds the whole set the engine needs.

mod anthropic;
mod image;
mod speech;
mod storage;

pub use anthropic::ClaudeTextGenerator;
pub use image::HttpImageGenerator;
pub use speech::HttpSpeechSynthesizer;
pub use storage::{HttpObjectStorage, LocalObjectStorage};

use std::sync::Arc;
use std::time::Duration;
use storytree_core::services::{
    ImageGenerator, ObjectStorage, ServiceError, SpeechSynthesizer, TextGenerator,
};

/// Shared HTTP client settings.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// The services configured in the environment.
pub struct ServiceSet {
    pub text: Arc<dyn TextGenerator>,
    pub storage: Arc<dyn ObjectStorage>,
    /// Absent when IMAGE_API_URL or IMAGE_API_KEY is unset.
    pub image: Option<Arc<dyn ImageGenerator>>,
    /// Absent when SPEECH_API_KEY is unset.
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
}

impl ServiceSet {
    /// Build services from environment variables.
    ///
    /// Text generation is required. Image and speech are optional.
    /// Storage uses STORAGE_UPLOAD_URL when set, the local filesystem
    /// otherwise.
    pub fn from_env() -> Result<Self, ServiceError> {
        let text: Arc<dyn TextGenerator> = Arc::new(ClaudeTextGenerator::from_env()?);

        let storage: Arc<dyn ObjectStorage> = match HttpObjectStorage::from_env() {
            Ok(http) => Arc::new(http),
            Err(_) => Arc::new(LocalObjectStorage::from_env()),
        };

        let image: Option<Arc<dyn ImageGenerator>> = match HttpImageGenerator::from_env() {
            Ok(generator) => Some(Arc::new(generator)),
            Err(e) => {
                tracing::info!(reason = %e, "illustrations disabled");
                None
            }
        };

        let speech: Option<Arc<dyn SpeechSynthesizer>> = match HttpSpeechSynthesizer::from_env() {
            Ok(synthesizer) => Some(Arc::new(synthesizer)),
            Err(e) => {
                tracing::info!(reason = %e, "narration disabled");
                None
            }
        };

        Ok(Self {
            text,
            storage,
            image,
            speech,
        })
    }
}
