//! Contracts for the external generative services.
//!
//! The engine consumes text, image, speech and storage services only
//! through these traits. HTTP implementations live in `storytree-services`;
//! scripted ones for tests live in [`crate::testing`].

use crate::ending::Directive;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by an external service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// What a text request is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestKind {
    Bible,
    Chapter {
        node_key: String,
        depth: u32,
        directive: Directive,
    },
}

/// A request to the text generation service.
#[derive(Debug, Clone)]
pub struct TextRequest {
    pub kind: RequestKind,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Text generation: instructions in, raw text out.
///
/// The output is expected to contain one JSON payload, possibly wrapped in
/// prose or code fences.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: TextRequest) -> Result<String, ServiceError>;
}

/// A request to the image generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub style_tag: String,
    /// e.g. "4:3".
    pub aspect_ratio: String,
}

/// Status of an asynchronous image job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageJob {
    Pending,
    Succeeded { url: String },
    Failed { reason: String },
}

/// Image generation: submit a job, then poll it.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Submit a job and return its id.
    async fn submit(&self, request: ImageRequest) -> Result<String, ServiceError>;

    async fn poll(&self, job_id: &str) -> Result<ImageJob, ServiceError>;
}

/// A request to the speech synthesis service.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
}

/// Speech synthesis: text in, audio bytes out.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: SpeechRequest) -> Result<Vec<u8>, ServiceError>;
}

/// Object storage: bytes in, public URL out.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ServiceError>;
}
