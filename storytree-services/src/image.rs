//! Image generation through a prediction-style job API.
//!
//! `POST {base}/predictions` creates a job and `GET {base}/predictions/{id}`
//! reports its status, the way hosted diffusion services expose models.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use storytree_core::services::{ImageGenerator, ImageJob, ImageRequest, ServiceError};

/// Image generator backed by an HTTP prediction API.
#[derive(Clone)]
pub struct HttpImageGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    version: Option<String>,
}

impl HttpImageGenerator {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: crate::http_client(Duration::from_secs(30)),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            version: None,
        }
    }

    /// Create a generator from IMAGE_API_URL and IMAGE_API_KEY.
    ///
    /// IMAGE_MODEL_VERSION, when set, is sent with every job.
    pub fn from_env() -> Result<Self, ServiceError> {
        let base_url = std::env::var("IMAGE_API_URL")
            .map_err(|_| ServiceError::NotConfigured("IMAGE_API_URL".to_string()))?;
        let api_key = std::env::var("IMAGE_API_KEY")
            .map_err(|_| ServiceError::NotConfigured("IMAGE_API_KEY".to_string()))?;
        let mut generator = Self::new(base_url, api_key);
        if let Ok(version) = std::env::var("IMAGE_MODEL_VERSION") {
            generator = generator.with_version(version);
        }
        Ok(generator)
    }

    /// Set the model version sent with each job.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, ServiceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| ServiceError::NotConfigured(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_job(&self, request: &ImageRequest) -> JobRequest {
        JobRequest {
            version: self.version.clone(),
            input: JobInput {
                prompt: request.prompt.clone(),
                negative_prompt: request.negative_prompt.clone(),
                style: Some(request.style_tag.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                aspect_ratio: request.aspect_ratio.clone(),
            },
        }
    }

    async fn read_prediction(response: reqwest::Response) -> Result<Prediction, ServiceError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status,
                message: body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn submit(&self, request: ImageRequest) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!("{}/predictions", self.base_url))
            .headers(self.build_headers()?)
            .json(&self.build_job(&request))
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let prediction = Self::read_prediction(response).await?;
        tracing::debug!(job_id = %prediction.id, status = %prediction.status, "image job submitted");
        Ok(prediction.id)
    }

    async fn poll(&self, job_id: &str) -> Result<ImageJob, ServiceError> {
        let response = self
            .client
            .get(format!("{}/predictions/{job_id}", self.base_url))
            .headers(self.build_headers()?)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        Self::read_prediction(response).await?.into_job()
    }
}

#[derive(Debug, Serialize)]
struct JobRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    input: JobInput,
}

#[derive(Debug, Serialize)]
struct JobInput {
    prompt: String,
    negative_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<String>,
    aspect_ratio: String,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<PredictionOutput>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictionOutput {
    Url(String),
    Urls(Vec<String>),
}

impl Prediction {
    fn into_job(self) -> Result<ImageJob, ServiceError> {
        match self.status.as_str() {
            "starting" | "processing" | "queued" => Ok(ImageJob::Pending),
            "succeeded" => {
                let url = match self.output {
                    Some(PredictionOutput::Url(url)) => Some(url),
                    Some(PredictionOutput::Urls(urls)) => urls.into_iter().next(),
                    None => None,
                };
                url.map(|url| ImageJob::Succeeded { url }).ok_or_else(|| {
                    ServiceError::Parse(format!("job {} succeeded without output", self.id))
                })
            }
            "failed" | "canceled" => Ok(ImageJob::Failed {
                reason: self.error.unwrap_or_else(|| self.status.clone()),
            }),
            other => Err(ServiceError::Parse(format!("unknown job status: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(raw: &str) -> Result<ImageJob, ServiceError> {
        serde_json::from_str::<Prediction>(raw).unwrap().into_job()
    }

    #[test]
    fn test_job_status_mapping() {
        assert_eq!(
            prediction(r#"{"id": "p1", "status": "processing"}"#).unwrap(),
            ImageJob::Pending
        );
        assert_eq!(
            prediction(r#"{"id": "p1", "status": "succeeded", "output": ["https://x/1.png", "https://x/2.png"]}"#)
                .unwrap(),
            ImageJob::Succeeded {
                url: "https://x/1.png".to_string()
            }
        );
        assert_eq!(
            prediction(r#"{"id": "p1", "status": "succeeded", "output": "https://x/1.png"}"#).unwrap(),
            ImageJob::Succeeded {
                url: "https://x/1.png".to_string()
            }
        );
        assert_eq!(
            prediction(r#"{"id": "p1", "status": "failed", "error": "NSFW"}"#).unwrap(),
            ImageJob::Failed {
                reason: "NSFW".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_jobs() {
        assert!(matches!(
            prediction(r#"{"id": "p1", "status": "succeeded"}"#),
            Err(ServiceError::Parse(_))
        ));
        assert!(matches!(
            prediction(r#"{"id": "p1", "status": "exploded"}"#),
            Err(ServiceError::Parse(_))
        ));
    }

    #[test]
    fn test_job_request_shape() {
        let generator = HttpImageGenerator::new("https://images.test/v1/", "key").with_version("abc");
        assert_eq!(generator.base_url, "https://images.test/v1");

        let body = serde_json::to_value(generator.build_job(&ImageRequest {
            prompt: "a fox".to_string(),
            negative_prompt: "text".to_string(),
            style_tag: "watercolor".to_string(),
            aspect_ratio: "4:3".to_string(),
        }))
        .unwrap();
        assert_eq!(body["version"], "abc");
        assert_eq!(body["input"]["prompt"], "a fox");
        assert_eq!(body["input"]["aspect_ratio"], "4:3");
        assert_eq!(body["input"]["style"], "watercolor");

        let unstyled = serde_json::to_value(generator.build_job(&ImageRequest {
            prompt: "a fox".to_string(),
            negative_prompt: String::new(),
            style_tag: " ".to_string(),
            aspect_ratio: "4:3".to_string(),
        }))
        .unwrap();
        assert!(unstyled["input"].get("style").is_none());
    }
}
