//! Illustration and narration for generated chapters.
//!
//! Media is best effort. Any failure is logged and leaves the reference
//! absent; it never fails the node.

use crate::config::EngineConfig;
use crate::context_chain::{render_character_block, scene_characters};
use crate::model::{ContextEntry, StoryBible, StoryNode};
use crate::services::{
    ImageGenerator, ImageJob, ImageRequest, ObjectStorage, ServiceError, SpeechRequest,
    SpeechSynthesizer,
};
use std::sync::Arc;
use std::time::Duration;

const NEGATIVE_PROMPT: &str =
    "text, captions, speech bubbles, watermark, signature, extra limbs, deformed hands";

/// Media settings taken from the engine configuration.
#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub illustrate: bool,
    pub poll_attempts: u32,
    pub poll_delay: Duration,
    pub deadline: Duration,
    pub aspect_ratio: String,
    pub narrate: bool,
    pub voice: String,
    pub speed: f32,
}

impl From<&EngineConfig> for MediaSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            illustrate: config.illustrate,
            poll_attempts: config.image_poll_attempts,
            poll_delay: config.image_poll_delay,
            deadline: config.image_deadline,
            aspect_ratio: config.image_aspect_ratio.clone(),
            narrate: config.narrate,
            voice: config.narration_voice.clone(),
            speed: config.narration_speed,
        }
    }
}

/// Media references for one chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaAssets {
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
}

/// Produces illustration and narration for chapters.
pub struct MediaPipeline {
    image: Option<Arc<dyn ImageGenerator>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    storage: Arc<dyn ObjectStorage>,
    settings: MediaSettings,
}

impl MediaPipeline {
    pub fn new(storage: Arc<dyn ObjectStorage>, settings: MediaSettings) -> Self {
        Self {
            image: None,
            speech: None,
            storage,
            settings,
        }
    }

    pub fn with_images(mut self, image: Arc<dyn ImageGenerator>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Illustrate and narrate a written chapter concurrently.
    pub async fn render(
        &self,
        bible: &StoryBible,
        node: &StoryNode,
        chain: &[ContextEntry],
        panel_description: &str,
    ) -> MediaAssets {
        let (image_url, audio_url) = futures::join!(
            self.illustrate(bible, node, chain, panel_description),
            self.narrate(node)
        );
        MediaAssets {
            image_url,
            audio_url,
        }
    }

    /// Build the image prompt for a chapter.
    pub fn image_prompt(
        bible: &StoryBible,
        node: &StoryNode,
        chain: &[ContextEntry],
        panel_description: &str,
    ) -> String {
        let mut prompt = bible.style_prefix.clone();

        let scene = if panel_description.is_empty() {
            format!("{}: {}", node.title, crate::context_chain::excerpt(&node.content))
        } else {
            panel_description.to_string()
        };
        prompt.push_str(&format!(". {scene}"));

        let names = scene_characters(chain, &node.characters_present);
        let characters = render_character_block(bible, &names);
        if !characters.is_empty() {
            prompt.push_str(&format!(". Characters: {characters}"));
        }
        if !bible.setting.world.is_empty() {
            prompt.push_str(&format!(". Setting: {}", bible.setting.world));
        }
        prompt
    }

    async fn illustrate(
        &self,
        bible: &StoryBible,
        node: &StoryNode,
        chain: &[ContextEntry],
        panel_description: &str,
    ) -> Option<String> {
        if !self.settings.illustrate {
            return None;
        }
        let image = self.image.as_ref()?;

        let request = ImageRequest {
            prompt: Self::image_prompt(bible, node, chain, panel_description),
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            style_tag: bible.art_style.medium.clone(),
            aspect_ratio: self.settings.aspect_ratio.clone(),
        };

        let outcome =
            tokio::time::timeout(self.settings.deadline, self.poll_image(image.as_ref(), request))
                .await;
        match outcome {
            Ok(Ok(url)) => Some(url),
            Ok(Err(e)) => {
                tracing::warn!(node_key = %node.key, error = %e, "illustration failed, continuing without image");
                None
            }
            Err(_) => {
                tracing::warn!(
                    node_key = %node.key,
                    deadline = ?self.settings.deadline,
                    "illustration deadline passed, continuing without image"
                );
                None
            }
        }
    }

    async fn poll_image(
        &self,
        image: &dyn ImageGenerator,
        request: ImageRequest,
    ) -> Result<String, ServiceError> {
        let job_id = image.submit(request).await?;

        for attempt in 1..=self.settings.poll_attempts {
            match image.poll(&job_id).await? {
                ImageJob::Succeeded { url } => return Ok(url),
                ImageJob::Failed { reason } => {
                    return Err(ServiceError::JobFailed { job_id, reason });
                }
                ImageJob::Pending => {
                    tracing::debug!(job_id = %job_id, attempt, "image job pending");
                    if attempt < self.settings.poll_attempts {
                        tokio::time::sleep(self.settings.poll_delay).await;
                    }
                }
            }
        }

        Err(ServiceError::Timeout(
            self.settings.poll_delay * self.settings.poll_attempts,
        ))
    }

    async fn narrate(&self, node: &StoryNode) -> Option<String> {
        if !self.settings.narrate {
            return None;
        }
        let speech = self.speech.as_ref()?;

        let request = SpeechRequest {
            text: format!("{}.\n\n{}", node.title, node.content),
            voice: self.settings.voice.clone(),
            speed: self.settings.speed,
        };

        let result: Result<String, ServiceError> = async {
            let bytes = speech.synthesize(request).await?;
            if bytes.is_empty() {
                return Err(ServiceError::Parse("empty audio".to_string()));
            }
            let key = format!("stories/{}/{}.mp3", node.story_id, node.id);
            self.storage.upload(&key, bytes, "audio/mpeg").await
        }
        .await;

        match result {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(node_key = %node.key, error = %e, "narration failed, continuing without audio");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoryId;
    use crate::testing::{sample_bible, MemoryObjectStorage, ScriptedImageGenerator, ScriptedSpeech};

    fn settings() -> MediaSettings {
        let mut settings = MediaSettings::from(&EngineConfig::default());
        settings.poll_attempts = 3;
        settings.poll_delay = Duration::ZERO;
        settings
    }

    fn chapter() -> StoryNode {
        let mut node = StoryNode::root(StoryId::new());
        node.title = "The Cove".to_string();
        node.content = "Mira climbed down to the cove at low tide.".to_string();
        node.characters_present = vec!["Mira".to_string()];
        node
    }

    #[tokio::test]
    async fn test_render_produces_both_assets() {
        let storage = Arc::new(MemoryObjectStorage::new());
        let pipeline = MediaPipeline::new(storage.clone(), settings())
            .with_images(Arc::new(ScriptedImageGenerator::succeeds_after(2)))
            .with_speech(Arc::new(ScriptedSpeech::new()));

        let assets = pipeline
            .render(&sample_bible(), &chapter(), &[], "Mira on the rocks")
            .await;

        assert!(assets.image_url.is_some());
        let audio = assets.audio_url.unwrap();
        assert!(audio.ends_with(".mp3"));
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_polling_exhaustion_degrades() {
        let image = Arc::new(ScriptedImageGenerator::never_completes());
        let pipeline =
            MediaPipeline::new(Arc::new(MemoryObjectStorage::new()), settings()).with_images(image.clone());

        let assets = pipeline.render(&sample_bible(), &chapter(), &[], "").await;
        assert_eq!(assets.image_url, None);
        assert_eq!(image.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_failures_degrade() {
        let pipeline = MediaPipeline::new(Arc::new(MemoryObjectStorage::new()), settings())
            .with_images(Arc::new(ScriptedImageGenerator::fails()))
            .with_speech(Arc::new(ScriptedSpeech::failing()));

        let assets = pipeline.render(&sample_bible(), &chapter(), &[], "").await;
        assert_eq!(assets, MediaAssets::default());
    }

    #[tokio::test]
    async fn test_disabled_media_is_skipped() {
        let mut settings = settings();
        settings.illustrate = false;
        settings.narrate = false;
        let image = Arc::new(ScriptedImageGenerator::succeeds_after(0));
        let pipeline = MediaPipeline::new(Arc::new(MemoryObjectStorage::new()), settings)
            .with_images(image.clone())
            .with_speech(Arc::new(ScriptedSpeech::new()));

        let assets = pipeline.render(&sample_bible(), &chapter(), &[], "").await;
        assert_eq!(assets, MediaAssets::default());
        assert_eq!(image.poll_count(), 0);
    }

    #[test]
    fn test_image_prompt_carries_descriptors() {
        let bible = sample_bible();
        let prompt = MediaPipeline::image_prompt(&bible, &chapter(), &[], "Mira on the rocks");
        assert!(prompt.starts_with(&bible.style_prefix));
        assert!(prompt.contains("Mira on the rocks"));
        assert!(prompt.contains(bible.descriptor_for("Mira").unwrap()));
    }
}
