//! The story engine: the caller-facing API.

use crate::config::EngineConfig;
use crate::error::GenerationError;
use crate::generation::{BibleGenerator, ChapterPipeline, ChapterWriter, MediaPipeline};
use crate::model::{NodeId, Story, StoryChoice, StoryId, StoryNode, StoryRequest};
use crate::persist::{PersistError, StorySnapshot};
use crate::progress::{ProgressReport, ProgressTracker};
use crate::queue::{BatchReport, QueueProcessor};
use crate::quota::{GenerationQuota, Unlimited};
use crate::services::{ImageGenerator, ObjectStorage, SpeechSynthesizer, TextGenerator};
use crate::store::StoryStore;
use crate::tree::TreeBuilder;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A whole story tree, for renderers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryTree {
    pub story: Story,
    /// Ordered by creation.
    pub nodes: Vec<StoryNode>,
    pub choices: Vec<StoryChoice>,
}

impl StoryTree {
    pub fn node(&self, id: NodeId) -> Option<&StoryNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing choices of a node, in order.
    pub fn choices_from(&self, id: NodeId) -> Vec<&StoryChoice> {
        let mut choices: Vec<&StoryChoice> =
            self.choices.iter().filter(|c| c.from_node == id).collect();
        choices.sort_by_key(|c| c.order);
        choices
    }

    /// Nodes without outgoing choices.
    pub fn leaves(&self) -> Vec<&StoryNode> {
        self.nodes
            .iter()
            .filter(|n| !self.choices.iter().any(|c| c.from_node == n.id))
            .collect()
    }
}

/// Generates branching stories.
///
/// # Example
///
/// ```ignore
/// let engine = StoryEngine::new(store, text, storage, EngineConfig::default())?;
/// let story = engine.create_story(StoryRequest::new("a fox who collects keys")).await?;
/// engine.initialize_story(story.id).await?;
/// while engine.progress(story.id).await?.counts.outstanding() > 0 {
///     engine.generate_next_batch(story.id, None).await?;
/// }
/// ```
pub struct StoryEngine {
    store: Arc<dyn StoryStore>,
    text: Arc<dyn TextGenerator>,
    storage: Arc<dyn ObjectStorage>,
    image: Option<Arc<dyn ImageGenerator>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    quota: Arc<dyn GenerationQuota>,
    config: EngineConfig,
}

impl StoryEngine {
    /// Create an engine. Fails if the configuration is invalid.
    pub fn new(
        store: Arc<dyn StoryStore>,
        text: Arc<dyn TextGenerator>,
        storage: Arc<dyn ObjectStorage>,
        config: EngineConfig,
    ) -> Result<Self, GenerationError> {
        config.validate().map_err(GenerationError::InvalidConfig)?;
        Ok(Self {
            store,
            text,
            storage,
            image: None,
            speech: None,
            quota: Arc::new(Unlimited),
            config,
        })
    }

    pub fn with_images(mut self, image: Arc<dyn ImageGenerator>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn with_quota(mut self, quota: Arc<dyn GenerationQuota>) -> Self {
        self.quota = quota;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StoryStore> {
        &self.store
    }

    fn pipeline(&self) -> ChapterPipeline {
        let writer = ChapterWriter::new(
            self.text.clone(),
            self.config.chapter_temperature,
            self.config.chapter_max_tokens,
        );
        let mut media = MediaPipeline::new(self.storage.clone(), (&self.config).into());
        if let Some(image) = &self.image {
            media = media.with_images(image.clone());
        }
        if let Some(speech) = &self.speech {
            media = media.with_speech(speech.clone());
        }
        ChapterPipeline::new(writer, media)
    }

    /// Create a pending story.
    pub async fn create_story(&self, request: StoryRequest) -> Result<Story, GenerationError> {
        if request.premise.trim().is_empty() {
            return Err(GenerationError::InvalidConfig("premise is empty".to_string()));
        }
        let bounds = request.bounds.unwrap_or(self.config.default_bounds);
        bounds.validate().map_err(GenerationError::InvalidConfig)?;

        let story = Story::new(&request, bounds);
        self.store.insert_story(&story).await?;
        tracing::info!(
            story_id = %story.id,
            min_chapters = bounds.min_chapters,
            max_chapters = bounds.max_chapters,
            "story created"
        );
        Ok(story)
    }

    /// Generate the bible and the root chapter. Runs once per story.
    pub async fn initialize_story(&self, story_id: StoryId) -> Result<StoryNode, GenerationError> {
        let bibles = BibleGenerator::new(
            self.text.clone(),
            self.config.bible_temperature,
            self.config.bible_max_tokens,
        );
        let pipeline = self.pipeline();
        TreeBuilder::new(self.store.as_ref(), &bibles, &pipeline)
            .initialize(story_id)
            .await
    }

    /// Current progress of a story.
    pub async fn progress(&self, story_id: StoryId) -> Result<ProgressReport, GenerationError> {
        if self.store.load_story(story_id).await?.is_none() {
            return Err(GenerationError::StoryNotFound(story_id));
        }
        ProgressTracker::refresh(self.store.as_ref(), story_id).await
    }

    /// Process the next batch of pending nodes.
    ///
    /// Uses the configured batch size when `max_nodes` is `None`.
    pub async fn generate_next_batch(
        &self,
        story_id: StoryId,
        max_nodes: Option<usize>,
    ) -> Result<BatchReport, GenerationError> {
        let pipeline = self.pipeline();
        QueueProcessor::new(self.store.as_ref(), &pipeline, self.quota.as_ref())
            .process_batch(story_id, max_nodes.unwrap_or(self.config.batch_size))
            .await
    }

    /// Fail nodes stuck in `generating` for longer than the configured
    /// deadline. Returns the ids of the nodes failed.
    pub async fn sweep_stale(&self, story_id: StoryId) -> Result<Vec<NodeId>, GenerationError> {
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .map_err(|e| GenerationError::InvalidConfig(e.to_string()))?;
        let cutoff = Utc::now() - stale_after;

        let mut swept = Vec::new();
        for id in self.store.stale_generating(story_id, cutoff).await? {
            if self.store.fail_node(id, "generation timed out").await? {
                tracing::warn!(story_id = %story_id, node_id = %id, "failed stale node");
                swept.push(id);
            }
        }
        if !swept.is_empty() {
            ProgressTracker::refresh(self.store.as_ref(), story_id).await?;
        }
        Ok(swept)
    }

    /// All nodes and choices of a story.
    pub async fn story_tree(&self, story_id: StoryId) -> Result<StoryTree, GenerationError> {
        let story = self
            .store
            .load_story(story_id)
            .await?
            .ok_or(GenerationError::StoryNotFound(story_id))?;
        Ok(StoryTree {
            story,
            nodes: self.store.nodes_for_story(story_id).await?,
            choices: self.store.choices_for_story(story_id).await?,
        })
    }

    pub async fn export_snapshot(&self, story_id: StoryId) -> Result<StorySnapshot, PersistError> {
        StorySnapshot::capture(self.store.as_ref(), story_id).await
    }

    pub async fn import_snapshot(&self, snapshot: &StorySnapshot) -> Result<StoryId, PersistError> {
        snapshot.restore(self.store.as_ref()).await
    }
}
