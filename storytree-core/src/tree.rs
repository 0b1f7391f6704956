//! Tree initialization: bible, root chapter and the first choices.

use crate::ending::EndingPolicy;
use crate::error::GenerationError;
use crate::generation::{BibleGenerator, ChapterPipeline};
use crate::model::{Story, StoryId, StoryNode, StoryStatus};
use crate::progress::ProgressTracker;
use crate::store::StoryStore;
use chrono::Utc;

/// Builds the root of a story's tree. Runs once per story.
pub struct TreeBuilder<'a> {
    store: &'a dyn StoryStore,
    bibles: &'a BibleGenerator,
    pipeline: &'a ChapterPipeline,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(
        store: &'a dyn StoryStore,
        bibles: &'a BibleGenerator,
        pipeline: &'a ChapterPipeline,
    ) -> Self {
        Self {
            store,
            bibles,
            pipeline,
        }
    }

    /// Generate the bible and the root chapter with its choices.
    ///
    /// The story must be `pending`; it moves to `generating` before any
    /// work starts, so a second call fails with `AlreadyInitialized`. If
    /// anything fails the story is marked `failed`.
    pub async fn initialize(&self, story_id: StoryId) -> Result<StoryNode, GenerationError> {
        let story = self
            .store
            .load_story(story_id)
            .await?
            .ok_or(GenerationError::StoryNotFound(story_id))?;

        if !self
            .store
            .transition_story(story_id, StoryStatus::Pending, StoryStatus::Generating)
            .await?
        {
            let status = self
                .store
                .load_story(story_id)
                .await?
                .map(|s| s.status)
                .unwrap_or(story.status);
            return Err(GenerationError::AlreadyInitialized {
                story: story_id,
                status,
            });
        }
        tracing::info!(story_id = %story_id, premise = %story.premise, "initializing story");

        match self.build(&story).await {
            Ok(root) => Ok(root),
            Err(e) => {
                tracing::warn!(story_id = %story_id, error = %e, "story initialization failed");
                self.mark_failed(story_id, &e).await?;
                Err(e)
            }
        }
    }

    async fn build(&self, story: &Story) -> Result<StoryNode, GenerationError> {
        let bible = self.bibles.generate(story).await?;
        self.store.insert_bible(story.id, &bible).await?;

        let mut titled = self
            .store
            .load_story(story.id)
            .await?
            .ok_or(GenerationError::StoryNotFound(story.id))?;
        titled.title = Some(bible.title.clone());
        titled.updated_at = Utc::now();
        self.store.save_story(&titled).await?;

        let root = StoryNode::claimed_root(story.id, Utc::now());
        self.store.insert_node(&root).await?;

        let policy = EndingPolicy::new(story.bounds);
        let directive = policy.directive(root.depth);

        let generated = match self
            .pipeline
            .produce(&bible, &root, None, directive, &policy)
            .await
        {
            Ok(generated) if generated.choices.len() >= 2 => generated,
            Ok(generated) => {
                let e = GenerationError::InvariantViolation(format!(
                    "root chapter returned {} choices, at least 2 required",
                    generated.choices.len()
                ));
                self.store.fail_node(root.id, &e.to_string()).await?;
                return Err(e);
            }
            Err(e) => {
                self.store.fail_node(root.id, &e.to_string()).await?;
                return Err(e);
            }
        };

        let children = generated.placements();
        self.store.complete_node(&generated.node, &children).await?;
        tracing::info!(
            story_id = %story.id,
            title = %generated.node.title,
            choices = children.len(),
            "root chapter ready"
        );

        ProgressTracker::refresh(self.store, story.id).await?;

        self.store
            .load_node(root.id)
            .await?
            .ok_or_else(|| GenerationError::InvariantViolation("root vanished".to_string()))
    }

    async fn mark_failed(&self, story_id: StoryId, error: &GenerationError) -> Result<(), GenerationError> {
        if let Some(mut story) = self.store.load_story(story_id).await? {
            story.status = StoryStatus::Failed;
            story.failure_reason = Some(error.to_string());
            story.updated_at = Utc::now();
            self.store.save_story(&story).await?;
        }
        Ok(())
    }
}
