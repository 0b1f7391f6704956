//! Story completion, recomputed from node counts.

use crate::error::GenerationError;
use crate::model::{StoryId, StoryStatus};
use crate::store::{StatusCounts, StoryStore};
use serde::{Deserialize, Serialize};

/// Completion of one story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub story_id: StoryId,
    pub status: StoryStatus,
    /// Percentage, 0-100.
    pub progress: u8,
    /// Nodes in `ready` state.
    pub generated_nodes: u32,
    /// All nodes in the tree.
    pub planned_nodes: u32,
    pub counts: StatusCounts,
}

/// Percentage of resolved work.
///
/// `ready / (ready + pending + failed)`, with generating nodes counted as
/// pending. Stays at most 99 while any node is outstanding; failed nodes
/// keep a settled story below 100.
pub fn compute(counts: &StatusCounts) -> u8 {
    let total = counts.total();
    if total == 0 {
        return 0;
    }
    let pct = (counts.ready as u64 * 100) / total as u64;
    if counts.outstanding() > 0 {
        pct.min(99) as u8
    } else {
        pct as u8
    }
}

/// Recomputes story progress and status from the node table.
pub struct ProgressTracker;

impl ProgressTracker {
    /// Recompute, persist and return the progress of a story.
    ///
    /// A generating story with no outstanding nodes becomes
    /// `fully_generated`.
    pub async fn refresh(
        store: &dyn StoryStore,
        story_id: StoryId,
    ) -> Result<ProgressReport, GenerationError> {
        let counts = store.count_by_status(story_id).await?;
        let progress = compute(&counts);
        store
            .record_progress(story_id, progress, counts.ready, counts.total())
            .await?;

        if counts.total() > 0
            && counts.outstanding() == 0
            && store
                .transition_story(story_id, StoryStatus::Generating, StoryStatus::FullyGenerated)
                .await?
        {
            tracing::info!(
                story_id = %story_id,
                ready = counts.ready,
                failed = counts.failed,
                "story fully generated"
            );
        }

        let story = store
            .load_story(story_id)
            .await?
            .ok_or(GenerationError::StoryNotFound(story_id))?;

        Ok(ProgressReport {
            story_id,
            status: story.status,
            progress,
            generated_nodes: counts.ready,
            planned_nodes: counts.total(),
            counts,
        })
    }
}
