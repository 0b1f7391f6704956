//! Story snapshots for export, import and resuming generation.
//!
//! A snapshot holds every record of one story and is saved as pretty JSON.

use crate::model::{Story, StoryBible, StoryChoice, StoryId, StoryNode, StoryStatus};
use crate::store::{StoreError, StoryStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Story not found: {0}")]
    StoryNotFound(StoryId),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to resume a story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorySnapshot {
    /// Format version for compatibility checking.
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub story: Story,
    /// Absent while the story is still pending.
    pub bible: Option<StoryBible>,
    pub nodes: Vec<StoryNode>,
    pub choices: Vec<StoryChoice>,
}

/// Header of a snapshot, readable without loading the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub story_id: StoryId,
    pub title: Option<String>,
    pub status: StoryStatus,
    pub progress: u8,
    pub saved_at: DateTime<Utc>,
}

impl StorySnapshot {
    /// Read a story and all its records from the store.
    pub async fn capture(store: &dyn StoryStore, story_id: StoryId) -> Result<Self, PersistError> {
        let story = store
            .load_story(story_id)
            .await?
            .ok_or(PersistError::StoryNotFound(story_id))?;
        let bible = store.load_bible(story_id).await?;
        let nodes = store.nodes_for_story(story_id).await?;
        let choices = store.choices_for_story(story_id).await?;

        Ok(Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            story,
            bible,
            nodes,
            choices,
        })
    }

    /// Insert every record into `store`.
    ///
    /// Order indexes are kept. Fails with a store `Conflict` if the story
    /// already exists there.
    pub async fn restore(&self, store: &dyn StoryStore) -> Result<StoryId, PersistError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: self.version,
            });
        }

        store.insert_story(&self.story).await?;
        if let Some(bible) = &self.bible {
            store.insert_bible(self.story.id, bible).await?;
        }
        for node in &self.nodes {
            store.insert_node(node).await?;
        }
        for choice in &self.choices {
            store.insert_choice(choice).await?;
        }

        tracing::info!(
            story_id = %self.story.id,
            nodes = self.nodes.len(),
            choices = self.choices.len(),
            "snapshot restored"
        );
        Ok(self.story.id)
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let snapshot: Self = serde_json::from_str(&content)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }

        Ok(snapshot)
    }

    /// Read the header of a snapshot file without the tree.
    pub async fn peek_summary(path: impl AsRef<Path>) -> Result<SnapshotSummary, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            saved_at: DateTime<Utc>,
            story: Story,
        }

        let partial: Partial = serde_json::from_str(&content)?;
        if partial.version != SNAPSHOT_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: partial.version,
            });
        }

        Ok(SnapshotSummary {
            story_id: partial.story.id,
            title: partial.story.title,
            status: partial.story.status,
            progress: partial.story.progress,
            saved_at: partial.saved_at,
        })
    }
}

/// Default snapshot file name for a story.
pub fn snapshot_path(base_dir: impl AsRef<Path>, story: &Story) -> PathBuf {
    let sanitized = story
        .display_name()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>();
    base_dir.as_ref().join(format!("{sanitized}.story.json"))
}
