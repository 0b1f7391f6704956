//! Persistence contract for stories, bibles, nodes and choices.
//!
//! The engine only talks to storage through [`StoryStore`]. Implementations
//! must make the conditional transitions (`claim_node`, `transition_story`,
//! `complete_node`, `fail_node`) atomic: concurrent invocations over the
//! same story rely on them to never process a node twice.

mod memory;

pub use memory::InMemoryStoryStore;

use crate::model::{
    ChoiceId, NodeId, NodeStatus, Story, StoryBible, StoryChoice, StoryId, StoryNode, StoryStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition for node {node}: {from} -> {to}")]
    InvalidTransition {
        node: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Node counts per status for one story.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u32,
    pub generating: u32,
    pub ready: u32,
    pub failed: u32,
}

impl StatusCounts {
    pub fn total(&self) -> u32 {
        self.pending + self.generating + self.ready + self.failed
    }

    /// Nodes still waiting for or undergoing generation.
    pub fn outstanding(&self) -> u32 {
        self.pending + self.generating
    }

    pub fn record(&mut self, status: NodeStatus) {
        match status {
            NodeStatus::Pending => self.pending += 1,
            NodeStatus::Generating => self.generating += 1,
            NodeStatus::Ready => self.ready += 1,
            NodeStatus::Failed => self.failed += 1,
        }
    }
}

/// A child created together with its incoming edge.
#[derive(Debug, Clone)]
pub struct ChildPlacement {
    pub choice: StoryChoice,
    pub node: StoryNode,
}

/// Async storage for the story tree.
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Insert a new story. Fails with `Conflict` if the id exists.
    async fn insert_story(&self, story: &Story) -> Result<(), StoreError>;

    async fn load_story(&self, id: StoryId) -> Result<Option<Story>, StoreError>;

    /// Overwrite an existing story record.
    async fn save_story(&self, story: &Story) -> Result<(), StoreError>;

    /// Move a story from `from` to `to` only if it is currently in `from`.
    ///
    /// Returns `false` when the story was in another status.
    async fn transition_story(
        &self,
        id: StoryId,
        from: StoryStatus,
        to: StoryStatus,
    ) -> Result<bool, StoreError>;

    /// Update a story's progress counters without touching its status.
    async fn record_progress(
        &self,
        id: StoryId,
        progress: u8,
        generated_nodes: u32,
        planned_nodes: u32,
    ) -> Result<(), StoreError>;

    /// Store the bible for a story. A second insert fails with `Conflict`.
    async fn insert_bible(&self, story_id: StoryId, bible: &StoryBible) -> Result<(), StoreError>;

    async fn load_bible(&self, story_id: StoryId) -> Result<Option<StoryBible>, StoreError>;

    /// Insert a node as-is, keeping its status and order index.
    async fn insert_node(&self, node: &StoryNode) -> Result<(), StoreError>;

    /// Insert an edge as-is.
    async fn insert_choice(&self, choice: &StoryChoice) -> Result<(), StoreError>;

    async fn load_node(&self, id: NodeId) -> Result<Option<StoryNode>, StoreError>;

    async fn load_choice(&self, id: ChoiceId) -> Result<Option<StoryChoice>, StoreError>;

    /// Atomically move a node from `pending` to `generating`.
    ///
    /// Returns `false` if the node is no longer pending.
    async fn claim_node(&self, id: NodeId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Persist a generated node as `ready` together with its children.
    ///
    /// The stored node must be `generating`. Children are inserted with
    /// fresh order indexes assigned in sequence.
    async fn complete_node(
        &self,
        node: &StoryNode,
        children: &[ChildPlacement],
    ) -> Result<(), StoreError>;

    /// Move a `generating` node to `failed`.
    ///
    /// Returns `false` if the node was not generating.
    async fn fail_node(&self, id: NodeId, reason: &str) -> Result<bool, StoreError>;

    /// Pending nodes of a story ordered by `(priority, order_index)`.
    async fn pending_nodes(
        &self,
        story_id: StoryId,
        limit: usize,
    ) -> Result<Vec<StoryNode>, StoreError>;

    async fn count_by_status(&self, story_id: StoryId) -> Result<StatusCounts, StoreError>;

    /// All nodes of a story ordered by `order_index`.
    async fn nodes_for_story(&self, story_id: StoryId) -> Result<Vec<StoryNode>, StoreError>;

    /// All choices of a story ordered by `(from_node, order)`.
    async fn choices_for_story(&self, story_id: StoryId)
        -> Result<Vec<StoryChoice>, StoreError>;

    /// Outgoing choices of a node ordered by `order`.
    async fn choices_from(&self, node_id: NodeId) -> Result<Vec<StoryChoice>, StoreError>;

    /// Nodes of a story that entered `generating` before `claimed_before`.
    async fn stale_generating(
        &self,
        story_id: StoryId,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<NodeId>, StoreError>;
}
