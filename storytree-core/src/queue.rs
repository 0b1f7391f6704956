//! The generation queue processor.
//!
//! Each call processes one bounded batch of pending nodes, most significant
//! first. Nodes are claimed with a conditional transition, so concurrent
//! batches over the same story never generate a node twice. A node that
//! fails is marked `failed` and the batch moves on.

use crate::context_chain;
use crate::ending::EndingPolicy;
use crate::error::GenerationError;
use crate::generation::ChapterPipeline;
use crate::model::{NodeId, NodeStatus, Story, StoryBible, StoryId, StoryNode, StoryStatus};
use crate::progress::{ProgressReport, ProgressTracker};
use crate::quota::GenerationQuota;
use crate::store::StoryStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// What happened to one node in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NodeOutcome {
    Ready {
        node_id: NodeId,
        key: String,
        is_ending: bool,
        children: usize,
    },
    Failed {
        node_id: NodeId,
        key: String,
        kind: String,
        reason: String,
    },
    /// Claimed by another invocation first.
    Skipped { node_id: NodeId, key: String },
}

impl NodeOutcome {
    pub fn key(&self) -> &str {
        match self {
            NodeOutcome::Ready { key, .. }
            | NodeOutcome::Failed { key, .. }
            | NodeOutcome::Skipped { key, .. } => key,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, NodeOutcome::Ready { .. })
    }
}

/// Result of one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub story_id: StoryId,
    /// Nodes that reached `ready` in this batch.
    pub generated: usize,
    pub outcomes: Vec<NodeOutcome>,
    /// Nodes still pending after the batch.
    pub remaining_pending: u32,
    pub progress: ProgressReport,
}

/// Processes batches of pending nodes.
pub struct QueueProcessor<'a> {
    store: &'a dyn StoryStore,
    pipeline: &'a ChapterPipeline,
    quota: &'a dyn GenerationQuota,
}

impl<'a> QueueProcessor<'a> {
    pub fn new(
        store: &'a dyn StoryStore,
        pipeline: &'a ChapterPipeline,
        quota: &'a dyn GenerationQuota,
    ) -> Self {
        Self {
            store,
            pipeline,
            quota,
        }
    }

    /// Process up to `max_nodes` pending nodes of a story.
    ///
    /// Failing to read the story or its bible, or a quota refusal, aborts
    /// before any node is claimed.
    pub async fn process_batch(
        &self,
        story_id: StoryId,
        max_nodes: usize,
    ) -> Result<BatchReport, GenerationError> {
        let story = self
            .store
            .load_story(story_id)
            .await?
            .ok_or(GenerationError::StoryNotFound(story_id))?;
        if matches!(story.status, StoryStatus::Pending | StoryStatus::Failed) {
            return Err(GenerationError::NotInitialized {
                story: story_id,
                status: story.status,
            });
        }
        let bible = self
            .store
            .load_bible(story_id)
            .await?
            .ok_or(GenerationError::BibleMissing(story_id))?;

        let counts = self.store.count_by_status(story_id).await?;
        self.quota.check(&story, &counts).await?;
        let max_nodes = match self.quota.headroom(&counts) {
            Some(headroom) => max_nodes.min(headroom),
            None => max_nodes,
        };

        let policy = EndingPolicy::new(story.bounds);
        let pending = self.store.pending_nodes(story_id, max_nodes).await?;
        tracing::info!(
            story_id = %story_id,
            pending = counts.pending,
            batch = pending.len(),
            "processing batch"
        );

        let mut outcomes = Vec::with_capacity(pending.len());
        for mut node in pending {
            let claimed_at = Utc::now();
            if !self.store.claim_node(node.id, claimed_at).await? {
                tracing::debug!(node_key = %node.key, "node claimed elsewhere, skipping");
                outcomes.push(NodeOutcome::Skipped {
                    node_id: node.id,
                    key: node.key,
                });
                continue;
            }
            node.status = NodeStatus::Generating;
            node.claimed_at = Some(claimed_at);
            tracing::info!(node_key = %node.key, depth = node.depth, "node claimed");

            let outcome = match self.process_node(&story, &bible, &policy, node.clone()).await {
                Ok((ready, children)) => {
                    tracing::info!(
                        node_key = %ready.key,
                        is_ending = ready.is_ending,
                        children,
                        "node ready"
                    );
                    NodeOutcome::Ready {
                        node_id: ready.id,
                        key: ready.key,
                        is_ending: ready.is_ending,
                        children,
                    }
                }
                Err(e) => {
                    tracing::warn!(node_key = %node.key, error = %e, "node failed");
                    self.store.fail_node(node.id, &e.to_string()).await?;
                    NodeOutcome::Failed {
                        node_id: node.id,
                        key: node.key,
                        kind: e.kind().to_string(),
                        reason: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let progress = ProgressTracker::refresh(self.store, story_id).await?;
        let generated = outcomes.iter().filter(|o| o.is_ready()).count();
        tracing::info!(
            story_id = %story_id,
            generated,
            remaining = progress.counts.pending,
            progress = progress.progress,
            "batch complete"
        );

        Ok(BatchReport {
            story_id,
            generated,
            outcomes,
            remaining_pending: progress.counts.pending,
            progress,
        })
    }

    async fn process_node(
        &self,
        story: &Story,
        bible: &StoryBible,
        policy: &EndingPolicy,
        mut node: StoryNode,
    ) -> Result<(StoryNode, usize), GenerationError> {
        let choice_text = match node.parent_choice {
            Some(choice_id) => Some(
                self.store
                    .load_choice(choice_id)
                    .await?
                    .ok_or_else(|| {
                        GenerationError::InvariantViolation(format!(
                            "incoming choice of node {} is missing",
                            node.key
                        ))
                    })?
                    .text,
            ),
            None => None,
        };

        node.context_chain = context_chain::resolve(self.store, &node).await?;
        let directive = policy.directive(node.depth);
        tracing::debug!(
            story_id = %story.id,
            node_key = %node.key,
            directive = %directive,
            "generating chapter"
        );

        let generated = self
            .pipeline
            .produce(bible, &node, choice_text.as_deref(), directive, policy)
            .await?;
        let children = generated.placements();
        self.store.complete_node(&generated.node, &children).await?;

        Ok((generated.node, children.len()))
    }
}
