//! StoryStore in-memory implementation.

use super::{ChildPlacement, StatusCounts, StoreError, StoryStore};
use crate::model::{
    ChoiceId, NodeId, NodeStatus, Story, StoryBible, StoryChoice, StoryId, StoryNode, StoryStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    stories: HashMap<StoryId, Story>,
    bibles: HashMap<StoryId, StoryBible>,
    nodes: HashMap<NodeId, StoryNode>,
    choices: HashMap<ChoiceId, StoryChoice>,
    /// Next order index per story.
    next_order: HashMap<StoryId, u64>,
}

impl Tables {
    fn bump_order(&mut self, story_id: StoryId, seen: u64) {
        let next = self.next_order.entry(story_id).or_insert(0);
        if *next <= seen {
            *next = seen + 1;
        }
    }

    fn take_order(&mut self, story_id: StoryId) -> u64 {
        let next = self.next_order.entry(story_id).or_insert(0);
        let order = *next;
        *next += 1;
        order
    }
}

/// In-memory implementation for development and testing.
///
/// One lock guards all tables, so every trait method is atomic.
#[derive(Default)]
pub struct InMemoryStoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))
    }
}

#[async_trait]
impl StoryStore for InMemoryStoryStore {
    async fn insert_story(&self, story: &Story) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.stories.contains_key(&story.id) {
            return Err(StoreError::Conflict(format!("story {} exists", story.id)));
        }
        tables.stories.insert(story.id, story.clone());
        Ok(())
    }

    async fn load_story(&self, id: StoryId) -> Result<Option<Story>, StoreError> {
        Ok(self.read()?.stories.get(&id).cloned())
    }

    async fn save_story(&self, story: &Story) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        match tables.stories.get_mut(&story.id) {
            Some(existing) => {
                *existing = story.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("story {}", story.id))),
        }
    }

    async fn transition_story(
        &self,
        id: StoryId,
        from: StoryStatus,
        to: StoryStatus,
    ) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let story = tables
            .stories
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("story {id}")))?;
        if story.status != from {
            return Ok(false);
        }
        story.status = to;
        story.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_progress(
        &self,
        id: StoryId,
        progress: u8,
        generated_nodes: u32,
        planned_nodes: u32,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let story = tables
            .stories
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("story {id}")))?;
        story.progress = progress;
        story.generated_nodes = generated_nodes;
        story.planned_nodes = planned_nodes;
        story.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_bible(&self, story_id: StoryId, bible: &StoryBible) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.bibles.contains_key(&story_id) {
            return Err(StoreError::Conflict(format!(
                "bible for story {story_id} exists"
            )));
        }
        tables.bibles.insert(story_id, bible.clone());
        Ok(())
    }

    async fn load_bible(&self, story_id: StoryId) -> Result<Option<StoryBible>, StoreError> {
        Ok(self.read()?.bibles.get(&story_id).cloned())
    }

    async fn insert_node(&self, node: &StoryNode) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.nodes.contains_key(&node.id) {
            return Err(StoreError::Conflict(format!("node {} exists", node.id)));
        }
        tables.bump_order(node.story_id, node.order_index);
        tables.nodes.insert(node.id, node.clone());
        Ok(())
    }

    async fn insert_choice(&self, choice: &StoryChoice) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if tables.choices.contains_key(&choice.id) {
            return Err(StoreError::Conflict(format!("choice {} exists", choice.id)));
        }
        tables.choices.insert(choice.id, choice.clone());
        Ok(())
    }

    async fn load_node(&self, id: NodeId) -> Result<Option<StoryNode>, StoreError> {
        Ok(self.read()?.nodes.get(&id).cloned())
    }

    async fn load_choice(&self, id: ChoiceId) -> Result<Option<StoryChoice>, StoreError> {
        Ok(self.read()?.choices.get(&id).cloned())
    }

    async fn claim_node(&self, id: NodeId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let node = tables
            .nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("node {id}")))?;
        if node.status != NodeStatus::Pending {
            return Ok(false);
        }
        node.status = NodeStatus::Generating;
        node.claimed_at = Some(at);
        node.updated_at = at;
        Ok(true)
    }

    async fn complete_node(
        &self,
        node: &StoryNode,
        children: &[ChildPlacement],
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;

        let current = tables
            .nodes
            .get(&node.id)
            .ok_or_else(|| StoreError::NotFound(format!("node {}", node.id)))?;
        if !current.status.can_transition_to(NodeStatus::Ready) {
            return Err(StoreError::InvalidTransition {
                node: node.id,
                from: current.status,
                to: NodeStatus::Ready,
            });
        }
        for child in children {
            if tables.nodes.contains_key(&child.node.id)
                || tables.choices.contains_key(&child.choice.id)
            {
                return Err(StoreError::Conflict(format!(
                    "child {} of node {} exists",
                    child.node.key, node.key
                )));
            }
        }

        let mut stored = node.clone();
        stored.status = NodeStatus::Ready;
        stored.updated_at = Utc::now();
        tables.nodes.insert(stored.id, stored);

        for child in children {
            let mut child_node = child.node.clone();
            child_node.order_index = tables.take_order(child_node.story_id);
            tables.choices.insert(child.choice.id, child.choice.clone());
            tables.nodes.insert(child_node.id, child_node);
        }
        Ok(())
    }

    async fn fail_node(&self, id: NodeId, reason: &str) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let node = tables
            .nodes
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("node {id}")))?;
        if !node.status.can_transition_to(NodeStatus::Failed) {
            return Ok(false);
        }
        node.status = NodeStatus::Failed;
        node.failure_reason = Some(reason.to_string());
        node.updated_at = Utc::now();
        Ok(true)
    }

    async fn pending_nodes(
        &self,
        story_id: StoryId,
        limit: usize,
    ) -> Result<Vec<StoryNode>, StoreError> {
        let tables = self.read()?;
        let mut pending: Vec<StoryNode> = tables
            .nodes
            .values()
            .filter(|n| n.story_id == story_id && n.status == NodeStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|n| (n.priority, n.order_index));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn count_by_status(&self, story_id: StoryId) -> Result<StatusCounts, StoreError> {
        let tables = self.read()?;
        let mut counts = StatusCounts::default();
        for node in tables.nodes.values().filter(|n| n.story_id == story_id) {
            counts.record(node.status);
        }
        Ok(counts)
    }

    async fn nodes_for_story(&self, story_id: StoryId) -> Result<Vec<StoryNode>, StoreError> {
        let tables = self.read()?;
        let mut nodes: Vec<StoryNode> = tables
            .nodes
            .values()
            .filter(|n| n.story_id == story_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.order_index);
        Ok(nodes)
    }

    async fn choices_for_story(
        &self,
        story_id: StoryId,
    ) -> Result<Vec<StoryChoice>, StoreError> {
        let tables = self.read()?;
        let mut choices: Vec<StoryChoice> = tables
            .choices
            .values()
            .filter(|c| c.story_id == story_id)
            .cloned()
            .collect();
        choices.sort_by_key(|c| (c.from_node, c.order));
        Ok(choices)
    }

    async fn choices_from(&self, node_id: NodeId) -> Result<Vec<StoryChoice>, StoreError> {
        let tables = self.read()?;
        let mut choices: Vec<StoryChoice> = tables
            .choices
            .values()
            .filter(|c| c.from_node == node_id)
            .cloned()
            .collect();
        choices.sort_by_key(|c| c.order);
        Ok(choices)
    }

    async fn stale_generating(
        &self,
        story_id: StoryId,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<NodeId>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .nodes
            .values()
            .filter(|n| {
                n.story_id == story_id
                    && n.status == NodeStatus::Generating
                    && n.claimed_at.is_some_and(|at| at < claimed_before)
            })
            .map(|n| n.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChapterBounds, EmotionalWeight, StoryRequest};

    fn story() -> Story {
        Story::new(&StoryRequest::new("premise"), ChapterBounds::default())
    }

    async fn seeded() -> (InMemoryStoryStore, Story, StoryNode) {
        let store = InMemoryStoryStore::new();
        let story = story();
        store.insert_story(&story).await.unwrap();
        let root = StoryNode::root(story.id);
        store.insert_node(&root).await.unwrap();
        (store, story, root)
    }

    fn placement(parent: &StoryNode, order: u32, weight: EmotionalWeight) -> ChildPlacement {
        let choice = StoryChoice::new(parent, order, format!("choice {order}"), "", weight);
        let node = StoryNode::placeholder(parent, &choice, Vec::new());
        ChildPlacement { choice, node }
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (store, _, root) = seeded().await;
        assert!(store.claim_node(root.id, Utc::now()).await.unwrap());
        assert!(!store.claim_node(root.id, Utc::now()).await.unwrap());

        let node = store.load_node(root.id).await.unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Generating);
        assert!(node.claimed_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_requires_generating() {
        let (store, _, root) = seeded().await;
        let err = store.complete_node(&root, &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        store.claim_node(root.id, Utc::now()).await.unwrap();
        let children = vec![
            placement(&root, 0, EmotionalWeight::Low),
            placement(&root, 1, EmotionalWeight::Pivotal),
        ];
        store.complete_node(&root, &children).await.unwrap();

        let counts = store.count_by_status(root.story_id).await.unwrap();
        assert_eq!(counts.ready, 1);
        assert_eq!(counts.pending, 2);
        assert_eq!(store.choices_from(root.id).await.unwrap().len(), 2);

        // ready never goes back
        assert!(!store.claim_node(root.id, Utc::now()).await.unwrap());
        assert!(!store.fail_node(root.id, "late").await.unwrap());
    }

    #[tokio::test]
    async fn test_pending_order_follows_priority_then_creation() {
        let (store, story, root) = seeded().await;
        store.claim_node(root.id, Utc::now()).await.unwrap();
        let children = vec![
            placement(&root, 0, EmotionalWeight::Low),
            placement(&root, 1, EmotionalWeight::Pivotal),
            placement(&root, 2, EmotionalWeight::Low),
        ];
        store.complete_node(&root, &children).await.unwrap();

        let pending = store.pending_nodes(story.id, 10).await.unwrap();
        let keys: Vec<_> = pending.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["1.2", "1.1", "1.3"]);

        let limited = store.pending_nodes(story.id, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_bible_is_write_once() {
        let store = InMemoryStoryStore::new();
        let story = story();
        store.insert_story(&story).await.unwrap();
        let bible = crate::testing::sample_bible();

        store.insert_bible(story.id, &bible).await.unwrap();
        let err = store.insert_bible(story.id, &bible).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_story_transition_is_conditional() {
        let store = InMemoryStoryStore::new();
        let story = story();
        store.insert_story(&story).await.unwrap();

        assert!(store
            .transition_story(story.id, StoryStatus::Pending, StoryStatus::Generating)
            .await
            .unwrap());
        assert!(!store
            .transition_story(story.id, StoryStatus::Pending, StoryStatus::Generating)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_stale_generating() {
        let (store, story, root) = seeded().await;
        let long_ago = Utc::now() - chrono::Duration::minutes(30);
        store.claim_node(root.id, long_ago).await.unwrap();

        let stale = store
            .stale_generating(story.id, Utc::now() - chrono::Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(stale, vec![root.id]);

        let fresh = store.stale_generating(story.id, long_ago).await.unwrap();
        assert!(fresh.is_empty());
    }
}
