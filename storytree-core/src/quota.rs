//! Generation quotas, checked before a batch starts.
//!
//! The subscription system that decides limits is external; the engine
//! only asks whether another batch may run.

use crate::error::GenerationError;
use crate::model::Story;
use crate::store::StatusCounts;
use async_trait::async_trait;

/// Decides whether a story may generate more nodes.
#[async_trait]
pub trait GenerationQuota: Send + Sync {
    /// Return `LimitExceeded` if the batch must not start.
    async fn check(&self, story: &Story, counts: &StatusCounts) -> Result<(), GenerationError>;

    /// Most nodes the next batch may claim, or `None` for no limit.
    fn headroom(&self, _counts: &StatusCounts) -> Option<usize> {
        None
    }
}

/// No limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

#[async_trait]
impl GenerationQuota for Unlimited {
    async fn check(&self, _story: &Story, _counts: &StatusCounts) -> Result<(), GenerationError> {
        Ok(())
    }
}

/// Caps the number of generation attempts (ready + failed) per story.
#[derive(Debug, Clone, Copy)]
pub struct NodeCap {
    pub max_nodes: u32,
}

impl NodeCap {
    pub fn new(max_nodes: u32) -> Self {
        Self { max_nodes }
    }
}

#[async_trait]
impl GenerationQuota for NodeCap {
    async fn check(&self, _story: &Story, counts: &StatusCounts) -> Result<(), GenerationError> {
        let used = counts.ready + counts.failed;
        if used >= self.max_nodes {
            return Err(GenerationError::LimitExceeded {
                used,
                limit: self.max_nodes,
            });
        }
        Ok(())
    }

    fn headroom(&self, counts: &StatusCounts) -> Option<usize> {
        // Nodes generating elsewhere will count once they settle.
        let committed = counts.ready + counts.failed + counts.generating;
        Some(self.max_nodes.saturating_sub(committed) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChapterBounds, StoryRequest};

    #[tokio::test]
    async fn test_node_cap() {
        let story = Story::new(&StoryRequest::new("p"), ChapterBounds::default());
        let cap = NodeCap::new(3);
        let mut counts = StatusCounts {
            ready: 2,
            pending: 4,
            ..Default::default()
        };
        assert!(cap.check(&story, &counts).await.is_ok());

        counts.failed = 1;
        let err = cap.check(&story, &counts).await.unwrap_err();
        assert!(matches!(err, GenerationError::LimitExceeded { used: 3, limit: 3 }));
        assert!(Unlimited.check(&story, &counts).await.is_ok());
    }

    #[test]
    fn test_node_cap_headroom() {
        let cap = NodeCap::new(5);
        let counts = StatusCounts {
            ready: 2,
            generating: 1,
            pending: 6,
            ..Default::default()
        };
        assert_eq!(cap.headroom(&counts), Some(2));
        assert_eq!(cap.headroom(&StatusCounts { ready: 7, ..Default::default() }), Some(0));
        assert_eq!(Unlimited.headroom(&counts), None);
    }
}
