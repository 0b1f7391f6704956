//! Tree nodes (chapters) and the choice edges between them.
//!
//! The tree is a flat table: nodes point at their incoming choice, choices
//! point at both endpoints. Nothing holds in-memory parent/child pointers,
//! so generation can stop and resume between invocations.

use super::ids::{ChoiceId, NodeId, StoryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key of the root node. Children append `.N` (1-based) to their parent's key.
pub const ROOT_KEY: &str = "1";

/// Generation status of a node.
///
/// Transitions only move forward: `pending -> generating -> ready | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

impl NodeStatus {
    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Pending, NodeStatus::Generating)
                | (NodeStatus::Generating, NodeStatus::Ready)
                | (NodeStatus::Generating, NodeStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Ready | NodeStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Generating => "generating",
            NodeStatus::Ready => "ready",
            NodeStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How emotionally significant a choice is.
///
/// Mapped to a numeric priority when the edge is created; the number is
/// stored, so changing this table never reorders scheduled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalWeight {
    Pivotal,
    High,
    Medium,
    Low,
}

impl EmotionalWeight {
    /// Parse a generator label. Unknown labels are `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "pivotal" | "critical" | "climactic" => EmotionalWeight::Pivotal,
            "high" | "intense" | "strong" => EmotionalWeight::High,
            "low" | "light" | "minor" => EmotionalWeight::Low,
            _ => EmotionalWeight::Medium,
        }
    }

    /// Scheduling priority; lower runs first.
    pub fn priority(self) -> u8 {
        match self {
            EmotionalWeight::Pivotal => 1,
            EmotionalWeight::High => 2,
            EmotionalWeight::Medium => 3,
            EmotionalWeight::Low => 4,
        }
    }
}

/// How a branch ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndingType {
    Triumphant,
    Tragic,
    Bittersweet,
    Mysterious,
    Open,
}

impl EndingType {
    /// Parse a generator label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "triumphant" | "happy" | "good" | "victory" => Some(EndingType::Triumphant),
            "tragic" | "bad" | "sad" => Some(EndingType::Tragic),
            "bittersweet" | "mixed" => Some(EndingType::Bittersweet),
            "mysterious" | "twist" | "cliffhanger" => Some(EndingType::Mysterious),
            "open" | "neutral" => Some(EndingType::Open),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndingType::Triumphant => "triumphant",
            EndingType::Tragic => "tragic",
            EndingType::Bittersweet => "bittersweet",
            EndingType::Mysterious => "mysterious",
            EndingType::Open => "open",
        }
    }
}

/// One ancestor's digest in a node's context chain.
///
/// Never holds the full chapter text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub key: String,
    pub title: String,
    pub summary: String,
    pub characters_present: Vec<String>,
}

/// A chapter in the story tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryNode {
    pub id: NodeId,
    pub story_id: StoryId,
    /// Dotted path key, e.g. `1.2.1`.
    pub key: String,
    pub status: NodeStatus,
    pub depth: u32,
    /// Per-story creation sequence, assigned by the store.
    pub order_index: u64,
    /// Priority copied from the incoming choice at creation.
    pub priority: u8,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub characters_present: Vec<String>,
    pub is_ending: bool,
    pub ending_type: Option<EndingType>,
    /// Ancestor digests, one per depth level above this node.
    pub context_chain: Vec<ContextEntry>,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    /// Incoming edge; `None` only for the root.
    pub parent_choice: Option<ChoiceId>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// When the node entered `generating`.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoryNode {
    fn blank(story_id: StoryId, key: String, depth: u32) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::new(),
            story_id,
            key,
            status: NodeStatus::Pending,
            depth,
            order_index: 0,
            priority: EmotionalWeight::Medium.priority(),
            title: String::new(),
            content: String::new(),
            summary: String::new(),
            characters_present: Vec::new(),
            is_ending: false,
            ending_type: None,
            context_chain: Vec::new(),
            image_url: None,
            audio_url: None,
            parent_choice: None,
            failure_reason: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A root node at depth 0 with no incoming choice.
    pub fn root(story_id: StoryId) -> Self {
        let mut node = Self::blank(story_id, ROOT_KEY.to_string(), 0);
        node.priority = EmotionalWeight::Pivotal.priority();
        node
    }

    /// A root already claimed for generation at `at`.
    ///
    /// Inserted in this state so no batch can pick it up as pending.
    pub fn claimed_root(story_id: StoryId, at: DateTime<Utc>) -> Self {
        let mut node = Self::root(story_id);
        node.status = NodeStatus::Generating;
        node.claimed_at = Some(at);
        node.updated_at = at;
        node
    }

    /// A placeholder child reserving the tree position behind `choice`.
    ///
    /// `context_chain` must already include the parent's digest.
    pub fn placeholder(parent: &StoryNode, choice: &StoryChoice, context_chain: Vec<ContextEntry>) -> Self {
        let key = format!("{}.{}", parent.key, choice.order + 1);
        let mut node = Self::blank(parent.story_id, key, parent.depth + 1);
        node.id = choice.to_node;
        node.priority = choice.priority;
        node.parent_choice = Some(choice.id);
        node.context_chain = context_chain;
        node
    }

    pub fn is_root(&self) -> bool {
        self.parent_choice.is_none()
    }
}

/// A reader choice: the edge from one node to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryChoice {
    pub id: ChoiceId,
    pub story_id: StoryId,
    pub from_node: NodeId,
    /// Placeholder node created together with this edge.
    pub to_node: NodeId,
    pub text: String,
    pub consequence_hint: String,
    pub emotional_weight: EmotionalWeight,
    /// Numeric priority recorded at creation.
    pub priority: u8,
    /// Position among the parent's choices, 0-based.
    pub order: u32,
}

impl StoryChoice {
    /// Create an edge from `from` with a freshly reserved target node id.
    pub fn new(
        from: &StoryNode,
        order: u32,
        text: impl Into<String>,
        consequence_hint: impl Into<String>,
        emotional_weight: EmotionalWeight,
    ) -> Self {
        Self {
            id: ChoiceId::new(),
            story_id: from.story_id,
            from_node: from.id,
            to_node: NodeId::new(),
            text: text.into(),
            consequence_hint: consequence_hint.into(),
            emotional_weight,
            priority: emotional_weight.priority(),
            order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use NodeStatus::*;
        assert!(Pending.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Ready));
        assert!(Generating.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Ready));
        assert!(!Generating.can_transition_to(Pending));
        assert!(!Ready.can_transition_to(Generating));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Ready.can_transition_to(Failed));
    }

    #[test]
    fn test_emotional_weight_priority_order() {
        assert!(EmotionalWeight::Pivotal.priority() < EmotionalWeight::High.priority());
        assert!(EmotionalWeight::High.priority() < EmotionalWeight::Medium.priority());
        assert!(EmotionalWeight::Medium.priority() < EmotionalWeight::Low.priority());
        assert_eq!(EmotionalWeight::from_label("CRITICAL"), EmotionalWeight::Pivotal);
        assert_eq!(EmotionalWeight::from_label("whatever"), EmotionalWeight::Medium);
    }

    #[test]
    fn test_ending_type_labels() {
        assert_eq!(EndingType::from_label("Happy"), Some(EndingType::Triumphant));
        assert_eq!(EndingType::from_label("bittersweet"), Some(EndingType::Bittersweet));
        assert_eq!(EndingType::from_label("???"), None);
    }

    #[test]
    fn test_placeholder_keys_and_depth() {
        let root = StoryNode::root(StoryId::new());
        let choice = StoryChoice::new(&root, 1, "Open the door", "", EmotionalWeight::High);
        let child = StoryNode::placeholder(&root, &choice, Vec::new());

        assert_eq!(root.key, ROOT_KEY);
        assert!(root.is_root());
        assert_eq!(child.key, "1.2");
        assert_eq!(child.depth, 1);
        assert_eq!(child.id, choice.to_node);
        assert_eq!(child.parent_choice, Some(choice.id));
        assert_eq!(child.priority, EmotionalWeight::High.priority());
        assert_eq!(child.status, NodeStatus::Pending);
    }
}
