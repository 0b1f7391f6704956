//! Story data model.
//!
//! Stories, bibles, nodes and choices are plain serializable records; the
//! store owns them and the engine moves them through their lifecycles.

mod bible;
mod ids;
mod node;
mod story;

pub use bible::{ArtStyle, Character, NarrativeOutline, Setting, StoryBible};
pub use ids::{ChoiceId, NodeId, StoryId};
pub use node::{
    ContextEntry, EmotionalWeight, EndingType, NodeStatus, StoryChoice, StoryNode, ROOT_KEY,
};
pub use story::{ChapterBounds, Story, StoryRequest, StoryStatus, StyleParams};
