//! Story records and creation requests.

use super::ids::StoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    /// Created, bible and tree not built yet.
    Pending,
    /// Root exists; nodes are being generated.
    Generating,
    /// No pending nodes remain.
    FullyGenerated,
    /// The story could not be initialized.
    Failed,
}

impl StoryStatus {
    /// Snake-case name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Pending => "pending",
            StoryStatus::Generating => "generating",
            StoryStatus::FullyGenerated => "fully_generated",
            StoryStatus::Failed => "failed",
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StoryStatus::FullyGenerated | StoryStatus::Failed)
    }
}

impl std::fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Style parameters supplied with the premise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleParams {
    /// Art style preset tag, e.g. "watercolor" or "noir".
    pub style_tag: String,
    /// Target audience, e.g. "children" or "adult".
    pub audience: String,
    /// Narrative tone, e.g. "whimsical" or "dark".
    pub tone: String,
}

impl Default for StyleParams {
    fn default() -> Self {
        Self {
            style_tag: "storybook".to_string(),
            audience: "general".to_string(),
            tone: "adventurous".to_string(),
        }
    }
}

/// Depth bounds that drive the ending policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterBounds {
    /// Branches may not end before this depth.
    pub min_chapters: u32,
    /// Branches must end at this depth.
    pub max_chapters: u32,
}

impl ChapterBounds {
    pub fn new(min_chapters: u32, max_chapters: u32) -> Self {
        Self {
            min_chapters,
            max_chapters,
        }
    }

    /// Check the bounds are usable: `1 <= min < max`.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_chapters < 1 {
            return Err("min_chapters must be at least 1".to_string());
        }
        if self.max_chapters <= self.min_chapters {
            return Err(format!(
                "max_chapters ({}) must be greater than min_chapters ({})",
                self.max_chapters, self.min_chapters
            ));
        }
        Ok(())
    }
}

impl Default for ChapterBounds {
    fn default() -> Self {
        Self::new(3, 6)
    }
}

/// A request to create a new story.
#[derive(Debug, Clone)]
pub struct StoryRequest {
    /// Short free-text premise.
    pub premise: String,
    /// Style parameters.
    pub style: StyleParams,
    /// Chapter bounds; engine defaults are used when absent.
    pub bounds: Option<ChapterBounds>,
}

impl StoryRequest {
    /// Create a request with default style.
    pub fn new(premise: impl Into<String>) -> Self {
        Self {
            premise: premise.into(),
            style: StyleParams::default(),
            bounds: None,
        }
    }

    pub fn with_style_tag(mut self, tag: impl Into<String>) -> Self {
        self.style.style_tag = tag.into();
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.style.audience = audience.into();
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.style.tone = tone.into();
        self
    }

    pub fn with_bounds(mut self, min_chapters: u32, max_chapters: u32) -> Self {
        self.bounds = Some(ChapterBounds::new(min_chapters, max_chapters));
        self
    }
}

/// A story: one premise and the tree generated from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    /// Title taken from the bible once generated.
    pub title: Option<String>,
    pub premise: String,
    pub style: StyleParams,
    pub bounds: ChapterBounds,
    pub status: StoryStatus,
    /// Completion percentage, 0-100.
    pub progress: u8,
    /// Nodes in `ready` state.
    pub generated_nodes: u32,
    /// All nodes that exist in the tree, whatever their state.
    pub planned_nodes: u32,
    /// Why initialization failed, when it did.
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    /// Create a pending story from a request.
    pub fn new(request: &StoryRequest, bounds: ChapterBounds) -> Self {
        let now = Utc::now();
        Self {
            id: StoryId::new(),
            title: None,
            premise: request.premise.trim().to_string(),
            style: request.style.clone(),
            bounds,
            status: StoryStatus::Pending,
            progress: 0,
            generated_nodes: 0,
            planned_nodes: 0,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Display name: the title, or the start of the premise.
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => self.premise.chars().take(40).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_validation() {
        assert!(ChapterBounds::new(3, 6).validate().is_ok());
        assert!(ChapterBounds::new(0, 6).validate().is_err());
        assert!(ChapterBounds::new(4, 4).validate().is_err());
    }

    #[test]
    fn test_story_from_request() {
        let request = StoryRequest::new("  A lighthouse keeper finds a map  ")
            .with_style_tag("watercolor")
            .with_tone("mysterious");
        let story = Story::new(&request, ChapterBounds::default());

        assert_eq!(story.premise, "A lighthouse keeper finds a map");
        assert_eq!(story.style.style_tag, "watercolor");
        assert_eq!(story.status, StoryStatus::Pending);
        assert_eq!(story.display_name(), "A lighthouse keeper finds a map");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&StoryStatus::FullyGenerated).unwrap();
        assert_eq!(json, "\"fully_generated\"");
        assert!(StoryStatus::FullyGenerated.is_terminal());
        assert!(!StoryStatus::Generating.is_terminal());
    }
}
