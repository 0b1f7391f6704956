//! Depth-based ending policy.
//!
//! | depth                      | directive          |
//! |----------------------------|--------------------|
//! | `depth < min`              | `ForceContinue`    |
//! | `min <= depth < wrap`      | `ContinueNormally` |
//! | `wrap <= depth < max`      | `EncourageWrap`    |
//! | `depth >= max`             | `ForceEnd`         |
//!
//! `wrap = max(min, max - ceil((max - min) / 3))`.

use crate::model::ChapterBounds;
use serde::{Deserialize, Serialize};

/// Instruction to the chapter generator about whether the branch may end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    ForceContinue,
    ContinueNormally,
    EncourageWrap,
    ForceEnd,
}

impl Directive {
    /// Minimum number of choices a non-ending chapter must carry.
    pub fn min_choices(self) -> usize {
        match self {
            Directive::ForceContinue => 2,
            _ => 1,
        }
    }

    /// Whether the chapter is allowed to end the branch.
    pub fn allows_ending(self) -> bool {
        !matches!(self, Directive::ForceContinue)
    }

    /// Instructions appended to the chapter prompt.
    pub fn instructions(self) -> &'static str {
        match self {
            Directive::ForceContinue => {
                "This chapter MUST NOT end the story. Set \"isEnding\" to false and offer \
                 2 or 3 meaningfully different choices."
            }
            Directive::ContinueNormally => {
                "Continue the story naturally. End it only if this branch has reached a \
                 satisfying conclusion; otherwise offer 2 or 3 choices."
            }
            Directive::EncourageWrap => {
                "The story is nearing its end. Begin resolving open threads. Prefer ending \
                 this branch; if you continue, offer at most 2 choices that lead toward a \
                 conclusion."
            }
            Directive::ForceEnd => {
                "This chapter MUST end the story. Set \"isEnding\" to true, choose an \
                 \"endingType\", resolve the branch, and return an empty \"choices\" array."
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Directive::ForceContinue => "force_continue",
            Directive::ContinueNormally => "continue_normally",
            Directive::EncourageWrap => "encourage_wrap",
            Directive::ForceEnd => "force_end",
        }
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Depth at which the policy starts encouraging endings.
pub fn wrap_threshold(min_chapters: u32, max_chapters: u32) -> u32 {
    let span = max_chapters.saturating_sub(min_chapters);
    let wrap = max_chapters.saturating_sub(span.div_ceil(3));
    wrap.max(min_chapters)
}

/// Evaluate the policy for a node depth.
pub fn evaluate(depth: u32, min_chapters: u32, max_chapters: u32) -> Directive {
    if depth >= max_chapters {
        Directive::ForceEnd
    } else if depth < min_chapters {
        Directive::ForceContinue
    } else if depth < wrap_threshold(min_chapters, max_chapters) {
        Directive::ContinueNormally
    } else {
        Directive::EncourageWrap
    }
}

/// The ending policy for one story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndingPolicy {
    bounds: ChapterBounds,
}

impl EndingPolicy {
    pub fn new(bounds: ChapterBounds) -> Self {
        Self { bounds }
    }

    pub fn directive(&self, depth: u32) -> Directive {
        evaluate(depth, self.bounds.min_chapters, self.bounds.max_chapters)
    }

    pub fn wrap_threshold(&self) -> u32 {
        wrap_threshold(self.bounds.min_chapters, self.bounds.max_chapters)
    }

    /// Whether a node at `depth` is forced to be an ending.
    pub fn must_end(&self, depth: u32) -> bool {
        depth >= self.bounds.max_chapters
    }
}
