//! Generation of bibles, chapters and chapter media.

mod bible;
mod chapter;
mod media;
mod payload;

pub use bible::{parse_bible, style_preset, BibleGenerator};
pub use chapter::{parse_chapter, ChapterDraft, ChapterWriter, ChoiceDraft, MAX_CHOICES};
pub use media::{MediaAssets, MediaPipeline, MediaSettings};
pub use payload::{extract_json, parse_payload, PayloadError};

use crate::context_chain;
use crate::ending::{Directive, EndingPolicy};
use crate::error::GenerationError;
use crate::model::{StoryBible, StoryChoice, StoryNode};
use crate::store::ChildPlacement;

/// A generated chapter ready to be persisted.
#[derive(Debug, Clone)]
pub struct GeneratedChapter {
    /// The node with text and media filled in. Status is unchanged.
    pub node: StoryNode,
    /// Choices to materialize as children. Empty for endings.
    pub choices: Vec<ChoiceDraft>,
}

impl GeneratedChapter {
    /// Pending children and their edges, one per choice.
    ///
    /// Each child's chain is this node's chain plus this node's digest.
    pub fn placements(&self) -> Vec<ChildPlacement> {
        let chain = context_chain::extend(&self.node);
        self.choices
            .iter()
            .enumerate()
            .map(|(order, draft)| {
                let choice = StoryChoice::new(
                    &self.node,
                    order as u32,
                    draft.text.clone(),
                    draft.consequence_hint.clone(),
                    draft.emotional_weight,
                );
                let node = StoryNode::placeholder(&self.node, &choice, chain.clone());
                ChildPlacement { choice, node }
            })
            .collect()
    }
}

/// Content, then illustration and narration.
///
/// Shared by the tree builder (root) and the queue processor (everything
/// else) so both follow the same validation and degradation rules.
pub struct ChapterPipeline {
    writer: ChapterWriter,
    media: MediaPipeline,
}

impl ChapterPipeline {
    pub fn new(writer: ChapterWriter, media: MediaPipeline) -> Self {
        Self { writer, media }
    }

    /// Generate the chapter for `node`.
    ///
    /// `node.context_chain` must already be resolved. Only content errors
    /// are returned; media failures leave the references empty.
    pub async fn produce(
        &self,
        bible: &StoryBible,
        node: &StoryNode,
        choice_text: Option<&str>,
        directive: Directive,
        policy: &EndingPolicy,
    ) -> Result<GeneratedChapter, GenerationError> {
        let draft = self
            .writer
            .write(
                bible,
                node,
                &node.context_chain,
                choice_text,
                directive,
                policy,
            )
            .await?;

        let mut node = node.clone();
        draft.apply(&mut node);

        let assets = self
            .media
            .render(bible, &node, &node.context_chain, &draft.panel_description)
            .await;
        node.image_url = assets.image_url;
        node.audio_url = assets.audio_url;

        Ok(GeneratedChapter {
            node,
            choices: draft.choices,
        })
    }
}
