//! Chapter generation and validation against the ending policy.

use super::payload::{null_as_default, parse_payload};
use crate::context_chain::render_story_so_far;
use crate::ending::{Directive, EndingPolicy};
use crate::error::GenerationError;
use crate::model::{ContextEntry, EmotionalWeight, EndingType, StoryBible, StoryNode};
use crate::services::{RequestKind, TextGenerator, TextRequest};
use serde::Deserialize;
use std::sync::Arc;

/// Most choices a chapter may offer.
pub const MAX_CHOICES: usize = 3;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawChapter {
    #[serde(deserialize_with = "null_as_default")]
    title: String,
    #[serde(deserialize_with = "null_as_default")]
    content: String,
    #[serde(deserialize_with = "null_as_default")]
    choices: Vec<RawChoice>,
    #[serde(deserialize_with = "null_as_default")]
    is_ending: bool,
    ending_type: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    chapter_summary: String,
    #[serde(deserialize_with = "null_as_default")]
    characters_present: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    panel_description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawChoice {
    #[serde(deserialize_with = "null_as_default")]
    text: String,
    #[serde(deserialize_with = "null_as_default")]
    consequence_hint: String,
    #[serde(deserialize_with = "null_as_default")]
    emotional_weight: String,
}

/// A choice as returned by the generator, before it becomes an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceDraft {
    pub text: String,
    pub consequence_hint: String,
    pub emotional_weight: EmotionalWeight,
}

/// A validated chapter.
#[derive(Debug, Clone)]
pub struct ChapterDraft {
    pub title: String,
    pub content: String,
    pub summary: String,
    pub characters_present: Vec<String>,
    pub panel_description: String,
    pub is_ending: bool,
    pub ending_type: Option<EndingType>,
    pub choices: Vec<ChoiceDraft>,
}

impl ChapterDraft {
    /// Copy the generated text fields onto `node`.
    pub fn apply(&self, node: &mut StoryNode) {
        node.title = self.title.clone();
        node.content = self.content.clone();
        node.summary = self.summary.clone();
        node.characters_present = self.characters_present.clone();
        node.is_ending = self.is_ending;
        node.ending_type = self.ending_type;
    }
}

/// Check a raw chapter against the directive for its depth.
///
/// Past max depth the chapter is converted to an ending whatever the
/// generator said. Elsewhere a wrong choice count fails the chapter.
fn validate(
    raw: RawChapter,
    node_key: &str,
    depth: u32,
    directive: Directive,
    policy: &EndingPolicy,
) -> Result<ChapterDraft, GenerationError> {
    let content = raw.content.trim().to_string();
    if content.is_empty() {
        return Err(GenerationError::Validation(
            "chapter has no content".to_string(),
        ));
    }

    let mut choices: Vec<ChoiceDraft> = raw
        .choices
        .into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .map(|c| ChoiceDraft {
            text: c.text.trim().to_string(),
            consequence_hint: c.consequence_hint.trim().to_string(),
            emotional_weight: EmotionalWeight::from_label(&c.emotional_weight),
        })
        .collect();
    let mut is_ending = raw.is_ending;

    if policy.must_end(depth) {
        if !is_ending || !choices.is_empty() {
            tracing::warn!(
                node_key,
                depth,
                returned_choices = choices.len(),
                "forcing ending at max depth"
            );
        }
        is_ending = true;
        choices.clear();
    } else if directive == Directive::ForceContinue {
        if is_ending {
            return Err(GenerationError::InvariantViolation(format!(
                "chapter {node_key} ended before the minimum depth"
            )));
        }
        if choices.len() < directive.min_choices() {
            return Err(GenerationError::InvariantViolation(format!(
                "chapter {node_key} returned {} choices, at least {} required",
                choices.len(),
                directive.min_choices()
            )));
        }
    } else if is_ending && !choices.is_empty() {
        return Err(GenerationError::InvariantViolation(format!(
            "ending chapter {node_key} returned {} choices",
            choices.len()
        )));
    } else if !is_ending && choices.is_empty() {
        return Err(GenerationError::InvariantViolation(format!(
            "chapter {node_key} neither ends nor offers choices"
        )));
    }

    if choices.len() > MAX_CHOICES {
        tracing::warn!(node_key, returned = choices.len(), "truncating choices to 3");
        choices.truncate(MAX_CHOICES);
    }

    let ending_type = if is_ending {
        Some(
            raw.ending_type
                .as_deref()
                .and_then(EndingType::from_label)
                .unwrap_or(EndingType::Open),
        )
    } else {
        None
    };

    let title = match raw.title.trim() {
        "" => format!("Chapter {}", depth + 1),
        t => t.to_string(),
    };

    Ok(ChapterDraft {
        title,
        content,
        summary: raw.chapter_summary.trim().to_string(),
        characters_present: raw
            .characters_present
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        panel_description: raw.panel_description.trim().to_string(),
        is_ending,
        ending_type,
        choices,
    })
}

/// Parse and validate a chapter from raw generator text.
pub fn parse_chapter(
    text: &str,
    node_key: &str,
    depth: u32,
    directive: Directive,
    policy: &EndingPolicy,
) -> Result<ChapterDraft, GenerationError> {
    let raw: RawChapter =
        parse_payload(text).map_err(|e| GenerationError::Validation(e.to_string()))?;
    validate(raw, node_key, depth, directive, policy)
}

/// Writes chapter text through the text generation service.
pub struct ChapterWriter {
    text: Arc<dyn TextGenerator>,
    temperature: f32,
    max_tokens: usize,
}

impl ChapterWriter {
    pub fn new(text: Arc<dyn TextGenerator>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            text,
            temperature,
            max_tokens,
        }
    }

    fn build_system_prompt(bible: &StoryBible) -> String {
        let mut prompt = String::new();
        prompt.push_str(include_str!("prompts/chapter_system.txt"));
        prompt.push_str("\n\n## Story Bible\n");
        prompt.push_str(&bible.prompt_summary());
        prompt
    }

    fn build_user_prompt(
        node: &StoryNode,
        chain: &[ContextEntry],
        choice_text: Option<&str>,
        directive: Directive,
    ) -> String {
        let mut prompt = String::new();
        prompt.push_str("## Story So Far\n");
        prompt.push_str(&render_story_so_far(chain));

        if let Some(choice) = choice_text {
            prompt.push_str("\n## Reader's Choice\n");
            prompt.push_str(choice);
            prompt.push('\n');
        }

        prompt.push_str(&format!("\n## This Chapter\nChapter {}.\n", node.depth + 1));
        prompt.push_str(directive.instructions());
        prompt.push('\n');
        prompt
    }

    /// Write and validate the chapter for `node`.
    pub async fn write(
        &self,
        bible: &StoryBible,
        node: &StoryNode,
        chain: &[ContextEntry],
        choice_text: Option<&str>,
        directive: Directive,
        policy: &EndingPolicy,
    ) -> Result<ChapterDraft, GenerationError> {
        let request = TextRequest {
            kind: RequestKind::Chapter {
                node_key: node.key.clone(),
                depth: node.depth,
                directive,
            },
            system: Self::build_system_prompt(bible),
            user: Self::build_user_prompt(node, chain, choice_text, directive),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        tracing::debug!(
            node_key = %node.key,
            system_len = request.system.len(),
            user_len = request.user.len(),
            chain_len = chain.len(),
            "requesting chapter"
        );

        let text = self.text.generate(request).await?;
        parse_chapter(&text, &node.key, node.depth, directive, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChapterBounds;
    use crate::testing::chapter_json;

    fn policy() -> EndingPolicy {
        EndingPolicy::new(ChapterBounds::new(3, 6))
    }

    fn parse(text: &str, depth: u32) -> Result<ChapterDraft, GenerationError> {
        let policy = policy();
        parse_chapter(text, "1.1", depth, policy.directive(depth), &policy)
    }

    #[test]
    fn test_valid_branching_chapter() {
        let draft = parse(&chapter_json("The Cove", 2, false), 1).unwrap();
        assert_eq!(draft.title, "The Cove");
        assert_eq!(draft.choices.len(), 2);
        assert!(!draft.is_ending);
        assert_eq!(draft.ending_type, None);
    }

    #[test]
    fn test_force_continue_rejects_endings_and_single_choice() {
        let ended = parse(&chapter_json("End", 0, true), 1).unwrap_err();
        assert!(matches!(ended, GenerationError::InvariantViolation(_)));

        let single = parse(&chapter_json("One", 1, false), 1).unwrap_err();
        assert!(matches!(single, GenerationError::InvariantViolation(_)));

        let empty = parse(&chapter_json("None", 0, false), 1).unwrap_err();
        assert!(matches!(empty, GenerationError::InvariantViolation(_)));
    }

    #[test]
    fn test_cardinality_after_minimum_depth() {
        assert!(parse(&chapter_json("One", 1, false), 3).is_ok());
        assert!(parse(&chapter_json("End", 0, true), 4).is_ok());

        let dead_end = parse(&chapter_json("Stuck", 0, false), 4).unwrap_err();
        assert!(matches!(dead_end, GenerationError::InvariantViolation(_)));

        let ending_with_choices = parse(&chapter_json("Both", 2, true), 4).unwrap_err();
        assert!(matches!(ending_with_choices, GenerationError::InvariantViolation(_)));
    }

    #[test]
    fn test_backstop_forces_ending_at_max_depth() {
        let draft = parse(&chapter_json("Onward", 3, false), 6).unwrap();
        assert!(draft.is_ending);
        assert!(draft.choices.is_empty());
        assert_eq!(draft.ending_type, Some(EndingType::Open));
    }

    #[test]
    fn test_null_fields_read_as_empty() {
        let text = r#"{"content":"It was over.","choices":null,"isEnding":true,"chapterSummary":null}"#;
        let draft = parse(text, 4).unwrap();
        assert!(draft.is_ending);
        assert!(draft.choices.is_empty());
        assert!(draft.summary.is_empty());
        assert_eq!(draft.content, "It was over.");

        let text = r#"{"title":null,"content":"Two paths.","choices":[
            {"text":"Left","consequenceHint":null,"emotionalWeight":null},
            {"text":"Right"}
        ],"charactersPresent":null}"#;
        let draft = parse(text, 2).unwrap();
        assert_eq!(draft.choices.len(), 2);
        assert!(draft.characters_present.is_empty());
    }

    #[test]
    fn test_truncates_to_three_choices() {
        let draft = parse(&chapter_json("Crossroads", 5, false), 2).unwrap();
        assert_eq!(draft.choices.len(), MAX_CHOICES);
    }

    #[test]
    fn test_unparsable_is_validation_error() {
        let err = parse("I'd rather not.", 1).unwrap_err();
        assert!(matches!(err, GenerationError::Validation(_)));
        let empty = parse(r#"{"title": "Blank", "content": "  "}"#, 4).unwrap_err();
        assert!(matches!(empty, GenerationError::Validation(_)));
    }

    #[test]
    fn test_ending_type_and_defaults() {
        let text = r#"{"content": "It was over.", "isEnding": true, "endingType": "bittersweet",
                       "choices": [], "charactersPresent": [" Mira ", ""]}"#;
        let draft = parse(text, 5).unwrap();
        assert_eq!(draft.ending_type, Some(EndingType::Bittersweet));
        assert_eq!(draft.title, "Chapter 6");
        assert_eq!(draft.characters_present, vec!["Mira".to_string()]);
    }
}
