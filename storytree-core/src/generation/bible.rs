//! Story bible generation.
//!
//! One text request per story. The generator's JSON is parsed into a loose
//! raw schema, checked for the sections every later call depends on, and
//! completed with synthesized prompt fragments.

use super::payload::{null_as_default, parse_payload};
use crate::error::GenerationError;
use crate::model::{
    ArtStyle, Character, NarrativeOutline, Setting, Story, StoryBible,
};
use crate::services::{RequestKind, TextGenerator, TextRequest};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawBible {
    #[serde(deserialize_with = "null_as_default")]
    title: String,
    #[serde(deserialize_with = "null_as_default")]
    characters: Vec<RawCharacter>,
    #[serde(deserialize_with = "null_as_default")]
    setting: RawSetting,
    #[serde(deserialize_with = "null_as_default")]
    art_style: RawArtStyle,
    #[serde(deserialize_with = "null_as_default")]
    narrative: RawNarrative,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawCharacter {
    #[serde(deserialize_with = "null_as_default")]
    name: String,
    #[serde(deserialize_with = "null_as_default")]
    role: String,
    #[serde(deserialize_with = "null_as_default")]
    appearance: String,
    #[serde(deserialize_with = "null_as_default")]
    personality: String,
    #[serde(deserialize_with = "null_as_default")]
    arc: String,
    #[serde(deserialize_with = "null_as_default")]
    visual_descriptor: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawSetting {
    #[serde(deserialize_with = "null_as_default")]
    world: String,
    #[serde(deserialize_with = "null_as_default")]
    era: String,
    #[serde(deserialize_with = "null_as_default")]
    atmosphere: String,
    #[serde(alias = "locations", deserialize_with = "null_as_default")]
    key_locations: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawArtStyle {
    #[serde(deserialize_with = "null_as_default")]
    medium: String,
    #[serde(deserialize_with = "null_as_default")]
    palette: String,
    #[serde(deserialize_with = "null_as_default")]
    lighting: String,
    #[serde(deserialize_with = "null_as_default")]
    influences: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    style_prefix: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawNarrative {
    #[serde(deserialize_with = "null_as_default")]
    logline: String,
    #[serde(deserialize_with = "null_as_default")]
    themes: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    possible_endings: Vec<String>,
}

/// Image prompt prefix for a style tag.
pub fn style_preset(style_tag: &str) -> &'static str {
    match style_tag.trim().to_lowercase().as_str() {
        "watercolor" => "soft watercolor illustration, loose washes, visible paper texture",
        "anime" => "anime illustration, clean line art, cel shading, expressive eyes",
        "comic" => "comic book panel, bold ink outlines, halftone shading, dynamic composition",
        "storybook" => "classic children's storybook illustration, warm gouache, gentle shapes",
        "noir" => "film noir illustration, high contrast black and white, deep shadows",
        "realistic" => "realistic digital painting, detailed textures, cinematic lighting",
        _ => "detailed digital illustration, cohesive palette",
    }
}

/// Title derived from the premise when the generator gives none.
fn title_from_premise(premise: &str) -> String {
    let words: Vec<&str> = premise.split_whitespace().take(6).collect();
    if words.is_empty() {
        return "Untitled Story".to_string();
    }
    let mut title = words.join(" ");
    title = title
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string();
    let mut chars = title.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Untitled Story".to_string(),
    }
}

fn trimmed(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Check essentials and complete a raw bible for `story`.
fn assemble(raw: RawBible, story: &Story) -> Result<StoryBible, GenerationError> {
    if raw.characters.is_empty() {
        return Err(GenerationError::BibleInvalid("no characters".to_string()));
    }

    let mut characters = Vec::with_capacity(raw.characters.len());
    let mut visual_descriptors = BTreeMap::new();
    for raw_char in raw.characters {
        let name = raw_char.name.trim().to_string();
        if name.is_empty() {
            return Err(GenerationError::BibleInvalid(
                "character without a name".to_string(),
            ));
        }
        let appearance = raw_char.appearance.trim().to_string();
        let descriptor = match raw_char.visual_descriptor.trim() {
            "" => appearance.clone(),
            d => d.to_string(),
        };
        if descriptor.is_empty() {
            return Err(GenerationError::BibleInvalid(format!(
                "character {name} has no appearance"
            )));
        }
        visual_descriptors.insert(name.clone(), descriptor);
        characters.push(Character {
            name,
            role: raw_char.role.trim().to_string(),
            appearance,
            personality: raw_char.personality.trim().to_string(),
            arc: raw_char.arc.trim().to_string(),
        });
    }

    let setting = Setting {
        world: raw.setting.world.trim().to_string(),
        era: raw.setting.era.trim().to_string(),
        atmosphere: raw.setting.atmosphere.trim().to_string(),
        locations: trimmed(raw.setting.key_locations),
    };
    if setting.is_empty() {
        return Err(GenerationError::BibleInvalid("empty setting".to_string()));
    }

    let art_style = ArtStyle {
        medium: raw.art_style.medium.trim().to_string(),
        palette: raw.art_style.palette.trim().to_string(),
        lighting: raw.art_style.lighting.trim().to_string(),
        influences: trimmed(raw.art_style.influences),
    };
    if art_style.is_empty() {
        return Err(GenerationError::BibleInvalid("empty art style".to_string()));
    }

    let narrative = NarrativeOutline {
        logline: raw.narrative.logline.trim().to_string(),
        themes: trimmed(raw.narrative.themes),
        min_chapters: story.bounds.min_chapters,
        max_chapters: story.bounds.max_chapters,
        possible_endings: trimmed(raw.narrative.possible_endings),
    };
    if narrative.is_empty() {
        return Err(GenerationError::BibleInvalid(
            "empty narrative outline".to_string(),
        ));
    }

    let style_prefix = match raw.art_style.style_prefix.trim() {
        "" => {
            let mut prefix = style_preset(&story.style.style_tag).to_string();
            if !art_style.palette.is_empty() {
                prefix.push_str(&format!(", {} palette", art_style.palette));
            }
            if !art_style.lighting.is_empty() {
                prefix.push_str(&format!(", {}", art_style.lighting));
            }
            prefix
        }
        p => p.to_string(),
    };

    let title = match raw.title.trim() {
        "" => title_from_premise(&story.premise),
        t => t.to_string(),
    };

    Ok(StoryBible {
        title,
        characters,
        setting,
        art_style,
        narrative,
        style_prefix,
        visual_descriptors,
    })
}

/// Parse and complete a bible from raw generator text.
pub fn parse_bible(text: &str, story: &Story) -> Result<StoryBible, GenerationError> {
    let raw: RawBible =
        parse_payload(text).map_err(|e| GenerationError::BibleInvalid(e.to_string()))?;
    assemble(raw, story)
}

/// Generates the story bible.
pub struct BibleGenerator {
    text: Arc<dyn TextGenerator>,
    temperature: f32,
    max_tokens: usize,
}

impl BibleGenerator {
    pub fn new(text: Arc<dyn TextGenerator>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            text,
            temperature,
            max_tokens,
        }
    }

    fn build_user_prompt(story: &Story) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!("Premise: {}\n", story.premise));
        prompt.push_str(&format!("Style tag: {}\n", story.style.style_tag));
        prompt.push_str(&format!("Audience: {}\n", story.style.audience));
        prompt.push_str(&format!("Tone: {}\n", story.style.tone));
        prompt.push_str(&format!(
            "Every branch lasts between {} and {} chapters.\n",
            story.bounds.min_chapters, story.bounds.max_chapters
        ));
        prompt
    }

    /// Generate the bible for `story`.
    pub async fn generate(&self, story: &Story) -> Result<StoryBible, GenerationError> {
        let request = TextRequest {
            kind: RequestKind::Bible,
            system: include_str!("prompts/bible_system.txt").to_string(),
            user: Self::build_user_prompt(story),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let text = self.text.generate(request).await?;
        tracing::debug!(story_id = %story.id, response_len = text.len(), "bible response received");

        let bible = parse_bible(&text, story)?;
        tracing::info!(
            story_id = %story.id,
            title = %bible.title,
            characters = bible.characters.len(),
            "story bible generated"
        );
        Ok(bible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChapterBounds, StoryRequest};
    use crate::testing::{sample_bible_json, ScriptedTextGenerator};

    fn story() -> Story {
        let request = StoryRequest::new("a lighthouse keeper's daughter finds a map drawn by the tide")
            .with_style_tag("watercolor");
        Story::new(&request, ChapterBounds::new(2, 5))
    }

    #[test]
    fn test_parse_fenced_bible_overrides_bounds() {
        let text = format!("Here is the bible:\n```json\n{}\n```", sample_bible_json());
        let bible = parse_bible(&text, &story()).unwrap();

        assert_eq!(bible.narrative.min_chapters, 2);
        assert_eq!(bible.narrative.max_chapters, 5);
        for c in &bible.characters {
            assert!(bible.descriptor_for(&c.name).is_some());
        }
    }

    #[test]
    fn test_synthesizes_missing_fragments() {
        let text = r#"{
            "characters": [{"name": "Mira", "appearance": "copper braid, green coat"}],
            "setting": {"world": "A storm coast"},
            "artStyle": {"medium": "watercolor", "palette": "sea greens"},
            "narrative": {"logline": "A girl follows the tide."}
        }"#;
        let bible = parse_bible(text, &story()).unwrap();

        assert_eq!(bible.title, "A lighthouse keeper's daughter finds a");
        assert_eq!(bible.descriptor_for("Mira"), Some("copper braid, green coat"));
        assert!(bible.style_prefix.starts_with("soft watercolor illustration"));
        assert!(bible.style_prefix.contains("sea greens palette"));
    }

    #[test]
    fn test_null_sections_read_as_empty() {
        let text = r#"{
            "title": null,
            "characters": [{"name": "Mira", "appearance": "copper braid", "arc": null}],
            "setting": {"world": "A storm coast", "era": null, "keyLocations": null},
            "artStyle": {"medium": "watercolor", "influences": null},
            "narrative": {"logline": "A girl follows the tide.", "themes": null}
        }"#;
        let bible = parse_bible(text, &story()).unwrap();
        assert!(bible.setting.locations.is_empty());
        assert!(bible.narrative.themes.is_empty());
        assert!(!bible.title.is_empty());
    }

    #[test]
    fn test_missing_essentials_are_invalid() {
        let no_characters = r#"{"setting": {"world": "x"}, "artStyle": {"medium": "ink"}, "narrative": {"logline": "y"}}"#;
        let no_setting = r#"{"characters": [{"name": "A", "appearance": "tall"}], "artStyle": {"medium": "ink"}, "narrative": {"logline": "y"}}"#;
        let faceless = r#"{"characters": [{"name": "A"}], "setting": {"world": "x"}, "artStyle": {"medium": "ink"}, "narrative": {"logline": "y"}}"#;

        for text in [no_characters, no_setting, faceless, "not json at all"] {
            let err = parse_bible(text, &story()).unwrap_err();
            assert!(matches!(err, GenerationError::BibleInvalid(_)), "{text}");
        }
    }

    #[test]
    fn test_style_presets() {
        assert!(style_preset("NOIR").contains("black and white"));
        assert_eq!(style_preset("unknown"), style_preset("other"));
    }

    #[tokio::test]
    async fn test_generate_uses_bible_request() {
        let text = Arc::new(ScriptedTextGenerator::new());
        let generator = BibleGenerator::new(text.clone(), 0.9, 4096);

        let bible = generator.generate(&story()).await.unwrap();
        assert!(!bible.characters.is_empty());

        let calls = text.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, RequestKind::Bible);
        assert!(calls[0].user.contains("watercolor"));
    }
}
