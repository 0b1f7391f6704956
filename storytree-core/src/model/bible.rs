//! The story bible: the fixed reference every chapter stays consistent with.

use super::story::ChapterBounds;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A recurring character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    /// Narrative role, e.g. "protagonist" or "mentor".
    pub role: String,
    /// Physical appearance, used for illustration.
    pub appearance: String,
    pub personality: String,
    /// How the character changes across the story.
    pub arc: String,
}

/// Where and when the story takes place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub world: String,
    pub era: String,
    pub atmosphere: String,
    /// Named places chapters may visit.
    pub locations: Vec<String>,
}

impl Setting {
    /// A setting with no world description is unusable.
    pub fn is_empty(&self) -> bool {
        self.world.trim().is_empty()
    }
}

/// Visual style shared by every illustration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtStyle {
    /// e.g. "watercolor on textured paper".
    pub medium: String,
    pub palette: String,
    pub lighting: String,
    pub influences: Vec<String>,
}

impl ArtStyle {
    pub fn is_empty(&self) -> bool {
        self.medium.trim().is_empty()
    }
}

/// High-level plan for the story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeOutline {
    /// One-sentence summary of the whole story.
    pub logline: String,
    pub themes: Vec<String>,
    pub min_chapters: u32,
    pub max_chapters: u32,
    /// Endings the branches may converge on.
    pub possible_endings: Vec<String>,
}

impl NarrativeOutline {
    pub fn is_empty(&self) -> bool {
        self.logline.trim().is_empty() && self.themes.iter().all(|t| t.trim().is_empty())
    }

    pub fn bounds(&self) -> ChapterBounds {
        ChapterBounds::new(self.min_chapters, self.max_chapters)
    }
}

/// The story bible.
///
/// Built once per story by the bible generator and never modified; every
/// chapter and illustration request receives it by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryBible {
    pub title: String,
    pub characters: Vec<Character>,
    pub setting: Setting,
    pub art_style: ArtStyle,
    pub narrative: NarrativeOutline,
    /// Prefix prepended to every image prompt.
    pub style_prefix: String,
    /// Character name to visual descriptor, one entry per character.
    pub visual_descriptors: BTreeMap<String, String>,
}

impl StoryBible {
    /// Find a character by name (case-insensitive).
    pub fn character(&self, name: &str) -> Option<&Character> {
        self.characters
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Visual descriptor for a character (case-insensitive).
    pub fn descriptor_for(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        self.visual_descriptors
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Compact summary of the bible for chapter prompts.
    pub fn prompt_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n", self.title));
        if !self.narrative.logline.is_empty() {
            out.push_str(&format!("{}\n", self.narrative.logline));
        }

        out.push_str("\n## Setting\n");
        out.push_str(&self.setting.world);
        if !self.setting.era.is_empty() {
            out.push_str(&format!(" ({})", self.setting.era));
        }
        out.push('\n');
        if !self.setting.atmosphere.is_empty() {
            out.push_str(&format!("Atmosphere: {}\n", self.setting.atmosphere));
        }
        if !self.setting.locations.is_empty() {
            out.push_str(&format!("Locations: {}\n", self.setting.locations.join(", ")));
        }

        out.push_str("\n## Characters\n");
        for c in &self.characters {
            out.push_str(&format!(
                "- **{}** ({}): {}. Arc: {}\n",
                c.name, c.role, c.personality, c.arc
            ));
        }

        if !self.narrative.themes.is_empty() {
            out.push_str(&format!("\n## Themes\n{}\n", self.narrative.themes.join(", ")));
        }
        if !self.narrative.possible_endings.is_empty() {
            out.push_str("\n## Possible Endings\n");
            for ending in &self.narrative.possible_endings {
                out.push_str(&format!("- {ending}\n"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bible() -> StoryBible {
        let mut visual_descriptors = BTreeMap::new();
        visual_descriptors.insert(
            "Mira".to_string(),
            "a wiry girl with a copper braid and a patched green coat".to_string(),
        );
        StoryBible {
            title: "The Tide Map".to_string(),
            characters: vec![Character {
                name: "Mira".to_string(),
                role: "protagonist".to_string(),
                appearance: "copper braid, green coat".to_string(),
                personality: "curious".to_string(),
                arc: "learns to trust".to_string(),
            }],
            setting: Setting {
                world: "A storm-battered coast".to_string(),
                ..Default::default()
            },
            art_style: ArtStyle {
                medium: "watercolor".to_string(),
                ..Default::default()
            },
            narrative: NarrativeOutline {
                logline: "A girl follows a map drawn by the tide.".to_string(),
                themes: vec!["courage".to_string()],
                min_chapters: 3,
                max_chapters: 6,
                possible_endings: vec![],
            },
            style_prefix: "watercolor illustration".to_string(),
            visual_descriptors,
        }
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let bible = bible();
        assert!(bible.character("mira").is_some());
        assert!(bible.descriptor_for(" MIRA ").unwrap().contains("copper braid"));
        assert!(bible.descriptor_for("Tomas").is_none());
    }

    #[test]
    fn test_prompt_summary_mentions_sections() {
        let summary = bible().prompt_summary();
        assert!(summary.contains("# The Tide Map"));
        assert!(summary.contains("**Mira** (protagonist)"));
        assert!(summary.contains("courage"));
    }
}
