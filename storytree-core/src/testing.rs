//! Testing utilities for story generation.
//!
//! This module provides tools for integration testing:
//! - Scripted service doubles for deterministic runs without API calls
//! - `TestHarness` for driving whole stories
//! - Assertion helpers for verifying tree invariants

use crate::config::EngineConfig;
use crate::engine::{StoryEngine, StoryTree};
use crate::ending::Directive;
use crate::error::GenerationError;
use crate::model::{
    ArtStyle, Character, NarrativeOutline, NodeStatus, Setting, Story, StoryBible, StoryId,
    StoryRequest,
};
use crate::queue::BatchReport;
use crate::services::{
    ImageGenerator, ImageJob, ImageRequest, ObjectStorage, RequestKind, ServiceError,
    SpeechRequest, SpeechSynthesizer, TextGenerator, TextRequest,
};
use crate::store::InMemoryStoryStore;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A fully populated bible for tests.
pub fn sample_bible() -> StoryBible {
    let mut visual_descriptors = BTreeMap::new();
    visual_descriptors.insert(
        "Mira".to_string(),
        "a wiry ten-year-old girl with a copper braid, freckles and a patched green oilskin coat"
            .to_string(),
    );
    visual_descriptors.insert(
        "Tomas".to_string(),
        "a stooped old lighthouse keeper with a white beard, round spectacles and a navy sweater"
            .to_string(),
    );

    StoryBible {
        title: "The Tide Map".to_string(),
        characters: vec![
            Character {
                name: "Mira".to_string(),
                role: "protagonist".to_string(),
                appearance: "copper braid, freckles, patched green oilskin coat".to_string(),
                personality: "curious and stubborn".to_string(),
                arc: "learns to ask for help".to_string(),
            },
            Character {
                name: "Tomas".to_string(),
                role: "mentor".to_string(),
                appearance: "white beard, round spectacles, navy sweater".to_string(),
                personality: "gruff but kind".to_string(),
                arc: "lets go of an old grief".to_string(),
            },
        ],
        setting: Setting {
            world: "A storm-battered northern coast".to_string(),
            era: "timeless".to_string(),
            atmosphere: "salt wind and lamplight".to_string(),
            locations: vec!["the lighthouse".to_string(), "the drowned cove".to_string()],
        },
        art_style: ArtStyle {
            medium: "watercolor".to_string(),
            palette: "sea greens and lamp amber".to_string(),
            lighting: "low golden light".to_string(),
            influences: vec!["classic picture books".to_string()],
        },
        narrative: NarrativeOutline {
            logline: "A girl follows a map the tide draws on the sand.".to_string(),
            themes: vec!["courage".to_string(), "trust".to_string()],
            min_chapters: 3,
            max_chapters: 6,
            possible_endings: vec![
                "Mira finds the drowned bell".to_string(),
                "The map leads Tomas home".to_string(),
            ],
        },
        style_prefix: "soft watercolor illustration, sea greens and lamp amber".to_string(),
        visual_descriptors,
    }
}

/// The raw generator payload for [`sample_bible`].
pub fn sample_bible_json() -> String {
    let bible = sample_bible();
    let characters: Vec<_> = bible
        .characters
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "role": c.role,
                "appearance": c.appearance,
                "personality": c.personality,
                "arc": c.arc,
                "visualDescriptor": bible.descriptor_for(&c.name).unwrap_or_default(),
            })
        })
        .collect();

    json!({
        "title": bible.title,
        "characters": characters,
        "setting": {
            "world": bible.setting.world,
            "era": bible.setting.era,
            "atmosphere": bible.setting.atmosphere,
            "keyLocations": bible.setting.locations,
        },
        "artStyle": {
            "medium": bible.art_style.medium,
            "palette": bible.art_style.palette,
            "lighting": bible.art_style.lighting,
            "influences": bible.art_style.influences,
            "stylePrefix": bible.style_prefix,
        },
        "narrative": {
            "logline": bible.narrative.logline,
            "themes": bible.narrative.themes,
            "possibleEndings": bible.narrative.possible_endings,
        }
    })
    .to_string()
}

/// A chapter payload with `choices` choices.
pub fn chapter_json(title: &str, choices: usize, is_ending: bool) -> String {
    const WEIGHTS: [&str; 4] = ["pivotal", "high", "medium", "low"];
    let choices: Vec<_> = (0..choices)
        .map(|i| {
            json!({
                "text": format!("{title}: path {}", i + 1),
                "consequenceHint": "Something changes.",
                "emotionalWeight": WEIGHTS[i % WEIGHTS.len()],
            })
        })
        .collect();
    let ending_type = if is_ending { Some("triumphant") } else { None };

    json!({
        "title": title,
        "content": format!(
            "{title}. Mira pulled her coat tight as the tide drew another line across the sand, \
             and Tomas raised his lamp toward the water."
        ),
        "choices": choices,
        "isEnding": is_ending,
        "endingType": ending_type,
        "chapterSummary": format!("Mira and Tomas reach {title}."),
        "charactersPresent": ["Mira", "Tomas"],
        "panelDescription": format!("Mira and Tomas at {title}, lamp raised over dark water"),
    })
    .to_string()
}

/// Chapter script: node key and directive in, raw payload out.
pub type ChapterScript = Arc<dyn Fn(&str, Directive) -> String + Send + Sync>;

/// A cooperative generator: `choices` choices until the policy asks to
/// wrap up, then an ending.
pub fn branching_chapter(choices: usize) -> impl Fn(&str, Directive) -> String + Send + Sync + 'static {
    move |key, directive| match directive {
        Directive::EncourageWrap | Directive::ForceEnd => {
            chapter_json(&format!("Ending {key}"), 0, true)
        }
        _ => chapter_json(&format!("Chapter {key}"), choices, false),
    }
}

/// A text generator that returns scripted payloads.
pub struct ScriptedTextGenerator {
    bible: String,
    chapters: ChapterScript,
    calls: Mutex<Vec<TextRequest>>,
}

impl Default for ScriptedTextGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTextGenerator {
    /// Sample bible and two-way branching chapters.
    pub fn new() -> Self {
        Self {
            bible: sample_bible_json(),
            chapters: Arc::new(branching_chapter(2)),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chapters(
        mut self,
        script: impl Fn(&str, Directive) -> String + Send + Sync + 'static,
    ) -> Self {
        self.chapters = Arc::new(script);
        self
    }

    pub fn with_bible(mut self, bible: impl Into<String>) -> Self {
        self.bible = bible.into();
        self
    }

    /// Every request received, in order.
    pub fn calls(&self) -> Vec<TextRequest> {
        lock(&self.calls).clone()
    }

    /// How many chapter requests were made per node key.
    pub fn chapter_calls(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for call in lock(&self.calls).iter() {
            if let RequestKind::Chapter { node_key, .. } = &call.kind {
                *counts.entry(node_key.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[async_trait]
impl TextGenerator for ScriptedTextGenerator {
    async fn generate(&self, request: TextRequest) -> Result<String, ServiceError> {
        lock(&self.calls).push(request.clone());
        // Lets concurrent batches interleave.
        tokio::task::yield_now().await;

        Ok(match &request.kind {
            RequestKind::Bible => self.bible.clone(),
            RequestKind::Chapter {
                node_key,
                directive,
                ..
            } => (self.chapters)(node_key.as_str(), *directive),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum ImageBehavior {
    SucceedsAfter(u32),
    NeverCompletes,
    Fails,
}

/// An image generator with scripted job behavior.
pub struct ScriptedImageGenerator {
    behavior: ImageBehavior,
    submitted: AtomicU32,
    polls: AtomicU32,
}

impl ScriptedImageGenerator {
    fn with_behavior(behavior: ImageBehavior) -> Self {
        Self {
            behavior,
            submitted: AtomicU32::new(0),
            polls: AtomicU32::new(0),
        }
    }

    /// Jobs report pending `pending_polls` times, then succeed.
    pub fn succeeds_after(pending_polls: u32) -> Self {
        Self::with_behavior(ImageBehavior::SucceedsAfter(pending_polls))
    }

    /// Jobs stay pending forever.
    pub fn never_completes() -> Self {
        Self::with_behavior(ImageBehavior::NeverCompletes)
    }

    /// Jobs fail on the first poll.
    pub fn fails() -> Self {
        Self::with_behavior(ImageBehavior::Fails)
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submit_count(&self) -> u32 {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for ScriptedImageGenerator {
    async fn submit(&self, _request: ImageRequest) -> Result<String, ServiceError> {
        let n = self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(format!("job-{n}"))
    }

    async fn poll(&self, job_id: &str) -> Result<ImageJob, ServiceError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(match self.behavior {
            ImageBehavior::SucceedsAfter(pending) if n >= pending => ImageJob::Succeeded {
                url: format!("https://images.test/{job_id}.png"),
            },
            ImageBehavior::SucceedsAfter(_) | ImageBehavior::NeverCompletes => ImageJob::Pending,
            ImageBehavior::Fails => ImageJob::Failed {
                reason: "content filter".to_string(),
            },
        })
    }
}

/// A speech synthesizer returning fixed bytes.
pub struct ScriptedSpeech {
    fail: bool,
}

impl ScriptedSpeech {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Default for ScriptedSpeech {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSpeech {
    async fn synthesize(&self, request: SpeechRequest) -> Result<Vec<u8>, ServiceError> {
        if self.fail {
            return Err(ServiceError::Api {
                status: 503,
                message: "voice unavailable".to_string(),
            });
        }
        Ok(format!("ID3 {}", request.text.len()).into_bytes())
    }
}

/// Object storage kept in memory.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored bytes and content type for a key.
    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        lock(&self.objects).get(key).cloned()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ServiceError> {
        lock(&self.objects).insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(format!("memory://{key}"))
    }
}

/// Test harness for scripted story runs.
pub struct TestHarness {
    pub engine: StoryEngine,
    pub store: Arc<InMemoryStoryStore>,
    pub text: Arc<ScriptedTextGenerator>,
    pub image: Arc<ScriptedImageGenerator>,
    pub storage: Arc<MemoryObjectStorage>,
}

impl TestHarness {
    /// Harness with the given chapter script and instant image jobs.
    pub fn new(script: impl Fn(&str, Directive) -> String + Send + Sync + 'static) -> Self {
        Self::with_image(script, ScriptedImageGenerator::succeeds_after(0))
    }

    /// Harness with the given chapter script and image behavior.
    pub fn with_image(
        script: impl Fn(&str, Directive) -> String + Send + Sync + 'static,
        image: ScriptedImageGenerator,
    ) -> Self {
        Self::build(script, image, test_config())
    }

    /// Harness with full control over configuration.
    pub fn build(
        script: impl Fn(&str, Directive) -> String + Send + Sync + 'static,
        image: ScriptedImageGenerator,
        config: EngineConfig,
    ) -> Self {
        let store = Arc::new(InMemoryStoryStore::new());
        let text = Arc::new(ScriptedTextGenerator::new().with_chapters(script));
        let image = Arc::new(image);
        let storage = Arc::new(MemoryObjectStorage::new());

        let engine = match StoryEngine::new(store.clone(), text.clone(), storage.clone(), config) {
            Ok(engine) => engine,
            Err(e) => panic!("test harness config invalid: {e}"),
        }
        .with_images(image.clone())
        .with_speech(Arc::new(ScriptedSpeech::new()));

        Self {
            engine,
            store,
            text,
            image,
            storage,
        }
    }

    /// Create a pending story with the given bounds.
    pub async fn create_story(&self, min_chapters: u32, max_chapters: u32) -> Story {
        let request = StoryRequest::new("a lighthouse keeper's daughter finds a map drawn by the tide")
            .with_bounds(min_chapters, max_chapters);
        match self.engine.create_story(request).await {
            Ok(story) => story,
            Err(e) => panic!("create_story failed: {e}"),
        }
    }

    /// Create and initialize a story.
    pub async fn initialized_story(&self, min_chapters: u32, max_chapters: u32) -> Story {
        let story = self.create_story(min_chapters, max_chapters).await;
        if let Err(e) = self.engine.initialize_story(story.id).await {
            panic!("initialize_story failed: {e}");
        }
        story
    }

    /// Run batches until nothing is pending, up to `max_batches`.
    pub async fn run_to_completion(
        &self,
        story_id: StoryId,
        batch_size: usize,
        max_batches: usize,
    ) -> Result<Vec<BatchReport>, GenerationError> {
        let mut reports = Vec::new();
        for _ in 0..max_batches {
            let report = self
                .engine
                .generate_next_batch(story_id, Some(batch_size))
                .await?;
            let done = report.remaining_pending == 0;
            reports.push(report);
            if done {
                break;
            }
        }
        Ok(reports)
    }

    pub async fn tree(&self, story_id: StoryId) -> StoryTree {
        match self.engine.story_tree(story_id).await {
            Ok(tree) => tree,
            Err(e) => panic!("story_tree failed: {e}"),
        }
    }
}

/// Configuration with no waiting between image polls.
pub fn test_config() -> EngineConfig {
    EngineConfig::default().with_image_polling(3, Duration::ZERO, Duration::from_secs(5))
}

// Assertion helpers

/// Assert the structural invariants of a story tree.
///
/// - every non-root node has exactly one inbound edge and the graph is
///   acyclic
/// - ready non-ending nodes have 1 to 3 children, ready endings have none
/// - no node lies past max depth
/// - context chains have one entry per ancestor and never hold chapter text
#[track_caller]
pub fn assert_tree_invariants(tree: &StoryTree) {
    let max_depth = tree.story.bounds.max_chapters;
    let ids: HashSet<_> = tree.nodes.iter().map(|n| n.id).collect();

    let mut inbound: HashMap<_, usize> = HashMap::new();
    for choice in &tree.choices {
        assert!(ids.contains(&choice.from_node), "choice from unknown node");
        assert!(ids.contains(&choice.to_node), "choice to unknown node");
        *inbound.entry(choice.to_node).or_insert(0) += 1;
    }

    let content: HashMap<_, _> = tree.nodes.iter().map(|n| (n.key.as_str(), n)).collect();

    for node in &tree.nodes {
        let expected_inbound = if node.is_root() { 0 } else { 1 };
        assert_eq!(
            inbound.get(&node.id).copied().unwrap_or(0),
            expected_inbound,
            "node {} inbound edges",
            node.key
        );
        assert!(
            node.depth <= max_depth,
            "node {} at depth {} past max {}",
            node.key,
            node.depth,
            max_depth
        );
        assert_eq!(
            node.key.split('.').count() as u32,
            node.depth + 1,
            "node {} key does not match depth",
            node.key
        );

        let children = tree.choices_from(node.id).len();
        if node.status == NodeStatus::Ready {
            if node.is_ending {
                assert_eq!(children, 0, "ending {} has children", node.key);
                assert!(node.ending_type.is_some(), "ending {} has no type", node.key);
            } else {
                assert!(
                    (1..=3).contains(&children),
                    "node {} has {} children",
                    node.key,
                    children
                );
            }
        } else {
            assert_eq!(children, 0, "unfinished node {} has children", node.key);
        }

        assert_eq!(
            node.context_chain.len(),
            node.depth as usize,
            "node {} chain length",
            node.key
        );
        for entry in &node.context_chain {
            if let Some(ancestor) = content.get(entry.key.as_str()) {
                assert!(
                    ancestor.content.is_empty() || entry.summary != ancestor.content,
                    "chain of {} holds full text of {}",
                    node.key,
                    entry.key
                );
            }
        }
    }

    // Walking parents from any node reaches the root within depth steps.
    let parent_of: HashMap<_, _> = tree
        .choices
        .iter()
        .map(|c| (c.to_node, c.from_node))
        .collect();
    for node in &tree.nodes {
        let mut current = node.id;
        let mut steps = 0;
        while let Some(parent) = parent_of.get(&current) {
            current = *parent;
            steps += 1;
            assert!(steps <= node.depth, "cycle through node {}", node.key);
        }
    }
}

/// Assert a story finished with every leaf an ending.
#[track_caller]
pub fn assert_fully_generated(tree: &StoryTree) {
    assert_eq!(
        tree.story.status,
        crate::model::StoryStatus::FullyGenerated,
        "story status"
    );
    for leaf in tree.leaves() {
        if leaf.status == NodeStatus::Ready {
            assert!(leaf.is_ending, "leaf {} is not an ending", leaf.key);
        }
    }
    assert!(
        tree.nodes
            .iter()
            .all(|n| matches!(n.status, NodeStatus::Ready | NodeStatus::Failed)),
        "unfinished nodes remain"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chapter_json_shape() {
        let value: serde_json::Value = serde_json::from_str(&chapter_json("Cove", 3, false)).unwrap();
        assert_eq!(value["choices"].as_array().unwrap().len(), 3);
        assert_eq!(value["isEnding"], false);
        assert!(value["endingType"].is_null());
    }

    #[tokio::test]
    async fn test_scripted_image_succeeds_after() {
        let image = ScriptedImageGenerator::succeeds_after(1);
        let request = ImageRequest {
            prompt: String::new(),
            negative_prompt: String::new(),
            style_tag: String::new(),
            aspect_ratio: "4:3".to_string(),
        };
        let job = image.submit(request).await.unwrap();
        assert_eq!(image.poll(&job).await.unwrap(), ImageJob::Pending);
        assert!(matches!(image.poll(&job).await.unwrap(), ImageJob::Succeeded { .. }));
        assert_eq!(image.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_harness_initializes() {
        let harness = TestHarness::new(branching_chapter(3));
        let story = harness.initialized_story(2, 4).await;
        let tree = harness.tree(story.id).await;
        assert_eq!(tree.nodes.len(), 4);
        assert_tree_invariants(&tree);
    }
}
