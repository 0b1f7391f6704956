//! Command implementations.
//!
//! Stories live in an in-memory store for the duration of a command and
//! are persisted between commands as snapshot files.

use crate::cli::NewOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storytree_core::persist::snapshot_path;
use storytree_core::progress;
use storytree_core::store::StatusCounts;
use storytree_core::{
    EngineConfig, InMemoryStoryStore, NodeOutcome, NodeStatus, StoryEngine, StoryId,
    StoryRequest, StorySnapshot, StoryTree,
};
use storytree_services::ServiceSet;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn build_engine(services: ServiceSet) -> Result<StoryEngine, Box<dyn std::error::Error>> {
    let config = EngineConfig::new()
        .with_illustrations(services.image.is_some())
        .with_narration(services.speech.is_some());

    let mut engine = StoryEngine::new(
        Arc::new(InMemoryStoryStore::new()),
        services.text,
        services.storage,
        config,
    )?;
    if let Some(image) = services.image {
        engine = engine.with_images(image);
    }
    if let Some(speech) = services.speech {
        engine = engine.with_speech(speech);
    }
    Ok(engine)
}

async fn save(engine: &StoryEngine, story_id: StoryId, path: &Path) -> CommandResult {
    engine.export_snapshot(story_id).await?.save_json(path).await?;
    println!("[SAVED] {}", path.display());
    Ok(())
}

/// `storytree new`: create the story, build its bible and opening chapter.
pub async fn new_story(services: ServiceSet, options: NewOptions) -> CommandResult {
    let engine = build_engine(services)?;

    let mut request = StoryRequest::new(options.premise);
    if let Some(style) = options.style {
        request = request.with_style_tag(style);
    }
    if let Some(audience) = options.audience {
        request = request.with_audience(audience);
    }
    if let Some(tone) = options.tone {
        request = request.with_tone(tone);
    }
    if options.min_chapters.is_some() || options.max_chapters.is_some() {
        let defaults = engine.config().default_bounds;
        request = request.with_bounds(
            options.min_chapters.unwrap_or(defaults.min_chapters),
            options.max_chapters.unwrap_or(defaults.max_chapters),
        );
    }

    let story = engine.create_story(request).await?;
    println!("[CREATED] Story {}", story.id);
    println!("Building story bible and opening chapter...");

    let initialized = engine.initialize_story(story.id).await;

    // Keep the record of a failed initialization too.
    let snapshot = engine.export_snapshot(story.id).await?;
    let path = options
        .out
        .unwrap_or_else(|| snapshot_path(".", &snapshot.story));
    snapshot.save_json(&path).await?;
    println!("[SAVED] {}", path.display());

    let root = initialized?;
    println!();
    println!("{}", snapshot.story.display_name());
    println!("Chapter 1: {}", root.title);
    println!();
    for para in root.content.split("\n\n") {
        println!("{para}");
    }
    println!();
    println!("Run `storytree run {}` to generate the branches.", path.display());
    Ok(())
}

/// `storytree run`: process pending chapters and save after every batch.
pub async fn run_batches(
    services: ServiceSet,
    path: PathBuf,
    batch: Option<usize>,
    until_done: bool,
) -> CommandResult {
    let engine = build_engine(services)?;
    let snapshot = StorySnapshot::load_json(&path).await?;
    let story_id = engine.import_snapshot(&snapshot).await?;

    let swept = engine.sweep_stale(story_id).await?;
    if !swept.is_empty() {
        println!("[SWEPT] {} stale chapters marked failed", swept.len());
    }

    loop {
        if engine.progress(story_id).await?.counts.outstanding() == 0 {
            println!("[DONE] Nothing left to generate");
            break;
        }

        let report = engine.generate_next_batch(story_id, batch).await?;
        for outcome in &report.outcomes {
            match outcome {
                NodeOutcome::Ready {
                    key,
                    is_ending,
                    children,
                    ..
                } => {
                    let shape = if *is_ending {
                        "ending".to_string()
                    } else {
                        format!("{children} choices")
                    };
                    println!("[READY] {key} ({shape})");
                }
                NodeOutcome::Failed { key, reason, .. } => println!("[FAILED] {key}: {reason}"),
                NodeOutcome::Skipped { key, .. } => println!("[SKIPPED] {key}"),
            }
        }
        println!(
            "[PROGRESS] {}% ({} ready, {} pending)",
            report.progress.progress, report.progress.counts.ready, report.remaining_pending
        );
        save(&engine, story_id, &path).await?;

        if !until_done || report.generated == 0 {
            break;
        }
    }

    Ok(())
}

fn counts_of(snapshot: &StorySnapshot) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for node in &snapshot.nodes {
        counts.record(node.status);
    }
    counts
}

/// `storytree status`: report progress from a snapshot file.
pub async fn status(path: PathBuf) -> CommandResult {
    let snapshot = StorySnapshot::load_json(&path).await?;
    let story = &snapshot.story;
    let counts = counts_of(&snapshot);

    println!("[STATUS] {}", story.display_name());
    println!("  Story: {}", story.id);
    println!("  State: {}", story.status);
    println!("  Progress: {}%", progress::compute(&counts));
    println!(
        "  Chapters: {} ready, {} pending, {} generating, {} failed",
        counts.ready, counts.pending, counts.generating, counts.failed
    );
    println!(
        "  Bounds: {}-{} chapters per path",
        story.bounds.min_chapters, story.bounds.max_chapters
    );
    if let Some(reason) = &story.failure_reason {
        println!("  Failure: {reason}");
    }
    println!("  Saved: {}", snapshot.saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}

/// `storytree tree`: print the chapter outline from a snapshot file.
pub async fn tree(path: PathBuf) -> CommandResult {
    let snapshot = StorySnapshot::load_json(&path).await?;
    let tree = StoryTree {
        story: snapshot.story,
        nodes: snapshot.nodes,
        choices: snapshot.choices,
    };

    println!("{}", tree.story.display_name());
    let mut lines = Vec::new();
    if let Some(root) = tree.nodes.iter().find(|n| n.is_root()) {
        outline(&tree, root, &mut lines);
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn outline(tree: &StoryTree, node: &storytree_core::StoryNode, lines: &mut Vec<String>) {
    let indent = "  ".repeat(node.depth as usize);
    let label = match node.status {
        NodeStatus::Ready if node.is_ending => {
            let ending = node.ending_type.map(|e| e.as_str()).unwrap_or("open");
            format!("{} [ending: {ending}]", node.title)
        }
        NodeStatus::Ready => node.title.clone(),
        other => format!("({other})"),
    };
    lines.push(format!("{indent}{} {label}", node.key));

    for choice in tree.choices_from(node.id) {
        lines.push(format!("{indent}  > {}", choice.text));
        if let Some(child) = tree.node(choice.to_node) {
            outline(tree, child, lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storytree_core::testing::{branching_chapter, TestHarness};

    #[tokio::test]
    async fn test_outline_lists_every_node() {
        let harness = TestHarness::new(branching_chapter(2));
        let story = harness.initialized_story(1, 2).await;
        harness.run_to_completion(story.id, 10, 10).await.unwrap();
        let tree = harness.tree(story.id).await;

        let root = tree
            .nodes
            .iter()
            .find(|n| n.is_root())
            .unwrap();
        let mut lines = Vec::new();
        outline(&tree, root, &mut lines);

        let node_lines = lines.iter().filter(|l| !l.trim_start().starts_with('>'));
        assert_eq!(node_lines.count(), tree.nodes.len());
        assert!(lines[0].starts_with("1 "));
        assert!(lines.iter().any(|l| l.contains("[ending:")));
    }

    #[tokio::test]
    async fn test_status_reads_snapshot() {
        let harness = TestHarness::new(branching_chapter(2));
        let story = harness.initialized_story(1, 2).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("story.json");
        harness
            .engine
            .export_snapshot(story.id)
            .await
            .unwrap()
            .save_json(&path)
            .await
            .unwrap();

        let snapshot = StorySnapshot::load_json(&path).await.unwrap();
        let counts = counts_of(&snapshot);
        assert_eq!(counts.ready, 1);
        assert_eq!(counts.pending, 2);
        status(path).await.unwrap();
    }
}
