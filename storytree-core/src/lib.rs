//! Branching story generation engine.
//!
//! This crate provides:
//! - A story bible generated once per story for consistency
//! - A lazily materialized tree of chapters connected by reader choices
//! - A generation queue processed in bounded, priority-ordered batches
//! - A depth-based ending policy and bounded context chains
//! - Snapshot persistence
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use storytree_core::{EngineConfig, InMemoryStoryStore, StoryEngine, StoryRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = StoryEngine::new(
//!         Arc::new(InMemoryStoryStore::new()),
//!         text_generator,
//!         object_storage,
//!         EngineConfig::default(),
//!     )?;
//!
//!     let story = engine
//!         .create_story(StoryRequest::new("a fox who collects lost keys").with_bounds(3, 6))
//!         .await?;
//!     engine.initialize_story(story.id).await?;
//!
//!     let report = engine.generate_next_batch(story.id, None).await?;
//!     println!("{} chapters ready, {}%", report.generated, report.progress.progress);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context_chain;
pub mod ending;
pub mod engine;
pub mod error;
pub mod generation;
pub mod model;
pub mod persist;
pub mod progress;
pub mod queue;
pub mod quota;
pub mod services;
pub mod store;
pub mod testing;
pub mod tree;

// Primary public API
pub use config::EngineConfig;
pub use ending::{Directive, EndingPolicy};
pub use engine::{StoryEngine, StoryTree};
pub use error::GenerationError;
pub use model::{
    ChapterBounds, ChoiceId, NodeId, NodeStatus, Story, StoryBible, StoryChoice, StoryId,
    StoryNode, StoryRequest, StoryStatus,
};
pub use persist::{PersistError, StorySnapshot};
pub use progress::ProgressReport;
pub use queue::{BatchReport, NodeOutcome};
pub use quota::{GenerationQuota, NodeCap, Unlimited};
pub use services::{
    ImageGenerator, ObjectStorage, ServiceError, SpeechSynthesizer, TextGenerator,
};
pub use store::{InMemoryStoryStore, StoreError, StoryStore};
