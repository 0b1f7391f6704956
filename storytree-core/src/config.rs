//! Engine configuration.

use crate::model::ChapterBounds;
use std::time::Duration;

/// Configuration for the story engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Chapter bounds for stories created without explicit ones.
    pub default_bounds: ChapterBounds,

    /// Nodes processed per batch when the caller does not say.
    pub batch_size: usize,

    /// Temperature for the bible request.
    pub bible_temperature: f32,

    /// Token budget for the bible request.
    pub bible_max_tokens: usize,

    /// Temperature for chapter requests.
    pub chapter_temperature: f32,

    /// Token budget for chapter requests.
    pub chapter_max_tokens: usize,

    /// Whether chapters are illustrated.
    pub illustrate: bool,

    /// Maximum polls of an image job.
    pub image_poll_attempts: u32,

    /// Delay between image polls.
    pub image_poll_delay: Duration,

    /// Hard deadline for submit + polling.
    pub image_deadline: Duration,

    /// Aspect ratio requested for illustrations.
    pub image_aspect_ratio: String,

    /// Whether chapters are narrated.
    pub narrate: bool,

    /// Voice used for narration.
    pub narration_voice: String,

    /// Narration speed multiplier.
    pub narration_speed: f32,

    /// Nodes generating for longer than this are failed by the sweeper.
    pub stale_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_bounds: ChapterBounds::default(),
            batch_size: 5,
            bible_temperature: 0.9,
            bible_max_tokens: 4096,
            chapter_temperature: 0.8,
            chapter_max_tokens: 2048,
            illustrate: true,
            image_poll_attempts: 30,
            image_poll_delay: Duration::from_secs(2),
            image_deadline: Duration::from_secs(90),
            image_aspect_ratio: "4:3".to_string(),
            narrate: true,
            narration_voice: "alloy".to_string(),
            narration_speed: 1.0,
            stale_after: Duration::from_secs(15 * 60),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default chapter bounds.
    pub fn with_bounds(mut self, min_chapters: u32, max_chapters: u32) -> Self {
        self.default_bounds = ChapterBounds::new(min_chapters, max_chapters);
        self
    }

    /// Set the default batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set image polling limits.
    pub fn with_image_polling(mut self, attempts: u32, delay: Duration, deadline: Duration) -> Self {
        self.image_poll_attempts = attempts;
        self.image_poll_delay = delay;
        self.image_deadline = deadline;
        self
    }

    /// Enable or disable illustrations.
    pub fn with_illustrations(mut self, enabled: bool) -> Self {
        self.illustrate = enabled;
        self
    }

    /// Enable or disable narration.
    pub fn with_narration(mut self, enabled: bool) -> Self {
        self.narrate = enabled;
        self
    }

    /// Set the narration voice and speed.
    pub fn with_voice(mut self, voice: impl Into<String>, speed: f32) -> Self {
        self.narration_voice = voice.into();
        self.narration_speed = speed;
        self
    }

    /// Set the stale-node deadline.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), String> {
        self.default_bounds.validate()?;
        if self.batch_size == 0 {
            return Err("batch_size must be positive".to_string());
        }
        if self.illustrate && self.image_poll_attempts == 0 {
            return Err("image_poll_attempts must be positive when illustrating".to_string());
        }
        if !(0.25..=4.0).contains(&self.narration_speed) {
            return Err(format!(
                "narration_speed {} outside 0.25..=4.0",
                self.narration_speed
            ));
        }
        Ok(())
    }
}
