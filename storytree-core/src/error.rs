//! Error taxonomy for story generation.

use crate::model::{StoryId, StoryStatus};
use crate::services::ServiceError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors from the generation engine.
///
/// `Validation`, `ExternalService` and `InvariantViolation` raised while
/// generating a node fail only that node. The others abort the invocation.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Unparsable generator output: {0}")]
    Validation(String),

    #[error("Story bible invalid: {0}")]
    BibleInvalid(String),

    #[error("External service error: {0}")]
    ExternalService(#[from] ServiceError),

    #[error("Generation limit reached: {used}/{limit} nodes")]
    LimitExceeded { used: u32, limit: u32 },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Story not found: {0}")]
    StoryNotFound(StoryId),

    #[error("Story {0} has no bible")]
    BibleMissing(StoryId),

    #[error("Story {story} already initialized (status {status})")]
    AlreadyInitialized { story: StoryId, status: StoryStatus },

    #[error("Story {story} is not ready for generation (status {status})")]
    NotInitialized { story: StoryId, status: StoryStatus },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GenerationError {
    /// Short machine-readable category, used in node outcomes and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Validation(_) => "validation",
            GenerationError::BibleInvalid(_) => "bible_invalid",
            GenerationError::ExternalService(_) => "external_service",
            GenerationError::LimitExceeded { .. } => "limit_exceeded",
            GenerationError::InvariantViolation(_) => "invariant_violation",
            GenerationError::Store(_) => "store",
            GenerationError::StoryNotFound(_) => "story_not_found",
            GenerationError::BibleMissing(_) => "bible_missing",
            GenerationError::AlreadyInitialized { .. } => "already_initialized",
            GenerationError::NotInitialized { .. } => "not_initialized",
            GenerationError::InvalidConfig(_) => "invalid_config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GenerationError::LimitExceeded { used: 40, limit: 40 };
        assert_eq!(err.to_string(), "Generation limit reached: 40/40 nodes");
        assert_eq!(err.kind(), "limit_exceeded");
    }

    #[test]
    fn test_service_error_conversion() {
        let err: GenerationError = ServiceError::Network("reset".to_string()).into();
        assert!(matches!(err, GenerationError::ExternalService(_)));
    }
}
