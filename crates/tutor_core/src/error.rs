//! crates/tutor_core/src/error.rs

use uuid::Uuid;

use crate::domain::TransitionError;
use crate::ports::PortError;

/// Failures the orchestrator cannot recover from locally. Collaborator hiccups
/// never end up here; they resolve to a fallback instead.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error("Session {0} has no question batch")]
    MissingBatch(Uuid),

    #[error("Question batch {batch_id} has no item at position {order}")]
    MissingQuestionItem { batch_id: Uuid, order: usize },

    #[error("Session {0} is no longer active")]
    SessionInactive(Uuid),

    #[error("Concurrent update lost: {0}")]
    Conflict(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Session {0} belongs to another learner")]
    Forbidden(Uuid),
}

pub type TutorResult<T> = Result<T, TutorError>;
