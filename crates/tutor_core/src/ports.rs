//! crates/tutor_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the tutoring core.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the reasoning model, the retrieval index and the database.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    BatchStatus, EvaluatorResult, Message, QuestionBatch, QuestionItem, Session,
    SessionCompletion, SessionInsight, TenantTag,
};
use crate::language::LanguageStyle;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflicting update: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Reasoning Service
//=========================================================================================

/// What a prompt is for. Adapters use it for logging; test doubles route on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    QuestionGeneration,
    IntentClassification,
    Relevance,
    Evaluation,
    ContextAnswer,
    GeneralAnswer,
    Insight,
}

impl PromptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptKind::QuestionGeneration => "question_generation",
            PromptKind::IntentClassification => "intent_classification",
            PromptKind::Relevance => "relevance",
            PromptKind::Evaluation => "evaluation",
            PromptKind::ContextAnswer => "context_answer",
            PromptKind::GeneralAnswer => "general_answer",
            PromptKind::Insight => "insight",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub text: String,
    pub max_output_tokens: u32,
    pub max_words: Option<u32>,
}

impl Prompt {
    pub fn new(kind: PromptKind, text: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            kind,
            text: text.into(),
            max_output_tokens,
            max_words: None,
        }
    }

    pub fn with_max_words(mut self, max_words: u32) -> Self {
        self.max_words = Some(max_words);
        self
    }
}

#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Turns a prompt into free text. Implementations may either return an error
    /// or fail closed with text starting with `"Error:"`; callers handle both.
    async fn generate(&self, prompt: &Prompt) -> PortResult<String>;
}

//=========================================================================================
// Retrieval Service
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub tenant_tag: TenantTag,
    /// Restricts results to one source document when set.
    pub source_id: Option<Uuid>,
    pub text: String,
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub source_id: Uuid,
    pub chunk_index: usize,
    pub text: String,
    /// Tenant recorded in the passage metadata.
    pub tenant_tag: TenantTag,
}

#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// Returns passages ranked best-first.
    async fn query(&self, query: &RetrievalQuery) -> PortResult<Vec<RetrievedPassage>>;
}

//=========================================================================================
// Durable Storage
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Sessions ---
    async fn create_session(
        &self,
        user_id: Uuid,
        document_id: Option<Uuid>,
        language: LanguageStyle,
    ) -> PortResult<Session>;

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session>;

    async fn update_session_language(
        &self,
        session_id: Uuid,
        language: LanguageStyle,
    ) -> PortResult<Session>;

    async fn deactivate_session(&self, session_id: Uuid) -> PortResult<()>;

    // --- Question Batches ---
    async fn get_batch_for_session(&self, session_id: Uuid) -> PortResult<Option<QuestionBatch>>;

    /// Persists a batch with all of its items. Fails with `Conflict` if the
    /// session already owns a batch.
    async fn create_batch(
        &self,
        batch: QuestionBatch,
        items: Vec<QuestionItem>,
    ) -> PortResult<QuestionBatch>;

    /// Compare-and-set on the status. Returns `false` if the stored status was not `from`.
    async fn update_batch_status(
        &self,
        batch_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    ) -> PortResult<bool>;

    /// Compare-and-increment on the pointer. Returns `false` if the stored index
    /// was not `expected_index` or the batch is already completed.
    async fn advance_batch_pointer(&self, batch_id: Uuid, expected_index: usize) -> PortResult<bool>;

    /// Marks the batch completed if its pointer is still `expected_index`.
    async fn complete_batch(&self, batch_id: Uuid, expected_index: usize) -> PortResult<bool>;

    // --- Question Items ---
    async fn get_question_items(&self, batch_id: Uuid) -> PortResult<Vec<QuestionItem>>;

    async fn get_question_item(&self, batch_id: Uuid, order: usize) -> PortResult<Option<QuestionItem>>;

    /// Returns `true` only when this call flipped the flag.
    async fn mark_item_asked(&self, item_id: Uuid) -> PortResult<bool>;

    // --- Messages ---
    async fn save_message(&self, message: Message) -> PortResult<()>;

    async fn set_message_classifier_token(&self, message_id: Uuid, token: &str) -> PortResult<()>;

    async fn get_messages_for_session(&self, session_id: Uuid) -> PortResult<Vec<Message>>;

    // --- Evaluations ---
    /// One result per message; a second one for the same message is a `Conflict`.
    async fn save_evaluation(&self, result: EvaluatorResult) -> PortResult<()>;

    async fn get_evaluations_for_session(&self, session_id: Uuid) -> PortResult<Vec<EvaluatorResult>>;

    // --- Insights ---
    /// Creates or replaces the insight keyed by its session.
    async fn upsert_insight(&self, insight: SessionInsight) -> PortResult<SessionInsight>;

    async fn get_insight(&self, session_id: Uuid) -> PortResult<Option<SessionInsight>>;
}

//=========================================================================================
// Progress Sink
//=========================================================================================

#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Feeds the streak/experience subsystem. Not idempotent: call once per completion.
    async fn record_session_completion(&self, completion: &SessionCompletion) -> PortResult<()>;
}
