pub mod batch;
pub mod domain;
pub mod error;
pub mod evaluator;
pub mod insight;
pub mod intent;
pub mod language;
pub mod memory;
pub mod orchestrator;
pub mod outcome;
pub mod ports;
pub mod rag;
pub mod reasoning;
pub mod service;
pub mod settings;
pub mod testing;
pub mod text;
pub mod validator;

pub use domain::{
    Archetype, BatchStatus, Difficulty, EvaluatorResult, FollowupAction, InsightStatus, Message,
    QuestionBatch, QuestionItem, Session, SessionCompletion, SessionInsight, TenantTag, Zone,
};
pub use error::{TutorError, TutorResult};
pub use intent::{Intent, IntentLabel};
pub use language::LanguageStyle;
pub use orchestrator::TurnOutcome;
pub use ports::{
    DatabaseService, PortError, PortResult, ProgressSink, Prompt, PromptKind, ReasoningService,
    RetrievalQuery, RetrievalService, RetrievedPassage,
};
pub use service::{SessionStatus, StartedSession, TutorService};
pub use settings::TutorSettings;
pub use validator::Rejection;
