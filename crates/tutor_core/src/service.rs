//! crates/tutor_core/src/service.rs
//!
//! `TutorService` is the surface the transport layer drives. It wires the
//! components together and persists every tutor-side message it hands out.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::batch::BatchManager;
use crate::domain::{BatchStatus, Message, QuestionBatch, Session, SessionInsight};
use crate::error::{TutorError, TutorResult};
use crate::evaluator::AnswerEvaluator;
use crate::insight::{session_totals, InsightGenerator};
use crate::intent::IntentClassifier;
use crate::language::LanguageStyle;
use crate::orchestrator::{ResponseOrchestrator, TurnOutcome};
use crate::ports::{DatabaseService, ProgressSink, ReasoningService, RetrievalService};
use crate::rag::RagAnswerer;
use crate::settings::TutorSettings;
use crate::validator::MessageValidator;

#[derive(Debug, Clone, PartialEq)]
pub struct StartedSession {
    pub session: Session,
    pub batch: QuestionBatch,
    pub first_question: Option<String>,
}

/// Progress snapshot for a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub is_active: bool,
    pub language: LanguageStyle,
    pub batch_status: BatchStatus,
    pub current_index: usize,
    pub total_questions: usize,
    pub answered: usize,
    pub xp: i64,
    /// Percent of graded answers marked correct so far.
    pub accuracy: f64,
}

pub struct TutorService {
    store: Arc<dyn DatabaseService>,
    orchestrator: ResponseOrchestrator,
}

impl TutorService {
    pub fn new(
        store: Arc<dyn DatabaseService>,
        reasoning: Arc<dyn ReasoningService>,
        retrieval: Arc<dyn RetrievalService>,
        progress: Arc<dyn ProgressSink>,
        settings: TutorSettings,
    ) -> Self {
        let settings = Arc::new(settings.normalized());
        let orchestrator = ResponseOrchestrator::new(
            store.clone(),
            retrieval.clone(),
            progress,
            settings.clone(),
            BatchManager::new(store.clone(), reasoning.clone(), retrieval.clone(), settings.clone()),
            IntentClassifier::new(reasoning.clone(), settings.clone()),
            MessageValidator::new(Some(reasoning.clone()), settings.clone()),
            RagAnswerer::new(reasoning.clone(), retrieval, settings.clone()),
            AnswerEvaluator::new(reasoning.clone(), settings.clone()),
            InsightGenerator::new(store.clone(), reasoning, settings),
        );
        Self { store, orchestrator }
    }

    async fn say(&self, session_id: Uuid, text: &str) -> TutorResult<()> {
        self.store.save_message(Message::from_tutor(session_id, text)).await?;
        Ok(())
    }

    /// Loads a session on behalf of `user_id`, refusing other learners' sessions.
    pub async fn authorize(&self, user_id: Uuid, session_id: Uuid) -> TutorResult<Session> {
        let session = self.store.get_session(session_id).await?;
        if session.user_id != user_id {
            return Err(TutorError::Forbidden(session_id));
        }
        Ok(session)
    }

    pub async fn start_session(
        &self,
        user_id: Uuid,
        document_id: Option<Uuid>,
        language: Option<LanguageStyle>,
    ) -> TutorResult<StartedSession> {
        let session = self
            .store
            .create_session(user_id, document_id, language.unwrap_or_default())
            .await?;
        info!(session_id = %session.id, user_id = %user_id, "session started");

        let batches = self.orchestrator.batches();
        batches.get_or_create_batch(&session).await?;
        let first_question = batches.get_next_question(&session).await?.map(|(text, _)| text);
        if let Some(question) = &first_question {
            self.say(session.id, question).await?;
        }
        // Re-read so the status reflects the first delivery.
        let batch = batches.load_batch(session.id).await?;

        Ok(StartedSession { session, batch, first_question })
    }

    pub async fn respond(
        &self,
        session_id: Uuid,
        reply: &str,
        latency_ms: Option<i64>,
    ) -> TutorResult<TurnOutcome> {
        let session = self.store.get_session(session_id).await?;
        let outcome = self.orchestrator.handle_reply(&session, reply, latency_ms).await?;
        if let Some(text) = &outcome.reply {
            self.say(session_id, text).await?;
        }
        if let Some(question) = &outcome.next_question {
            self.say(session_id, question).await?;
        }
        Ok(outcome)
    }

    pub async fn get_status(&self, session_id: Uuid) -> TutorResult<SessionStatus> {
        let session = self.store.get_session(session_id).await?;
        let batch = self.orchestrator.batches().load_batch(session_id).await?;
        let evaluations = self.store.get_evaluations_for_session(session_id).await?;
        let (_, accuracy) = session_totals(&evaluations);
        Ok(SessionStatus {
            session_id,
            is_active: session.is_active,
            language: session.language,
            batch_status: batch.status,
            current_index: batch.current_index,
            total_questions: batch.total_questions,
            answered: evaluations.len(),
            xp: evaluations.iter().map(|e| e.xp).sum(),
            accuracy,
        })
    }

    pub async fn toggle_language(&self, session_id: Uuid, language: LanguageStyle) -> TutorResult<Session> {
        let session = self.store.get_session(session_id).await?;
        if !session.is_active {
            return Err(TutorError::SessionInactive(session_id));
        }
        let updated = self.store.update_session_language(session_id, language).await?;
        info!(session_id = %session_id, %language, "language switched");
        Ok(updated)
    }

    /// Explicit termination. Ending an already-ended session returns whatever
    /// insight it has and notifies nobody.
    pub async fn end_session(&self, session_id: Uuid) -> TutorResult<Option<SessionInsight>> {
        let session = self.store.get_session(session_id).await?;
        if !session.is_active {
            return Ok(self.store.get_insight(session_id).await?);
        }
        self.orchestrator.end_early(&session).await
    }

    pub async fn get_insight(&self, session_id: Uuid) -> TutorResult<Option<SessionInsight>> {
        Ok(self.store.get_insight(session_id).await?)
    }

    pub async fn get_history(&self, session_id: Uuid) -> TutorResult<Vec<Message>> {
        let mut messages = self.store.get_messages_for_session(session_id).await?;
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}
