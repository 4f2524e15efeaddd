//! crates/tutor_core/src/orchestrator.rs
//!
//! The per-turn state machine:
//!
//! ```text
//! AWAITING_REPLY -> { SCORING | RAG_ANSWERING | BOTH } -> ADVANCING -> { AWAITING_REPLY | SESSION_COMPLETE }
//! ```
//!
//! A rejected or unrecognised reply short-circuits back to `AWAITING_REPLY`
//! without touching the batch pointer.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::batch::{Advance, BatchManager};
use crate::domain::{
    BatchStatus, EvaluatorResult, Message, QuestionItem, Session, SessionCompletion, SessionInsight,
};
use crate::error::{TutorError, TutorResult};
use crate::evaluator::AnswerEvaluator;
use crate::insight::{session_totals, InsightGenerator};
use crate::intent::{Intent, IntentClassifier, IntentLabel};
use crate::outcome::Outcome;
use crate::ports::{DatabaseService, ProgressSink, RetrievalQuery, RetrievalService};
use crate::rag::{join_passages, scoped_passages, RagAnswerer};
use crate::settings::TutorSettings;
use crate::validator::{corrective_message, GateScope, MessageValidator, Rejection};

/// Which handlers a classified reply goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Score,
    Answer,
    Both,
}

impl Route {
    pub fn for_intent(intent: Intent) -> Self {
        match intent {
            Intent::DirectAnswer => Route::Score,
            Intent::ReturnQuestion => Route::Answer,
            Intent::Mixed => Route::Both,
        }
    }

    fn scores(self) -> bool {
        matches!(self, Route::Score | Route::Both)
    }

    fn answers(self) -> bool {
        matches!(self, Route::Answer | Route::Both)
    }
}

/// Everything one learner turn produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    pub intent: Option<IntentLabel>,
    /// Tutor text to show before the next question, if any.
    pub reply: Option<String>,
    pub next_question: Option<String>,
    pub evaluation: Option<EvaluatorResult>,
    pub rejection: Option<Rejection>,
    pub insight: Option<SessionInsight>,
    pub session_complete: bool,
}

/// The state a turn is processed against.
pub struct Turn<'a> {
    pub session: &'a Session,
    pub item: &'a QuestionItem,
    pub message: &'a Message,
}

pub struct ResponseOrchestrator {
    store: Arc<dyn DatabaseService>,
    retrieval: Arc<dyn RetrievalService>,
    progress: Arc<dyn ProgressSink>,
    settings: Arc<TutorSettings>,
    batches: BatchManager,
    classifier: IntentClassifier,
    validator: MessageValidator,
    rag: RagAnswerer,
    evaluator: AnswerEvaluator,
    insights: InsightGenerator,
}

impl ResponseOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DatabaseService>,
        retrieval: Arc<dyn RetrievalService>,
        progress: Arc<dyn ProgressSink>,
        settings: Arc<TutorSettings>,
        batches: BatchManager,
        classifier: IntentClassifier,
        validator: MessageValidator,
        rag: RagAnswerer,
        evaluator: AnswerEvaluator,
        insights: InsightGenerator,
    ) -> Self {
        Self { store, retrieval, progress, settings, batches, classifier, validator, rag, evaluator, insights }
    }

    pub fn batches(&self) -> &BatchManager {
        &self.batches
    }

    pub async fn handle_reply(
        &self,
        session: &Session,
        reply: &str,
        latency_ms: Option<i64>,
    ) -> TutorResult<TurnOutcome> {
        if !session.is_active {
            return Err(TutorError::SessionInactive(session.id));
        }

        let batch = self.batches.load_batch(session.id).await.inspect_err(|e| {
            error!(session_id = %session.id, error = %e, "turn arrived without a question batch");
        })?;
        if batch.status == BatchStatus::Completed {
            return Ok(TurnOutcome {
                reply: Some(session.language.session_complete().to_string()),
                session_complete: true,
                ..TurnOutcome::default()
            });
        }
        let item = self.batches.item_at_pointer(&batch).await.inspect_err(|e| {
            error!(session_id = %session.id, error = %e, "batch pointer has no question item");
        })?;

        let message = Message::from_learner(session.id, reply, latency_ms);
        self.store.save_message(message.clone()).await?;

        let label = IntentLabel::from(self.classifier.classify(reply).await);
        self.store.set_message_classifier_token(message.id, label.token()).await?;

        self.dispatch(&Turn { session, item: &item, message: &message }, label).await
    }

    /// Routes a classified reply. Rejected and unrecognised replies leave the
    /// batch exactly where it was.
    pub async fn dispatch(&self, turn: &Turn<'_>, label: IntentLabel) -> TutorResult<TurnOutcome> {
        let Turn { session, item, message } = *turn;
        let language = session.language;
        let intent = match label {
            IntentLabel::Intent(intent) => intent,
            IntentLabel::Unrecognized(token) => {
                warn!(session_id = %session.id, token = %token, "unrecognised intent, asking for clarification");
                return Ok(TurnOutcome {
                    reply: Some(language.clarify_request().to_string()),
                    intent: Some(IntentLabel::Unrecognized(token)),
                    ..TurnOutcome::default()
                });
            }
        };

        let scope = match intent {
            Intent::ReturnQuestion => GateScope::MetaOnly,
            Intent::DirectAnswer | Intent::Mixed => GateScope::Full,
        };
        if let Some(rejection) = self
            .validator
            .categorize(&message.content, &item.question_text, Some(&item.expected_answer), scope)
            .await
        {
            info!(session_id = %session.id, %rejection, "reply rejected");
            return Ok(TurnOutcome {
                reply: Some(corrective_message(
                    rejection,
                    language,
                    &item.question_text,
                    self.settings.reask_words,
                )),
                rejection: Some(rejection),
                intent: Some(intent.into()),
                ..TurnOutcome::default()
            });
        }

        self.batches.ensure_pointer(session, item.order).await?;

        let route = Route::for_intent(intent);
        let mut outcome = TurnOutcome { intent: Some(intent.into()), ..TurnOutcome::default() };
        let mut replies: Vec<String> = Vec::new();

        if route.answers() {
            replies.push(self.rag.answer(session, &message.content).await.text);
        }
        if route.scores() {
            outcome.evaluation = Some(self.score(session, item, message).await?);
        }

        match self.batches.advance(session, item.order).await? {
            Advance::Next(_) => {
                outcome.next_question = self.batches.get_next_question(session).await?.map(|(text, _)| text);
            }
            Advance::Completed => {
                outcome.insight = self.complete(session).await?;
                outcome.session_complete = true;
                replies.push(language.session_complete().to_string());
            }
        }

        if !replies.is_empty() {
            outcome.reply = Some(replies.join("\n\n"));
        }
        Ok(outcome)
    }

    async fn score(
        &self,
        session: &Session,
        item: &QuestionItem,
        message: &Message,
    ) -> TutorResult<EvaluatorResult> {
        let query = RetrievalQuery {
            tenant_tag: session.tenant_tag(),
            source_id: session.document_id,
            text: item.question_text.clone(),
            top_k: self.settings.evaluation_context_top_k,
        };
        let context = match scoped_passages(self.retrieval.as_ref(), &query).await {
            Outcome::Ok(passages) => join_passages(&passages),
            Outcome::Fallback(_) => String::new(),
        };

        let result = self
            .evaluator
            .evaluate(&context, &item.expected_answer, &message.content, session.language)
            .await
            .into_result(session.id, message.id, item.id);
        self.store.save_evaluation(result.clone()).await?;
        info!(
            session_id = %session.id,
            question_id = %item.question_id,
            score = result.score,
            xp = result.xp,
            "answer graded"
        );
        Ok(result)
    }

    /// Runs once per session, on the turn that exhausted the batch.
    async fn complete(&self, session: &Session) -> TutorResult<Option<SessionInsight>> {
        self.store.deactivate_session(session.id).await?;
        let insight = self.insights.generate(session).await?;

        let completion = match &insight {
            Some(i) => completion_for(session, i.session_xp, i.accuracy, i.qa_pair_count),
            None => {
                let evaluations = self.store.get_evaluations_for_session(session.id).await?;
                let (xp, accuracy) = session_totals(&evaluations);
                completion_for(session, xp, accuracy, evaluations.len())
            }
        };
        self.notify(&completion).await;
        Ok(insight)
    }

    /// Explicit termination before the batch ran out. The sink only hears
    /// about sessions that produced an insight.
    pub async fn end_early(&self, session: &Session) -> TutorResult<Option<SessionInsight>> {
        self.store.deactivate_session(session.id).await?;
        let insight = self.insights.generate(session).await?;
        if let Some(i) = &insight {
            self.notify(&completion_for(session, i.session_xp, i.accuracy, i.qa_pair_count)).await;
        }
        info!(session_id = %session.id, "session ended early");
        Ok(insight)
    }

    async fn notify(&self, completion: &SessionCompletion) {
        if let Err(e) = self.progress.record_session_completion(completion).await {
            warn!(session_id = %completion.session_id, error = %e, "progress sink rejected the completion");
        }
        info!(
            session_id = %completion.session_id,
            session_xp = completion.session_xp,
            accuracy = completion.accuracy,
            "session complete"
        );
    }
}

fn completion_for(session: &Session, session_xp: i64, accuracy: f64, qa_pair_count: usize) -> SessionCompletion {
    SessionCompletion {
        session_id: session.id,
        user_id: session.user_id,
        session_xp,
        accuracy,
        qa_pair_count,
        completed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TenantTag;
    use crate::language::LanguageStyle;
    use crate::memory::InMemoryStore;
    use crate::ports::{PromptKind, RetrievedPassage};
    use crate::testing::{RecordingProgressSink, ScriptedReasoning, StaticRetrieval};
    use uuid::Uuid;

    struct Fixture {
        orchestrator: ResponseOrchestrator,
        store: Arc<InMemoryStore>,
        session: Session,
    }

    async fn fixture(reasoning: Arc<ScriptedReasoning>) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let settings = Arc::new(TutorSettings::default());
        let session = store
            .create_session(Uuid::new_v4(), Some(Uuid::new_v4()), LanguageStyle::Standard)
            .await
            .unwrap();
        let retrieval: Arc<StaticRetrieval> = Arc::new(StaticRetrieval::new(vec![RetrievedPassage {
            source_id: Uuid::new_v4(),
            chunk_index: 0,
            text: "Photosynthesis converts light energy into chemical energy in chloroplasts.".into(),
            tenant_tag: session.tenant_tag(),
        }]));
        let orchestrator = ResponseOrchestrator::new(
            store.clone(),
            retrieval.clone(),
            Arc::new(RecordingProgressSink::new()),
            settings.clone(),
            BatchManager::new(store.clone(), reasoning.clone(), retrieval.clone(), settings.clone()),
            IntentClassifier::new(reasoning.clone(), settings.clone()),
            MessageValidator::new(Some(reasoning.clone()), settings.clone()),
            RagAnswerer::new(reasoning.clone(), retrieval, settings.clone()),
            AnswerEvaluator::new(reasoning.clone(), settings.clone()),
            InsightGenerator::new(store.clone(), reasoning, settings),
        );
        orchestrator.batches().get_or_create_batch(&session).await.unwrap();
        Fixture { orchestrator, store, session }
    }

    fn five_questions() -> String {
        let items: Vec<serde_json::Value> = (0..5)
            .map(|i| {
                serde_json::json!({
                    "question": format!("Question number {i} about photosynthesis?"),
                    "expected_answer": format!("Answer {i}"),
                    "archetype": "recall",
                    "difficulty": "easy",
                })
            })
            .collect();
        serde_json::Value::Array(items).to_string()
    }

    async fn saved_reply(f: &Fixture, text: &str) -> Message {
        let message = Message::from_learner(f.session.id, text, None);
        f.store.save_message(message.clone()).await.unwrap();
        message
    }

    #[tokio::test]
    async fn a_repeated_turn_is_refused_without_a_second_grade() {
        let reasoning = Arc::new(ScriptedReasoning::new());
        reasoning.push(PromptKind::QuestionGeneration, &five_questions());
        reasoning.set_default(PromptKind::Relevance, "0.9");
        reasoning.set_default(
            PromptKind::Evaluation,
            r#"{"score": 0.8, "correct": true, "explanation": "Good."}"#,
        );
        let f = fixture(reasoning).await;
        let batch = f.orchestrator.batches().load_batch(f.session.id).await.unwrap();
        let item = f.orchestrator.batches().item_at_pointer(&batch).await.unwrap();
        let message = saved_reply(&f, "Chloroplasts turn light into chemical energy").await;
        let turn = Turn { session: &f.session, item: &item, message: &message };

        let first = f
            .orchestrator
            .dispatch(&turn, IntentLabel::Intent(Intent::DirectAnswer))
            .await
            .unwrap();
        assert!(first.evaluation.is_some());

        let second = f.orchestrator.dispatch(&turn, IntentLabel::Intent(Intent::DirectAnswer)).await;
        assert!(matches!(second, Err(TutorError::Conflict(_))));

        let after = f.orchestrator.batches().load_batch(f.session.id).await.unwrap();
        assert_eq!(after.current_index, 1);
        assert_eq!(f.store.get_evaluations_for_session(f.session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mixed_replies_are_answered_and_graded_in_one_turn() {
        let reasoning = Arc::new(ScriptedReasoning::new());
        reasoning.push(PromptKind::QuestionGeneration, &five_questions());
        reasoning.set_default(PromptKind::Relevance, "0.9");
        reasoning.push(
            PromptKind::ContextAnswer,
            "Chloroplasts hold chlorophyll, which captures the light energy.",
        );
        reasoning.push(PromptKind::Evaluation, r#"{"score": 0.6, "explanation": "Partly right."}"#);
        let f = fixture(reasoning.clone()).await;
        let batch = f.orchestrator.batches().load_batch(f.session.id).await.unwrap();
        let item = f.orchestrator.batches().item_at_pointer(&batch).await.unwrap();
        let message =
            saved_reply(&f, "Plants make food from light, but where does the light get captured?").await;

        let outcome = f
            .orchestrator
            .dispatch(
                &Turn { session: &f.session, item: &item, message: &message },
                IntentLabel::Intent(Intent::Mixed),
            )
            .await
            .unwrap();

        assert!(outcome
            .reply
            .as_deref()
            .unwrap()
            .contains("Chloroplasts hold chlorophyll"));
        assert_eq!(outcome.evaluation.as_ref().map(|e| e.score), Some(0.6));
        assert_eq!(
            outcome.next_question.as_deref(),
            Some("Question number 1 about photosynthesis?")
        );
        assert!(!outcome.session_complete);

        let evaluations = f.store.get_evaluations_for_session(f.session.id).await.unwrap();
        assert_eq!(evaluations.len(), 1);
        assert_eq!(evaluations[0].message_id, message.id);
        assert_eq!(evaluations[0].question_item_id, item.id);
        let after = f.orchestrator.batches().load_batch(f.session.id).await.unwrap();
        assert_eq!(after.current_index, batch.current_index + 1);
        assert_eq!(reasoning.calls(PromptKind::ContextAnswer), 1);
    }

    #[test]
    fn routes_follow_intent() {
        assert_eq!(Route::for_intent(Intent::DirectAnswer), Route::Score);
        assert_eq!(Route::for_intent(Intent::Mixed), Route::Both);
        assert_eq!(Route::for_intent(Intent::ReturnQuestion), Route::Answer);
    }

    #[tokio::test]
    async fn unrecognised_labels_ask_for_clarification_without_moving() {
        let f = fixture(Arc::new(ScriptedReasoning::new())).await;
        let batch = f.orchestrator.batches().load_batch(f.session.id).await.unwrap();
        let item = f.orchestrator.batches().item_at_pointer(&batch).await.unwrap();
        let message = Message::from_learner(f.session.id, "hmm", None);

        let outcome = f
            .orchestrator
            .dispatch(
                &Turn { session: &f.session, item: &item, message: &message },
                IntentLabel::Unrecognized("SHRUG".into()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.reply.as_deref(), Some(LanguageStyle::Standard.clarify_request()));
        assert!(outcome.evaluation.is_none());
        let after = f.orchestrator.batches().load_batch(f.session.id).await.unwrap();
        assert_eq!(after.current_index, batch.current_index);
    }

    #[tokio::test]
    async fn inactive_sessions_are_refused() {
        let f = fixture(Arc::new(ScriptedReasoning::new())).await;
        f.store.deactivate_session(f.session.id).await.unwrap();
        let session = f.store.get_session(f.session.id).await.unwrap();
        assert!(matches!(
            f.orchestrator.handle_reply(&session, "42", None).await,
            Err(TutorError::SessionInactive(_))
        ));
    }

    #[tokio::test]
    async fn missing_batch_is_an_integrity_error() {
        let f = fixture(Arc::new(ScriptedReasoning::new())).await;
        let orphan = f
            .store
            .create_session(f.session.user_id, None, LanguageStyle::Standard)
            .await
            .unwrap();
        assert!(matches!(
            f.orchestrator.handle_reply(&orphan, "42", None).await,
            Err(TutorError::MissingBatch(id)) if id == orphan.id
        ));
    }

    #[tokio::test]
    async fn foreign_passages_never_reach_the_grader() {
        let reasoning = Arc::new(ScriptedReasoning::new());
        let store = Arc::new(InMemoryStore::new());
        let settings = Arc::new(TutorSettings::default());
        let session = store
            .create_session(Uuid::new_v4(), Some(Uuid::new_v4()), LanguageStyle::Standard)
            .await
            .unwrap();
        let retrieval = Arc::new(StaticRetrieval::new(vec![RetrievedPassage {
            source_id: Uuid::new_v4(),
            chunk_index: 3,
            text: "LEAKED answer key".into(),
            tenant_tag: TenantTag::from_raw("learner:intruder"),
        }]));
        reasoning.set_default(PromptKind::IntentClassification, "DIRECT_ANSWER");
        reasoning.set_default(PromptKind::Relevance, "0.9");
        reasoning.set_default(
            PromptKind::Evaluation,
            r#"{"score": 0.8, "correct": true, "explanation": "Good."}"#,
        );
        let orchestrator = ResponseOrchestrator::new(
            store.clone(),
            retrieval.clone(),
            Arc::new(RecordingProgressSink::new()),
            settings.clone(),
            BatchManager::new(store.clone(), reasoning.clone(), retrieval.clone(), settings.clone()),
            IntentClassifier::new(reasoning.clone(), settings.clone()),
            MessageValidator::new(Some(reasoning.clone()), settings.clone()),
            RagAnswerer::new(reasoning.clone(), retrieval, settings.clone()),
            AnswerEvaluator::new(reasoning.clone(), settings.clone()),
            InsightGenerator::new(store.clone(), reasoning.clone(), settings),
        );
        orchestrator.batches().get_or_create_batch(&session).await.unwrap();

        orchestrator
            .handle_reply(&session, "The main idea is that plants store light energy", None)
            .await
            .unwrap();

        assert!(reasoning.prompts().iter().all(|p| !p.text.contains("LEAKED")));
    }
}
