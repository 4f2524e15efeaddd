//! crates/tutor_core/src/batch.rs
//!
//! Creation and traversal of a session's question batch.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    Archetype, BatchEvent, BatchStatus, Difficulty, QuestionBatch, QuestionItem, QuestionSignals,
    Session,
};
use crate::error::{TutorError, TutorResult};
use crate::language::LanguageStyle;
use crate::outcome::{FallbackReason, Outcome};
use crate::ports::{
    DatabaseService, PortError, Prompt, PromptKind, ReasoningService, RetrievalQuery,
    RetrievalService,
};
use crate::rag::{join_passages, scoped_passages};
use crate::reasoning::{ask, number_field, parse_json_array, string_field};
use crate::settings::TutorSettings;
use crate::text::keywords;

/// Topic-agnostic query used to pull a broad slice of the learner's material.
const BROAD_CONTEXT_QUERY: &str = "key concepts, definitions, processes, causes and examples";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The pointer moved to this index.
    Next(usize),
    Completed,
}

/// A generated question before it is bound to a batch.
#[derive(Debug, Clone, PartialEq)]
struct QuestionDraft {
    question: String,
    expected_answer: String,
    archetype: Archetype,
    difficulty: Difficulty,
    signals: Option<QuestionSignals>,
}

impl QuestionDraft {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let signals = match (
            number_field(map, "topic_diversity"),
            number_field(map, "cognitive_variety"),
            number_field(map, "difficulty_progression"),
            number_field(map, "recency_penalty"),
        ) {
            (Some(d), Some(v), Some(p), r) => Some(QuestionSignals {
                topic_diversity: d.clamp(0.0, 1.0),
                cognitive_variety: v.clamp(0.0, 1.0),
                difficulty_progression: p.clamp(0.0, 1.0),
                recency_penalty: r.unwrap_or(0.0).clamp(0.0, 1.0),
            }),
            _ => None,
        };
        Some(Self {
            question: string_field(map, "question")?,
            expected_answer: string_field(map, "expected_answer")?,
            archetype: Archetype::parse_lenient(&string_field(map, "archetype")?)?,
            difficulty: string_field(map, "difficulty")?.parse().ok()?,
            signals,
        })
    }

    fn fallback(language: LanguageStyle) -> Self {
        let (question, expected_answer) = language.fallback_question();
        Self {
            question: question.to_string(),
            expected_answer: expected_answer.to_string(),
            archetype: Archetype::Recall,
            difficulty: Difficulty::Easy,
            signals: None,
        }
    }
}

fn difficulty_rank(d: Difficulty) -> u8 {
    match d {
        Difficulty::Easy => 0,
        Difficulty::Medium => 1,
        Difficulty::Hard => 2,
    }
}

/// Fills in signals the model did not supply, judged against the earlier drafts.
fn derive_signals(drafts: &[QuestionDraft]) -> Vec<QuestionSignals> {
    let mut seen_keywords: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(drafts.len());
    for (i, draft) in drafts.iter().enumerate() {
        let words = keywords(&draft.question);
        let fresh = words.iter().filter(|w| !seen_keywords.contains(*w)).count();
        let derived = QuestionSignals {
            topic_diversity: if words.is_empty() { 0.0 } else { fresh as f64 / words.len() as f64 },
            cognitive_variety: match i {
                0 => 1.0,
                _ if drafts[i - 1].archetype != draft.archetype => 1.0,
                _ => 0.3,
            },
            difficulty_progression: match i {
                0 => 1.0,
                _ if difficulty_rank(draft.difficulty) >= difficulty_rank(drafts[i - 1].difficulty) => 1.0,
                _ => 0.4,
            },
            recency_penalty: drafts[..i]
                .iter()
                .rev()
                .take(3)
                .filter(|earlier| earlier.archetype == draft.archetype)
                .count() as f64
                / 3.0,
        };
        seen_keywords.extend(words);
        out.push(draft.signals.unwrap_or(derived));
    }
    out
}

pub struct BatchManager {
    store: Arc<dyn DatabaseService>,
    reasoning: Arc<dyn ReasoningService>,
    retrieval: Arc<dyn RetrievalService>,
    settings: Arc<TutorSettings>,
}

impl BatchManager {
    pub fn new(
        store: Arc<dyn DatabaseService>,
        reasoning: Arc<dyn ReasoningService>,
        retrieval: Arc<dyn RetrievalService>,
        settings: Arc<TutorSettings>,
    ) -> Self {
        Self { store, reasoning, retrieval, settings }
    }

    /// Idempotent: a session that already owns a batch gets it back unchanged,
    /// whatever its status.
    pub async fn get_or_create_batch(&self, session: &Session) -> TutorResult<QuestionBatch> {
        if let Some(existing) = self.store.get_batch_for_session(session.id).await? {
            debug!(session_id = %session.id, batch_id = %existing.id, status = %existing.status, "reusing question batch");
            return Ok(existing);
        }

        let (status, drafts) = match self.generate_drafts(session).await {
            Outcome::Ok(drafts) => (BatchStatus::Ready, drafts),
            Outcome::Fallback(reason) => {
                warn!(session_id = %session.id, %reason, "question generation failed, using a single fallback question");
                (BatchStatus::Failed, vec![QuestionDraft::fallback(session.language)])
            }
        };

        let now = Utc::now();
        let batch = QuestionBatch {
            id: Uuid::new_v4(),
            session_id: session.id,
            status,
            current_index: 0,
            total_questions: drafts.len(),
            document_id: session.document_id,
            tenant_tag: session.tenant_tag(),
            created_at: now,
            updated_at: now,
        };
        let signals = derive_signals(&drafts);
        let items: Vec<QuestionItem> = drafts
            .into_iter()
            .zip(signals)
            .enumerate()
            .map(|(order, (draft, signals))| QuestionItem {
                id: Uuid::new_v4(),
                batch_id: batch.id,
                order,
                question_id: format!("{}-{:02}", draft.archetype.as_str(), order + 1),
                archetype: draft.archetype,
                difficulty: draft.difficulty,
                question_text: draft.question,
                expected_answer: draft.expected_answer,
                asked: false,
                question_score: signals.composite_score(),
                signals,
            })
            .collect();

        match self.store.create_batch(batch, items).await {
            Ok(created) => {
                info!(
                    session_id = %session.id,
                    batch_id = %created.id,
                    total = created.total_questions,
                    status = %created.status,
                    "question batch created"
                );
                Ok(created)
            }
            // Another turn created it first; theirs wins.
            Err(PortError::Conflict(_)) => self
                .store
                .get_batch_for_session(session.id)
                .await?
                .ok_or(TutorError::MissingBatch(session.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn generate_drafts(&self, session: &Session) -> Outcome<Vec<QuestionDraft>> {
        let Some(document_id) = session.document_id else {
            return Outcome::Fallback(FallbackReason::EmptyContext);
        };
        let query = RetrievalQuery {
            tenant_tag: session.tenant_tag(),
            source_id: Some(document_id),
            text: BROAD_CONTEXT_QUERY.to_string(),
            top_k: self.settings.context_top_k,
        };
        let passages = match scoped_passages(self.retrieval.as_ref(), &query).await {
            Outcome::Ok(passages) => passages,
            Outcome::Fallback(reason) => return Outcome::Fallback(reason),
        };

        let target = self.settings.question_batch_size;
        let prompt = Prompt::new(
            PromptKind::QuestionGeneration,
            format!(
                "Write exactly {target} study questions about the material below.\n\
                 Mix these archetypes: concept_unfold, critical_reversal, application_bridge, \
                 cause_effect, compare_contrast, recall. Start easy and get harder.\n\
                 {}\n\
                 Respond with a JSON array only. Each element is an object with keys \
                 \"question\", \"expected_answer\", \"archetype\", \"difficulty\" (easy, medium or hard) \
                 and optionally \"topic_diversity\", \"cognitive_variety\", \"difficulty_progression\", \
                 \"recency_penalty\" (each 0 to 1).\n\nMaterial:\n{}",
                session.language.prompt_instruction(),
                join_passages(&passages),
            ),
            self.settings.generation_max_tokens,
        );

        let min = self.settings.min_generated_questions;
        ask(self.reasoning.as_ref(), &prompt).await.and_then(|raw| {
            let values = match parse_json_array(&raw) {
                Ok(values) => values,
                Err(e) => return Outcome::Fallback(FallbackReason::Malformed(e)),
            };
            let mut drafts: Vec<QuestionDraft> = values.iter().filter_map(QuestionDraft::from_value).collect();
            if drafts.len() < min {
                return Outcome::Fallback(FallbackReason::Insufficient { got: drafts.len(), needed: min });
            }
            drafts.truncate(target);
            Outcome::Ok(drafts)
        })
    }

    pub async fn load_batch(&self, session_id: Uuid) -> TutorResult<QuestionBatch> {
        self.store
            .get_batch_for_session(session_id)
            .await?
            .ok_or(TutorError::MissingBatch(session_id))
    }

    /// The item under the batch pointer.
    pub async fn item_at_pointer(&self, batch: &QuestionBatch) -> TutorResult<QuestionItem> {
        self.store
            .get_question_item(batch.id, batch.current_index)
            .await?
            .ok_or(TutorError::MissingQuestionItem { batch_id: batch.id, order: batch.current_index })
    }

    /// Delivers the question under the pointer, or `None` once the batch is done.
    pub async fn get_next_question(&self, session: &Session) -> TutorResult<Option<(String, QuestionItem)>> {
        let batch = self.load_batch(session.id).await?;
        if batch.status == BatchStatus::Completed {
            return Ok(None);
        }
        let mut item = self.item_at_pointer(&batch).await?;

        let first_delivery = self.store.mark_item_asked(item.id).await?;
        item.mark_asked();
        if first_delivery {
            debug!(session_id = %session.id, question_id = %item.question_id, "question delivered");
        }

        let next_status = batch.status.transition(BatchEvent::Deliver)?;
        if next_status != batch.status
            && !self.store.update_batch_status(batch.id, batch.status, next_status).await?
        {
            debug!(batch_id = %batch.id, "status already moved by a concurrent delivery");
        }

        Ok(Some((item.question_text.clone(), item)))
    }

    /// Fails with `Conflict` unless the pointer is still on `expected_index`.
    /// Checked before grading so a duplicate of an already handled turn
    /// is refused without side effects.
    pub async fn ensure_pointer(&self, session: &Session, expected_index: usize) -> TutorResult<QuestionBatch> {
        let batch = self.load_batch(session.id).await?;
        if batch.status == BatchStatus::Completed || batch.current_index != expected_index {
            return Err(TutorError::Conflict(format!(
                "batch {} is no longer on question {expected_index}",
                batch.id
            )));
        }
        Ok(batch)
    }

    /// The only way the pointer moves. Storage applies the change conditionally
    /// on `expected_index`, the item the turn was handled against, so a
    /// racing duplicate turn loses with `Conflict`.
    pub async fn advance(&self, session: &Session, expected_index: usize) -> TutorResult<Advance> {
        let batch = self.load_batch(session.id).await?;
        // Rejects completed batches before touching storage.
        batch.status.transition(BatchEvent::Exhaust)?;
        if batch.current_index != expected_index {
            return Err(TutorError::Conflict(format!(
                "batch {} pointer is at {}, not {expected_index}",
                batch.id, batch.current_index
            )));
        }

        if batch.has_next() {
            if !self.store.advance_batch_pointer(batch.id, expected_index).await? {
                return Err(TutorError::Conflict(format!("batch {} pointer moved past {expected_index}", batch.id)));
            }
            debug!(session_id = %session.id, index = expected_index + 1, "pointer advanced");
            Ok(Advance::Next(expected_index + 1))
        } else {
            if !self.store.complete_batch(batch.id, expected_index).await? {
                return Err(TutorError::Conflict(format!("batch {} already completed", batch.id)));
            }
            info!(session_id = %session.id, batch_id = %batch.id, "question batch completed");
            Ok(Advance::Completed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TenantTag;
    use crate::memory::InMemoryStore;
    use crate::ports::RetrievedPassage;
    use crate::testing::{ScriptedReasoning, StaticRetrieval};
    use serde_json::json;

    fn questions(n: usize) -> String {
        let items: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "question": format!("Question number {i} about photosynthesis?"),
                    "expected_answer": format!("Answer {i}"),
                    "archetype": if i % 2 == 0 { "Concept Unfold" } else { "recall" },
                    "difficulty": if i < 3 { "easy" } else { "medium" },
                })
            })
            .collect();
        serde_json::to_string(&items).unwrap()
    }

    struct Fixture {
        manager: BatchManager,
        store: Arc<InMemoryStore>,
        reasoning: Arc<ScriptedReasoning>,
        session: Session,
    }

    async fn fixture(document: bool, retrieval: Option<StaticRetrieval>) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let reasoning = Arc::new(ScriptedReasoning::new());
        let session = store
            .create_session(Uuid::new_v4(), document.then(Uuid::new_v4), LanguageStyle::Standard)
            .await
            .unwrap();
        let retrieval = retrieval.unwrap_or_else(|| {
            StaticRetrieval::new(vec![RetrievedPassage {
                source_id: session.document_id.unwrap_or_default(),
                chunk_index: 0,
                text: "Photosynthesis turns light into chemical energy.".into(),
                tenant_tag: session.tenant_tag(),
            }])
        });
        let manager = BatchManager::new(
            store.clone(),
            reasoning.clone(),
            Arc::new(retrieval),
            Arc::new(TutorSettings::default()),
        );
        Fixture { manager, store, reasoning, session }
    }

    #[tokio::test]
    async fn creates_items_in_generation_order_and_truncates_extras() {
        let f = fixture(true, None).await;
        f.reasoning.push(PromptKind::QuestionGeneration, &questions(12));

        let batch = f.manager.get_or_create_batch(&f.session).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Ready);
        assert_eq!(batch.total_questions, 10);

        let items = f.store.get_question_items(batch.id).await.unwrap();
        assert_eq!(items.len(), 10);
        assert!(items.iter().enumerate().all(|(i, item)| item.order == i));
        assert_eq!(items[0].question_text, "Question number 0 about photosynthesis?");
        assert_eq!(items[0].archetype, Archetype::ConceptUnfold);
        assert!(items.iter().all(|i| (0.0..=1.0).contains(&i.question_score)));
    }

    #[tokio::test]
    async fn second_call_is_idempotent() {
        let f = fixture(true, None).await;
        f.reasoning.push(PromptKind::QuestionGeneration, &questions(10));

        let first = f.manager.get_or_create_batch(&f.session).await.unwrap();
        let second = f.manager.get_or_create_batch(&f.session).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(f.reasoning.calls(PromptKind::QuestionGeneration), 1);
    }

    #[tokio::test]
    async fn too_few_questions_produce_a_failed_single_item_batch() {
        let f = fixture(true, None).await;
        f.reasoning.push(PromptKind::QuestionGeneration, &questions(3));

        let batch = f.manager.get_or_create_batch(&f.session).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.total_questions, 1);
        let item = f.store.get_question_item(batch.id, 0).await.unwrap().unwrap();
        assert_eq!(item.question_text, LanguageStyle::Standard.fallback_question().0);
    }

    #[tokio::test]
    async fn no_document_skips_generation() {
        let f = fixture(false, None).await;
        let batch = f.manager.get_or_create_batch(&f.session).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(f.reasoning.calls(PromptKind::QuestionGeneration), 0);
    }

    #[tokio::test]
    async fn foreign_context_counts_as_empty() {
        let foreign = StaticRetrieval::new(vec![RetrievedPassage {
            source_id: Uuid::new_v4(),
            chunk_index: 0,
            text: "someone else's notes".into(),
            tenant_tag: TenantTag::from_raw("learner:other"),
        }]);
        let f = fixture(true, Some(foreign)).await;
        f.reasoning.push(PromptKind::QuestionGeneration, &questions(10));

        let batch = f.manager.get_or_create_batch(&f.session).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(f.reasoning.calls(PromptKind::QuestionGeneration), 0);
    }

    #[tokio::test]
    async fn delivery_marks_asked_and_moves_status() {
        let f = fixture(true, None).await;
        f.reasoning.push(PromptKind::QuestionGeneration, &questions(5));
        let batch = f.manager.get_or_create_batch(&f.session).await.unwrap();

        let (text, item) = f.manager.get_next_question(&f.session).await.unwrap().unwrap();
        assert_eq!(text, item.question_text);
        assert!(item.asked);
        assert_eq!(f.manager.load_batch(f.session.id).await.unwrap().status, BatchStatus::InProgress);

        // Re-delivering the same question does not flip anything again.
        assert!(!f.store.mark_item_asked(item.id).await.unwrap());
        assert_eq!(f.store.get_question_items(batch.id).await.unwrap().iter().filter(|i| i.asked).count(), 1);
    }

    #[tokio::test]
    async fn advancing_walks_the_batch_then_completes() {
        let f = fixture(true, None).await;
        f.reasoning.push(PromptKind::QuestionGeneration, &questions(5));
        f.manager.get_or_create_batch(&f.session).await.unwrap();

        for expected in 1..5 {
            assert_eq!(f.manager.advance(&f.session, expected - 1).await.unwrap(), Advance::Next(expected));
        }
        assert_eq!(f.manager.advance(&f.session, 4).await.unwrap(), Advance::Completed);
        assert!(f.manager.get_next_question(&f.session).await.unwrap().is_none());
        assert!(matches!(
            f.manager.advance(&f.session, 4).await,
            Err(TutorError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn stale_turns_cannot_move_the_pointer() {
        let f = fixture(true, None).await;
        f.reasoning.push(PromptKind::QuestionGeneration, &questions(5));
        f.manager.get_or_create_batch(&f.session).await.unwrap();

        assert_eq!(f.manager.advance(&f.session, 0).await.unwrap(), Advance::Next(1));
        assert!(matches!(f.manager.advance(&f.session, 0).await, Err(TutorError::Conflict(_))));
        assert!(matches!(f.manager.ensure_pointer(&f.session, 0).await, Err(TutorError::Conflict(_))));
        assert_eq!(f.manager.ensure_pointer(&f.session, 1).await.unwrap().current_index, 1);
    }

    #[tokio::test]
    async fn pointer_moves_only_from_the_expected_index() {
        let f = fixture(true, None).await;
        f.reasoning.push(PromptKind::QuestionGeneration, &questions(5));
        let batch = f.manager.get_or_create_batch(&f.session).await.unwrap();

        assert!(f.store.advance_batch_pointer(batch.id, 0).await.unwrap());
        // A duplicate turn that read index 0 loses.
        assert!(!f.store.advance_batch_pointer(batch.id, 0).await.unwrap());
        assert_eq!(f.manager.load_batch(f.session.id).await.unwrap().current_index, 1);
    }

    #[test]
    fn drafts_reject_unknown_archetypes_and_difficulties() {
        let bad = json!({"question": "q", "expected_answer": "a", "archetype": "riddle", "difficulty": "easy"});
        assert!(QuestionDraft::from_value(&bad).is_none());
        let bad = json!({"question": "q", "expected_answer": "a", "archetype": "recall", "difficulty": "brutal"});
        assert!(QuestionDraft::from_value(&bad).is_none());
        let good = json!({"question": "q", "expected_answer": "a", "archetype": "recall", "difficulty": "Hard"});
        assert_eq!(QuestionDraft::from_value(&good).unwrap().difficulty, Difficulty::Hard);
    }
}
