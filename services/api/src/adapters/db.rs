//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` and `ProgressSink` ports from the `core` crate. It handles
//! all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tracing::{debug, info};
use tutor_core::domain::{
    Archetype, BatchStatus, Difficulty, EvaluatorResult, FollowupAction, InsightStatus, Message,
    QuestionBatch, QuestionItem, QuestionSignals, Session, SessionCompletion, SessionInsight,
    TenantTag, Zone,
};
use tutor_core::language::LanguageStyle;
use tutor_core::ports::{DatabaseService, PortError, PortResult, ProgressSink};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_column<T>(column: &str, raw: &str) -> PortResult<T>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|e| PortError::Unexpected(format!("bad {column} column: {e}")))
}

fn to_index(value: i32) -> usize {
    value.max(0) as usize
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    user_id: Uuid,
    document_id: Option<Uuid>,
    language: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl SessionRecord {
    fn to_domain(self) -> PortResult<Session> {
        Ok(Session {
            id: self.id,
            user_id: self.user_id,
            document_id: self.document_id,
            language: parse_column::<LanguageStyle>("language", &self.language)?,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct BatchRecord {
    id: Uuid,
    session_id: Uuid,
    status: String,
    current_index: i32,
    total_questions: i32,
    document_id: Option<Uuid>,
    tenant_tag: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl BatchRecord {
    fn to_domain(self) -> PortResult<QuestionBatch> {
        Ok(QuestionBatch {
            id: self.id,
            session_id: self.session_id,
            status: parse_column::<BatchStatus>("status", &self.status)?,
            current_index: to_index(self.current_index),
            total_questions: to_index(self.total_questions),
            document_id: self.document_id,
            tenant_tag: TenantTag::from_raw(self.tenant_tag),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ItemRecord {
    id: Uuid,
    batch_id: Uuid,
    item_order: i32,
    question_id: String,
    archetype: String,
    difficulty: String,
    question_text: String,
    expected_answer: String,
    asked: bool,
    topic_diversity: f64,
    cognitive_variety: f64,
    difficulty_progression: f64,
    recency_penalty: f64,
    question_score: f64,
}
impl ItemRecord {
    fn to_domain(self) -> PortResult<QuestionItem> {
        Ok(QuestionItem {
            id: self.id,
            batch_id: self.batch_id,
            order: to_index(self.item_order),
            question_id: self.question_id,
            archetype: parse_column::<Archetype>("archetype", &self.archetype)?,
            difficulty: parse_column::<Difficulty>("difficulty", &self.difficulty)?,
            question_text: self.question_text,
            expected_answer: self.expected_answer,
            asked: self.asked,
            signals: QuestionSignals {
                topic_diversity: self.topic_diversity,
                cognitive_variety: self.cognitive_variety,
                difficulty_progression: self.difficulty_progression,
                recency_penalty: self.recency_penalty,
            },
            question_score: self.question_score,
        })
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    session_id: Uuid,
    content: String,
    is_user_message: bool,
    classifier_token: Option<String>,
    response_latency_ms: Option<i64>,
    token_count: i32,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> Message {
        Message {
            id: self.id,
            session_id: self.session_id,
            content: self.content,
            is_user_message: self.is_user_message,
            classifier_token: self.classifier_token,
            response_latency_ms: self.response_latency_ms,
            token_count: to_index(self.token_count),
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct EvaluationRecord {
    id: Uuid,
    session_id: Uuid,
    message_id: Uuid,
    question_item_id: Uuid,
    score: f64,
    is_correct: bool,
    xp: i64,
    explanation: String,
    confidence: f64,
    followup_action: String,
    suggested_correction: Option<String>,
    created_at: DateTime<Utc>,
}
impl EvaluationRecord {
    fn to_domain(self) -> EvaluatorResult {
        EvaluatorResult {
            id: self.id,
            session_id: self.session_id,
            message_id: self.message_id,
            question_item_id: self.question_item_id,
            score: self.score,
            is_correct: self.is_correct,
            xp: self.xp,
            explanation: self.explanation,
            confidence: self.confidence,
            followup_action: FollowupAction::parse_lenient(&self.followup_action),
            suggested_correction: self.suggested_correction,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct InsightRecord {
    id: Uuid,
    session_id: Uuid,
    focus_zone: Json<Zone>,
    steady_zone: Json<Zone>,
    edge_zone: Json<Zone>,
    session_xp: i64,
    accuracy: f64,
    qa_pair_count: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl InsightRecord {
    fn to_domain(self) -> PortResult<SessionInsight> {
        Ok(SessionInsight {
            id: self.id,
            session_id: self.session_id,
            focus_zone: self.focus_zone.0,
            steady_zone: self.steady_zone.0,
            edge_zone: self.edge_zone.0,
            session_xp: self.session_xp,
            accuracy: self.accuracy,
            qa_pair_count: to_index(self.qa_pair_count),
            status: parse_column::<InsightStatus>("status", &self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, user_id, document_id, language, is_active, created_at, updated_at";
const BATCH_COLUMNS: &str = "id, session_id, status, current_index, total_questions, document_id, tenant_tag, created_at, updated_at";
const ITEM_COLUMNS: &str = "id, batch_id, item_order, question_id, archetype, difficulty, question_text, expected_answer, asked, topic_diversity, cognitive_variety, difficulty_progression, recency_penalty, question_score";
const INSIGHT_COLUMNS: &str = "id, session_id, focus_zone, steady_zone, edge_zone, session_xp, accuracy, qa_pair_count, status, created_at, updated_at";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    // --- Sessions ---
    async fn create_session(
        &self,
        user_id: Uuid,
        document_id: Option<Uuid>,
        language: LanguageStyle,
    ) -> PortResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "INSERT INTO sessions (id, user_id, document_id, language, is_active) \
             VALUES ($1, $2, $3, $4, TRUE) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(document_id)
        .bind(language.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        record.to_domain()
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("session {session_id}")))?
        .to_domain()
    }

    async fn update_session_language(
        &self,
        session_id: Uuid,
        language: LanguageStyle,
    ) -> PortResult<Session> {
        sqlx::query_as::<_, SessionRecord>(&format!(
            "UPDATE sessions SET language = $2, updated_at = now() WHERE id = $1 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session_id)
        .bind(language.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("session {session_id}")))?
        .to_domain()
    }

    async fn deactivate_session(&self, session_id: Uuid) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = FALSE, updated_at = now() WHERE id = $1",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    // --- Question Batches ---
    async fn get_batch_for_session(&self, session_id: Uuid) -> PortResult<Option<QuestionBatch>> {
        sqlx::query_as::<_, BatchRecord>(&format!(
            "SELECT {BATCH_COLUMNS} FROM question_batches WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(BatchRecord::to_domain)
        .transpose()
    }

    async fn create_batch(
        &self,
        batch: QuestionBatch,
        items: Vec<QuestionItem>,
    ) -> PortResult<QuestionBatch> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let inserted = sqlx::query(
            "INSERT INTO question_batches \
             (id, session_id, status, current_index, total_questions, document_id, tenant_tag, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(batch.id)
        .bind(batch.session_id)
        .bind(batch.status.as_str())
        .bind(batch.current_index as i32)
        .bind(batch.total_questions as i32)
        .bind(batch.document_id)
        .bind(batch.tenant_tag.as_str())
        .bind(batch.created_at)
        .bind(batch.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        if inserted.rows_affected() == 0 {
            return Err(PortError::Conflict(format!(
                "session {} already has a question batch",
                batch.session_id
            )));
        }

        for item in &items {
            sqlx::query(
                "INSERT INTO question_items \
                 (id, batch_id, item_order, question_id, archetype, difficulty, question_text, expected_answer, asked, \
                  topic_diversity, cognitive_variety, difficulty_progression, recency_penalty, question_score) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            )
            .bind(item.id)
            .bind(batch.id)
            .bind(item.order as i32)
            .bind(&item.question_id)
            .bind(item.archetype.as_str())
            .bind(item.difficulty.as_str())
            .bind(&item.question_text)
            .bind(&item.expected_answer)
            .bind(item.asked)
            .bind(item.signals.topic_diversity)
            .bind(item.signals.cognitive_variety)
            .bind(item.signals.difficulty_progression)
            .bind(item.signals.recency_penalty)
            .bind(item.question_score)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        info!(batch_id = %batch.id, session_id = %batch.session_id, items = items.len(), "question batch stored");
        Ok(batch)
    }

    async fn update_batch_status(
        &self,
        batch_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE question_batches SET status = $3, updated_at = now() \
             WHERE id = $1 AND status = $2",
        )
        .bind(batch_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected() == 1)
    }

    async fn advance_batch_pointer(&self, batch_id: Uuid, expected_index: usize) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE question_batches SET current_index = current_index + 1, updated_at = now() \
             WHERE id = $1 AND current_index = $2 AND status <> 'completed'",
        )
        .bind(batch_id)
        .bind(expected_index as i32)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        debug!(batch_id = %batch_id, expected_index, advanced = result.rows_affected() == 1, "pointer advance");
        Ok(result.rows_affected() == 1)
    }

    async fn complete_batch(&self, batch_id: Uuid, expected_index: usize) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE question_batches SET status = 'completed', updated_at = now() \
             WHERE id = $1 AND current_index = $2 AND status <> 'completed'",
        )
        .bind(batch_id)
        .bind(expected_index as i32)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected() == 1)
    }

    // --- Question Items ---
    async fn get_question_items(&self, batch_id: Uuid) -> PortResult<Vec<QuestionItem>> {
        sqlx::query_as::<_, ItemRecord>(&format!(
            "SELECT {ITEM_COLUMNS} FROM question_items WHERE batch_id = $1 ORDER BY item_order"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?
        .into_iter()
        .map(ItemRecord::to_domain)
        .collect()
    }

    async fn get_question_item(&self, batch_id: Uuid, order: usize) -> PortResult<Option<QuestionItem>> {
        sqlx::query_as::<_, ItemRecord>(&format!(
            "SELECT {ITEM_COLUMNS} FROM question_items WHERE batch_id = $1 AND item_order = $2"
        ))
        .bind(batch_id)
        .bind(order as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(ItemRecord::to_domain)
        .transpose()
    }

    async fn mark_item_asked(&self, item_id: Uuid) -> PortResult<bool> {
        let result = sqlx::query("UPDATE question_items SET asked = TRUE WHERE id = $1 AND asked = FALSE")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM question_items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(PortError::NotFound(format!("question item {item_id}"))),
        }
    }

    // --- Messages ---
    async fn save_message(&self, message: Message) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO messages \
             (id, session_id, content, is_user_message, classifier_token, response_latency_ms, token_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(&message.content)
        .bind(message.is_user_message)
        .bind(&message.classifier_token)
        .bind(message.response_latency_ms)
        .bind(message.token_count as i32)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn set_message_classifier_token(&self, message_id: Uuid, token: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE messages SET classifier_token = $2 WHERE id = $1")
            .bind(message_id)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("message {message_id}")));
        }
        Ok(())
    }

    async fn get_messages_for_session(&self, session_id: Uuid) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, session_id, content, is_user_message, classifier_token, response_latency_ms, token_count, created_at \
             FROM messages WHERE session_id = $1 ORDER BY created_at",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    // --- Evaluations ---
    async fn save_evaluation(&self, result: EvaluatorResult) -> PortResult<()> {
        let inserted = sqlx::query(
            "INSERT INTO evaluator_results \
             (id, session_id, message_id, question_item_id, score, is_correct, xp, explanation, confidence, \
              followup_action, suggested_correction, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (message_id) DO NOTHING",
        )
        .bind(result.id)
        .bind(result.session_id)
        .bind(result.message_id)
        .bind(result.question_item_id)
        .bind(result.score)
        .bind(result.is_correct)
        .bind(result.xp)
        .bind(&result.explanation)
        .bind(result.confidence)
        .bind(result.followup_action.as_str())
        .bind(&result.suggested_correction)
        .bind(result.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if inserted.rows_affected() == 0 {
            return Err(PortError::Conflict(format!(
                "message {} already has an evaluation",
                result.message_id
            )));
        }
        Ok(())
    }

    async fn get_evaluations_for_session(&self, session_id: Uuid) -> PortResult<Vec<EvaluatorResult>> {
        let records = sqlx::query_as::<_, EvaluationRecord>(
            "SELECT id, session_id, message_id, question_item_id, score, is_correct, xp, explanation, confidence, \
             followup_action, suggested_correction, created_at \
             FROM evaluator_results WHERE session_id = $1 ORDER BY created_at",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    // --- Insights ---
    async fn upsert_insight(&self, insight: SessionInsight) -> PortResult<SessionInsight> {
        sqlx::query_as::<_, InsightRecord>(&format!(
            "INSERT INTO session_insights \
             (id, session_id, focus_zone, steady_zone, edge_zone, session_xp, accuracy, qa_pair_count, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10) \
             ON CONFLICT (session_id) DO UPDATE SET \
                focus_zone = EXCLUDED.focus_zone, \
                steady_zone = EXCLUDED.steady_zone, \
                edge_zone = EXCLUDED.edge_zone, \
                session_xp = EXCLUDED.session_xp, \
                accuracy = EXCLUDED.accuracy, \
                qa_pair_count = EXCLUDED.qa_pair_count, \
                status = EXCLUDED.status, \
                updated_at = now() \
             RETURNING {INSIGHT_COLUMNS}"
        ))
        .bind(insight.id)
        .bind(insight.session_id)
        .bind(Json(&insight.focus_zone))
        .bind(Json(&insight.steady_zone))
        .bind(Json(&insight.edge_zone))
        .bind(insight.session_xp)
        .bind(insight.accuracy)
        .bind(insight.qa_pair_count as i32)
        .bind(insight.status.as_str())
        .bind(insight.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?
        .to_domain()
    }

    async fn get_insight(&self, session_id: Uuid) -> PortResult<Option<SessionInsight>> {
        sqlx::query_as::<_, InsightRecord>(&format!(
            "SELECT {INSIGHT_COLUMNS} FROM session_insights WHERE session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(InsightRecord::to_domain)
        .transpose()
    }
}

//=========================================================================================
// `ProgressSink` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProgressSink for DbAdapter {
    /// Adds the session's experience to the learner's totals and extends the
    /// daily streak when the previous activity was the day before.
    async fn record_session_completion(&self, completion: &SessionCompletion) -> PortResult<()> {
        let day = completion.completed_at.date_naive();
        sqlx::query(
            "INSERT INTO learner_progress (user_id, total_xp, sessions_completed, current_streak, last_active_date, updated_at) \
             VALUES ($1, $2, 1, 1, $3, now()) \
             ON CONFLICT (user_id) DO UPDATE SET \
                total_xp = learner_progress.total_xp + EXCLUDED.total_xp, \
                sessions_completed = learner_progress.sessions_completed + 1, \
                current_streak = CASE \
                    WHEN learner_progress.last_active_date = EXCLUDED.last_active_date THEN learner_progress.current_streak \
                    WHEN learner_progress.last_active_date = EXCLUDED.last_active_date - 1 THEN learner_progress.current_streak + 1 \
                    ELSE 1 END, \
                last_active_date = GREATEST(learner_progress.last_active_date, EXCLUDED.last_active_date), \
                updated_at = now()",
        )
        .bind(completion.user_id)
        .bind(completion.session_xp)
        .bind(day)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        info!(
            user_id = %completion.user_id,
            session_id = %completion.session_id,
            session_xp = completion.session_xp,
            "learner progress updated"
        );
        Ok(())
    }
}
