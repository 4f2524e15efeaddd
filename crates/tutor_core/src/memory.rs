//! crates/tutor_core/src/memory.rs
//!
//! A process-local `DatabaseService`. Mirrors the conditional updates the
//! PostgreSQL adapter performs so orchestrator races behave the same in tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::{
    BatchStatus, EvaluatorResult, Message, QuestionBatch, QuestionItem, Session, SessionInsight,
};
use crate::language::LanguageStyle;
use crate::ports::{DatabaseService, PortError, PortResult};

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, Session>,
    batches: HashMap<Uuid, QuestionBatch>,
    items: HashMap<Uuid, Vec<QuestionItem>>,
    messages: Vec<Message>,
    evaluations: Vec<EvaluatorResult>,
    insights: HashMap<Uuid, SessionInsight>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn batch_mut(tables: &mut Tables, batch_id: Uuid) -> PortResult<&mut QuestionBatch> {
    tables
        .batches
        .get_mut(&batch_id)
        .ok_or_else(|| PortError::NotFound(format!("batch {batch_id}")))
}

#[async_trait]
impl DatabaseService for InMemoryStore {
    async fn create_session(
        &self,
        user_id: Uuid,
        document_id: Option<Uuid>,
        language: LanguageStyle,
    ) -> PortResult<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            document_id,
            language,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.tables().sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        self.tables()
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("session {session_id}")))
    }

    async fn update_session_language(
        &self,
        session_id: Uuid,
        language: LanguageStyle,
    ) -> PortResult<Session> {
        let mut tables = self.tables();
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(format!("session {session_id}")))?;
        session.language = language;
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn deactivate_session(&self, session_id: Uuid) -> PortResult<()> {
        let mut tables = self.tables();
        let session = tables
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(format!("session {session_id}")))?;
        session.is_active = false;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn get_batch_for_session(&self, session_id: Uuid) -> PortResult<Option<QuestionBatch>> {
        Ok(self
            .tables()
            .batches
            .values()
            .find(|b| b.session_id == session_id)
            .cloned())
    }

    async fn create_batch(
        &self,
        batch: QuestionBatch,
        items: Vec<QuestionItem>,
    ) -> PortResult<QuestionBatch> {
        let mut tables = self.tables();
        if tables.batches.values().any(|b| b.session_id == batch.session_id) {
            return Err(PortError::Conflict(format!(
                "session {} already has a question batch",
                batch.session_id
            )));
        }
        tables.items.insert(batch.id, items);
        tables.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn update_batch_status(
        &self,
        batch_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    ) -> PortResult<bool> {
        let mut tables = self.tables();
        let batch = batch_mut(&mut tables, batch_id)?;
        if batch.status != from {
            return Ok(false);
        }
        batch.status = to;
        batch.updated_at = Utc::now();
        Ok(true)
    }

    async fn advance_batch_pointer(&self, batch_id: Uuid, expected_index: usize) -> PortResult<bool> {
        let mut tables = self.tables();
        let batch = batch_mut(&mut tables, batch_id)?;
        if batch.current_index != expected_index || batch.status == BatchStatus::Completed {
            return Ok(false);
        }
        batch.current_index += 1;
        batch.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_batch(&self, batch_id: Uuid, expected_index: usize) -> PortResult<bool> {
        let mut tables = self.tables();
        let batch = batch_mut(&mut tables, batch_id)?;
        if batch.current_index != expected_index || batch.status == BatchStatus::Completed {
            return Ok(false);
        }
        batch.status = BatchStatus::Completed;
        batch.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_question_items(&self, batch_id: Uuid) -> PortResult<Vec<QuestionItem>> {
        let mut items = self.tables().items.get(&batch_id).cloned().unwrap_or_default();
        items.sort_by_key(|i| i.order);
        Ok(items)
    }

    async fn get_question_item(&self, batch_id: Uuid, order: usize) -> PortResult<Option<QuestionItem>> {
        Ok(self
            .tables()
            .items
            .get(&batch_id)
            .and_then(|items| items.iter().find(|i| i.order == order).cloned()))
    }

    async fn mark_item_asked(&self, item_id: Uuid) -> PortResult<bool> {
        let mut tables = self.tables();
        let item = tables
            .items
            .values_mut()
            .flat_map(|items| items.iter_mut())
            .find(|i| i.id == item_id)
            .ok_or_else(|| PortError::NotFound(format!("question item {item_id}")))?;
        Ok(item.mark_asked())
    }

    async fn save_message(&self, message: Message) -> PortResult<()> {
        self.tables().messages.push(message);
        Ok(())
    }

    async fn set_message_classifier_token(&self, message_id: Uuid, token: &str) -> PortResult<()> {
        let mut tables = self.tables();
        let message = tables
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| PortError::NotFound(format!("message {message_id}")))?;
        message.classifier_token = Some(token.to_string());
        Ok(())
    }

    async fn get_messages_for_session(&self, session_id: Uuid) -> PortResult<Vec<Message>> {
        Ok(self
            .tables()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn save_evaluation(&self, result: EvaluatorResult) -> PortResult<()> {
        let mut tables = self.tables();
        if tables.evaluations.iter().any(|e| e.message_id == result.message_id) {
            return Err(PortError::Conflict(format!(
                "message {} already has an evaluation",
                result.message_id
            )));
        }
        tables.evaluations.push(result);
        Ok(())
    }

    async fn get_evaluations_for_session(&self, session_id: Uuid) -> PortResult<Vec<EvaluatorResult>> {
        Ok(self
            .tables()
            .evaluations
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn upsert_insight(&self, insight: SessionInsight) -> PortResult<SessionInsight> {
        let mut tables = self.tables();
        let stored = match tables.insights.get(&insight.session_id) {
            Some(existing) => SessionInsight {
                id: existing.id,
                created_at: existing.created_at,
                updated_at: Utc::now(),
                ..insight
            },
            None => insight,
        };
        tables.insights.insert(stored.session_id, stored.clone());
        Ok(stored)
    }

    async fn get_insight(&self, session_id: Uuid) -> PortResult<Option<SessionInsight>> {
        Ok(self.tables().insights.get(&session_id).cloned())
    }
}
