//! crates/tutor_core/src/domain.rs
//!
//! Defines the pure, core data structures for the tutoring conversation.
//! These structs are independent of any database or transport format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::language::LanguageStyle;

//=========================================================================================
// Session
//=========================================================================================

/// One tutoring conversation owned by a single learner.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    pub language: LanguageStyle,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn tenant_tag(&self) -> TenantTag {
        TenantTag::for_learner(self.user_id)
    }
}

/// Partition key that isolates one learner's retrieval results from everyone else's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantTag(String);

impl TenantTag {
    pub fn for_learner(user_id: Uuid) -> Self {
        Self(format!("learner:{user_id}"))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//=========================================================================================
// Question Batch + its state machine
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Ready,
    InProgress,
    Completed,
    Failed,
}

/// Things that can happen to a batch after it has been created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEvent {
    /// A question was handed to the learner.
    Deliver,
    /// The pointer tried to move past the last item.
    Exhaust,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("batch cannot go from {from} on {event:?}")]
pub struct TransitionError {
    pub from: BatchStatus,
    pub event: BatchEvent,
}

impl BatchStatus {
    /// The only authorised way to change a batch status.
    pub fn transition(self, event: BatchEvent) -> Result<BatchStatus, TransitionError> {
        use BatchEvent::*;
        use BatchStatus::*;

        match (self, event) {
            (Ready, Deliver) | (InProgress, Deliver) => Ok(InProgress),
            // A degraded batch keeps its flag while it is being worked through.
            (Failed, Deliver) => Ok(Failed),
            (Ready, Exhaust) | (InProgress, Exhaust) | (Failed, Exhaust) => Ok(Completed),
            (Completed, _) => Err(TransitionError { from: self, event }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Ready => "ready",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(BatchStatus::Ready),
            "in_progress" => Ok(BatchStatus::InProgress),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(format!("unknown batch status '{other}'")),
        }
    }
}

/// The generated question set for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionBatch {
    pub id: Uuid,
    pub session_id: Uuid,
    pub status: BatchStatus,
    pub current_index: usize,
    pub total_questions: usize,
    pub document_id: Option<Uuid>,
    pub tenant_tag: TenantTag,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuestionBatch {
    pub fn has_next(&self) -> bool {
        self.current_index + 1 < self.total_questions
    }
}

//=========================================================================================
// Question Items
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    ConceptUnfold,
    CriticalReversal,
    ApplicationBridge,
    CauseEffect,
    CompareContrast,
    Recall,
}

impl Archetype {
    pub fn as_str(self) -> &'static str {
        match self {
            Archetype::ConceptUnfold => "concept_unfold",
            Archetype::CriticalReversal => "critical_reversal",
            Archetype::ApplicationBridge => "application_bridge",
            Archetype::CauseEffect => "cause_effect",
            Archetype::CompareContrast => "compare_contrast",
            Archetype::Recall => "recall",
        }
    }

    /// Lenient parse for model output ("Concept Unfold", "concept-unfold", ...).
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "concept_unfold" => Some(Archetype::ConceptUnfold),
            "critical_reversal" => Some(Archetype::CriticalReversal),
            "application_bridge" | "application" => Some(Archetype::ApplicationBridge),
            "cause_effect" | "cause_and_effect" => Some(Archetype::CauseEffect),
            "compare_contrast" | "compare_and_contrast" => Some(Archetype::CompareContrast),
            "recall" => Some(Archetype::Recall),
            _ => None,
        }
    }
}

impl FromStr for Archetype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Archetype::parse_lenient(s).ok_or_else(|| format!("unknown archetype '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

/// Per-question quality signals, kept for offline auditing of generated sets.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuestionSignals {
    pub topic_diversity: f64,
    pub cognitive_variety: f64,
    pub difficulty_progression: f64,
    pub recency_penalty: f64,
}

impl QuestionSignals {
    pub fn composite_score(&self) -> f64 {
        let raw = 0.30 * self.topic_diversity + 0.30 * self.cognitive_variety
            + 0.25 * self.difficulty_progression
            - 0.15 * self.recency_penalty;
        raw.clamp(0.0, 1.0)
    }
}

/// One question of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionItem {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub order: usize,
    pub question_id: String,
    pub archetype: Archetype,
    pub difficulty: Difficulty,
    pub question_text: String,
    pub expected_answer: String,
    pub asked: bool,
    pub signals: QuestionSignals,
    pub question_score: f64,
}

impl QuestionItem {
    /// Flags the item as delivered. Returns `true` only the first time.
    pub fn mark_asked(&mut self) -> bool {
        if self.asked {
            return false;
        }
        self.asked = true;
        true
    }
}

//=========================================================================================
// Messages
//=========================================================================================

/// One turn in the conversation, from the learner or from the tutor.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: String,
    pub is_user_message: bool,
    pub classifier_token: Option<String>,
    pub response_latency_ms: Option<i64>,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn from_learner(session_id: Uuid, content: &str, latency_ms: Option<i64>) -> Self {
        Self::build(session_id, content, true, latency_ms)
    }

    pub fn from_tutor(session_id: Uuid, content: &str) -> Self {
        Self::build(session_id, content, false, None)
    }

    fn build(session_id: Uuid, content: &str, is_user_message: bool, latency_ms: Option<i64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            content: content.to_string(),
            is_user_message,
            classifier_token: None,
            response_latency_ms: latency_ms,
            token_count: content.split_whitespace().count(),
            created_at: Utc::now(),
        }
    }
}

//=========================================================================================
// Evaluation
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FollowupAction {
    #[default]
    None,
    GiveHint,
    AskClarification,
    ShowSolution,
}

impl FollowupAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FollowupAction::None => "none",
            FollowupAction::GiveHint => "give_hint",
            FollowupAction::AskClarification => "ask_clarification",
            FollowupAction::ShowSolution => "show_solution",
        }
    }

    /// Unknown values degrade to `None` instead of failing the grade.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "give_hint" | "hint" => FollowupAction::GiveHint,
            "ask_clarification" | "clarification" => FollowupAction::AskClarification,
            "show_solution" | "solution" => FollowupAction::ShowSolution,
            _ => FollowupAction::None,
        }
    }
}

/// The grading record for exactly one learner answer.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorResult {
    pub id: Uuid,
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub question_item_id: Uuid,
    pub score: f64,
    pub is_correct: bool,
    pub xp: i64,
    pub explanation: String,
    pub confidence: f64,
    pub followup_action: FollowupAction,
    pub suggested_correction: Option<String>,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Session Insight
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    Processing,
    Completed,
    Failed,
}

impl InsightStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InsightStatus::Processing => "processing",
            InsightStatus::Completed => "completed",
            InsightStatus::Failed => "failed",
        }
    }
}

impl FromStr for InsightStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(InsightStatus::Processing),
            "completed" => Ok(InsightStatus::Completed),
            "failed" => Ok(InsightStatus::Failed),
            other => Err(format!("unknown insight status '{other}'")),
        }
    }
}

/// A qualitative performance bucket: two short diagnostic points, optionally justified.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Zone {
    pub points: Vec<String>,
    pub reasons: Vec<String>,
}

impl Zone {
    pub fn new(points: Vec<String>) -> Self {
        Self { points, reasons: Vec::new() }
    }
}

/// One aggregate summary per session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInsight {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Core weaknesses.
    pub focus_zone: Zone,
    /// Confirmed strengths.
    pub steady_zone: Zone,
    /// Near-mastery.
    pub edge_zone: Zone,
    pub session_xp: i64,
    pub accuracy: f64,
    pub qa_pair_count: usize,
    pub status: InsightStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the progress (streak/XP) subsystem is told when a session finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCompletion {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub session_xp: i64,
    pub accuracy: f64,
    pub qa_pair_count: usize,
    pub completed_at: DateTime<Utc>,
}
