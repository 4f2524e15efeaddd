//! services/api/src/web/protocol.rs
//!
//! Defines the JSON payloads exchanged between the client and the REST API.
//! Domain types are converted into these views at the edge so the core stays
//! free of transport concerns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tutor_core::domain::{EvaluatorResult, Message, Session, SessionInsight, Zone};
use tutor_core::{SessionStatus, StartedSession, TurnOutcome};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Requests Sent FROM the Client TO the Server
//=========================================================================================

#[derive(Deserialize, Debug, Default, ToSchema)]
pub struct StartSessionRequest {
    /// Restricts questions and answers to one uploaded document.
    pub document_id: Option<Uuid>,
    /// `hinglish` (default) or `standard`.
    pub language: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct ReplyRequest {
    pub content: String,
    /// Time the learner took to answer, measured by the client.
    pub response_latency_ms: Option<i64>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct LanguageRequest {
    pub language: String,
}

//=========================================================================================
// Responses Sent FROM the Server TO the Client
//=========================================================================================

#[derive(Serialize, Debug, ToSchema)]
pub struct SessionView {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub document_id: Option<Uuid>,
    pub language: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id,
            user_id: session.user_id,
            document_id: session.document_id,
            language: session.language.as_str().to_string(),
            is_active: session.is_active,
            created_at: session.created_at,
        }
    }
}

/// The response payload sent after successfully starting a session.
#[derive(Serialize, Debug, ToSchema)]
pub struct StartSessionResponse {
    pub session: SessionView,
    pub batch_id: Uuid,
    pub batch_status: String,
    pub total_questions: usize,
    pub first_question: Option<String>,
}

impl From<&StartedSession> for StartSessionResponse {
    fn from(started: &StartedSession) -> Self {
        Self {
            session: SessionView::from(&started.session),
            batch_id: started.batch.id,
            batch_status: started.batch.status.as_str().to_string(),
            total_questions: started.batch.total_questions,
            first_question: started.first_question.clone(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct EvaluationView {
    pub score: f64,
    pub is_correct: bool,
    pub xp: i64,
    pub explanation: String,
    pub confidence: f64,
    pub followup_action: String,
    pub suggested_correction: Option<String>,
}

impl From<&EvaluatorResult> for EvaluationView {
    fn from(result: &EvaluatorResult) -> Self {
        Self {
            score: result.score,
            is_correct: result.is_correct,
            xp: result.xp,
            explanation: result.explanation.clone(),
            confidence: result.confidence,
            followup_action: result.followup_action.as_str().to_string(),
            suggested_correction: result.suggested_correction.clone(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ZoneView {
    pub points: Vec<String>,
    pub reasons: Vec<String>,
}

impl From<&Zone> for ZoneView {
    fn from(zone: &Zone) -> Self {
        Self {
            points: zone.points.clone(),
            reasons: zone.reasons.clone(),
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct InsightView {
    pub insight_id: Uuid,
    pub session_id: Uuid,
    pub focus_zone: ZoneView,
    pub steady_zone: ZoneView,
    pub edge_zone: ZoneView,
    pub session_xp: i64,
    pub accuracy: f64,
    pub qa_pair_count: usize,
    pub status: String,
}

impl From<&SessionInsight> for InsightView {
    fn from(insight: &SessionInsight) -> Self {
        Self {
            insight_id: insight.id,
            session_id: insight.session_id,
            focus_zone: ZoneView::from(&insight.focus_zone),
            steady_zone: ZoneView::from(&insight.steady_zone),
            edge_zone: ZoneView::from(&insight.edge_zone),
            session_xp: insight.session_xp,
            accuracy: insight.accuracy,
            qa_pair_count: insight.qa_pair_count,
            status: insight.status.as_str().to_string(),
        }
    }
}

/// What the tutor produced for one learner reply.
#[derive(Serialize, Debug, ToSchema)]
pub struct TurnResponse {
    /// Classifier token stored on the learner's message.
    pub intent: Option<String>,
    pub reply: Option<String>,
    pub next_question: Option<String>,
    pub evaluation: Option<EvaluationView>,
    /// `emoji`, `gibberish` or `irrelevant` when the reply was sent back.
    pub rejection: Option<String>,
    pub insight: Option<InsightView>,
    pub session_complete: bool,
}

impl From<&TurnOutcome> for TurnResponse {
    fn from(outcome: &TurnOutcome) -> Self {
        Self {
            intent: outcome.intent.as_ref().map(|label| label.token().to_string()),
            reply: outcome.reply.clone(),
            next_question: outcome.next_question.clone(),
            evaluation: outcome.evaluation.as_ref().map(EvaluationView::from),
            rejection: outcome.rejection.map(|r| r.as_str().to_string()),
            insight: outcome.insight.as_ref().map(InsightView::from),
            session_complete: outcome.session_complete,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct StatusResponse {
    pub session_id: Uuid,
    pub is_active: bool,
    pub language: String,
    pub batch_status: String,
    pub current_index: usize,
    pub total_questions: usize,
    pub answered: usize,
    pub xp: i64,
    pub accuracy: f64,
}

impl From<&SessionStatus> for StatusResponse {
    fn from(status: &SessionStatus) -> Self {
        Self {
            session_id: status.session_id,
            is_active: status.is_active,
            language: status.language.as_str().to_string(),
            batch_status: status.batch_status.as_str().to_string(),
            current_index: status.current_index,
            total_questions: status.total_questions,
            answered: status.answered,
            xp: status.xp,
            accuracy: status.accuracy,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct MessageView {
    pub id: Uuid,
    pub content: String,
    pub is_user_message: bool,
    pub classifier_token: Option<String>,
    pub response_latency_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            content: message.content.clone(),
            is_user_message: message.is_user_message,
            classifier_token: message.classifier_token.clone(),
            response_latency_ms: message.response_latency_ms,
            created_at: message.created_at,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct EndSessionResponse {
    pub session_id: Uuid,
    /// Absent when no answer was ever graded.
    pub insight: Option<InsightView>,
}
