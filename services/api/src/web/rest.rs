//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::middleware::LearnerId;
use crate::web::protocol::{
    EndSessionResponse, EvaluationView, InsightView, LanguageRequest, MessageView, ReplyRequest,
    SessionView, StartSessionRequest, StartSessionResponse, StatusResponse, TurnResponse, ZoneView,
};
use crate::web::state::AppState;
use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tutor_core::ports::PortError;
use tutor_core::{LanguageStyle, Session, TutorError};
use utoipa::OpenApi;
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        start_session_handler,
        reply_handler,
        status_handler,
        language_handler,
        end_session_handler,
        insight_handler,
        history_handler,
    ),
    components(
        schemas(
            StartSessionRequest, StartSessionResponse, ReplyRequest, TurnResponse,
            LanguageRequest, SessionView, StatusResponse, EvaluationView, InsightView,
            ZoneView, EndSessionResponse, MessageView
        )
    ),
    tags(
        (name = "Tutor API", description = "Drives a learner through a tutoring Q&A session.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Error Mapping
//=========================================================================================

type HandlerError = (StatusCode, String);

/// Maps a core failure onto the status code the client sees.
pub fn tutor_error(err: TutorError) -> HandlerError {
    match &err {
        TutorError::Port(PortError::NotFound(_)) => (StatusCode::NOT_FOUND, err.to_string()),
        TutorError::Forbidden(_) | TutorError::Port(PortError::Unauthorized) => {
            (StatusCode::FORBIDDEN, err.to_string())
        }
        TutorError::SessionInactive(_)
        | TutorError::Conflict(_)
        | TutorError::InvalidTransition(_)
        | TutorError::Port(PortError::Conflict(_)) => (StatusCode::CONFLICT, err.to_string()),
        TutorError::MissingBatch(_) | TutorError::MissingQuestionItem { .. } => {
            error!("Session data is inconsistent: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Session data is inconsistent: {}", err),
            )
        }
        TutorError::Port(PortError::Unexpected(_)) => {
            error!("Unexpected failure: {:?}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    }
}

fn parse_language(raw: &str) -> Result<LanguageStyle, HandlerError> {
    raw.parse::<LanguageStyle>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))
}

async fn owned_session(
    app_state: &AppState,
    user_id: Uuid,
    session_id: Uuid,
) -> Result<Session, HandlerError> {
    app_state
        .tutor
        .authorize(user_id, session_id)
        .await
        .map_err(|e| {
            if matches!(e, TutorError::Forbidden(_)) {
                warn!(user_id = %user_id, session_id = %session_id, "cross-learner access refused");
            }
            tutor_error(e)
        })
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Start a tutoring session and receive its first question.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = StartSessionRequest,
    responses(
        (status = 201, description = "Session started", body = StartSessionResponse),
        (status = 400, description = "Unknown language"),
        (status = 401, description = "Missing x-user-id header"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn start_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(LearnerId(user_id)): Extension<LearnerId>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let language = payload
        .language
        .as_deref()
        .map(parse_language)
        .transpose()?;

    let started = app_state
        .tutor
        .start_session(user_id, payload.document_id, language)
        .await
        .map_err(tutor_error)?;

    info!(session_id = %started.session.id, user_id = %user_id, "session created over REST");
    Ok((StatusCode::CREATED, Json(StartSessionResponse::from(&started))))
}

/// Submit the learner's reply to the current question.
#[utoipa::path(
    post,
    path = "/sessions/{id}/replies",
    request_body = ReplyRequest,
    responses(
        (status = 200, description = "Turn processed", body = TurnResponse),
        (status = 403, description = "Session belongs to another learner"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session is no longer active"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn reply_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(LearnerId(user_id)): Extension<LearnerId>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<ReplyRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    owned_session(&app_state, user_id, session_id).await?;

    let outcome = app_state
        .tutor
        .respond(session_id, &payload.content, payload.response_latency_ms)
        .await
        .map_err(tutor_error)?;

    Ok(Json(TurnResponse::from(&outcome)))
}

/// Progress of a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}/status",
    responses(
        (status = 200, description = "Current progress", body = StatusResponse),
        (status = 403, description = "Session belongs to another learner"),
        (status = 404, description = "Session not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn status_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(LearnerId(user_id)): Extension<LearnerId>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    owned_session(&app_state, user_id, session_id).await?;
    let status = app_state
        .tutor
        .get_status(session_id)
        .await
        .map_err(tutor_error)?;
    Ok(Json(StatusResponse::from(&status)))
}

/// Switch the language the tutor speaks for an active session.
#[utoipa::path(
    put,
    path = "/sessions/{id}/language",
    request_body = LanguageRequest,
    responses(
        (status = 200, description = "Language switched", body = SessionView),
        (status = 400, description = "Unknown language"),
        (status = 409, description = "Session is no longer active")
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn language_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(LearnerId(user_id)): Extension<LearnerId>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<LanguageRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let language = parse_language(&payload.language)?;
    owned_session(&app_state, user_id, session_id).await?;
    let session = app_state
        .tutor
        .toggle_language(session_id, language)
        .await
        .map_err(tutor_error)?;
    Ok(Json(SessionView::from(&session)))
}

/// End a session early. Repeating the call returns the same insight.
#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    responses(
        (status = 200, description = "Session ended", body = EndSessionResponse),
        (status = 403, description = "Session belongs to another learner"),
        (status = 404, description = "Session not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn end_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(LearnerId(user_id)): Extension<LearnerId>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    owned_session(&app_state, user_id, session_id).await?;
    let insight = app_state
        .tutor
        .end_session(session_id)
        .await
        .map_err(tutor_error)?;
    Ok(Json(EndSessionResponse {
        session_id,
        insight: insight.as_ref().map(InsightView::from),
    }))
}

/// The end-of-session insight, once one exists.
#[utoipa::path(
    get,
    path = "/sessions/{id}/insight",
    responses(
        (status = 200, description = "Session insight", body = InsightView),
        (status = 404, description = "No insight for this session yet")
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn insight_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(LearnerId(user_id)): Extension<LearnerId>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    owned_session(&app_state, user_id, session_id).await?;
    let insight = app_state
        .tutor
        .get_insight(session_id)
        .await
        .map_err(tutor_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("Session {} has no insight yet", session_id),
            )
        })?;
    Ok(Json(InsightView::from(&insight)))
}

/// The conversation so far, oldest first.
#[utoipa::path(
    get,
    path = "/sessions/{id}/messages",
    responses(
        (status = 200, description = "Conversation history", body = [MessageView]),
        (status = 403, description = "Session belongs to another learner"),
        (status = 404, description = "Session not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn history_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(LearnerId(user_id)): Extension<LearnerId>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    owned_session(&app_state, user_id, session_id).await?;
    let messages = app_state
        .tutor
        .get_history(session_id)
        .await
        .map_err(tutor_error)?;
    let views: Vec<MessageView> = messages.iter().map(MessageView::from).collect();
    Ok(Json(views))
}
