pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

pub use middleware::require_learner;
pub use rest::ApiDoc;
pub use state::AppState;

/// The session routes, with learner identification applied to all of them.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions", post(rest::start_session_handler))
        .route("/sessions/{id}/replies", post(rest::reply_handler))
        .route("/sessions/{id}/status", get(rest::status_handler))
        .route("/sessions/{id}/language", put(rest::language_handler))
        .route("/sessions/{id}/end", post(rest::end_session_handler))
        .route("/sessions/{id}/insight", get(rest::insight_handler))
        .route("/sessions/{id}/messages", get(rest::history_handler))
        .layer(axum_middleware::from_fn(require_learner))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use tutor_core::memory::InMemoryStore;
    use tutor_core::testing::{RecordingProgressSink, ScriptedReasoning, StaticRetrieval};
    use tutor_core::{TutorService, TutorSettings};
    use uuid::Uuid;

    fn app() -> Router {
        let tutor = TutorService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ScriptedReasoning::new()),
            Arc::new(StaticRetrieval::failing()),
            Arc::new(RecordingProgressSink::new()),
            TutorSettings::default(),
        );
        router(Arc::new(AppState::new(tutor)))
    }

    fn request(method: Method, uri: &str, user: Option<Uuid>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn start(app: &Router, user: Uuid) -> Value {
        let (status, body) = send(
            app,
            request(Method::POST, "/sessions", Some(user), Some(json!({ "language": "standard" }))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    #[tokio::test]
    async fn requests_without_a_learner_are_refused() {
        let app = app();
        let (status, _) = send(&app, request(Method::POST, "/sessions", None, Some(json!({})))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/sessions")
                    .header("x-user-id", "not-a-uuid")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn a_session_starts_with_its_first_question() {
        let app = app();
        let body = start(&app, Uuid::new_v4()).await;
        assert_eq!(body["session"]["language"], "standard");
        assert_eq!(body["batch_status"], "failed");
        assert_eq!(body["total_questions"], 1);
        assert!(body["first_question"].as_str().is_some());
    }

    #[tokio::test]
    async fn unknown_languages_are_bad_requests() {
        let app = app();
        let (status, _) = send(
            &app,
            request(Method::POST, "/sessions", Some(Uuid::new_v4()), Some(json!({ "language": "klingon" }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn emoji_replies_come_back_with_a_rejection() {
        let app = app();
        let user = Uuid::new_v4();
        let session_id = start(&app, user).await["session"]["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, body) = send(
            &app,
            request(
                Method::POST,
                &format!("/sessions/{session_id}/replies"),
                Some(user),
                Some(json!({ "content": "👍" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rejection"], "emoji");
        assert_eq!(body["session_complete"], false);

        let (_, history) = send(
            &app,
            request(Method::GET, &format!("/sessions/{session_id}/messages"), Some(user), None),
        )
        .await;
        // First question, the learner's emoji, then the re-ask.
        assert_eq!(history.as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn other_learners_cannot_touch_a_session() {
        let app = app();
        let session_id = start(&app, Uuid::new_v4()).await["session"]["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, _) = send(
            &app,
            request(Method::GET, &format!("/sessions/{session_id}/status"), Some(Uuid::new_v4()), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unknown_sessions_are_not_found() {
        let app = app();
        let uri = format!("/sessions/{}/status", Uuid::new_v4());
        let (status, _) = send(&app, request(Method::GET, &uri, Some(Uuid::new_v4()), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ended_sessions_refuse_language_changes() {
        let app = app();
        let user = Uuid::new_v4();
        let session_id = start(&app, user).await["session"]["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/sessions/{session_id}/end"), Some(user), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["insight"].is_null());

        let (status, _) = send(
            &app,
            request(Method::GET, &format!("/sessions/{session_id}/insight"), Some(user), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            request(
                Method::PUT,
                &format!("/sessions/{session_id}/language"),
                Some(user),
                Some(json!({ "language": "hinglish" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
