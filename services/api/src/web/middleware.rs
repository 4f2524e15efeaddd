//! services/api/src/web/middleware.rs
//!
//! Learner identification for the session routes.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::debug;
use uuid::Uuid;

pub const LEARNER_HEADER: &str = "x-user-id";

/// The learner a request acts for, placed in the request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnerId(pub Uuid);

/// Reads the `x-user-id` header and inserts a `LearnerId` for the handlers.
///
/// A missing header is 401; a header that is not a UUID is 400.
pub async fn require_learner(mut req: Request, next: Next) -> Result<Response, (StatusCode, String)> {
    let raw = req
        .headers()
        .get(LEARNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                format!("{LEARNER_HEADER} header is required"),
            )
        })?;

    let user_id = Uuid::parse_str(raw.trim()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid {LEARNER_HEADER} format"),
        )
    })?;

    debug!(user_id = %user_id, path = %req.uri().path(), "learner identified");
    req.extensions_mut().insert(LearnerId(user_id));
    Ok(next.run(req).await)
}
