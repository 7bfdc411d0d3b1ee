//! Session authentication middleware

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use auth::models::SessionId;
use common::CoreError;
use tracing::debug;

use crate::{error::ApiError, state::AppState};

/// Require a live session passed as a bearer token
///
/// The validated session is inserted into the request extensions.
pub async fn session_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(authorization) = bearer.ok_or(ApiError::Unauthorized)?;
    let session_id = SessionId(authorization.token().to_string());

    let session = state
        .core
        .sessions()
        .validate_session(&session_id)
        .await
        .map_err(|err| match err {
            // Unknown tokens are plain authentication failures
            CoreError::NotFound { .. } => ApiError::Unauthorized,
            other => other.into(),
        })?;
    debug!("Request authenticated for user {}", session.user_id);

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}
