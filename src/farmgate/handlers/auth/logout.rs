//! Single-session and all-device logout.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::instrument;

use crate::auth::error::AuthError;
use crate::auth::AuthRuntime;

use super::types::MessageResponse;
use super::{bearer_token, error_response};

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 200, description = "Session retired", body = MessageResponse),
        (status = 401, description = "Invalid login token", body = super::types::ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    Extension(runtime): Extension<Arc<AuthRuntime>>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(&AuthError::InvalidToken);
    };

    match runtime.sessions.logout(&token).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Logout successful.".to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    responses(
        (status = 200, description = "All sessions retired", body = MessageResponse),
        (status = 401, description = "Invalid login token", body = super::types::ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout_all(
    Extension(runtime): Extension<Arc<AuthRuntime>>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return error_response(&AuthError::InvalidToken);
    };

    // Only a holder of a live session may revoke everywhere.
    let context = match runtime.authenticator.authenticate(&token, None).await {
        Ok(context) => context,
        Err(err) => return error_response(&err),
    };

    match runtime.sessions.logout_all(context.principal.id).await {
        Ok(_) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Logout from all devices successful.".to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}
