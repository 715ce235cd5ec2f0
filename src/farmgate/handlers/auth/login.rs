//! Password login and remember-me token login.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::instrument;
use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::rate_limit::{RateLimitAction, RateLimitDecision};
use crate::auth::role::RoleClass;
use crate::auth::AuthRuntime;

use super::types::{LoginRequest, LoginResponse, TokenLoginRequest, TokenLoginResponse};
use super::{client_ip, error_response};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = super::types::ErrorResponse),
        (status = 403, description = "Account pending or not active", body = super::types::ErrorResponse),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    Extension(runtime): Extension<Arc<AuthRuntime>>,
    headers: HeaderMap,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    if rate_limited(&runtime, &headers, &request.identifier, RateLimitAction::Login) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let class = RoleClass::from_admin_flag(request.is_admin);
    match runtime
        .sessions
        .login(
            &request.identifier,
            &request.password,
            class,
            &request.device_info,
        )
        .await
    {
        Ok(grant) => (
            StatusCode::OK,
            Json(LoginResponse {
                token: grant.pair.token,
                refresh_token: grant.pair.refresh_token,
                principal_id: grant.principal_id.to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/token",
    request_body = TokenLoginRequest,
    responses(
        (status = 200, description = "Session resumed, possibly rotated", body = TokenLoginResponse),
        (status = 401, description = "Unknown token tuple", body = super::types::ErrorResponse),
        (status = 403, description = "Account pending or not active", body = super::types::ErrorResponse),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn token_login(
    Extension(runtime): Extension<Arc<AuthRuntime>>,
    headers: HeaderMap,
    payload: Option<Json<TokenLoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    if rate_limited(
        &runtime,
        &headers,
        &request.principal_id,
        RateLimitAction::TokenLogin,
    ) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    // A malformed principal id cannot match any row.
    let Ok(principal_id) = request.principal_id.parse::<Uuid>() else {
        return error_response(&AuthError::InvalidToken);
    };

    match runtime
        .sessions
        .resume(
            &request.token,
            &request.refresh_token,
            principal_id,
            &request.device_info,
        )
        .await
    {
        Ok(grant) => (
            StatusCode::OK,
            Json(TokenLoginResponse {
                token: grant.pair.token,
                refresh_token: grant.pair.refresh_token,
                principal_id: grant.principal_id.to_string(),
                rotated: grant.rotated,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

fn rate_limited(
    runtime: &AuthRuntime,
    headers: &HeaderMap,
    identifier: &str,
    action: RateLimitAction,
) -> bool {
    let ip = client_ip(headers);
    runtime.limiter.check_ip(ip.as_deref(), action) == RateLimitDecision::Limited
        || runtime.limiter.check_identifier(identifier, action) == RateLimitDecision::Limited
}
