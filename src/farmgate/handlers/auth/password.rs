//! Forgotten-password flow: issue a single-use code out of band, then
//! verify it and replace the credential.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, instrument};

use crate::auth::otp::OtpPurpose;
use crate::auth::principal::Principal;
use crate::auth::rate_limit::{RateLimitAction, RateLimitDecision};
use crate::auth::role::RoleClass;
use crate::auth::AuthRuntime;

use super::types::{ForgotPasswordRequest, MessageResponse, ResetPasswordRequest};
use super::{client_ip, error_response, valid_email};

/// The response never reveals whether the identifier resolved.
const FORGOT_MESSAGE: &str = "If the account exists, a verification code has been sent.";

#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 202, description = "Code queued when the account exists", body = MessageResponse),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn forgot_password(
    Extension(runtime): Extension<Arc<AuthRuntime>>,
    headers: HeaderMap,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let ip = client_ip(&headers);
    if runtime
        .limiter
        .check_ip(ip.as_deref(), RateLimitAction::ForgotPassword)
        == RateLimitDecision::Limited
        || runtime
            .limiter
            .check_identifier(&request.identifier, RateLimitAction::ForgotPassword)
            == RateLimitDecision::Limited
    {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let class = RoleClass::from_admin_flag(request.is_admin);
    let principal = match runtime
        .directory
        .find_by_identifier(&request.identifier, class)
        .await
    {
        Ok(principal) => principal,
        Err(err) => return error_response(&err.into()),
    };

    let Some(principal) = principal else {
        // Unknown identifiers get the same response as known ones.
        return accepted();
    };

    let Some(address) = delivery_address(&principal) else {
        debug!(principal_id = %principal.id, "no delivery address on file");
        return accepted();
    };

    let issued = match runtime
        .otp
        .issue(
            principal.id,
            OtpPurpose::ForgetPassword,
            runtime.config.otp_ttl(),
        )
        .await
    {
        Ok(issued) => issued,
        Err(err) => return error_response(&err),
    };

    if let Err(err) = runtime.delivery.deliver(&address, &issued.code).await {
        return error_response(&err.into());
    }

    accepted()
}

#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced, sessions revoked", body = MessageResponse),
        (status = 400, description = "Code expired, mismatched, or already used", body = super::types::ErrorResponse),
        (status = 404, description = "No code outstanding", body = super::types::ErrorResponse),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn reset_password(
    Extension(runtime): Extension<Arc<AuthRuntime>>,
    headers: HeaderMap,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let ip = client_ip(&headers);
    if runtime
        .limiter
        .check_ip(ip.as_deref(), RateLimitAction::ResetPassword)
        == RateLimitDecision::Limited
        || runtime
            .limiter
            .check_identifier(&request.identifier, RateLimitAction::ResetPassword)
            == RateLimitDecision::Limited
    {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let class = RoleClass::from_admin_flag(request.is_admin);
    let principal = match runtime
        .directory
        .find_by_identifier(&request.identifier, class)
        .await
    {
        Ok(Some(principal)) => principal,
        // An unresolvable identifier reads the same as having no code.
        Ok(None) => return error_response(&crate::auth::error::AuthError::OtpNotFound),
        Err(err) => return error_response(&err.into()),
    };

    if let Err(err) = runtime
        .otp
        .verify(principal.id, OtpPurpose::ForgetPassword, &request.code)
        .await
    {
        return error_response(&err);
    }

    match runtime
        .sessions
        .reset_password(principal.id, &request.new_password)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Password reset successful.".to_string(),
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

fn accepted() -> Response {
    (
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: FORGOT_MESSAGE.to_string(),
        }),
    )
        .into_response()
}

/// Email when present and well-formed, otherwise the phone for SMS.
fn delivery_address(principal: &Principal) -> Option<String> {
    if let Some(email) = principal.email.as_deref() {
        if valid_email(email) {
            return Some(email.to_string());
        }
    }
    principal.phone.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::AccountStatus;
    use crate::auth::role::Role;
    use uuid::Uuid;

    fn principal(email: Option<&str>, phone: Option<&str>) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            phone: phone.map(str::to_string),
            email: email.map(str::to_string),
            role: Role::Consumer,
            status: AccountStatus::Activated,
        }
    }

    #[test]
    fn delivery_address_prefers_valid_email() {
        let p = principal(Some("consumer@example.com"), Some("+2519000002"));
        assert_eq!(
            delivery_address(&p),
            Some("consumer@example.com".to_string())
        );
    }

    #[test]
    fn delivery_address_falls_back_to_phone() {
        let p = principal(Some("not-an-email"), Some("+2519000002"));
        assert_eq!(delivery_address(&p), Some("+2519000002".to_string()));

        let p = principal(None, Some("+2519000002"));
        assert_eq!(delivery_address(&p), Some("+2519000002".to_string()));
    }

    #[test]
    fn delivery_address_none_when_unreachable() {
        let p = principal(None, None);
        assert_eq!(delivery_address(&p), None);
    }
}
