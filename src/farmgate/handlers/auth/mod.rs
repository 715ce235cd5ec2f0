//! Auth endpoints: login, remember-me resume, logout, and the OTP-backed
//! password reset flow.

use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use tracing::error;

use crate::auth::error::AuthError;

mod login;
mod logout;
mod password;
pub mod types;

pub use self::login::{login, token_login, __path_login, __path_token_login};
pub use self::logout::{logout, logout_all, __path_logout, __path_logout_all};
pub use self::password::{
    forgot_password, reset_password, __path_forgot_password, __path_reset_password,
};

use self::types::ErrorResponse;

/// Map a denial to its wire shape. Storage faults become an opaque 500;
/// everything else keeps its taxonomy code.
pub(super) fn error_response(err: &AuthError) -> Response {
    if let AuthError::Store(inner) = err {
        error!("storage failure: {inner:#}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error_code: "INTERNAL_ERROR".to_string(),
                error: "Internal server error".to_string(),
            }),
        )
            .into_response();
    }

    let status = match err {
        AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::TokenExpired => {
            StatusCode::UNAUTHORIZED
        }
        AuthError::AccountPending | AuthError::AccountNotActive | AuthError::Forbidden => {
            StatusCode::FORBIDDEN
        }
        AuthError::OtpNotFound => StatusCode::NOT_FOUND,
        AuthError::OtpExpired | AuthError::OtpMismatch | AuthError::OtpAlreadyUsed => {
            StatusCode::BAD_REQUEST
        }
        AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error_code: err.error_code().to_string(),
            error: err.to_string(),
        }),
    )
        .into_response()
}

pub(super) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(super) fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Basic email format check for picking a delivery address.
pub(super) fn valid_email(address: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(address))
}
