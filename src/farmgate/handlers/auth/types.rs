//! Request/response shapes for the auth endpoints.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    /// Opaque principal id or phone number.
    pub identifier: String,
    #[schema(value_type = String)]
    pub password: SecretString,
    /// Selects the administrator role class; defaults to member.
    #[serde(default)]
    pub is_admin: bool,
    /// Opaque client-supplied device label.
    #[serde(default)]
    pub device_info: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub principal_id: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct TokenLoginRequest {
    pub token: String,
    pub refresh_token: String,
    pub principal_id: String,
    #[serde(default)]
    pub device_info: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenLoginResponse {
    pub token: String,
    pub refresh_token: String,
    pub principal_id: String,
    /// True when the presented pair had expired and was replaced.
    pub rotated: bool,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub identifier: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub identifier: String,
    #[serde(default)]
    pub is_admin: bool,
    pub code: String,
    #[schema(value_type = String)]
    pub new_password: SecretString,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error_code: String,
    pub error: String,
}
