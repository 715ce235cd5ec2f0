//! HTTP surface of the farmgate service: router, middleware stack, and the
//! OpenAPI document.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa::OpenApi;

use crate::auth::{config::AuthConfig, AuthRuntime};

pub mod handlers;

use self::handlers::auth::types::{
    ErrorResponse, ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse,
    ResetPasswordRequest, TokenLoginRequest, TokenLoginResponse,
};
use self::handlers::health::Health;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::live,
        handlers::health::ready,
        handlers::health::health,
        handlers::auth::login,
        handlers::auth::token_login,
        handlers::auth::logout,
        handlers::auth::logout_all,
        handlers::auth::forgot_password,
        handlers::auth::reset_password,
    ),
    components(schemas(
        Health,
        LoginRequest,
        LoginResponse,
        TokenLoginRequest,
        TokenLoginResponse,
        ForgotPasswordRequest,
        ResetPasswordRequest,
        MessageResponse,
        ErrorResponse,
    )),
    tags(
        (name = "auth", description = "Credential and session lifecycle API"),
        (name = "health", description = "Service probes"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Build the router and serve until interrupted.
///
/// # Errors
/// Returns an error if the database pool or listener cannot be set up, or if
/// the server fails while running.
pub async fn new(port: u16, dsn: String) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let runtime = Arc::new(AuthRuntime::with_postgres(
        pool.clone(),
        AuthConfig::default(),
    ));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let app = Router::new()
        .route("/v1/auth/login", post(handlers::auth::login))
        .route("/v1/auth/token", post(handlers::auth::token_login))
        .route("/v1/auth/logout", post(handlers::auth::logout))
        .route("/v1/auth/logout-all", post(handlers::auth::logout_all))
        .route(
            "/v1/auth/forgot-password",
            post(handlers::auth::forgot_password),
        )
        .route(
            "/v1/auth/reset-password",
            post(handlers::auth::reset_password),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(runtime)),
        )
        .route("/live", get(handlers::live))
        .route("/ready", get(handlers::ready))
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
