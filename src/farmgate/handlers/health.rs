//! Health probe handlers.
//!
//! - `/live`: process liveness only (no dependency checks)
//! - `/ready`: database-aware readiness for orchestrators
//! - `/health`: database-aware status with detailed JSON payload

use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info_span, warn, Instrument};
use utoipa::ToSchema;

const HEALTH_DB_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path= "/live",
    responses (
        (status = 200, description = "Process is alive")
    ),
    tag = "health",
)]
/// Report process liveness without checking external dependencies.
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}

#[utoipa::path(
    get,
    path= "/ready",
    responses (
        (status = 200, description = "Service is ready to receive traffic"),
        (status = 503, description = "Service dependencies are not ready")
    ),
    tag = "health",
)]
/// Report readiness based on database connectivity.
pub async fn ready(pool: Extension<PgPool>) -> impl IntoResponse {
    if probe_database(&pool.0).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Database connection is healthy", body = Health),
        (status = 503, description = "Database connection is unhealthy", body = Health)
    ),
    tag = "health",
)]
/// Perform a detailed health check.
pub async fn health(method: Method, pool: Extension<PgPool>) -> impl IntoResponse {
    let db_healthy = probe_database(&pool.0).await;

    let health = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if db_healthy {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let headers = format!("{}:{}", health.name, health.version)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    if db_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

/// Timeout-bounded database probe shared by `/ready` and `/health`.
async fn probe_database(pool: &PgPool) -> bool {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );

    let probe = async {
        match pool.acquire().instrument(acquire_span).await {
            Ok(mut conn) => {
                let ping_span =
                    info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
                match conn.ping().instrument(ping_span).await {
                    Ok(()) => true,
                    Err(error) => {
                        error!("Failed to ping database: {}", error);
                        false
                    }
                }
            }
            Err(error) => {
                error!("Failed to acquire database connection: {}", error);
                false
            }
        }
    };

    match timeout(Duration::from_secs(HEALTH_DB_TIMEOUT_SECONDS), probe).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Database health check timed out");
            false
        }
    }
}
