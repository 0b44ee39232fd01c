//! Webhook HTTP boundary.
//!
//! Authorizes, normalizes, and enqueues provider webhooks. Nothing is
//! persisted here; the worker does that from the queue.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/webhooks/{source}` | Ingest one highlight webhook |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Responses
//!
//! | Status | Body | When |
//! |--------|------|------|
//! | 200 | `{"status":"ok"}` | enqueued, or empty-body verification ping |
//! | 400 | `{"error":"invalid_request_body"}` | body could not be read |
//! | 400 | `{"error":"invalid_json"}` | body is not a valid payload document |
//! | 401 | `{"error":"unauthorized"}` | wrong/missing secret or unknown source |
//! | 500 | `{"error":"server_misconfigured"}` | tenant or secret not configured |
//! | 400 | `{"error":"invalid_payload"}` | payload failed validation |
//! | 500 | `{"error":"enqueue_failed"}` | queue rejected the message |
//!
//! Error bodies carry only the tag. Details go to the log.
//!
//! The secret is taken from the `X-Webhook-Secret` header, or from the
//! payload's `secret` field when the header is absent.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use insight_core::error::IngestError;
use insight_core::normalize::{normalize, WebhookPayload};
use insight_core::publish::IngestPublisher;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::shutdown::shutdown_signal;
use crate::sqlite_queue::SqliteQueue;
use crate::tenant::TenantAuthorizer;

pub const SECRET_HEADER: &str = "x-webhook-secret";

/// Shared state for the webhook handlers.
#[derive(Clone)]
pub struct AppState {
    authorizer: Arc<TenantAuthorizer>,
    publisher: Arc<IngestPublisher>,
}

impl AppState {
    pub fn new(authorizer: Arc<TenantAuthorizer>, publisher: Arc<IngestPublisher>) -> Self {
        Self {
            authorizer,
            publisher,
        }
    }
}

/// Start the webhook server configured in `[server]`, enqueueing into the
/// SQLite queue. Runs until Ctrl-C.
pub async fn run_server(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let queue = Arc::new(SqliteQueue::new(pool));
    let authorizer = TenantAuthorizer::from_config(config);
    info!(sources = ?authorizer.resolver().sources(), "webhook sources configured");

    let state = AppState::new(
        Arc::new(authorizer),
        Arc::new(IngestPublisher::new(queue)),
    );
    serve(&config.server.bind, state).await
}

/// Bind `bind_addr` and serve the webhook routes with `state`.
pub async fn serve(bind_addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "webhook server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{source}", post(handle_webhook))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============ Responses ============

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
}

fn ok() -> Response {
    (StatusCode::OK, Json(StatusBody { status: "ok" })).into_response()
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
}

/// A failed webhook call: an HTTP status and a machine-readable tag.
struct AppError {
    status: StatusCode,
    tag: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.tag })).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let status = match err {
            IngestError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            IngestError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            IngestError::ServerMisconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            tag: err.tag(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /webhooks/{source} ============

async fn handle_webhook(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, AppError> {
    let received_at = Utc::now();

    let body = body.map_err(|e| {
        warn!(%source, error = %e, "invalid request body");
        AppError {
            status: StatusCode::BAD_REQUEST,
            tag: "invalid_request_body",
        }
    })?;

    // Providers verify the endpoint with an empty POST.
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ok());
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        warn!(%source, error = %e, "failed to parse json");
        AppError {
            status: StatusCode::BAD_REQUEST,
            tag: "invalid_json",
        }
    })?;

    let presented = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(payload.secret.as_deref());

    let tenant = match state.authorizer.authorize(&source, presented).await {
        Ok(tenant) => tenant,
        Err(err) => {
            match &err {
                IngestError::ServerMisconfigured(_) => {
                    error!(%source, error = %err, "server misconfigured")
                }
                _ => warn!(
                    %source,
                    event_type = %payload.event_type,
                    error = %err,
                    "unauthorized webhook"
                ),
            }
            return Err(err.into());
        }
    };

    let event = normalize(&source, payload, received_at).map_err(|err| {
        warn!(%source, tenant_id = %tenant.tenant_id, error = %err, "invalid payload");
        AppError::from(err)
    })?;
    let event_type = event.event_type.clone();
    let highlight_id = event.highlight.id.to_string();

    if let Err(err) = state.publisher.enqueue(event, &tenant.tenant_id).await {
        error!(%source, tenant_id = %tenant.tenant_id, error = %err, "enqueue failed");
        return Err(AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            tag: "enqueue_failed",
        });
    }

    info!(
        %source,
        tenant_id = %tenant.tenant_id,
        %event_type,
        %highlight_id,
        "webhook enqueued"
    );
    Ok(ok())
}
