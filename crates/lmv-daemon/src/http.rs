//! HTTP request surface over the vault engine.
//!
//! Requests are decoded and responses encoded on the async side; every
//! engine call runs in `spawn_blocking`, so the engine's serialization lock
//! is never held across network I/O and a client disconnect cannot cancel a
//! critical section.
//!
//! Failure mapping: bad-request 400, unauthorized 401, conflict 409 (with
//! the current `ETag`), patch-apply 422, corruption and internal 500.
//! Corruption detail is logged server-side; clients get a generic message.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::header::{CONTENT_TYPE, ETAG};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lmv_core::error::ErrorKind;
use lmv_core::model::AuthMode;
use lmv_core::{VaultEngine, VaultError};
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tracing::error;

/// Request body cap for the patch endpoint.
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Media type required on patch requests.
pub const PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<VaultEngine>,
    write_token: Option<Arc<str>>,
}

impl AppState {
    /// Wraps an opened engine and the optional write token.
    #[must_use]
    pub fn new(engine: Arc<VaultEngine>, write_token: Option<String>) -> Self {
        Self {
            engine,
            write_token: write_token.map(Into::into),
        }
    }
}

/// Builds the router for the full surface.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/memory", get(get_memory).patch(patch_memory))
        .route("/v1/ledger", get(get_ledger))
        .route("/v1/snapshot", post(post_snapshot))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Boundary error: a [`VaultError`] on its way to a status code.
#[derive(Debug)]
pub struct ApiError(VaultError);

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0.kind() {
            ErrorKind::BadRequest => {
                (StatusCode::BAD_REQUEST, Json(json!({"error": self.0.to_string()})))
                    .into_response()
            },
            ErrorKind::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized"})),
            )
                .into_response(),
            ErrorKind::Conflict => {
                let VaultError::Conflict { current_etag } = &self.0 else {
                    return internal_response();
                };
                (
                    StatusCode::CONFLICT,
                    [(ETAG, format!("\"{current_etag}\""))],
                    Json(json!({
                        "error": "version conflict",
                        "current_etag": current_etag,
                    })),
                )
                    .into_response()
            },
            ErrorKind::PatchApply => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": self.0.to_string()})),
            )
                .into_response(),
            ErrorKind::Corruption | ErrorKind::Internal => {
                error!(error = %self.0, "vault operation failed");
                internal_response()
            },
        }
    }
}

fn internal_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
        .into_response()
}

async fn healthz() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn get_memory(State(state): State<AppState>) -> Result<Response, ApiError> {
    let engine = Arc::clone(&state.engine);
    let current = run_blocking(move || engine.current_state()).await?;

    let etag = current.memory.etag();
    Ok(([(ETAG, format!("\"{etag}\""))], Json(current)).into_response())
}

async fn patch_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let auth = check_write_gate(&state, &headers)?;
    check_patch_content_type(&headers)?;

    let if_match = required_header(&headers, "if-match")?;
    let actor = required_header(&headers, "x-lmv-actor")?;
    let reason = required_header(&headers, "x-lmv-reason")?;

    let patch: Value = serde_json::from_slice(&body)
        .map_err(|e| VaultError::bad_request(format!("request body is not valid JSON: {e}")))?;

    let engine = Arc::clone(&state.engine);
    let outcome =
        run_blocking(move || engine.patch_memory(&if_match, patch, &actor, &reason, auth)).await?;

    let etag = outcome.state.memory.etag();
    Ok(([(ETAG, format!("\"{etag}\""))], Json(outcome)).into_response())
}

#[derive(Debug, Deserialize)]
struct LedgerQuery {
    since: Option<String>,
    limit: Option<String>,
}

async fn get_ledger(
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Response, ApiError> {
    let since = parse_query_int(query.since.as_deref(), "since", 0)?;
    let limit = parse_query_int(query.limit.as_deref(), "limit", 100)?;

    let engine = Arc::clone(&state.engine);
    let page = run_blocking(move || engine.get_ledger(since, limit)).await?;
    Ok(Json(page).into_response())
}

async fn post_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let _auth = check_write_gate(&state, &headers)?;

    let engine = Arc::clone(&state.engine);
    let outcome = run_blocking(move || engine.snapshot()).await?;
    Ok(Json(outcome).into_response())
}

/// Runs an engine call on the blocking pool.
///
/// The closure runs to completion even if the request is abandoned, so
/// persisted state is never left mid-mutation by a disconnect.
async fn run_blocking<T, F>(job: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, VaultError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| VaultError::Internal(format!("engine task failed: {e}")))?
        .map_err(ApiError)
}

/// Enforces the bearer gate on write endpoints.
///
/// Token comparison is constant-time. When no token is configured the gate
/// is open and the mutation records `auth: none`.
fn check_write_gate(state: &AppState, headers: &HeaderMap) -> Result<AuthMode, ApiError> {
    let Some(expected) = &state.write_token else {
        return Ok(AuthMode::None);
    };

    let presented = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(VaultError::Unauthorized)?;

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(AuthMode::Token)
    } else {
        Err(VaultError::Unauthorized.into())
    }
}

fn check_patch_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| VaultError::bad_request("missing Content-Type header"))?;

    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if media_type != PATCH_CONTENT_TYPE {
        return Err(VaultError::bad_request(format!(
            "Content-Type must be {PATCH_CONTENT_TYPE}, got {content_type:?}"
        ))
        .into());
    }
    Ok(())
}

fn required_header(headers: &HeaderMap, name: &str) -> Result<String, ApiError> {
    let value = headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();
    if value.is_empty() {
        return Err(VaultError::bad_request(format!("missing required header {name}")).into());
    }
    Ok(value.to_string())
}

fn parse_query_int(raw: Option<&str>, name: &str, default: i64) -> Result<i64, ApiError> {
    match raw {
        None => Ok(default),
        Some(text) => text.parse().map_err(|_| {
            VaultError::bad_request(format!("query argument {name} must be an integer, got {text:?}"))
                .into()
        }),
    }
}
