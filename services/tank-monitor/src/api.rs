//! HTTP API
//!
//! Endpoints:
//! - GET  /health               : per-account refresh status
//! - GET  /metrics              : Prometheus exposition
//! - GET  /accounts             : configured account ids
//! - GET  /snapshot?account=ID  : cached snapshot and rendered readings
//! - POST /refresh?account=ID   : refresh now (joins one already in flight)
//! - POST /reading?account=ID   : submit a gauge reading, body `{"value": n}`
//!
//! `account` may be omitted when exactly one account is configured.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use portal_client::CallError;
use serde::Deserialize;
use serde_json::json;
use tank_poller::{READINGS, Snapshot};
use tracing::{info, warn};

use crate::error::Error;
use crate::registry::{Account, AccountRegistry};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AccountRegistry>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub account: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReadingRequest {
    pub value: i64,
}

/// Build the axum router with all routes and shared state.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/accounts", get(list_accounts))
        .route("/snapshot", get(snapshot))
        .route("/refresh", post(refresh))
        .route("/reading", post(submit_reading))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// JSON error body: {"error":{"type":"...","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, kind: &str, message: &str) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let body = json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn selection_error(e: &Error) -> Response {
    let status = match e {
        Error::UnknownAccount(_) => StatusCode::NOT_FOUND,
        Error::AmbiguousAccount(_) => StatusCode::BAD_REQUEST,
        Error::NoAccounts | Error::InvalidCredentials(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, e.kind(), &e.to_string())
}

fn call_error(e: &CallError) -> Response {
    let status = match e {
        CallError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CallError::Transport { .. } => StatusCode::GATEWAY_TIMEOUT,
        CallError::Unauthorized { .. } | CallError::ApiError { .. } => StatusCode::BAD_GATEWAY,
    };
    let message = match e {
        CallError::InvalidInput(reason) => reason.clone(),
        other => other.public_message(),
    };
    error_response(status, e.kind(), &message)
}

fn resolve<'a>(
    registry: &'a AccountRegistry,
    query: &AccountQuery,
) -> Result<(&'a str, &'a Account), Response> {
    registry
        .resolve(query.account.as_deref())
        .map_err(|e| selection_error(&e))
}

fn snapshot_body(account: &str, snapshot: &Snapshot) -> serde_json::Value {
    let readings: Vec<_> = READINGS
        .iter()
        .filter_map(|descriptor| {
            let value = descriptor.value(snapshot)?;
            Some(json!({
                "key": descriptor.key,
                "name": descriptor.name,
                "unit": descriptor.unit,
                "value": value,
                "display": descriptor.render(snapshot),
            }))
        })
        .collect();
    json!({
        "account": account,
        "snapshot": snapshot,
        "readings": readings,
    })
}

/// GET /health: 200 when every account has a snapshot, 503 otherwise.
async fn health(State(state): State<AppState>) -> Response {
    let accounts: Vec<_> = state
        .registry
        .iter()
        .map(|(_, account)| account.coordinator.status())
        .collect();
    let healthy = accounts.iter().all(|s| s.has_snapshot);
    let (status, label) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    json_response(
        status,
        json!({
            "status": label,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
            "accounts": accounts,
        }),
    )
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

/// GET /accounts: configured account ids, never credentials.
async fn list_accounts(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, json!({ "accounts": state.registry.ids() }))
}

/// GET /snapshot: cached data only, never triggers a fetch.
async fn snapshot(State(state): State<AppState>, Query(query): Query<AccountQuery>) -> Response {
    let (id, account) = match resolve(&state.registry, &query) {
        Ok(found) => found,
        Err(response) => return response,
    };
    match account.coordinator.get_snapshot() {
        Some(snapshot) => json_response(StatusCode::OK, snapshot_body(id, &snapshot)),
        None => error_response(
            StatusCode::NOT_FOUND,
            "no_snapshot",
            &format!("no snapshot yet for account {id}"),
        ),
    }
}

/// POST /refresh: fetch now and return the new snapshot.
async fn refresh(State(state): State<AppState>, Query(query): Query<AccountQuery>) -> Response {
    let (id, account) = match resolve(&state.registry, &query) {
        Ok(found) => found,
        Err(response) => return response,
    };
    match account.coordinator.request_refresh().await {
        Ok(snapshot) => {
            info!(account = %id, "refresh requested via API");
            json_response(StatusCode::OK, snapshot_body(id, &snapshot))
        }
        Err(e) => {
            warn!(account = %id, error = %e, "API refresh failed");
            call_error(e.call_error())
        }
    }
}

/// POST /reading: submit a gauge reading; the refresh that follows runs in
/// the background.
async fn submit_reading(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
    body: Result<Json<ReadingRequest>, JsonRejection>,
) -> Response {
    let (id, account) = match resolve(&state.registry, &query) {
        Ok(found) => found,
        Err(response) => return response,
    };
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_input",
                &format!("reading body must be {{\"value\": <integer>}}: {}", rejection.body_text()),
            );
        }
    };
    match account.coordinator.submit(request.value).await {
        Ok(()) => json_response(
            StatusCode::ACCEPTED,
            json!({ "account": id, "value": request.value, "status": "accepted" }),
        ),
        Err(e) => {
            warn!(account = %id, error = %e, "reading submission failed");
            call_error(&e)
        }
    }
}
