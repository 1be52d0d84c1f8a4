//! Mock portal shared by the service tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use common::Secret;
use portal_client::{AuthenticatedSession, Credential, HANDSHAKE_PATH, LOGIN_PATH, SessionConfig};
use serde_json::{Value, json};
use tank_poller::Endpoints;
use tokio::net::TcpListener;

use crate::registry::Account;

pub const DATA_PATH: &str = "/portal/bulk/data";
pub const READING_PATH: &str = "/portal/bulk/gauge-reading";
pub const PASSWORD: &str = "correct-horse";

#[derive(Default)]
pub struct MockPortal {
    pub logins: AtomicUsize,
    pub data_calls: AtomicUsize,
    pub last_reading: AtomicI64,
}

impl MockPortal {
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn data_calls(&self) -> usize {
        self.data_calls.load(Ordering::SeqCst)
    }
}

async fn handshake() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        AppendHeaders([(header::SET_COOKIE, "XSRF-TOKEN=mock%3Dtoken; Path=/")]),
    )
}

async fn login(
    State(portal): State<Arc<MockPortal>>,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    let n = portal.logins.fetch_add(1, Ordering::SeqCst) + 1;
    if body["password"] != PASSWORD {
        return axum::Json(json!({
            "success": false,
            "errors": {"password": ["These credentials do not match our records."]}
        }))
        .into_response();
    }
    axum::Json(json!({"success": true, "response": {"token": format!("mock-{n}")}})).into_response()
}

fn has_bearer(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("Bearer mock-"))
}

async fn data(State(portal): State<Arc<MockPortal>>, headers: HeaderMap) -> Response {
    portal.data_calls.fetch_add(1, Ordering::SeqCst);
    if !has_bearer(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    axum::Json(json!({
        "success": true,
        "response": {
            "tankCapacity": 1200,
            "remainingPercentage": 42,
            "daysRemaining": 30,
            "lastGaugeReadingDate": "14/10/2026"
        }
    }))
    .into_response()
}

async fn reading(
    State(portal): State<Arc<MockPortal>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    if !has_bearer(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(value) = body["value"].as_i64() {
        portal.last_reading.store(value, Ordering::SeqCst);
    }
    axum::Json(json!({"success": true, "response": {}})).into_response()
}

/// Start a mock portal on an ephemeral port and return its base URL.
pub async fn start_mock_portal() -> (Arc<MockPortal>, String) {
    let portal = Arc::new(MockPortal::default());
    let app = Router::new()
        .route(HANDSHAKE_PATH, get(handshake))
        .route(LOGIN_PATH, post(login))
        .route(DATA_PATH, get(data))
        .route(READING_PATH, post(reading))
        .with_state(portal.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (portal, format!("http://{addr}"))
}

/// Session + coordinator for `email` against `base_url`.
pub fn account(base_url: &str, email: &str, password: &str) -> Account {
    let session = AuthenticatedSession::new(
        Credential::new(email, Secret::new(password.to_string())),
        SessionConfig {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            ..SessionConfig::default()
        },
    )
    .unwrap();
    Account::new(
        Arc::new(session),
        Endpoints {
            primary: DATA_PATH.into(),
            secondary: None,
            submit: READING_PATH.into(),
        },
        Duration::from_secs(3600),
    )
}
