//! Test Helper Utilities
//!
//! In-process mock of the document processing service (axum on an ephemeral
//! port) plus client construction shortcuts.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fdash_client::session::{MemorySessionStore, SessionClient, SessionStore};
use fdash_common::events::{DashEvent, EventBus};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const EMAIL: &str = "analyst@example.com";
pub const PASSWORD: &str = "correct-password";
pub const TENANT: &str = "tenant-a";

/// Tokens currently honored by the mock
#[derive(Debug)]
pub struct Tokens {
    pub access: String,
    pub refresh: String,
    pub generation: u32,
}

/// Mock service state, inspectable from tests
pub struct MockState {
    pub tokens: Mutex<Tokens>,
    pub refresh_delay: Duration,
    /// When set, the refresh endpoint answers with this status
    pub refresh_failure: Mutex<Option<StatusCode>>,
    /// Every data call is rejected with 401
    pub force_unauthorized: AtomicBool,
    pub upload_rejection: Mutex<Option<String>>,
    pub start_rejection: Mutex<Option<String>>,
    /// Status bodies per work item; the last one repeats
    pub scripts: Mutex<HashMap<String, VecDeque<Value>>>,
    pub tenants_seen: Mutex<Vec<String>>,
    pub export_formats: Mutex<Vec<String>>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub data_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub result_calls: AtomicUsize,
    pub uploads: AtomicUsize,
}

impl MockState {
    fn new() -> Self {
        Self {
            tokens: Mutex::new(Tokens {
                access: "access-0".to_string(),
                refresh: "refresh-0".to_string(),
                generation: 0,
            }),
            refresh_delay: Duration::from_millis(50),
            refresh_failure: Mutex::new(None),
            force_unauthorized: AtomicBool::new(false),
            upload_rejection: Mutex::new(None),
            start_rejection: Mutex::new(None),
            scripts: Mutex::new(HashMap::new()),
            tenants_seen: Mutex::new(Vec::new()),
            export_formats: Mutex::new(Vec::new()),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            data_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            result_calls: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    /// Invalidate the access token every client currently holds
    pub fn expire_access(&self) {
        self.tokens.lock().unwrap().access = "revoked".to_string();
    }

    pub fn reject_refresh(&self, status: StatusCode) {
        *self.refresh_failure.lock().unwrap() = Some(status);
    }

    pub fn reject_upload(&self, detail: &str) {
        *self.upload_rejection.lock().unwrap() = Some(detail.to_string());
    }

    pub fn reject_start(&self, detail: &str) {
        *self.start_rejection.lock().unwrap() = Some(detail.to_string());
    }

    /// Script successive status responses for a work item
    pub fn script_status(&self, id: &str, statuses: Vec<Value>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(id.to_string(), statuses.into_iter().collect());
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Running mock service
pub struct MockService {
    pub base_url: String,
    pub state: Arc<MockState>,
}

impl MockService {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::new());

        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/documents/upload", post(upload))
            .route("/documents/:id/process", post(process))
            .route("/documents/:id/status", get(status))
            .route("/documents/:id/metrics", get(metrics))
            .route("/documents/:id/compliance", get(compliance))
            .route("/documents/:id/export", get(export));
        let app = Router::new()
            .nest("/api/v1", api)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}/api/v1", addr),
            state,
        }
    }

    /// Session client against this mock with the given store
    pub fn client_with_store(
        &self,
        store: Arc<dyn SessionStore>,
        event_bus: EventBus,
    ) -> Arc<SessionClient> {
        Arc::new(
            SessionClient::new(
                self.base_url.clone(),
                Duration::from_secs(5),
                store,
                event_bus,
            )
            .unwrap(),
        )
    }

    /// Session client with an in-memory store, not logged in
    pub fn client(&self, event_bus: EventBus) -> Arc<SessionClient> {
        self.client_with_store(Arc::new(MemorySessionStore::new()), event_bus)
    }

    /// Session client that has already logged in
    pub async fn logged_in_client(&self, event_bus: EventBus) -> Arc<SessionClient> {
        let client = self.client(event_bus);
        client.authenticate(EMAIL, PASSWORD).await.unwrap();
        client
    }
}

/// Collect every event currently buffered on a receiver
pub fn drain(rx: &mut broadcast::Receiver<DashEvent>) -> Vec<DashEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ========================================
// Handlers
// ========================================

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn authorize(state: &MockState, headers: &HeaderMap) -> Result<(), Response> {
    state.data_calls.fetch_add(1, Ordering::SeqCst);

    let tenant = headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let Some(tenant) = tenant else {
        return Err(detail(StatusCode::BAD_REQUEST, "Missing tenant"));
    };
    state.tenants_seen.lock().unwrap().push(tenant);

    let expected = format!("Bearer {}", state.tokens.lock().unwrap().access);
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if state.force_unauthorized.load(Ordering::SeqCst) || presented != expected {
        return Err(detail(
            StatusCode::UNAUTHORIZED,
            "Could not validate credentials",
        ));
    }
    Ok(())
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.login_calls.fetch_add(1, Ordering::SeqCst);

    if body["email"] != EMAIL || body["password"] != PASSWORD {
        return detail(StatusCode::UNAUTHORIZED, "Incorrect email or password");
    }

    let tokens = state.tokens.lock().unwrap();
    Json(json!({
        "access_token": tokens.access,
        "refresh_token": tokens.refresh,
        "token_type": "bearer",
        "tenant_id": TENANT,
        "user": { "id": "u-1", "email": EMAIL, "full_name": "Ada Analyst", "role": "analyst" }
    }))
    .into_response()
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.refresh_delay).await;

    let failure = *state.refresh_failure.lock().unwrap();
    if let Some(status) = failure {
        return detail(status, "Refresh not possible");
    }

    let mut tokens = state.tokens.lock().unwrap();
    if body["refresh_token"] != tokens.refresh.as_str() {
        return detail(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }

    tokens.generation += 1;
    tokens.access = format!("access-{}", tokens.generation);
    tokens.refresh = format!("refresh-{}", tokens.generation);
    Json(json!({
        "access_token": tokens.access,
        "refresh_token": tokens.refresh,
        "token_type": "bearer"
    }))
    .into_response()
}

async fn upload(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));
    let text = String::from_utf8_lossy(&body);
    if !is_multipart || !text.contains("name=\"file\"") || !text.contains("name=\"fund_type\"") {
        return detail(StatusCode::UNPROCESSABLE_ENTITY, "Malformed upload");
    }

    let rejection = state.upload_rejection.lock().unwrap().clone();
    if let Some(message) = rejection {
        return detail(StatusCode::BAD_REQUEST, &message);
    }

    let n = state.uploads.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "id": format!("w{}", n) })).into_response()
}

async fn process(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    let rejection = state.start_rejection.lock().unwrap().clone();
    if let Some(message) = rejection {
        return detail(StatusCode::FORBIDDEN, &message);
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "status": "processing" })),
    )
        .into_response()
}

async fn status(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.status_calls.fetch_add(1, Ordering::SeqCst);

    let mut scripts = state.scripts.lock().unwrap();
    let body = match scripts.get_mut(&id) {
        Some(queue) if queue.len() > 1 => queue.pop_front(),
        Some(queue) => queue.front().cloned(),
        None => None,
    };
    Json(body.unwrap_or_else(|| json!({ "status": "processing" }))).into_response()
}

async fn metrics(
    State(state): State<Arc<MockState>>,
    Path(_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.result_calls.fetch_add(1, Ordering::SeqCst);

    Json(json!({
        "nav": 1250000.0,
        "irr": 0.182,
        "tvpi": 1.45,
        "dpi": 0.62,
        "vintage_year": 2019
    }))
    .into_response()
}

async fn compliance(
    State(state): State<Arc<MockState>>,
    Path(_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    state.result_calls.fetch_add(1, Ordering::SeqCst);

    Json(json!({
        "overall_status": "pass",
        "checks": [
            { "rule": "ilpa_reporting_template", "passed": true },
            { "rule": "capital_call_notice_period", "passed": true, "message": "10 business days" }
        ]
    }))
    .into_response()
}

async fn export(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    let format = query.get("format").cloned().unwrap_or_default();
    state.export_formats.lock().unwrap().push(format.clone());
    format!("export:{}:{}", id, format).into_bytes().into_response()
}
