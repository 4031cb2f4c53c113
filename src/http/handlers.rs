//! Route handlers: translate the three inbound wire shapes into Dispatch
//! Loop calls and relay the vendor's response (or a synthesized status)
//! back to the caller verbatim.

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::warn;

use crate::clock;
use crate::engine::dispatch::{self, DispatchResult};
use crate::http::dashboard_html;
use crate::http::AppState;
use crate::providers::upstream::Protocol;

/// `POST /v1beta/models/:model_action` — native upstream proxy path. The
/// captured segment is `model[:action]`, e.g. `gemini-1.5-pro:generateContent`.
pub async fn native(State(state): State<AppState>, Path(model_action): Path<String>, Json(body): Json<Value>) -> Response {
    let (model, path_suffix) = split_model_action(&model_action);
    dispatch_and_respond(&state, &model, Protocol::Native, &path_suffix, body).await
}

/// `POST /v1/*` — OpenAI-compatible alias; the model name travels in the body.
pub async fn openai_compatible(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let model = body_model(&body, &state);
    dispatch_and_respond(&state, &model, Protocol::OpenAiCompatible, ":generateContent", body).await
}

/// `POST /api/chat` — Ollama-compatible alias; messages are translated before forwarding.
pub async fn ollama_compatible(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let model = body_model(&body, &state);
    dispatch_and_respond(&state, &model, Protocol::OllamaCompatible, ":generateContent", body).await
}

fn body_model(body: &Value, state: &AppState) -> String {
    body.get("model")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| state.engine.default_model())
}

fn split_model_action(raw: &str) -> (String, String) {
    match raw.split_once(':') {
        Some((model, action)) => (model.to_owned(), format!(":{action}")),
        None => (raw.to_owned(), String::new()),
    }
}

async fn dispatch_and_respond(state: &AppState, model: &str, protocol: Protocol, path_suffix: &str, body: Value) -> Response {
    // A fresh, never-fired watch channel: this adapter does not currently
    // wire real client-disconnect detection through to the Dispatch Loop's
    // cancellation hook, so every request runs to a terminal outcome.
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = dispatch::run(&state.engine, &state.upstream, model, protocol, path_suffix, body, cancel_rx).await;
    match result {
        DispatchResult::Success { status, body, content_type } | DispatchResult::Other { status, body, content_type } => {
            relay(status, body, content_type)
        }
        DispatchResult::NoKeyAvailable => (StatusCode::TOO_MANY_REQUESTS, "no key available for this model").into_response(),
        DispatchResult::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "retries exhausted").into_response(),
        DispatchResult::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

fn relay(status: u16, body: String, content_type: Option<String>) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, body).into_response();
    if let Some(content_type) = content_type {
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            response.headers_mut().insert(axum::http::header::CONTENT_TYPE, value);
        }
    }
    response
}

/// `GET /status` — static HTML/JS dashboard.
pub async fn status_page() -> Html<&'static str> {
    Html(dashboard_html::PAGE)
}

/// `GET /api/status_data` — JSON Snapshot for the dashboard to render.
pub async fn status_data(State(state): State<AppState>) -> Json<crate::engine::Snapshot> {
    Json(state.engine.snapshot(clock::now_unix()))
}

#[derive(Debug, Deserialize)]
pub struct TestKeyRequest {
    api_key: String,
    model_name: String,
}

/// `POST /api/test_key` — single validation call to upstream, bypassing the
/// Selector and Ledger entirely; the caller is checking the key, not using it.
pub async fn test_key(State(state): State<AppState>, Json(req): Json<TestKeyRequest>) -> Json<Value> {
    let probe = serde_json::json!({ "contents": [] });
    let status_code = match state
        .upstream
        .forward(Protocol::Native, ":generateContent", &req.model_name, &req.api_key, probe)
        .await
    {
        Ok(outcome) => outcome_status(&outcome),
        Err(e) => {
            warn!(error = %e, "test_key: upstream transport failure");
            0
        }
    };
    Json(serde_json::json!({ "status_code": status_code }))
}

fn outcome_status(outcome: &crate::providers::upstream::DispatchOutcome) -> u16 {
    use crate::providers::upstream::DispatchOutcome;
    match outcome {
        DispatchOutcome::Success { status, .. } | DispatchOutcome::Other { status, .. } => *status,
        DispatchOutcome::RateLimited => 429,
        DispatchOutcome::Transient => 503,
    }
}

#[derive(Debug, Deserialize)]
pub struct EnableModelRequest {
    model_name: String,
    api_key: String,
}

/// `POST /api/enable_model` — clears the two-strike and quota flags for a
/// `(model, key)` cell, letting an operator bring a key back after fixing it upstream.
pub async fn enable_model(State(state): State<AppState>, Json(req): Json<EnableModelRequest>) -> StatusCode {
    state.engine.enable_key(&req.model_name, &req.api_key);
    StatusCode::NO_CONTENT
}
