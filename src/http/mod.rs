//! HTTP front-end: a thin `axum` router over the shared [`Engine`], the
//! single external collaborator translating inbound wire formats into
//! Dispatch Loop calls.
//!
//! Dispatch-by-route with shared state cloned into every handler, built on
//! `axum` + `tower-http`.

mod dashboard_html;
mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::providers::upstream::UpstreamClient;

/// Shared state cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Single owner of all Ledger/Registry/Budget state.
    pub engine: Arc<Engine>,
    /// Client used to forward requests to the single configured vendor.
    pub upstream: Arc<UpstreamClient>,
}

/// Build the full router: native, OpenAI-compatible, and Ollama-compatible
/// proxy routes, plus the status dashboard and its JSON/control endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1beta/models/:model_action", post(handlers::native))
        .route("/v1/*rest", post(handlers::openai_compatible))
        .route("/api/chat", post(handlers::ollama_compatible))
        .route("/status", get(handlers::status_page))
        .route("/api/status_data", get(handlers::status_data))
        .route("/api/test_key", post(handlers::test_key))
        .route("/api/enable_model", post(handlers::enable_model))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
