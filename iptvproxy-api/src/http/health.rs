//! Health check endpoint
//!
//! Ungated liveness probe for monitoring.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::http::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub providers: Vec<String>,
    pub live_recordings: usize,
}

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Always OK while the server runs; also reports configured providers and active workers
pub async fn health_check(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "OK",
        providers: state
            .services
            .providers()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
        live_recordings: state.services.recorder.live_worker_count(),
    })
}
