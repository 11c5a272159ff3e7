//! Health check endpoints.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use std::path::Path;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    ledger_writable: bool,
}

/// Readiness check (can registrations be persisted?)
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    if ledger_dir_writable(state.allocator.dir()).await {
        Ok(Json(ReadyResponse {
            status: "ready",
            ledger_writable: true,
        }))
    } else {
        tracing::warn!(dir = ?state.allocator.dir(), "Ledger directory missing or not writable");
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn ledger_dir_writable(dir: &Path) -> bool {
    let probe = dir.join(".ready-probe");
    if tokio::fs::write(&probe, b"").await.is_err() {
        return false;
    }
    let _ = tokio::fs::remove_file(&probe).await;
    true
}
