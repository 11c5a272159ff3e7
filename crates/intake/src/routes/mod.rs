//! HTTP route handlers for the intake service.

use axum::{
    Router,
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::state::AppState;

mod error;
mod health;
mod nodes;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))

        // Node intake
        .route("/register", post(nodes::register))
        .route("/delete", post(nodes::delete))

        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))

        // Add shared state
        .with_state(state)
}
