/// Application routes configuration
use crate::handlers::{
    diagnostics, get_sensor, health, list_sensors, start_flow, step_flow, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Sensor endpoints
        .route("/sensors", get(list_sensors))
        .route("/sensors/:unique_id", get(get_sensor))
        .route("/diagnostics", get(diagnostics))
        // Setup, re-auth and options flows
        .route("/flows", post(start_flow))
        .route("/flows/:flow_id", post(step_flow))
        .with_state(state)
}
