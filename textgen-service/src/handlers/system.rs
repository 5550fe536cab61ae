use crate::dtos::{DebugEnvResponse, HealthResponse, RootResponse};
use crate::services::get_metrics;
use crate::startup::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse::new(
        &state.config.model.name,
        state.config.deployment.as_str(),
    ))
}

/// Liveness. Healthy whether or not the model has loaded.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.coordinator.status();
    Json(HealthResponse::new(
        &state.config.model.name,
        state.config.deployment.as_str(),
        &status,
    ))
}

/// Readiness check: 200 only once the model can serve.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.coordinator.status();
    let code = if status.model_loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "ready": status.model_loaded,
            "load_state": status.phase,
            "last_failure": status.last_failure.map(|f| f.at),
        })),
    )
}

/// Reports whether a provider token is configured without revealing it.
pub async fn debug_env(State(state): State<AppState>) -> Json<DebugEnvResponse> {
    Json(DebugEnvResponse::new(
        state.config.model.hf_token.as_ref(),
        state.config.common.port,
    ))
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        get_metrics(),
    )
}
