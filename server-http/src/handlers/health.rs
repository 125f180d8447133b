use crate::models::HealthResponse;
use crate::state::AppState;
use axum::{Json, extract::State};

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        backend: state.cache.backend_name().into(),
    })
}
