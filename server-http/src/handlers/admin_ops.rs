use crate::models::{CleanupResponse, EntryMetadataResponse};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tessera::domain::now_utc;
use tracing::{error, info};

/// POST /admin/cleanup
pub async fn cleanup_expired(State(state): State<AppState>) -> Result<Json<CleanupResponse>, StatusCode> {
    info!("Admin cleanup requested on {}", state.cache.backend_name());

    match state.cache.cleanup_expired().await {
        Ok(removed) => Ok(Json(CleanupResponse { removed })),
        Err(e) => {
            error!("Cleanup failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /admin/entries/{key}
pub async fn entry_metadata(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<EntryMetadataResponse>, StatusCode> {
    match state.cache.get_metadata(&key).await {
        Some(metadata) => Ok(Json(EntryMetadataResponse::new(key, metadata, now_utc()))),
        None => Err(StatusCode::NOT_FOUND),
    }
}
