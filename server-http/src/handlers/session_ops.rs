use crate::middleware::SessionHandle;
use crate::models::{PermanentRequest, RemoveResponse, SessionView};
use axum::{Json, extract::Path, http::StatusCode};
use serde_json::Value;
use tracing::info;

/// GET /session
pub async fn get_session(session: SessionHandle) -> Json<SessionView> {
    Json(session.read(|s| SessionView::from(s)))
}

/// PUT /session/{key}
pub async fn put_value(
    session: SessionHandle,
    Path(key): Path<String>,
    Json(value): Json<Value>,
) -> Json<SessionView> {
    info!("Session PUT: key={}", key);

    Json(session.write(|s| {
        s.insert(key, value);
        SessionView::from(&*s)
    }))
}

/// DELETE /session/{key}
pub async fn remove_value(session: SessionHandle, Path(key): Path<String>) -> Json<RemoveResponse> {
    info!("Session DELETE: key={}", key);

    let removed = session.write(|s| s.remove(&key).is_some());
    Json(RemoveResponse { removed })
}

/// POST /session/clear
pub async fn clear_session(session: SessionHandle) -> StatusCode {
    session.write(|s| s.clear());
    StatusCode::NO_CONTENT
}

/// POST /session/permanent
pub async fn set_permanent(session: SessionHandle, Json(req): Json<PermanentRequest>) -> Json<SessionView> {
    Json(session.write(|s| {
        s.set_permanent(req.permanent);
        SessionView::from(&*s)
    }))
}
