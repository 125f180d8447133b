use crate::handlers;
use crate::middleware::session_middleware;
use crate::state::AppState;
use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::normalize_path::NormalizePath;
use tower_http::trace::TraceLayer;

/// Build and configure the application router
pub fn build_router(state: AppState) -> Router {
    // Session routes run inside the session middleware
    let session_routes = Router::new()
        .route("/session", get(handlers::get_session))
        .route("/session/clear", post(handlers::clear_session))
        .route("/session/permanent", post(handlers::set_permanent))
        .route(
            "/session/{key}",
            put(handlers::put_value).delete(handlers::remove_value),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), session_middleware));

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .merge(session_routes)
        // Admin routes
        .route("/admin/cleanup", post(handlers::cleanup_expired))
        .route("/admin/entries/{key}", get(handlers::entry_metadata))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The router as served: trailing slashes are trimmed before routing.
///
/// Path rewriting has to wrap the whole router; as a `Router::layer` it
/// would only run after a route had already matched.
pub fn build_app(state: AppState) -> NormalizePath<Router> {
    NormalizePath::trim_trailing_slash(build_router(state))
}
