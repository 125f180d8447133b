pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod setup;
pub mod state;

// Re-export key types
pub use routes::{build_app, build_router};
pub use state::AppState;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, honouring `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
