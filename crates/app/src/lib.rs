#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use state::AppState;

/// The full API with request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::progress_routes())
        .merge(routes::catalog_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
