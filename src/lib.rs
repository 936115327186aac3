// Library exports for Folio
// This allows integration tests and the binary to share the router

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod render;
pub mod repo;
pub mod routes;
pub mod seed;
pub mod state;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full application router with shared state attached.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::home::index))
        .route("/assets/{*path}", get(routes::assets::serve))
        .merge(routes::posts::router())
        .merge(routes::users::router())
        .merge(routes::auth::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
