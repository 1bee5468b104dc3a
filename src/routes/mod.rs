//! Router assembly.

pub mod common;
pub mod config;
pub mod query;

pub use common::common_routes_with_ready;
pub use config::config_routes;
pub use query::query_routes;

use crate::state::AppState;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body (metadata documents included).
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Health routes at the root, query and metadata routes under `/api/v1`.
pub fn api_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(query_routes(state.clone()))
        .merge(config_routes(state.clone()))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));
    Router::new()
        .merge(common_routes_with_ready(state))
        .nest("/api/v1", api)
}
