//! Metadata routes: read or replace the entity documents.

use crate::handlers::config::{get_entities, post_entities};
use crate::state::AppState;
use axum::{routing::get, Router};

pub fn config_routes(state: AppState) -> Router {
    Router::new()
        .route("/config/entities", get(get_entities).post(post_entities))
        .with_state(state)
}
