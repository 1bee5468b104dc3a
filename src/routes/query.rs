//! Query routes. The entity segment is resolved against the current model by the handlers.

use crate::handlers::query::{count, list, single};
use crate::state::AppState;
use axum::{routing::post, Router};

pub fn query_routes(state: AppState) -> Router {
    Router::new()
        .route("/query/:entity", post(list))
        .route("/query/:entity/count", post(count))
        .route("/query/:entity/single/:id", post(single))
        .with_state(state)
}
