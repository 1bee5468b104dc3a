//! Metadata handlers: read the stored entity documents, or replace them and hot-swap the model.

use crate::config::{load_from_pool, resolve, EntityConfig, FullConfig};
use crate::error::AppError;
use crate::migration::apply_migrations;
use crate::response::success_many;
use crate::state::AppState;
use crate::store::replace_entities;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

/// Rebuild the model from `_sys_entities` and install it. In-flight requests keep their snapshot.
pub(crate) async fn reload_model(state: &AppState) -> Result<(), AppError> {
    let config = load_from_pool(&state.pool, &state.settings.sys_schema).await?;
    let model = resolve(&config)?;
    apply_migrations(&state.pool, &model).await?;
    state.model.swap(model);
    Ok(())
}

pub async fn get_entities(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let config = load_from_pool(&state.pool, &state.settings.sys_schema).await?;
    Ok(success_many(config.entities))
}

/// Replace every entity document. The input is validated as a whole before anything is written.
pub async fn post_entities(
    State(state): State<AppState>,
    Json(entities): Json<Vec<EntityConfig>>,
) -> Result<impl IntoResponse, AppError> {
    let candidate = FullConfig { entities };
    resolve(&candidate).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let (written, version) = replace_entities(&state.pool, &state.settings.sys_schema, &candidate.entities).await?;
    if written > 0 {
        reload_model(&state).await?;
    } else {
        tracing::info!(version, "entity metadata unchanged");
    }
    Ok(success_many(candidate.entities))
}
