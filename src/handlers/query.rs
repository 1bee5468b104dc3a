//! Query handlers: list, count and single row for any entity in the current model.

use crate::error::AppError;
use crate::extractors::VisibilityScope;
use crate::query::QueryRequest;
use crate::response::{list_response, single_response, success_one};
use crate::service::{PgSession, QueryService};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use tokio_util::sync::CancellationToken;

/// Service over the current model snapshot plus a connection bound to this request.
/// The returned guard cancels in-flight statements when the request future is dropped.
async fn open(
    state: &AppState,
    scope: VisibilityScope,
) -> Result<(QueryService, PgSession, tokio_util::sync::DropGuard), AppError> {
    let cancel = CancellationToken::new();
    let session = PgSession::acquire(&state.pool, state.settings.command_timeout, cancel.clone()).await?;
    let service = QueryService::new(state.model.snapshot(), state.settings.clone()).with_scope(scope.0);
    Ok((service, session, cancel.drop_guard()))
}

/// Parse the request body; an empty body is an unfiltered request. Malformed JSON is rejected.
fn request_for(entity: String, body: &[u8]) -> Result<QueryRequest, AppError> {
    let mut req = if body.iter().all(u8::is_ascii_whitespace) {
        QueryRequest::default()
    } else {
        serde_json::from_slice::<QueryRequest>(body)
            .map_err(|e| AppError::BadRequest(format!("invalid query body: {}", e)))?
    };
    req.entity = entity;
    Ok(req)
}

pub async fn list(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    scope: VisibilityScope,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let req = request_for(entity, &body)?;
    let (service, mut session, _guard) = open(&state, scope).await?;
    let result = service.list(&mut session, &req).await?;
    Ok(list_response(result))
}

pub async fn count(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    scope: VisibilityScope,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let req = request_for(entity, &body)?;
    let (service, mut session, _guard) = open(&state, scope).await?;
    let count = service.count(&mut session, &req).await?;
    Ok(success_one(serde_json::json!({ "count": count })))
}

pub async fn single(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    scope: VisibilityScope,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let req = request_for(entity, &body)?;
    let (service, mut session, _guard) = open(&state, scope).await?;
    let result = service.single(&mut session, &req, &id).await?;
    Ok(single_response(result))
}
