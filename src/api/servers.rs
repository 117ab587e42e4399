//! Server registry API endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};

use super::ApiResult;
use crate::auth::Caller;
use crate::errors::AppError;
use crate::models::{
    EnrollServerRequest, MetadataQuery, MetadataSnapshot, PollResult, ServerFilter, ServerRecord,
    StatusSummary, UpdateServerRequest,
};
use crate::{stats, validation, AppState};

/// GET /api/servers - List servers, optionally filtered.
pub async fn list_servers(
    State(state): State<AppState>,
    Query(filter): Query<ServerFilter>,
) -> ApiResult<Json<Vec<ServerRecord>>> {
    let servers = state.repo.list_servers(&filter).await?;
    Ok(Json(servers))
}

/// GET /api/servers/summary - Dashboard counts.
pub async fn server_summary(State(state): State<AppState>) -> ApiResult<Json<StatusSummary>> {
    let summary = stats::summarize_registry(&state.repo).await?;
    Ok(Json(summary))
}

/// GET /api/servers/:id - Get a single server.
pub async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServerRecord>> {
    state
        .repo
        .get_server(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::server_not_found(&id))
}

/// POST /api/servers - Enroll a new server.
pub async fn create_server(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(request): Json<EnrollServerRequest>,
) -> ApiResult<(StatusCode, Json<ServerRecord>)> {
    caller.require_admin()?;

    let new_server = validation::validate_create(&request)?;
    let server = state
        .repo
        .create_server(&new_server, &caller.username)
        .await?;

    tracing::info!(
        server_id = %server.id,
        "Server enrolled: {} by {}",
        server.server_name,
        caller.username
    );

    Ok((StatusCode::CREATED, Json(server)))
}

/// PUT/PATCH /api/servers/:id - Edit a server.
pub async fn update_server(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Json(request): Json<UpdateServerRequest>,
) -> ApiResult<Json<ServerRecord>> {
    caller.require_admin()?;

    let changes = validation::validate_update(&request)?;
    if changes.is_empty() {
        return get_server(State(state), Path(id)).await;
    }

    let server = state.repo.update_server(&id, &changes).await?;

    tracing::info!(
        server_id = %server.id,
        credential_rotated = changes.api_key.is_some(),
        "Server updated: {} by {}",
        server.server_name,
        caller.username
    );

    Ok(Json(server))
}

/// DELETE /api/servers/:id - Remove a server.
pub async fn delete_server(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    caller.require_admin()?;

    state.repo.delete_server(&id).await?;
    tracing::info!(server_id = %id, "Server deleted by {}", caller.username);

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/servers/:id/poll - Poll one server and wait for the result.
pub async fn poll_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PollResult>> {
    let result = state.poller.poll_one(&id).await?;
    Ok(Json(result))
}

/// POST /api/servers/poll-all - Poll every active server.
pub async fn poll_all_servers(State(state): State<AppState>) -> ApiResult<Json<Vec<PollResult>>> {
    let results = state.poller.poll_all().await?;
    Ok(Json(results))
}

/// GET /api/servers/:id/metadata - Content snapshots, newest first.
pub async fn server_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MetadataQuery>,
) -> ApiResult<Json<Vec<MetadataSnapshot>>> {
    if query.limit < 1 {
        return Err(AppError::BadRequest("limit must be at least 1".to_string()));
    }
    if state.repo.get_server(&id).await?.is_none() {
        return Err(AppError::server_not_found(&id));
    }

    let snapshots = state.repo.list_metadata(&id, query.limit).await?;
    Ok(Json(snapshots))
}
