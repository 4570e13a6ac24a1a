//! Blob API Handlers
//!
//! Blob 写入、读取、删除、列表以及缓冲区刷新。

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;

use crate::{
    api::{app_state::AppState, dto::*, handlers::ProjectId},
    error::AppError,
    models::BlobType,
};

/// POST /api/v1/blobs/insert/:user_id
pub async fn insert_blob(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path(user_id): Path<String>,
    Json(request): Json<InsertBlobRequest>,
) -> Result<impl IntoResponse, AppError> {
    debug!("Inserting {} blob for {}/{}", request.blob_data.blob_type(), project_id, user_id);
    let id = state
        .memory_service
        .insert_blob(&project_id, &user_id, request.blob_data, request.fields)
        .await?;
    Ok((StatusCode::CREATED, Json(InsertBlobResponse { id })))
}

/// GET /api/v1/blobs/:user_id/:blob_id
pub async fn get_blob(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path((user_id, blob_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let blob = state
        .memory_service
        .get_blob(&project_id, &user_id, &blob_id)
        .await?;
    Ok(Json(blob))
}

/// DELETE /api/v1/blobs/:user_id/:blob_id
pub async fn delete_blob(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path((user_id, blob_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .memory_service
        .delete_blob(&project_id, &user_id, &blob_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/users/blobs/:user_id/:blob_type
pub async fn list_blobs(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path((user_id, blob_type)): Path<(String, String)>,
    Query(params): Query<ListBlobsParams>,
) -> Result<impl IntoResponse, AppError> {
    let blob_type: BlobType = blob_type.parse()?;
    let ids = state
        .memory_service
        .list_blobs(&project_id, &user_id, blob_type, params.page, params.page_size)
        .await?;
    Ok(Json(BlobIdsResponse { ids }))
}

/// POST /api/v1/users/buffer/:user_id/:blob_type
pub async fn flush_buffer(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path((user_id, blob_type)): Path<(String, String)>,
    Query(params): Query<FlushParams>,
) -> Result<impl IntoResponse, AppError> {
    let blob_type: BlobType = blob_type.parse()?;
    let outcome = state
        .memory_service
        .flush(&project_id, &user_id, blob_type, params.wait)
        .await?;
    Ok(Json(FlushResponse::from(outcome)))
}
