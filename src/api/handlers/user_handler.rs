//! User API Handlers
//!
//! 画像增删改查、事件列表与上下文组装。

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
    services::{ContextRequest, ProfileQuery},
};

/// GET /api/v1/users/profile/:user_id
pub async fn get_profiles(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path(user_id): Path<String>,
    Query(params): Query<ProfileListParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = ProfileQuery::from(params);
    let profiles = state
        .memory_service
        .get_profiles(&project_id, &user_id, &query)
        .await?;
    Ok(Json(ProfileListResponse {
        profiles: profiles.into_iter().map(ProfileResponse::from).collect(),
    }))
}

/// POST /api/v1/users/profile/:user_id
pub async fn add_profile(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path(user_id): Path<String>,
    Json(input): Json<ProfileInput>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state
        .memory_service
        .add_profile(
            &project_id,
            &user_id,
            &input.content,
            &input.attributes.topic,
            &input.attributes.sub_topic,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ProfileResponse::from(entry))))
}

/// PUT /api/v1/users/profile/:user_id/:profile_id
pub async fn update_profile(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path((user_id, profile_id)): Path<(String, String)>,
    Json(input): Json<ProfileInput>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state
        .memory_service
        .update_profile(
            &project_id,
            &user_id,
            &profile_id,
            &input.content,
            &input.attributes.topic,
            &input.attributes.sub_topic,
        )
        .await?;
    Ok(Json(ProfileResponse::from(entry)))
}

/// DELETE /api/v1/users/profile/:user_id/:profile_id
pub async fn delete_profile(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path((user_id, profile_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .memory_service
        .delete_profile(&project_id, &user_id, &profile_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/users/event/:user_id
pub async fn list_events(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path(user_id): Path<String>,
    Query(params): Query<EventListParams>,
) -> Result<impl IntoResponse, AppError> {
    let events = state
        .memory_service
        .list_events(&project_id, &user_id, params.topk)
        .await?;
    Ok(Json(EventListResponse { events }))
}

/// DELETE /api/v1/users/event/:user_id/:event_id
pub async fn delete_event(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path((user_id, event_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    state
        .memory_service
        .delete_event(&project_id, &user_id, &event_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/users/context/:user_id
pub async fn get_context(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Path(user_id): Path<String>,
    Query(params): Query<ContextParams>,
) -> Result<impl IntoResponse, AppError> {
    let request = ContextRequest::from(params);
    debug!(
        "Assembling context for {}/{} within {} tokens",
        project_id, user_id, request.max_token_size
    );
    let context = state
        .memory_service
        .context(&project_id, &user_id, &request)
        .await?;
    Ok(Json(ContextResponse { context }))
}
