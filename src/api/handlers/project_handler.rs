//! Project API Handlers

use axum::{Json, extract::State, response::IntoResponse};

use crate::{
    api::{app_state::AppState, dto::ProfileConfigBody, handlers::ProjectId},
    error::AppError,
};

/// GET /api/v1/project/profile_config
pub async fn get_profile_config(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
) -> Result<impl IntoResponse, AppError> {
    let profile_config = state.memory_service.get_profile_config(&project_id).await?;
    Ok(Json(ProfileConfigBody { profile_config }))
}

/// POST /api/v1/project/profile_config
pub async fn update_profile_config(
    State(state): State<AppState>,
    ProjectId(project_id): ProjectId,
    Json(body): Json<ProfileConfigBody>,
) -> Result<impl IntoResponse, AppError> {
    let yaml = body.profile_config.unwrap_or_default();
    state
        .memory_service
        .update_profile_config(&project_id, &yaml)
        .await?;
    Ok(Json(ProfileConfigBody {
        profile_config: Some(yaml),
    }))
}
