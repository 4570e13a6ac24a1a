//! Project Routes

use crate::api::handlers::project_handler::*;
use axum::{routing::get, Router};

use crate::api::app_state::AppState;

pub fn create_project_router() -> Router<AppState> {
    Router::new().route(
        "/project/profile_config",
        get(get_profile_config).post(update_profile_config),
    )
}
