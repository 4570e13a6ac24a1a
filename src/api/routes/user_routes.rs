//! User Routes
//!
//! 画像、事件与上下文路由。

use crate::api::handlers::user_handler::*;
use axum::{
    routing::{delete, get, put},
    Router,
};

use crate::api::app_state::AppState;

/// 创建用户路由器
pub fn create_user_router() -> Router<AppState> {
    Router::new()
        .route("/users/profile/:user_id", get(get_profiles).post(add_profile))
        .route("/users/profile/:user_id/:profile_id", put(update_profile))
        .route("/users/profile/:user_id/:profile_id", delete(delete_profile))
        .route("/users/event/:user_id", get(list_events))
        .route("/users/event/:user_id/:event_id", delete(delete_event))
        .route("/users/context/:user_id", get(get_context))
}
