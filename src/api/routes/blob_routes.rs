//! Blob Routes

use crate::api::handlers::blob_handler::*;
use axum::{
    routing::{get, post},
    Router,
};

use crate::api::app_state::AppState;

/// 创建 blob 路由器
pub fn create_blob_router() -> Router<AppState> {
    Router::new()
        .route("/blobs/insert/:user_id", post(insert_blob))
        .route("/blobs/:user_id/:blob_id", get(get_blob).delete(delete_blob))
        .route("/users/blobs/:user_id/:blob_type", get(list_blobs))
        .route("/users/buffer/:user_id/:blob_type", post(flush_buffer))
}
