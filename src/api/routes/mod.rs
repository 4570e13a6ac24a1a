//! Routes 模块
//!
//! 定义 API 路由。

pub mod blob_routes;
pub mod project_routes;
pub mod user_routes;
