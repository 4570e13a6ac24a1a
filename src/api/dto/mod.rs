//! DTO 模块
//!
//! 数据传输对象，用于 API 请求和响应的序列化。

pub mod blob_dto;
pub mod project_dto;
pub mod user_dto;

pub use blob_dto::*;
pub use project_dto::*;
pub use user_dto::*;
