//! Handlers 模块
//!
//! HTTP 请求处理器。

pub mod blob_handler;
pub mod project_handler;
pub mod user_handler;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

pub const PROJECT_HEADER: &str = "x-project-id";
pub const DEFAULT_PROJECT_ID: &str = "__root__";

/// Project scope of a request, taken from the `x-project-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectId(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ProjectId {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let project = parts
            .headers
            .get(PROJECT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_PROJECT_ID);
        Ok(ProjectId(project.to_string()))
    }
}
