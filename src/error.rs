//! 错误处理模块
//!
//! 定义应用程序的错误类型和错误处理逻辑。
//! Pipeline stages map onto dedicated variants so callers can tell a fatal
//! batch failure from a degraded-but-committed one.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 数据库错误
    #[error("数据库错误: {0}")]
    Database(String),

    /// 资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 参数验证错误
    #[error("参数验证失败: {0}")]
    Validation(String),

    /// 资源冲突
    #[error("资源冲突: {0}")]
    Conflict(String),

    /// 超时错误
    #[error("操作超时: {0}")]
    Timeout(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// LLM collaborator transport or quota failure
    #[error("LLM 调用失败: {0}")]
    Llm(String),

    /// Extraction call failed or returned an unparseable fact list
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Candidate facts could not be reconciled with the profile snapshot
    #[error("merge failed: {0}")]
    Merge(String),

    /// Sub-topic consolidation failed; the batch continues unorganized
    #[error("organize failed: {0}")]
    Organize(String),

    /// Oversized entry summarization failed; content is committed as-is
    #[error("re-summary failed: {0}")]
    Resummarize(String),

    /// Change set could not be applied to the profile store
    #[error("commit failed: {0}")]
    Commit(String),

    /// Malformed context assembly arguments
    #[error("invalid filter: {0}")]
    BadFilter(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl AppError {
    /// Whether this error aborts a pipeline batch.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AppError::Organize(_) | AppError::Resummarize(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else {
            AppError::Llm(e.to_string())
        }
    }
}

#[cfg(feature = "surrealdb")]
impl From<surrealdb::Error> for AppError {
    fn from(e: surrealdb::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

/// Axum response implementation for AppError
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = (&self).into();
        let body = Json(ErrorResponse::new(&code, &self.to_string()));
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        )
            .into_response()
    }
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: String,
    /// 错误消息
    pub message: String,
}

impl ErrorResponse {
    /// 创建新错误响应
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

/// HTTP 状态码映射
impl From<&AppError> for (u16, String) {
    fn from(err: &AppError) -> (u16, String) {
        match err {
            AppError::NotFound(_) => (404, "NOT_FOUND".to_string()),
            AppError::Validation(_) | AppError::BadFilter(_) => (400, "BAD_REQUEST".to_string()),
            AppError::Conflict(_) => (409, "CONFLICT".to_string()),
            AppError::Timeout(_) => (408, "TIMEOUT".to_string()),
            AppError::Llm(_) | AppError::Extraction(_) => (502, "LLM_ERROR".to_string()),
            _ => (500, "INTERNAL_ERROR".to_string()),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;
