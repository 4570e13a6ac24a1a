//! Blob DTO
//!
//! 定义 blob 与缓冲区相关的请求和响应数据结构。

use serde::{Deserialize, Serialize};

use crate::models::BlobData;
use crate::services::BatchOutcome;

/// 插入 blob 请求
#[derive(Debug, Deserialize)]
pub struct InsertBlobRequest {
    pub blob_data: BlobData,
    #[serde(default)]
    pub fields: Option<serde_json::Value>,
}

/// 插入 blob 响应
#[derive(Debug, Serialize, Deserialize)]
pub struct InsertBlobResponse {
    pub id: String,
}

/// 分页参数
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ListBlobsParams {
    pub page: usize,
    pub page_size: usize,
}

impl Default for ListBlobsParams {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 10,
        }
    }
}

/// blob ID 列表响应
#[derive(Debug, Serialize, Deserialize)]
pub struct BlobIdsResponse {
    pub ids: Vec<String>,
}

/// 刷新参数；默认同步等待批次完成
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FlushParams {
    pub wait: bool,
}

impl Default for FlushParams {
    fn default() -> Self {
        Self { wait: true }
    }
}

/// 刷新结果
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FlushResponse {
    /// 是否有批次被处理
    pub processed: bool,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub event_id: Option<String>,
}

impl From<Option<BatchOutcome>> for FlushResponse {
    fn from(outcome: Option<BatchOutcome>) -> Self {
        match outcome {
            None => Self::default(),
            Some(outcome) => Self {
                processed: true,
                added: outcome.summary.added.len(),
                updated: outcome.summary.updated,
                deleted: outcome.summary.deleted,
                event_id: outcome.event.map(|e| e.id),
            },
        }
    }
}
