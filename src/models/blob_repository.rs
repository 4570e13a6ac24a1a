//! Blob 仓储

use async_trait::async_trait;

use crate::error::Result;
use crate::models::blob::{Blob, BlobType};

/// Blob 仓储 trait
#[async_trait]
pub trait BlobRepository: Send + Sync {
    async fn insert_blob(&self, blob: &Blob) -> Result<()>;

    async fn get_blob(&self, project_id: &str, user_id: &str, blob_id: &str) -> Result<Option<Blob>>;

    async fn delete_blob(&self, project_id: &str, user_id: &str, blob_id: &str) -> Result<bool>;

    /// 批量删除，返回删除数量
    async fn delete_blobs(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<usize>;

    /// 分页列出 blob ID，新的在前
    async fn list_blob_ids(
        &self,
        project_id: &str,
        user_id: &str,
        blob_type: BlobType,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>>;
}
