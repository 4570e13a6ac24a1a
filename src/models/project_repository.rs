//! Project 仓储
//!
//! 每个项目保存一份 YAML 格式的画像配置

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get_profile_config(&self, project_id: &str) -> Result<Option<String>>;

    async fn update_profile_config(&self, project_id: &str, yaml: &str) -> Result<()>;
}
