//! Event 仓储

use async_trait::async_trait;

use crate::error::Result;
use crate::models::event::UserEvent;

/// 用户事件仓储 trait，只追加不修改
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append_event(&self, event: &UserEvent) -> Result<()>;

    /// 最近的事件在前
    async fn list_events(&self, project_id: &str, user_id: &str, limit: usize) -> Result<Vec<UserEvent>>;

    async fn delete_event(&self, project_id: &str, user_id: &str, event_id: &str) -> Result<bool>;
}
