//! Profile 仓储
//!
//! 画像条目的持久化接口

use async_trait::async_trait;
use futures_util::future::try_join_all;

use crate::error::Result;
use crate::models::profile::{ChangeSet, CommitSummary, ProfileEntry, ProfileUpdate};

/// Profile 仓储 trait
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// 列出用户全部画像条目
    async fn list_profiles(&self, project_id: &str, user_id: &str) -> Result<Vec<ProfileEntry>>;

    /// 根据 ID 获取画像条目
    async fn get_profile(
        &self,
        project_id: &str,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Option<ProfileEntry>>;

    /// 插入条目，槽位 (topic, sub_topic) 已占用时返回 Conflict
    async fn insert_profile(&self, entry: &ProfileEntry) -> Result<()>;

    /// 原地替换内容与属性，update_hits + 1
    async fn update_profile(
        &self,
        project_id: &str,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<ProfileEntry>;

    /// 仅增加命中次数
    async fn touch_profiles(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<()>;

    /// 批量删除，返回删除数量
    async fn delete_profiles(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<usize>;

    /// Apply a change set.
    ///
    /// The default dispatches the four lists concurrently and reports
    /// failure if any of them fails. Backends that can do better override
    /// it with an all-or-nothing commit.
    async fn commit_change_set(
        &self,
        project_id: &str,
        user_id: &str,
        changes: &ChangeSet,
    ) -> Result<CommitSummary> {
        let entries: Vec<ProfileEntry> = changes
            .add
            .iter()
            .map(|add| ProfileEntry::new(user_id, project_id, &add.content, &add.attributes))
            .collect();
        let added = entries.iter().map(|e| e.id.clone()).collect();

        let inserts = try_join_all(entries.iter().map(|e| self.insert_profile(e)));
        let updates = try_join_all(
            changes
                .update
                .iter()
                .map(|u| self.update_profile(project_id, user_id, u)),
        );
        let deletes = self.delete_profiles(project_id, user_id, &changes.delete);
        let touches = self.touch_profiles(project_id, user_id, &changes.touched);

        let (_, updated, deleted, _) = tokio::try_join!(inserts, updates, deletes, touches)?;

        Ok(CommitSummary {
            added,
            updated: updated.len(),
            deleted,
            touched: changes.touched.len(),
        })
    }
}
