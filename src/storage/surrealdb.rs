use crate::config::config::DatabaseConfig;
use crate::error::{AppError, Result};
use std::sync::Arc;
use surrealdb::{
    Surreal,
    engine::any::{Any, connect},
    opt::auth::Root,
};
use tokio::sync::Mutex;

/// 表结构与唯一索引，连接建立后执行一次
const SCHEMA: &str = "
DEFINE INDEX IF NOT EXISTS profile_slot ON TABLE profile COLUMNS project_id, user_id, topic, sub_topic UNIQUE;
DEFINE INDEX IF NOT EXISTS profile_user ON TABLE profile COLUMNS project_id, user_id;
DEFINE INDEX IF NOT EXISTS event_user ON TABLE user_event COLUMNS project_id, user_id;
DEFINE INDEX IF NOT EXISTS blob_user ON TABLE blob COLUMNS project_id, user_id, blob_type;
";

/// SurrealDB 连接池
#[derive(Clone)]
pub struct SurrealPool {
    /// 数据库连接
    db: Arc<Mutex<Option<Surreal<Any>>>>,
    /// 连接配置
    config: DatabaseConfig,
}

impl SurrealPool {
    /// 创建新的连接池
    pub async fn new(config: DatabaseConfig) -> std::result::Result<Self, surrealdb::Error> {
        let db: Surreal<Any> = connect(&config.url).await?;

        // 嵌入式引擎没有 root 用户
        if !config.url.starts_with("rocksdb") {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;

        db.query(SCHEMA).await?.check()?;

        tracing::info!(
            "Connected to SurrealDB at {} ({}/{})",
            config.url,
            config.namespace,
            config.database
        );

        Ok(Self {
            db: Arc::new(Mutex::new(Some(db))),
            config,
        })
    }

    /// 获取内部数据库实例
    pub async fn inner(&self) -> Result<Surreal<Any>> {
        let guard = self.db.lock().await;
        guard
            .as_ref()
            .cloned()
            .ok_or_else(|| AppError::Database("database connection closed".into()))
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let db = self.inner().await?;
        db.health().await?;
        Ok(())
    }

    /// 关闭连接
    pub async fn close(&self) {
        let mut guard = self.db.lock().await;
        *guard = None;
    }
}
