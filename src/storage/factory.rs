//! 存储工厂模块
//!
//! 根据配置创建相应的存储后端，并打包成服务层使用的仓储集合。

use crate::config::config::{DatabaseConfig, StorageBackend};
use crate::error::{AppError, Result};
use crate::models::{BlobRepository, EventRepository, ProfileRepository, ProjectRepository};
use crate::storage::memory::InMemoryStore;
use std::sync::Arc;

#[cfg(feature = "surrealdb")]
use crate::storage::{repository::SurrealRepository, surrealdb::SurrealPool};

/// 服务层使用的仓储集合
#[derive(Clone)]
pub struct Repositories {
    pub profiles: Arc<dyn ProfileRepository>,
    pub events: Arc<dyn EventRepository>,
    pub blobs: Arc<dyn BlobRepository>,
    pub projects: Arc<dyn ProjectRepository>,
}

impl Repositories {
    /// 同一个后端实现全部四个接口
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ProfileRepository + EventRepository + BlobRepository + ProjectRepository + 'static,
    {
        Self {
            profiles: store.clone(),
            events: store.clone(),
            blobs: store.clone(),
            projects: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryStore::new()))
    }
}

/// 存储实例枚举
pub enum StorageInstance {
    Memory(Arc<InMemoryStore>),
    #[cfg(feature = "surrealdb")]
    SurrealDB(SurrealPool, Arc<SurrealRepository>),
}

impl StorageInstance {
    pub fn repositories(&self) -> Repositories {
        match self {
            StorageInstance::Memory(store) => Repositories::from_store(store.clone()),
            #[cfg(feature = "surrealdb")]
            StorageInstance::SurrealDB(_, repo) => Repositories::from_store(repo.clone()),
        }
    }

    pub fn backend(&self) -> StorageBackend {
        match self {
            StorageInstance::Memory(_) => StorageBackend::Memory,
            #[cfg(feature = "surrealdb")]
            StorageInstance::SurrealDB(..) => StorageBackend::Surrealdb,
        }
    }

    /// 检查存储是否可用
    pub async fn health_check(&self) -> Result<()> {
        match self {
            StorageInstance::Memory(_) => Ok(()),
            #[cfg(feature = "surrealdb")]
            StorageInstance::SurrealDB(pool, _) => pool.health_check().await,
        }
    }

    /// 关闭连接
    pub async fn close(&self) {
        #[cfg(feature = "surrealdb")]
        if let StorageInstance::SurrealDB(pool, _) = self {
            pool.close().await;
        }
    }
}

/// 存储工厂
pub struct StorageFactory;

impl StorageFactory {
    /// 根据配置创建存储实例
    pub async fn create(config: &DatabaseConfig) -> Result<StorageInstance> {
        match config.backend {
            StorageBackend::Memory => {
                tracing::info!("Using in-memory storage backend");
                Ok(StorageInstance::Memory(Arc::new(InMemoryStore::new())))
            }
            #[cfg(feature = "surrealdb")]
            StorageBackend::Surrealdb => {
                let pool = SurrealPool::new(config.clone())
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
                let repo = Arc::new(SurrealRepository::new(pool.inner().await?));
                Ok(StorageInstance::SurrealDB(pool, repo))
            }
            #[cfg(not(feature = "surrealdb"))]
            StorageBackend::Surrealdb => Err(AppError::Config(
                "SurrealDB feature is not enabled. Enable the 'surrealdb' feature to use it.".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_by_default() {
        let storage = StorageFactory::create(&DatabaseConfig::default()).await.unwrap();
        assert_eq!(storage.backend(), StorageBackend::Memory);
        assert!(storage.health_check().await.is_ok());

        let repos = storage.repositories();
        repos.projects.update_profile_config("p1", "language: zh").await.unwrap();
        assert_eq!(
            repos.projects.get_profile_config("p1").await.unwrap().as_deref(),
            Some("language: zh")
        );
    }
}
