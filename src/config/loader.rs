use crate::config::config::{AppConfig, StorageBackend};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

/// 环境变量前缀，嵌套字段以 `__` 分隔，例如 `MEMORIA_MEMORY__MAX_PROFILE_SUBTOPICS`
pub const ENV_PREFIX: &str = "MEMORIA_";

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 优先级（低 → 高）：
    /// 1. 内置默认值
    /// 2. ./memoria.toml
    /// 3. 环境变量
    pub fn load() -> Result<AppConfig, figment::Error> {
        Self::load_from(default_config_path())
    }

    /// 从指定路径加载配置
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig, figment::Error> {
        Self::figment(path).extract()
    }

    fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.server.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }

        if config.database.backend == StorageBackend::Surrealdb && config.database.url.is_empty() {
            return Err(ConfigValidationError::MissingDatabaseUrl);
        }

        let memory = &config.memory;
        let limits = [
            ("max_profile_subtopics", memory.max_profile_subtopics),
            ("max_pre_profile_token_size", memory.max_pre_profile_token_size),
            ("max_chat_blob_buffer_token_size", memory.max_chat_blob_buffer_token_size),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigValidationError::ZeroLimit(name));
            }
        }

        let intervals = [
            ("buffer_flush_interval", memory.buffer_flush_interval),
            ("flush_check_interval", memory.flush_check_interval),
            ("worker_idle_timeout", memory.worker_idle_timeout),
            ("llm.timeout_secs", config.llm.timeout_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigValidationError::ZeroLimit(name));
            }
        }

        if memory.llm_tab_separator.is_empty() {
            return Err(ConfigValidationError::EmptySeparator);
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("服务端口无效，必须大于 0")]
    InvalidPort,

    #[error("数据库连接 URL 未配置")]
    MissingDatabaseUrl,

    #[error("{0} 必须大于 0")]
    ZeroLimit(&'static str),

    #[error("llm_tab_separator 不能为空")]
    EmptySeparator,
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("memoria.toml")
}

/// 检查配置文件是否存在
pub fn config_exists() -> bool {
    default_config_path().exists()
}
