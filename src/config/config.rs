use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::profile_config::{Language, UserProfileTopic};

/// 存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// 进程内存储（默认，测试使用）
    #[default]
    Memory,
    /// SurrealDB
    Surrealdb,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 存储后端
    pub backend: StorageBackend,
    /// SurrealDB 连接地址
    pub url: String,
    /// 命名空间
    pub namespace: String,
    /// 数据库名称
    pub database: String,
    /// 用户名
    pub username: String,
    /// 密码
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: "http://localhost:8000".into(),
            namespace: "memoria".into(),
            database: "profiles".into(),
            username: "root".into(),
            password: "root".into(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 服务地址
    pub host: String,
    /// 服务端口
    pub port: u16,
    /// 请求超时（秒）
    pub request_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8019,
            request_timeout: 120,
        }
    }
}

/// LLM 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI 兼容接口地址
    pub base_url: String,
    /// API 密钥
    pub api_key: String,
    /// 模型名称
    pub model: String,
    /// 单次调用超时（秒）
    pub timeout_secs: u64,
    /// 采样温度
    pub temperature: f32,
    /// 最大输出 token 数
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4o-mini".into(),
            timeout_secs: 60,
            temperature: 0.2,
            max_tokens: 2048,
        }
    }
}

/// 记忆管线配置
///
/// Field names follow the project-level configuration surface so a single
/// TOML file or `MEMORIA_MEMORY__*` variable set can drive them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Seconds a chat buffer may sit before it is flushed automatically
    pub buffer_flush_interval: u64,
    /// Buffered tokens that trigger an automatic flush
    pub max_chat_blob_buffer_token_size: usize,
    /// Organizer threshold
    pub max_profile_subtopics: usize,
    /// Re-summarizer threshold, in tokens
    pub max_pre_profile_token_size: usize,
    /// Profile read-cache expiry, in seconds
    pub cache_user_profiles_ttl: u64,
    pub language: Language,
    pub additional_user_profiles: Vec<UserProfileTopic>,
    pub overwrite_user_profiles: Option<Vec<UserProfileTopic>>,
    pub llm_tab_separator: String,
    /// Keep chat blobs after they have been processed
    pub persistent_chat_blobs: bool,
    /// Most recent events considered by context assembly
    pub max_context_events: usize,
    /// How often the flush ticker scans for expired buffers, in seconds
    pub flush_check_interval: u64,
    /// Idle seconds before a per-user pipeline worker retires
    pub worker_idle_timeout: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            buffer_flush_interval: 60 * 60,
            max_chat_blob_buffer_token_size: 1024,
            max_profile_subtopics: 15,
            max_pre_profile_token_size: 512,
            cache_user_profiles_ttl: 60 * 20,
            language: Language::En,
            additional_user_profiles: Vec::new(),
            overwrite_user_profiles: None,
            llm_tab_separator: "::".into(),
            persistent_chat_blobs: false,
            max_context_events: 10,
            flush_check_interval: 30,
            worker_idle_timeout: 60,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 结构化日志格式
    pub structured: bool,
    /// 日志文件目录
    pub log_dir: Option<PathBuf>,
    /// 日志文件名前缀
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
            log_dir: None,
            file_prefix: "memoria.log".into(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// LLM 配置
    pub llm: LlmConfig,
    /// 记忆管线配置
    pub memory: MemoryConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 应用名称
    pub app_name: String,
    /// 环境
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            memory: MemoryConfig::default(),
            logging: LoggingConfig::default(),
            app_name: "memoria".into(),
            environment: "development".into(),
        }
    }
}

impl AppConfig {
    /// 创建开发环境配置
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".into();
        config
    }

    /// 创建生产环境配置
    pub fn production() -> Self {
        let mut config = Self::default();
        config.environment = "production".into();
        config.database.backend = StorageBackend::Surrealdb;
        config.logging.structured = true;
        config.logging.log_dir = Some(PathBuf::from("./logs"));
        config
    }
}
