//! Memoria - 面向 LLM 应用的用户记忆服务
//!
//! 将原始对话片段提炼为按主题/子主题组织的用户画像和事件日志，
//! 并按 token 预算组装成可注入提示词的上下文。

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;
