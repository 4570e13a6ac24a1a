//! 用户 DTO
//!
//! 画像、事件与上下文接口的请求和响应数据结构。列表型查询参数使用逗号分隔。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ProfileAttributes, ProfileEntry, UserEvent};
use crate::services::{ContextRequest, ProfileQuery};

const DEFAULT_CONTEXT_TOKENS: usize = 1000;
const DEFAULT_EVENT_TOPK: usize = 10;

/// Split `a,b , c` into trimmed, non-empty items.
pub fn split_list(raw: Option<&str>) -> Option<Vec<String>> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

/// 画像写入请求
#[derive(Debug, Deserialize)]
pub struct ProfileInput {
    pub content: String,
    pub attributes: ProfileAttributes,
}

/// 画像响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: String,
    pub content: String,
    pub attributes: ProfileAttributes,
    pub update_hits: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProfileEntry> for ProfileResponse {
    fn from(entry: ProfileEntry) -> Self {
        Self {
            attributes: entry.attributes(),
            id: entry.id,
            content: entry.content,
            update_hits: entry.update_hits,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileListResponse {
    pub profiles: Vec<ProfileResponse>,
}

/// 画像列表过滤参数
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProfileListParams {
    pub max_token_size: Option<usize>,
    pub prefer_topics: Option<String>,
    pub only_topics: Option<String>,
    pub max_subtopic_size: Option<usize>,
    pub topic_limits_json: Option<String>,
}

impl From<ProfileListParams> for ProfileQuery {
    fn from(params: ProfileListParams) -> Self {
        Self {
            max_token_size: params.max_token_size,
            prefer_topics: split_list(params.prefer_topics.as_deref()).unwrap_or_default(),
            only_topics: split_list(params.only_topics.as_deref()),
            max_subtopic_size: params.max_subtopic_size,
            topic_limits_json: params.topic_limits_json,
        }
    }
}

/// 事件列表参数
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EventListParams {
    pub topk: usize,
}

impl Default for EventListParams {
    fn default() -> Self {
        Self {
            topk: DEFAULT_EVENT_TOPK,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventListResponse {
    pub events: Vec<UserEvent>,
}

/// 上下文参数
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContextParams {
    pub max_token_size: Option<usize>,
    pub prefer_topics: Option<String>,
    pub only_topics: Option<String>,
    pub max_subtopic_size: Option<usize>,
    pub topic_limits_json: Option<String>,
    pub profile_event_ratio: Option<f32>,
    pub require_event_summary: Option<bool>,
}

impl From<ContextParams> for ContextRequest {
    fn from(params: ContextParams) -> Self {
        let mut request = ContextRequest::new(params.max_token_size.unwrap_or(DEFAULT_CONTEXT_TOKENS));
        request.prefer_topics = split_list(params.prefer_topics.as_deref()).unwrap_or_default();
        request.only_topics = split_list(params.only_topics.as_deref());
        request.max_subtopic_size = params.max_subtopic_size;
        request.topic_limits_json = params.topic_limits_json;
        request.profile_event_ratio = params.profile_event_ratio;
        if let Some(require) = params.require_event_summary {
            request.require_event_summary = require;
        }
        request
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContextResponse {
    pub context: String,
}
