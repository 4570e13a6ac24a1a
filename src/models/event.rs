//! 用户事件数据模型
//!
//! Append-only log of what each processed batch changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::profile::ProfileDelta;

/// Classification label attached to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTag {
    pub tag: String,
    pub value: String,
}

/// 用户事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEvent {
    pub id: String,

    pub user_id: String,

    pub project_id: String,

    /// Short natural-language summary of the batch
    pub event_tip: Option<String>,

    pub event_tags: Option<Vec<EventTag>>,

    /// Fact changes that produced this event
    pub profile_delta: Vec<ProfileDelta>,

    pub created_at: DateTime<Utc>,
}

impl UserEvent {
    pub fn new(
        user_id: &str,
        project_id: &str,
        event_tip: Option<String>,
        event_tags: Option<Vec<EventTag>>,
        profile_delta: Vec<ProfileDelta>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            event_tip,
            event_tags,
            profile_delta,
            created_at: Utc::now(),
        }
    }

    /// Text shown for this event in an assembled context, if any.
    pub fn summary_text(&self) -> Option<String> {
        if let Some(tip) = self.event_tip.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Some(tip.replace('\n', " "));
        }
        if self.profile_delta.is_empty() {
            return None;
        }
        Some(
            self.profile_delta
                .iter()
                .map(ProfileDelta::describe)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
