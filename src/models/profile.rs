//! 用户画像数据模型
//!
//! A profile is a bounded set of `(topic, sub_topic) -> content` facts per
//! user. Pipeline runs describe their edits as a [`ChangeSet`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical form of a topic or sub-topic key.
///
/// Trimmed, lowercased, inner whitespace collapsed to `_`.
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Two-level categorical key of a profile entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileAttributes {
    pub topic: String,
    pub sub_topic: String,
}

impl ProfileAttributes {
    pub fn new(topic: &str, sub_topic: &str) -> Self {
        Self {
            topic: normalize_key(topic),
            sub_topic: normalize_key(sub_topic),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.topic.is_empty() && !self.sub_topic.is_empty()
    }
}

/// 画像条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    /// 条目唯一标识
    pub id: String,

    pub user_id: String,

    pub project_id: String,

    pub topic: String,

    pub sub_topic: String,

    pub content: String,

    /// Confidence / recency counter, bumped on every re-mention
    pub update_hits: u32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ProfileEntry {
    /// New entry with one hit.
    pub fn new(user_id: &str, project_id: &str, content: &str, attributes: &ProfileAttributes) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            project_id: project_id.to_string(),
            topic: attributes.topic.clone(),
            sub_topic: attributes.sub_topic.clone(),
            content: content.to_string(),
            update_hits: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attributes(&self) -> ProfileAttributes {
        ProfileAttributes {
            topic: self.topic.clone(),
            sub_topic: self.sub_topic.clone(),
        }
    }

    pub fn slot(&self) -> (&str, &str) {
        (&self.topic, &self.sub_topic)
    }

    /// Replace content and key, counting the change as a hit.
    pub fn apply_update(&mut self, content: &str, attributes: &ProfileAttributes) {
        self.content = content.to_string();
        self.topic = attributes.topic.clone();
        self.sub_topic = attributes.sub_topic.clone();
        self.touch();
    }

    pub fn touch(&mut self) {
        self.update_hits = self.update_hits.saturating_add(1);
        self.updated_at = Utc::now();
    }
}

/// A fact to add, and the unit recorded in an event's profile delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDelta {
    pub content: String,
    pub attributes: ProfileAttributes,
}

impl ProfileDelta {
    pub fn new(content: &str, attributes: ProfileAttributes) -> Self {
        Self {
            content: content.to_string(),
            attributes,
        }
    }

    /// `topic:sub_topic: content`
    pub fn describe(&self) -> String {
        format!(
            "{}:{}: {}",
            self.attributes.topic, self.attributes.sub_topic, self.content
        )
    }
}

/// In-place replacement of an existing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub profile_id: String,
    pub content: String,
    pub attributes: ProfileAttributes,
}

/// Three-way edit computed by a pipeline run
///
/// `touched` holds entries whose fact was re-mentioned without new content;
/// they only get their hit counter bumped and never count as a change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub add: Vec<ProfileDelta>,
    pub update: Vec<ProfileUpdate>,
    pub delete: Vec<String>,
    #[serde(default)]
    pub touched: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Final content of every added or updated fact.
    pub fn delta(&self) -> Vec<ProfileDelta> {
        self.add
            .iter()
            .cloned()
            .chain(
                self.update
                    .iter()
                    .map(|u| ProfileDelta::new(&u.content, u.attributes.clone())),
            )
            .collect()
    }

    /// Sub-topic count per topic once this change set is applied to `snapshot`.
    pub fn resulting_subtopics(&self, snapshot: &[ProfileEntry]) -> HashMap<String, usize> {
        let mut slots: HashMap<String, std::collections::HashSet<String>> = HashMap::new();
        let updated: HashMap<&str, &ProfileUpdate> = self
            .update
            .iter()
            .map(|u| (u.profile_id.as_str(), u))
            .collect();

        for entry in snapshot {
            if self.delete.contains(&entry.id) {
                continue;
            }
            let attributes = updated
                .get(entry.id.as_str())
                .map(|u| u.attributes.clone())
                .unwrap_or_else(|| entry.attributes());
            slots
                .entry(attributes.topic)
                .or_default()
                .insert(attributes.sub_topic);
        }
        for add in &self.add {
            slots
                .entry(add.attributes.topic.clone())
                .or_default()
                .insert(add.attributes.sub_topic.clone());
        }

        slots.into_iter().map(|(topic, subs)| (topic, subs.len())).collect()
    }
}

/// Result of a successful commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub added: Vec<String>,
    pub updated: usize,
    pub deleted: usize,
    pub touched: usize,
}
