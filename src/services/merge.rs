//! 画像合并
//!
//! Reconciles candidate facts with the profile snapshot into a change set.
//! Pure computation: nothing here touches storage.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{
    ChangeSet, ProfileAttributes, ProfileConfig, ProfileDelta, ProfileEntry, ProfileUpdate,
    normalize_key,
};

/// Decides whether a candidate says something new about a slot
pub trait ContentComparator: Send + Sync {
    /// True when `candidate` adds nothing to `existing`.
    fn is_same(&self, existing: &str, candidate: &str) -> bool;
}

/// Case/whitespace-insensitive equality or containment
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizedContainment;

fn normalize_content(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches(['.', ',', ';', '!', '?', '。', '，', '；', '！', '？'])
        .to_string()
}

impl ContentComparator for NormalizedContainment {
    fn is_same(&self, existing: &str, candidate: &str) -> bool {
        let existing = normalize_content(existing);
        let candidate = normalize_content(candidate);
        existing == candidate || (!candidate.is_empty() && existing.contains(&candidate))
    }
}

/// Inputs of one merge
pub struct MergeInput<'a> {
    pub fact_contents: &'a [String],
    pub fact_attributes: &'a [ProfileAttributes],
    pub profiles: &'a [ProfileEntry],
    pub config: &'a ProfileConfig,
    pub total_profiles: usize,
}

enum Pending {
    Add { content: String },
    Update { profile_id: String, content: String },
    Touch { profile_id: String, existing: String },
}

pub struct MergeEngine {
    comparator: Arc<dyn ContentComparator>,
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new(Arc::new(NormalizedContainment))
    }
}

impl MergeEngine {
    pub fn new(comparator: Arc<dyn ContentComparator>) -> Self {
        Self { comparator }
    }

    pub fn merge(&self, input: MergeInput<'_>) -> Result<ChangeSet> {
        if input.fact_contents.len() != input.fact_attributes.len() {
            return Err(AppError::Merge(format!(
                "{} fact contents but {} attribute sets",
                input.fact_contents.len(),
                input.fact_attributes.len()
            )));
        }

        let mut changes = ChangeSet::default();

        // newest entry per slot; older duplicates are dropped
        let mut slots: HashMap<(String, String), &ProfileEntry> = HashMap::new();
        for entry in input.profiles {
            let key = (entry.topic.clone(), entry.sub_topic.clone());
            match slots.get(&key) {
                Some(kept) if kept.updated_at >= entry.updated_at => {
                    changes.delete.push(entry.id.clone());
                }
                Some(kept) => {
                    changes.delete.push(kept.id.clone());
                    slots.insert(key, entry);
                }
                None => {
                    slots.insert(key, entry);
                }
            }
        }

        if input.config.allowed_topics().is_some() {
            slots.retain(|_, entry| {
                let allowed = input.config.is_topic_allowed(&entry.topic);
                if !allowed {
                    changes.delete.push(entry.id.clone());
                }
                allowed
            });
        }

        let mut order: Vec<(String, String)> = Vec::new();
        let mut pending: HashMap<(String, String), Pending> = HashMap::new();

        for (content, attributes) in input.fact_contents.iter().zip(input.fact_attributes) {
            let content = content.trim();
            let attributes = ProfileAttributes::new(&attributes.topic, &attributes.sub_topic);
            if content.is_empty() || !attributes.is_complete() {
                return Err(AppError::Merge(format!(
                    "incomplete fact '{}' for {}/{}",
                    content, attributes.topic, attributes.sub_topic
                )));
            }
            if !input.config.is_topic_allowed(&normalize_key(&attributes.topic)) {
                tracing::debug!("Skipping fact for disallowed topic {}", attributes.topic);
                continue;
            }

            let key = (attributes.topic, attributes.sub_topic);
            if let Some(current) = pending.get_mut(&key) {
                self.fold(current, content);
                continue;
            }

            let next = match slots.get(&key) {
                Some(entry) if self.comparator.is_same(&entry.content, content) => Pending::Touch {
                    profile_id: entry.id.clone(),
                    existing: entry.content.clone(),
                },
                Some(entry) => Pending::Update {
                    profile_id: entry.id.clone(),
                    content: content.to_string(),
                },
                None => Pending::Add {
                    content: content.to_string(),
                },
            };
            order.push(key.clone());
            pending.insert(key, next);
        }

        for key in order {
            let Some(change) = pending.remove(&key) else {
                continue;
            };
            let attributes = ProfileAttributes {
                topic: key.0,
                sub_topic: key.1,
            };
            match change {
                Pending::Add { content } => changes.add.push(ProfileDelta::new(&content, attributes)),
                Pending::Update { profile_id, content } => changes.update.push(ProfileUpdate {
                    profile_id,
                    content,
                    attributes,
                }),
                Pending::Touch { profile_id, .. } => changes.touched.push(profile_id),
            }
        }

        tracing::debug!(
            "Merged {} candidates against {} profiles: {} add, {} update, {} delete, {} touched",
            input.fact_contents.len(),
            input.total_profiles,
            changes.add.len(),
            changes.update.len(),
            changes.delete.len(),
            changes.touched.len()
        );
        Ok(changes)
    }

    /// Fold a second candidate for the same slot into the pending change.
    fn fold(&self, current: &mut Pending, candidate: &str) {
        match current {
            Pending::Add { content } | Pending::Update { content, .. } => {
                if !self.comparator.is_same(content, candidate) {
                    content.push_str("; ");
                    content.push_str(candidate);
                }
            }
            Pending::Touch { profile_id, existing } => {
                if !self.comparator.is_same(existing, candidate) {
                    let replacement = Pending::Update {
                        profile_id: profile_id.clone(),
                        content: format!("{}; {}", existing, candidate),
                    };
                    *current = replacement;
                }
            }
        }
    }
}
