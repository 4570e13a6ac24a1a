//! 子主题整理
//!
//! Keeps every topic within `max_profile_subtopics` by folding its weakest
//! sub-topics into one entry.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::error::{AppError, Result};
use crate::llm::{LlmRequest, LlmService, prompts};
use crate::models::{
    ChangeSet, ProfileAttributes, ProfileConfig, ProfileDelta, ProfileEntry, ProfileUpdate,
    normalize_key,
};

#[derive(Debug, Clone, PartialEq)]
enum SlotSource {
    Existing(String),
    Added(usize),
}

/// A sub-topic as it will look once the change set is committed
#[derive(Debug, Clone)]
struct Slot {
    sub_topic: String,
    content: String,
    hits: u32,
    updated_at: DateTime<Utc>,
    source: SlotSource,
}

fn slots_for(topic: &str, changes: &ChangeSet, snapshot: &[ProfileEntry]) -> Vec<Slot> {
    let now = Utc::now();
    let mut slots = Vec::new();

    for entry in snapshot {
        if changes.delete.contains(&entry.id) {
            continue;
        }
        let slot = match changes.update.iter().find(|u| u.profile_id == entry.id) {
            Some(update) => (
                update.attributes.clone(),
                update.content.clone(),
                entry.update_hits + 1,
                now,
            ),
            None if changes.touched.contains(&entry.id) => {
                (entry.attributes(), entry.content.clone(), entry.update_hits + 1, now)
            }
            None => (
                entry.attributes(),
                entry.content.clone(),
                entry.update_hits,
                entry.updated_at,
            ),
        };
        let (attributes, content, hits, updated_at) = slot;
        if attributes.topic == topic {
            slots.push(Slot {
                sub_topic: attributes.sub_topic,
                content,
                hits,
                updated_at,
                source: SlotSource::Existing(entry.id.clone()),
            });
        }
    }

    for (index, add) in changes.add.iter().enumerate() {
        if add.attributes.topic == topic {
            slots.push(Slot {
                sub_topic: add.attributes.sub_topic.clone(),
                content: add.content.clone(),
                hits: 1,
                updated_at: now,
                source: SlotSource::Added(index),
            });
        }
    }

    slots
}

/// `sub_topic{sep}content` from the first meaningful reply line.
fn parse_consolidated(reply: &str, sep: &str) -> Option<(String, String)> {
    let line = reply.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_start_matches('-').trim();
    let (sub_topic, content) = line.split_once(sep)?;
    let sub_topic = normalize_key(sub_topic);
    let content = content.trim();
    if sub_topic.is_empty() || content.is_empty() {
        return None;
    }
    Some((sub_topic, content.to_string()))
}

pub struct Organizer {
    llm: LlmService,
}

impl Organizer {
    pub fn new(llm: LlmService) -> Self {
        Self { llm }
    }

    /// Returns an organized copy of `changes`; the input is left untouched
    /// so a failure can fall back to it.
    pub async fn organize(
        &self,
        changes: &ChangeSet,
        snapshot: &[ProfileEntry],
        config: &ProfileConfig,
    ) -> Result<ChangeSet> {
        let limit = config.max_profile_subtopics;
        let mut over: Vec<(String, usize)> = changes
            .resulting_subtopics(snapshot)
            .into_iter()
            .filter(|(_, count)| *count > limit)
            .collect();
        over.sort();

        let mut working = changes.clone();
        for (topic, count) in over {
            tracing::info!(
                "Topic {} has {} sub-topics (limit {}), consolidating",
                topic,
                count,
                limit
            );
            self.consolidate(&mut working, snapshot, &topic, count, config)
                .await?;
        }
        Ok(working)
    }

    async fn consolidate(
        &self,
        working: &mut ChangeSet,
        snapshot: &[ProfileEntry],
        topic: &str,
        count: usize,
        config: &ProfileConfig,
    ) -> Result<()> {
        let mut slots = slots_for(topic, working, snapshot);
        slots.sort_by(|a, b| a.hits.cmp(&b.hits).then(a.updated_at.cmp(&b.updated_at)));

        let take = (count + 1)
            .saturating_sub(config.max_profile_subtopics)
            .min(slots.len());
        if take < 2 {
            return Ok(());
        }
        let (selected, surviving) = slots.split_at(take);

        let pairs: Vec<(String, String)> = selected
            .iter()
            .map(|s| (s.sub_topic.clone(), s.content.clone()))
            .collect();
        let prompt = prompts::organize(topic, &pairs, &config.llm_tab_separator, config.language);
        let reply = self
            .llm
            .complete(&prompt.user, &LlmRequest::with_system(prompt.system))
            .await
            .map_err(|e| AppError::Organize(e.to_string()))?;
        let (sub_topic, content) = parse_consolidated(&reply, &config.llm_tab_separator)
            .ok_or_else(|| AppError::Organize(format!("unparseable consolidation: {}", reply)))?;

        let target = selected.iter().find_map(|s| match &s.source {
            SlotSource::Existing(id) => Some((id.clone(), s.sub_topic.clone())),
            SlotSource::Added(_) => None,
        });
        let fallback = target
            .as_ref()
            .map(|(_, sub)| sub.clone())
            .unwrap_or_else(|| selected[0].sub_topic.clone());
        let taken: HashSet<&str> = surviving.iter().map(|s| s.sub_topic.as_str()).collect();
        let sub_topic = if taken.contains(sub_topic.as_str()) {
            fallback
        } else {
            sub_topic
        };

        let added: HashSet<usize> = selected
            .iter()
            .filter_map(|s| match s.source {
                SlotSource::Added(index) => Some(index),
                SlotSource::Existing(_) => None,
            })
            .collect();
        let existing: Vec<String> = selected
            .iter()
            .filter_map(|s| match &s.source {
                SlotSource::Existing(id) => Some(id.clone()),
                SlotSource::Added(_) => None,
            })
            .collect();

        let mut index = 0;
        working.add.retain(|_| {
            let keep = !added.contains(&index);
            index += 1;
            keep
        });
        working.update.retain(|u| !existing.contains(&u.profile_id));
        working.touched.retain(|id| !existing.contains(id));

        let attributes = ProfileAttributes {
            topic: topic.to_string(),
            sub_topic,
        };
        match target {
            Some((profile_id, _)) => {
                working
                    .delete
                    .extend(existing.into_iter().filter(|id| *id != profile_id));
                working.update.push(ProfileUpdate {
                    profile_id,
                    content,
                    attributes,
                });
            }
            None => working.add.push(ProfileDelta::new(&content, attributes)),
        }
        Ok(())
    }
}
