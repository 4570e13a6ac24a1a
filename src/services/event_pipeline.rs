//! 事件管线
//!
//! After a batch commits, records what changed as a [`UserEvent`] with an
//! optional tip and tags. Tip and tag failures only degrade the record.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::llm::{LlmRequest, LlmService, prompts};
use crate::models::{
    ChangeSet, EventRepository, EventTag, ProfileConfig, ProfileDelta, UserEvent, normalize_key,
};

const MAX_TAGS: usize = 5;

/// Parse `- tag{sep}value` lines, keeping configured tags only when a
/// vocabulary is set.
pub fn parse_tags(reply: &str, sep: &str, config: &ProfileConfig) -> Vec<EventTag> {
    let vocabulary: HashSet<String> = config.event_tags.iter().map(|t| normalize_key(&t.name)).collect();
    let mut seen = HashSet::new();

    reply
        .lines()
        .filter_map(|line| line.trim().strip_prefix('-'))
        .filter_map(|line| line.split_once(sep))
        .filter_map(|(tag, value)| {
            let tag = normalize_key(tag);
            let value = value.trim();
            if tag.is_empty() || value.is_empty() {
                return None;
            }
            if !vocabulary.is_empty() && !vocabulary.contains(&tag) {
                return None;
            }
            seen.insert(tag.clone()).then(|| EventTag {
                tag,
                value: value.to_string(),
            })
        })
        .take(MAX_TAGS)
        .collect()
}

pub struct EventPipeline {
    llm: LlmService,
    events: Arc<dyn EventRepository>,
}

impl EventPipeline {
    pub fn new(llm: LlmService, events: Arc<dyn EventRepository>) -> Self {
        Self { llm, events }
    }

    /// Short description of the batch.
    pub async fn summary_event(&self, conversation: &str, config: &ProfileConfig) -> Result<Option<String>> {
        let prompt = prompts::event_summary(conversation, config.language);
        let reply = self
            .llm
            .complete(&prompt.user, &LlmRequest::with_system(prompt.system))
            .await?;
        let tip = reply.trim();
        Ok((!tip.is_empty()).then(|| tip.to_string()))
    }

    /// Classify the delta and tip into at most five tags.
    pub async fn tag_event(
        &self,
        delta: &[ProfileDelta],
        tip: &str,
        config: &ProfileConfig,
    ) -> Result<Vec<EventTag>> {
        let lines = delta
            .iter()
            .map(ProfileDelta::describe)
            .collect::<Vec<_>>()
            .join("\n");
        let sep = &config.llm_tab_separator;
        let prompt = prompts::event_tags(&lines, tip, &config.event_tags, sep);
        let reply = self
            .llm
            .complete(&prompt.user, &LlmRequest::with_system(prompt.system))
            .await?;
        Ok(parse_tags(&reply, sep, config))
    }

    /// Append the event for a committed change set. Nothing is recorded for
    /// an empty change set; every failure here is logged and swallowed.
    pub async fn record(
        &self,
        project_id: &str,
        user_id: &str,
        conversation: &str,
        changes: &ChangeSet,
        config: &ProfileConfig,
    ) -> Option<UserEvent> {
        if changes.is_empty() {
            return None;
        }
        let delta = changes.delta();

        let tip = match self.summary_event(conversation, config).await {
            Ok(tip) => tip,
            Err(e) => {
                tracing::warn!("Event summary failed for {}/{}: {}", project_id, user_id, e);
                None
            }
        };

        let tags = match tip.as_deref() {
            Some(tip) => match self.tag_event(&delta, tip, config).await {
                Ok(tags) if !tags.is_empty() => Some(tags),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Event tagging failed for {}/{}: {}", project_id, user_id, e);
                    None
                }
            },
            None => None,
        };

        let event = UserEvent::new(user_id, project_id, tip, tags, delta);
        match self.events.append_event(&event).await {
            Ok(()) => Some(event),
            Err(e) => {
                tracing::error!("Failed to append event for {}/{}: {}", project_id, user_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::llm::{LlmClient, prompts::EVENT_SUMMARY_TASK};
    use crate::models::{EventTagConfig, ProfileAttributes};
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Scripted {
        tip: Result<String>,
        tags: &'static str,
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn complete(&self, prompt: &str, _request: &LlmRequest) -> Result<String> {
            if prompt.starts_with(EVENT_SUMMARY_TASK) {
                match &self.tip {
                    Ok(tip) => Ok(tip.clone()),
                    Err(e) => Err(AppError::Llm(e.to_string())),
                }
            } else {
                Ok(self.tags.to_string())
            }
        }
    }

    fn pipeline(tip: Result<String>, store: Arc<InMemoryStore>) -> EventPipeline {
        let llm = LlmService::new(
            Arc::new(Scripted {
                tip,
                tags: "- activity::running\n- mood::upbeat",
            }),
            Duration::from_secs(1),
        );
        EventPipeline::new(llm, store)
    }

    fn changes() -> ChangeSet {
        ChangeSet {
            add: vec![ProfileDelta::new("runs 5k", ProfileAttributes::new("interest", "exercise"))],
            ..ChangeSet::default()
        }
    }

    #[test]
    fn test_parse_tags() {
        let mut config = ProfileConfig::default();
        let reply = "- Activity :: running\n- mood::upbeat\nnoise\n- activity::again\n-::empty";
        let tags = parse_tags(reply, "::", &config);
        assert_eq!(
            tags,
            vec![
                EventTag { tag: "activity".into(), value: "running".into() },
                EventTag { tag: "mood".into(), value: "upbeat".into() },
            ]
        );

        config.event_tags = vec![EventTagConfig { name: "mood".into(), description: None }];
        let tags = parse_tags(reply, "::", &config);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag, "mood");

        let many: String = (0..8).map(|i| format!("- t{}::v\n", i)).collect();
        assert_eq!(parse_tags(&many, "::", &ProfileConfig::default()).len(), MAX_TAGS);
    }

    #[tokio::test]
    async fn test_record_with_tip_and_tags() {
        let store = Arc::new(InMemoryStore::new());
        let event = pipeline(Ok("Talked about running".into()), store.clone())
            .record("p1", "u1", "user: I run", &changes(), &ProfileConfig::default())
            .await
            .unwrap();
        assert_eq!(event.event_tip.as_deref(), Some("Talked about running"));
        assert_eq!(event.event_tags.as_ref().map(Vec::len), Some(2));
        assert_eq!(event.profile_delta.len(), 1);
        assert_eq!(store.list_events("p1", "u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tip_failure_still_records() {
        let store = Arc::new(InMemoryStore::new());
        let event = pipeline(Err(AppError::Llm("down".into())), store.clone())
            .record("p1", "u1", "user: I run", &changes(), &ProfileConfig::default())
            .await
            .unwrap();
        assert!(event.event_tip.is_none());
        assert!(event.event_tags.is_none());
        assert_eq!(store.list_events("p1", "u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_event_for_empty_change_set() {
        let store = Arc::new(InMemoryStore::new());
        let mut touched_only = ChangeSet::default();
        touched_only.touched.push("x".into());
        let event = pipeline(Ok("tip".into()), store.clone())
            .record("p1", "u1", "user: hi", &touched_only, &ProfileConfig::default())
            .await;
        assert!(event.is_none());
        assert!(store.list_events("p1", "u1", 10).await.unwrap().is_empty());
    }
}
