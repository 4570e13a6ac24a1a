//! 上下文组装
//!
//! Selects profile entries and recent events that fit a token budget and
//! renders them for prompt injection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{EventRepository, ProfileEntry, ProfileRepository, normalize_key};
use crate::services::profile_cache::ProfileCache;
use crate::services::tokenizer::TokenCounter;

pub const DEFAULT_PROFILE_EVENT_RATIO: f32 = 0.6;
const PROFILE_HEADER: &str = "## User Profile";
const EVENT_HEADER: &str = "## Recent Events";

/// Arguments of one context assembly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRequest {
    pub max_token_size: usize,
    #[serde(default)]
    pub prefer_topics: Vec<String>,
    #[serde(default)]
    pub only_topics: Option<Vec<String>>,
    #[serde(default)]
    pub max_subtopic_size: Option<usize>,
    /// JSON object of topic → sub-topic cap
    #[serde(default)]
    pub topic_limits_json: Option<String>,
    #[serde(default)]
    pub profile_event_ratio: Option<f32>,
    #[serde(default = "default_require_event_summary")]
    pub require_event_summary: bool,
}

fn default_require_event_summary() -> bool {
    true
}

impl ContextRequest {
    pub fn new(max_token_size: usize) -> Self {
        Self {
            max_token_size,
            prefer_topics: Vec::new(),
            only_topics: None,
            max_subtopic_size: None,
            topic_limits_json: None,
            profile_event_ratio: None,
            require_event_summary: true,
        }
    }
}

/// Filters for a structured profile listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileQuery {
    #[serde(default)]
    pub max_token_size: Option<usize>,
    #[serde(default)]
    pub prefer_topics: Vec<String>,
    #[serde(default)]
    pub only_topics: Option<Vec<String>>,
    #[serde(default)]
    pub max_subtopic_size: Option<usize>,
    #[serde(default)]
    pub topic_limits_json: Option<String>,
}

/// Parsed topic filters shared by both entry points
#[derive(Debug, Default)]
struct TopicFilter {
    prefer: Vec<String>,
    only: Option<HashSet<String>>,
    max_subtopics: Option<usize>,
    limits: HashMap<String, usize>,
}

impl TopicFilter {
    fn parse(
        prefer: &[String],
        only: Option<&[String]>,
        max_subtopics: Option<usize>,
        limits_json: Option<&str>,
    ) -> Result<Self> {
        let limits = match limits_json.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => parse_topic_limits(raw)?,
            None => HashMap::new(),
        };
        let mut seen = HashSet::new();
        Ok(Self {
            prefer: prefer
                .iter()
                .map(|t| normalize_key(t))
                .filter(|t| !t.is_empty() && seen.insert(t.clone()))
                .collect(),
            only: only.map(|topics| topics.iter().map(|t| normalize_key(t)).collect()),
            max_subtopics,
            limits,
        })
    }

    fn limit_for(&self, topic: &str) -> Option<usize> {
        self.limits.get(topic).copied().or(self.max_subtopics)
    }

    /// Candidate entries in inclusion order, before any budget is applied.
    fn order<'a>(&self, profiles: &'a [ProfileEntry]) -> Vec<&'a ProfileEntry> {
        let mut by_topic: HashMap<&str, Vec<&ProfileEntry>> = HashMap::new();
        for entry in profiles {
            if let Some(only) = &self.only {
                if !only.contains(&entry.topic) {
                    continue;
                }
            }
            by_topic.entry(entry.topic.as_str()).or_default().push(entry);
        }

        let latest = |entries: &[&ProfileEntry]| -> Option<DateTime<Utc>> {
            entries.iter().map(|e| e.updated_at).max()
        };
        let mut rest: Vec<&str> = by_topic
            .keys()
            .copied()
            .filter(|t| !self.prefer.iter().any(|p| p == t))
            .collect();
        rest.sort_by(|a, b| {
            latest(&by_topic[b])
                .cmp(&latest(&by_topic[a]))
                .then_with(|| a.cmp(b))
        });
        let topics = self
            .prefer
            .iter()
            .map(String::as_str)
            .filter(|t| by_topic.contains_key(t))
            .chain(rest);

        let mut ordered = Vec::new();
        for topic in topics {
            let mut entries = by_topic[topic].clone();
            entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.sub_topic.cmp(&b.sub_topic)));
            if let Some(limit) = self.limit_for(topic) {
                entries.truncate(limit);
            }
            ordered.extend(entries);
        }
        ordered
    }
}

/// Parse `{"topic": n, ...}` with non-negative integer caps.
pub fn parse_topic_limits(raw: &str) -> Result<HashMap<String, usize>> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| AppError::BadFilter(format!("topic_limits is not valid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| AppError::BadFilter("topic_limits must be a JSON object".into()))?;

    object
        .iter()
        .map(|(topic, limit)| {
            let limit = limit
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| {
                    AppError::BadFilter(format!(
                        "topic_limits[{}] must be a non-negative integer, got {}",
                        topic, limit
                    ))
                })?;
            Ok((normalize_key(topic), limit))
        })
        .collect()
}

/// Picks lines in order until the next one does not fit.
struct Budget<'a> {
    tokens: &'a dyn TokenCounter,
    remaining: usize,
}

impl Budget<'_> {
    /// Cost of `line` plus the section header when it is the first line.
    fn try_take(&mut self, line: &str, header: Option<&str>) -> bool {
        let mut cost = self.tokens.count_tokens(line) + 1;
        if let Some(header) = header {
            cost += self.tokens.count_tokens(header) + 1;
        }
        if cost > self.remaining {
            return false;
        }
        self.remaining -= cost;
        true
    }
}

fn render(profile_lines: &[String], event_lines: &[String]) -> String {
    let mut sections = Vec::new();
    if !profile_lines.is_empty() {
        sections.push(format!("{}\n{}", PROFILE_HEADER, profile_lines.join("\n")));
    }
    if !event_lines.is_empty() {
        sections.push(format!("{}\n{}", EVENT_HEADER, event_lines.join("\n")));
    }
    sections.join("\n\n")
}

pub struct ContextAssembler {
    profiles: Arc<dyn ProfileRepository>,
    events: Arc<dyn EventRepository>,
    cache: Arc<ProfileCache>,
    tokens: Arc<dyn TokenCounter>,
    max_events: usize,
}

impl ContextAssembler {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        events: Arc<dyn EventRepository>,
        cache: Arc<ProfileCache>,
        tokens: Arc<dyn TokenCounter>,
        max_events: usize,
    ) -> Self {
        Self {
            profiles,
            events,
            cache,
            tokens,
            max_events,
        }
    }

    /// Read-through the profile cache
    async fn snapshot(&self, project_id: &str, user_id: &str) -> Result<Arc<Vec<ProfileEntry>>> {
        if let Some(cached) = self.cache.get(project_id, user_id).await {
            return Ok(cached);
        }
        let generation = self.cache.generation(project_id, user_id).await;
        let profiles = self.profiles.list_profiles(project_id, user_id).await?;
        Ok(self.cache.put(project_id, user_id, generation, profiles).await)
    }

    fn profile_line(entry: &ProfileEntry, sep: &str) -> String {
        format!("- {}{}{}: {}", entry.topic, sep, entry.sub_topic, entry.content)
    }

    /// Render profile and event context within `max_token_size` tokens.
    pub async fn assemble(
        &self,
        project_id: &str,
        user_id: &str,
        request: &ContextRequest,
        sep: &str,
    ) -> Result<String> {
        let ratio = request.profile_event_ratio.unwrap_or(DEFAULT_PROFILE_EVENT_RATIO);
        if !(0.0..=1.0).contains(&ratio) {
            return Err(AppError::BadFilter(format!(
                "profile_event_ratio must be within [0, 1], got {}",
                ratio
            )));
        }
        let filter = TopicFilter::parse(
            &request.prefer_topics,
            request.only_topics.as_deref(),
            request.max_subtopic_size,
            request.topic_limits_json.as_deref(),
        )?;
        if request.max_token_size == 0 {
            return Ok(String::new());
        }

        let profiles = self.snapshot(project_id, user_id).await?;
        let profile_budget = if request.require_event_summary {
            (request.max_token_size as f64 * f64::from(ratio)).floor() as usize
        } else {
            request.max_token_size
        };

        let mut budget = Budget {
            tokens: self.tokens.as_ref(),
            remaining: profile_budget,
        };
        let mut profile_lines = Vec::new();
        for entry in filter.order(&profiles) {
            let line = Self::profile_line(entry, sep);
            let header = profile_lines.is_empty().then_some(PROFILE_HEADER);
            if !budget.try_take(&line, header) {
                break;
            }
            profile_lines.push(line);
        }
        let profile_used = profile_budget - budget.remaining;

        let mut event_lines = Vec::new();
        if request.require_event_summary {
            let events = self
                .events
                .list_events(project_id, user_id, self.max_events)
                .await?;
            let mut budget = Budget {
                tokens: self.tokens.as_ref(),
                // blank line between sections
                remaining: request.max_token_size.saturating_sub(profile_used + 1),
            };
            for event in &events {
                let Some(text) = event.summary_text() else {
                    continue;
                };
                let line = format!("- [{}] {}", event.created_at.format("%Y/%m/%d"), text);
                let header = event_lines.is_empty().then_some(EVENT_HEADER);
                if !budget.try_take(&line, header) {
                    break;
                }
                event_lines.push(line);
            }
        }

        let mut rendered = render(&profile_lines, &event_lines);
        while !rendered.is_empty() && self.tokens.count_tokens(&rendered) > request.max_token_size {
            if event_lines.pop().is_none() {
                profile_lines.pop();
            }
            rendered = render(&profile_lines, &event_lines);
        }

        tracing::debug!(
            "Assembled context for {}/{}: {} profile lines, {} event lines",
            project_id,
            user_id,
            profile_lines.len(),
            event_lines.len()
        );
        Ok(rendered)
    }

    /// Profile entries selected by the same rules as [`Self::assemble`],
    /// with the whole budget given to the profile.
    pub async fn get_profiles(
        &self,
        project_id: &str,
        user_id: &str,
        query: &ProfileQuery,
        sep: &str,
    ) -> Result<Vec<ProfileEntry>> {
        let filter = TopicFilter::parse(
            &query.prefer_topics,
            query.only_topics.as_deref(),
            query.max_subtopic_size,
            query.topic_limits_json.as_deref(),
        )?;
        let profiles = self.snapshot(project_id, user_id).await?;
        let ordered = filter.order(&profiles);

        let Some(max_tokens) = query.max_token_size else {
            return Ok(ordered.into_iter().cloned().collect());
        };
        let mut budget = Budget {
            tokens: self.tokens.as_ref(),
            remaining: max_tokens,
        };
        let mut selected = Vec::new();
        for entry in ordered {
            if !budget.try_take(&Self::profile_line(entry, sep), None) {
                break;
            }
            selected.push(entry.clone());
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProfileAttributes, ProfileDelta, ProfileUpdate, UserEvent};
    use crate::services::tokenizer::TiktokenCounter;
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rstest::rstest;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn entry(topic: &str, sub_topic: &str, content: &str, age_hours: i64) -> ProfileEntry {
        let mut e = ProfileEntry::new("u1", "p1", content, &ProfileAttributes::new(topic, sub_topic));
        e.updated_at = e.updated_at - ChronoDuration::hours(age_hours);
        e
    }

    async fn assembler(profiles: Vec<ProfileEntry>, events: Vec<UserEvent>) -> ContextAssembler {
        let store = Arc::new(InMemoryStore::new());
        for p in &profiles {
            store.insert_profile(p).await.unwrap();
        }
        for e in &events {
            store.append_event(e).await.unwrap();
        }
        ContextAssembler::new(
            store.clone(),
            store,
            Arc::new(ProfileCache::new(Duration::from_secs(60))),
            Arc::new(TiktokenCounter::new().unwrap()),
            10,
        )
    }

    fn sample() -> Vec<ProfileEntry> {
        vec![
            entry("interest", "exercise", "runs 5k every morning", 1),
            entry("interest", "music", "likes jazz", 5),
            entry("work", "title", "staff engineer", 2),
            entry("basic_info", "name", "Gus", 48),
        ]
    }

    #[rstest]
    #[case("not-json")]
    #[case("[1, 2]")]
    #[case(r#"{"interest": -1}"#)]
    #[case(r#"{"interest": "two"}"#)]
    #[case(r#"{"interest": 1.5}"#)]
    fn test_bad_topic_limits(#[case] raw: &str) {
        assert!(matches!(parse_topic_limits(raw), Err(AppError::BadFilter(_))));
    }

    #[test]
    fn test_topic_limits_normalized() {
        let limits = parse_topic_limits(r#"{"Basic Info": 2, "work": 0}"#).unwrap();
        assert_eq!(limits["basic_info"], 2);
        assert_eq!(limits["work"], 0);
    }

    #[tokio::test]
    async fn test_bad_filters_fail_before_reading() {
        let assembler = assembler(sample(), vec![]).await;
        let mut request = ContextRequest::new(100);
        request.topic_limits_json = Some("not-json".into());
        let err = assembler.assemble("p1", "u1", &request, "::").await.unwrap_err();
        assert!(matches!(err, AppError::BadFilter(_)));

        let mut request = ContextRequest::new(100);
        request.profile_event_ratio = Some(1.5);
        let err = assembler.assemble("p1", "u1", &request, "::").await.unwrap_err();
        assert!(matches!(err, AppError::BadFilter(_)));
    }

    #[tokio::test]
    async fn test_renders_profile_and_events() {
        let event = UserEvent::new(
            "u1",
            "p1",
            Some("Talked about morning runs".into()),
            None,
            vec![ProfileDelta::new("runs 5k", ProfileAttributes::new("interest", "exercise"))],
        );
        let assembler = assembler(sample(), vec![event.clone()]).await;

        let context = assembler
            .assemble("p1", "u1", &ContextRequest::new(1000), "::")
            .await
            .unwrap();

        assert!(context.starts_with("## User Profile\n- interest::exercise: runs 5k every morning"));
        assert!(context.contains("\n\n## Recent Events\n"));
        assert!(context.contains(&format!(
            "- [{}] Talked about morning runs",
            event.created_at.format("%Y/%m/%d")
        )));
    }

    #[tokio::test]
    async fn test_topic_order_and_caps() {
        let assembler = assembler(sample(), vec![]).await;
        let mut request = ContextRequest::new(1000);
        request.require_event_summary = false;
        request.prefer_topics = vec!["Basic Info".into()];
        request.topic_limits_json = Some(r#"{"interest": 1}"#.into());

        let context = assembler.assemble("p1", "u1", &request, "::").await.unwrap();
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(
            lines,
            vec![
                "## User Profile",
                "- basic_info::name: Gus",
                "- interest::exercise: runs 5k every morning",
                "- work::title: staff engineer",
            ]
        );
    }

    #[tokio::test]
    async fn test_only_topics_filter() {
        let assembler = assembler(sample(), vec![]).await;
        let mut request = ContextRequest::new(1000);
        request.only_topics = Some(vec!["work".into()]);
        let context = assembler.assemble("p1", "u1", &request, "::").await.unwrap();
        assert_eq!(context, "## User Profile\n- work::title: staff engineer");
    }

    #[rstest]
    #[case(0)]
    #[case(5)]
    #[case(12)]
    #[case(20)]
    #[case(40)]
    #[tokio::test]
    async fn test_budget_is_respected(#[case] max_tokens: usize) {
        let events: Vec<UserEvent> = (0..5)
            .map(|i| UserEvent::new("u1", "p1", Some(format!("event number {}", i)), None, vec![]))
            .collect();
        let assembler = assembler(sample(), events).await;
        let counter = TiktokenCounter::new().unwrap();

        let context = assembler
            .assemble("p1", "u1", &ContextRequest::new(max_tokens), "::")
            .await
            .unwrap();
        assert!(counter.count_tokens(&context) <= max_tokens, "{}", context);
    }

    #[tokio::test]
    async fn test_empty_profile_renders_empty() {
        let assembler = assembler(vec![], vec![]).await;
        let context = assembler
            .assemble("p1", "u1", &ContextRequest::new(1000), "::")
            .await
            .unwrap();
        assert_eq!(context, "");
    }

    #[tokio::test]
    async fn test_get_profiles_structured() {
        let assembler = assembler(sample(), vec![]).await;
        let all = assembler
            .get_profiles("p1", "u1", &ProfileQuery::default(), "::")
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].sub_topic, "exercise");

        let query = ProfileQuery {
            max_subtopic_size: Some(1),
            only_topics: Some(vec!["interest".into()]),
            ..ProfileQuery::default()
        };
        let capped = assembler.get_profiles("p1", "u1", &query, "::").await.unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].content, "runs 5k every morning");
    }

    /// Reads the store immediately but hands the result back only when
    /// released, so writes can land mid-read.
    struct SlowReads {
        inner: Arc<InMemoryStore>,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ProfileRepository for SlowReads {
        async fn list_profiles(&self, project_id: &str, user_id: &str) -> Result<Vec<ProfileEntry>> {
            let snapshot = self.inner.list_profiles(project_id, user_id).await?;
            self.entered.notify_one();
            self.release.notified().await;
            Ok(snapshot)
        }

        async fn get_profile(&self, project_id: &str, user_id: &str, profile_id: &str) -> Result<Option<ProfileEntry>> {
            self.inner.get_profile(project_id, user_id, profile_id).await
        }

        async fn insert_profile(&self, entry: &ProfileEntry) -> Result<()> {
            self.inner.insert_profile(entry).await
        }

        async fn update_profile(&self, project_id: &str, user_id: &str, update: &ProfileUpdate) -> Result<ProfileEntry> {
            self.inner.update_profile(project_id, user_id, update).await
        }

        async fn touch_profiles(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<()> {
            self.inner.touch_profiles(project_id, user_id, ids).await
        }

        async fn delete_profiles(&self, project_id: &str, user_id: &str, ids: &[String]) -> Result<usize> {
            self.inner.delete_profiles(project_id, user_id, ids).await
        }
    }

    #[tokio::test]
    async fn test_commit_during_read_is_not_hidden_by_cache() {
        let store = Arc::new(InMemoryStore::new());
        let slow = Arc::new(SlowReads {
            inner: store.clone(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let cache = Arc::new(ProfileCache::new(Duration::from_secs(60)));
        let assembler = ContextAssembler::new(
            slow.clone(),
            store.clone(),
            cache.clone(),
            Arc::new(TiktokenCounter::new().unwrap()),
            10,
        );

        let req = ContextRequest::new(500);
        let (in_flight, _) = tokio::join!(
            assembler.assemble("p1", "u1", &req, "::"),
            async {
                slow.entered.notified().await;
                store
                    .insert_profile(&entry("interest", "exercise", "runs 5k", 0))
                    .await
                    .unwrap();
                cache.invalidate("p1", "u1").await;
                slow.release.notify_one();
            }
        );
        // the read that started before the commit still serves its own snapshot
        assert_eq!(in_flight.unwrap(), "");
        assert_eq!(cache.len().await, 0);

        slow.release.notify_one();
        let context = assembler
            .assemble("p1", "u1", &ContextRequest::new(500), "::")
            .await
            .unwrap();
        assert!(context.contains("runs 5k"), "{}", context);
    }
}
